use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use blip_proto::MessageIn;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput {
    #[serde(rename = "type")]
    message_type: &'static str,
    number: u64,
    flags: String,
    properties: Vec<(String, String)>,
    body_size: usize,
    body: String,
}

pub fn print_message(message: &MessageIn, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                message_type: message.message_type().name(),
                number: message.number(),
                flags: format!("{:02x}", message.flags().bits()),
                properties: property_strings(message),
                body_size: message.body().len(),
                body: payload_preview(message.body()),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "NUMBER", "PROPERTIES", "SIZE", "BODY"])
                .add_row(vec![
                    message.message_type().name().to_string(),
                    message.number().to_string(),
                    property_strings(message)
                        .iter()
                        .map(|(name, value)| format!("{name}={value}"))
                        .collect::<Vec<_>>()
                        .join(", "),
                    message.body().len().to_string(),
                    payload_preview(message.body()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} #{} flags={:02x} properties=[{}] size={} body={}",
                message.message_type().name(),
                message.number(),
                message.flags().bits(),
                property_strings(message)
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join(", "),
                message.body().len(),
                payload_preview(message.body())
            );
        }
        OutputFormat::Raw => {
            print_raw(message.body());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn property_strings(message: &MessageIn) -> Vec<(String, String)> {
    message
        .property_pairs()
        .into_iter()
        .map(|(name, value)| (lossy(name), lossy(value)))
        .collect()
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

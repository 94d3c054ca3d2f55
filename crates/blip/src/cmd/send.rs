use std::fs;
use std::time::Duration;

use blip_proto::{Connection, MessageBuilder, NullDelegate};

use crate::cmd::SendArgs;
use crate::exit::{
    connection_error, response_error, transport_error, CliError, CliResult, FAILURE, SUCCESS,
    USAGE,
};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let properties = parse_properties(&args.properties)?;
    let body = resolve_body(&args)?;

    let stream =
        blip_io::connect(&args.path).map_err(|err| transport_error("connect failed", err))?;
    let connection = Connection::over_stream(stream, Box::new(NullDelegate))
        .map_err(|err| connection_error("connection setup failed", err))?;

    let mut builder = MessageBuilder::new();
    builder.urgent = args.urgent;
    builder.no_reply = args.no_reply;
    if let Some(profile) = &args.profile {
        builder.add_property("Profile", profile);
    }
    for (name, value) in &properties {
        builder.add_property(name, value);
    }
    builder.write(&body);

    let reply = connection
        .send_request(&mut builder)
        .map_err(|err| connection_error("send failed", err))?;

    match reply {
        None => {
            connection.flush();
            Ok(SUCCESS)
        }
        Some(future) => {
            let response = future
                .wait_timeout(timeout)
                .map_err(|err| response_error("receive failed", err))?;
            print_message(&response, format);
            if response.is_error() {
                Ok(FAILURE)
            } else {
                Ok(SUCCESS)
            }
        }
    }
}

fn resolve_body(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

fn parse_properties(raw: &[String]) -> CliResult<Vec<(String, String)>> {
    raw.iter()
        .map(|entry| {
            let (name, value) = entry
                .split_once('=')
                .ok_or_else(|| CliError::new(USAGE, format!("--property '{entry}' is not NAME=VALUE")))?;
            for side in [name, value] {
                if side.contains('\0') {
                    return Err(CliError::new(
                        USAGE,
                        format!("--property '{entry}' contains a NUL byte"),
                    ));
                }
                if side.bytes().next().is_some_and(|first| first < 32) {
                    return Err(CliError::new(
                        USAGE,
                        format!("--property '{entry}' starts with a control byte"),
                    ));
                }
            }
            Ok((name.to_string(), value.to_string()))
        })
        .collect()
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_properties_splits_on_first_equals() {
        let parsed = parse_properties(&["a=1".into(), "b=x=y".into()]).unwrap();
        assert_eq!(
            parsed,
            vec![("a".into(), "1".into()), ("b".into(), "x=y".into())]
        );
    }

    #[test]
    fn parse_properties_rejects_bad_entries() {
        assert!(parse_properties(&["no-equals".into()]).is_err());
        assert!(parse_properties(&["a=\u{1}ctl".into()]).is_err());
        assert!(parse_properties(&["\u{1}a=v".into()]).is_err());
    }

    #[test]
    fn resolve_body_prefers_data() {
        let args = SendArgs {
            path: "/tmp/x.sock".into(),
            profile: None,
            properties: vec![],
            data: Some("hello".into()),
            file: None,
            urgent: false,
            no_reply: false,
            timeout: "5s".into(),
        };
        assert_eq!(resolve_body(&args).unwrap(), b"hello");
    }

    #[test]
    fn resolve_body_defaults_empty() {
        let args = SendArgs {
            path: "/tmp/x.sock".into(),
            profile: None,
            properties: vec![],
            data: None,
            file: None,
            urgent: false,
            no_reply: false,
            timeout: "5s".into(),
        };
        assert!(resolve_body(&args).unwrap().is_empty());
    }
}

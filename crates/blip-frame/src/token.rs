//! Well-known property strings abbreviated to a single byte on the wire.

/// Property names and values that are encoded as one byte (the 1-based table
/// index). CHANGING OR REORDERING THIS TABLE BREAKS WIRE COMPATIBILITY.
pub const WELL_KNOWN: [&[u8]; 14] = [
    b"Profile",
    b"Error-Code",
    b"Error-Domain",
    b"Content-Type",
    b"application/json",
    b"application/octet-stream",
    b"text/plain; charset=UTF-8",
    b"text/xml",
    b"Accept",
    b"Cache-Control",
    b"must-revalidate",
    b"If-Match",
    b"If-None-Match",
    b"Location",
];

/// Highest valid token byte.
pub const MAX_TOKEN: u8 = WELL_KNOWN.len() as u8;

/// The single-byte token for `s`, if it is one of the well-known strings.
pub fn tokenize(s: &[u8]) -> Option<u8> {
    WELL_KNOWN
        .iter()
        .position(|known| *known == s)
        .map(|index| (index + 1) as u8)
}

/// The well-known string for a token byte (1-based index into the table).
pub fn token_string(token: u8) -> Option<&'static [u8]> {
    if (1..=MAX_TOKEN).contains(&token) {
        Some(WELL_KNOWN[usize::from(token) - 1])
    } else {
        None
    }
}

/// Expand a property segment as read off the wire: a lone token byte maps to
/// its table string, anything else is returned verbatim.
pub fn expand(segment: &[u8]) -> &[u8] {
    match segment {
        [token] => token_string(*token).unwrap_or(segment),
        _ => segment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_entry_roundtrips() {
        for (index, known) in WELL_KNOWN.iter().enumerate() {
            let token = tokenize(known).expect("table entry should tokenize");
            assert_eq!(usize::from(token), index + 1);
            assert_eq!(token_string(token), Some(*known));
            assert_eq!(expand(&[token]), *known);
        }
    }

    #[test]
    fn frozen_table_positions() {
        // Wire contract: these indices must never move.
        assert_eq!(tokenize(b"Profile"), Some(1));
        assert_eq!(tokenize(b"Error-Code"), Some(2));
        assert_eq!(tokenize(b"Error-Domain"), Some(3));
        assert_eq!(tokenize(b"Content-Type"), Some(4));
        assert_eq!(tokenize(b"Location"), Some(14));
    }

    #[test]
    fn unknown_strings_do_not_tokenize() {
        assert_eq!(tokenize(b"X-Custom"), None);
        assert_eq!(tokenize(b""), None);
        assert_eq!(tokenize(b"profile"), None, "matching is case-sensitive");
    }

    #[test]
    fn out_of_range_tokens_have_no_string() {
        assert_eq!(token_string(0), None);
        assert_eq!(token_string(15), None);
        assert_eq!(token_string(0xff), None);
    }

    #[test]
    fn expand_leaves_plain_segments_alone() {
        assert_eq!(expand(b"subChanges"), b"subChanges");
        assert_eq!(expand(b""), b"");
        // A single printable byte is not a token.
        assert_eq!(expand(b"x"), b"x");
        // An out-of-range control byte is returned as-is.
        assert_eq!(expand(&[15]), &[15]);
    }
}

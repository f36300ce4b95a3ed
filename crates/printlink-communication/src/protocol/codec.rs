//! Text line codec
//!
//! Lines sent with checksums are framed as `N<seq> <line>*<checksum>`, where
//! the checksum is the XOR of every byte before the `*`.

use super::gcode;
use printlink_core::ProtocolError;

/// XOR of all bytes of the text
pub fn checksum(text: &str) -> u8 {
    text.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Frame a line with a sequence number and checksum
pub fn frame(seq: u64, line: &str) -> String {
    let numbered = format!("N{} {}", seq, line);
    let cs = checksum(&numbered);
    format!("{}*{}", numbered, cs)
}

/// Strip comments and surrounding whitespace, `None` when nothing is left
pub fn prepare_line(raw: &str) -> Option<String> {
    let code = gcode::strip_comment(raw);
    if code.is_empty() {
        None
    } else {
        Some(code.to_string())
    }
}

/// A framed line taken apart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedLine {
    /// Sequence number
    pub seq: u64,
    /// Line text without number or checksum
    pub line: String,
    /// Checksum carried by the line
    pub checksum: u8,
}

/// Parse and validate a framed line
pub fn parse_framed(text: &str) -> Result<FramedLine, ProtocolError> {
    let text = text.trim();
    let malformed = || ProtocolError::MalformedLine {
        line: text.to_string(),
    };

    let (numbered, carried) = text.rsplit_once('*').ok_or_else(malformed)?;
    let carried: u8 = carried.trim().parse().map_err(|_| malformed())?;

    let rest = numbered.strip_prefix('N').ok_or_else(malformed)?;
    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let seq: u64 = rest[..digits].parse().map_err(|_| malformed())?;

    let expected = checksum(numbered);
    if expected != carried {
        return Err(ProtocolError::ChecksumMismatch {
            line_number: seq,
            expected,
            actual: carried,
        });
    }

    Ok(FramedLine {
        seq,
        line: rest[digits..].trim().to_string(),
        checksum: carried,
    })
}

/// Check if the line is a line-number reset (`M110`)
pub fn is_reset(line: &str) -> bool {
    gcode::is_command(line, "M110")
}

/// Check if the line is a firmware restart (`M999`)
pub fn is_restart(line: &str) -> bool {
    gcode::is_command(line, "M999")
}

/// The reset line re-basing the counter so the next line is `next_seq`
pub fn reset_line(next_seq: u64) -> String {
    format!("M110 N{}", next_seq.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_values() {
        // N1 G1 X10 -> every byte XORed together
        let expected = "N1 G1 X10".bytes().fold(0, |a, b| a ^ b);
        assert_eq!(checksum("N1 G1 X10"), expected);
        assert_eq!(checksum(""), 0);
    }

    #[test]
    fn test_frame() {
        let framed = frame(1, "G1 X10");
        assert!(framed.starts_with("N1 G1 X10*"));
        assert_eq!(framed, format!("N1 G1 X10*{}", checksum("N1 G1 X10")));
    }

    #[test]
    fn test_parse_framed_round_trip() {
        let parsed = parse_framed(&frame(42, "M105")).unwrap();
        assert_eq!(parsed.seq, 42);
        assert_eq!(parsed.line, "M105");
    }

    #[test]
    fn test_parse_framed_rejects_bad_checksum() {
        let framed = frame(7, "G28");
        let (body, cs) = framed.rsplit_once('*').unwrap();
        let wrong = cs.parse::<u8>().unwrap().wrapping_add(1);
        let err = parse_framed(&format!("{}*{}", body, wrong)).unwrap_err();
        assert!(matches!(err, ProtocolError::ChecksumMismatch { line_number: 7, .. }));
    }

    #[test]
    fn test_parse_framed_rejects_garbage() {
        assert!(matches!(
            parse_framed("G1 X10"),
            Err(ProtocolError::MalformedLine { .. })
        ));
    }

    #[test]
    fn test_prepare_line() {
        assert_eq!(prepare_line("  G1 X10 ; move "), Some("G1 X10".to_string()));
        assert_eq!(prepare_line("; only a comment"), None);
    }

    #[test]
    fn test_reset_line() {
        assert_eq!(reset_line(1), "M110 N0");
        assert!(is_reset(&reset_line(1)));
        assert!(is_restart("M999"));
    }
}

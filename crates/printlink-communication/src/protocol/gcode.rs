//! G-code field helpers
//!
//! The link never interprets G-code. It only pulls known numeric fields out of
//! specific commands and rewrites them, so these helpers work on plain text.

use printlink_core::{Axis, Move, PositionMode};

/// Find the first number following `key` anywhere in the line.
///
/// Spaces between the key and the number are skipped. Occurrences of the key
/// not followed by a number are passed over.
pub fn number_after(line: &str, key: &str) -> Option<f64> {
    let mut search_from = 0;
    while let Some(found) = line[search_from..].find(key) {
        let start = search_from + found + key.len();
        if let Some((value, _)) = parse_number(&line[start..]) {
            return Some(value);
        }
        search_from = start;
    }
    None
}

/// Value of a single-letter G-code word (`X`, `F`, `S`...), matching only
/// where the letter starts a word.
pub fn word_value(line: &str, letter: char) -> Option<f64> {
    word_span(line, letter).and_then(|span| line[span.value_start..span.end].parse().ok())
}

/// Check if a word with this letter is present
pub fn has_word(line: &str, letter: char) -> bool {
    word_span(line, letter).is_some()
}

/// Check if a bare axis flag (`G28 X`) or axis word is present
pub fn has_axis_flag(line: &str, letter: char) -> bool {
    strip_comment(line)
        .split_whitespace()
        .skip(1)
        .any(|word| word.chars().next().is_some_and(|c| c.eq_ignore_ascii_case(&letter)))
}

/// Replace the value of a single-letter word, appending the word when missing
pub fn replace_word(line: &str, letter: char, value: f64) -> String {
    match word_span(line, letter) {
        Some(span) => format!(
            "{}{}{}",
            &line[..span.value_start],
            format_number(value),
            &line[span.end..]
        ),
        None => {
            let code = strip_comment(line);
            format!("{} {}{}", code, letter, format_number(value))
        }
    }
}

/// Remove a single-letter word and its value
pub fn remove_word(line: &str, letter: char) -> String {
    match word_span(line, letter) {
        Some(span) => {
            let before = line[..span.letter].trim_end();
            let after = line[span.end..].trim_start();
            if after.is_empty() {
                before.to_string()
            } else {
                format!("{} {}", before, after)
            }
        }
        None => line.to_string(),
    }
}

/// Location of a parameter word inside a line
struct WordSpan {
    letter: usize,
    value_start: usize,
    end: usize,
}

fn word_span(line: &str, letter: char) -> Option<WordSpan> {
    let code = match line.find(';') {
        Some(index) => &line[..index],
        None => line,
    };
    let bytes = code.as_bytes();
    let command_start = code.len() - code.trim_start().len();
    let upper = letter.to_ascii_uppercase() as u8;
    for (i, b) in bytes.iter().enumerate() {
        // The command word itself (`G1`) is never a parameter.
        if i <= command_start || b.to_ascii_uppercase() != upper {
            continue;
        }
        let prev = bytes[i - 1];
        if !(prev.is_ascii_whitespace() || prev.is_ascii_digit()) {
            continue;
        }
        if let Some((_, len)) = parse_number(&code[i + 1..]) {
            let rest = &code[i + 1..];
            let skipped = rest.len() - rest.trim_start_matches(' ').len();
            return Some(WordSpan {
                letter: i,
                value_start: i + 1 + skipped,
                end: i + 1 + len,
            });
        }
    }
    None
}

/// Parse a leading number, skipping leading spaces.
///
/// Returns the value and the number of bytes consumed, spaces included.
fn parse_number(text: &str) -> Option<(f64, usize)> {
    let trimmed = text.trim_start_matches(' ');
    let skipped = text.len() - trimmed.len();
    let bytes = trimmed.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    let digits_start = end;
    let mut seen_point = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => end += 1,
            b'.' if !seen_point => {
                seen_point = true;
                end += 1;
            }
            _ => break,
        }
    }
    let number = &trimmed[..end];
    if end == digits_start || number == "." || number.ends_with(['-', '+']) {
        return None;
    }
    number.parse::<f64>().ok().map(|v| (v, skipped + end))
}

/// Text before any `;` comment, trimmed
pub fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(index) => line[..index].trim(),
        None => line.trim(),
    }
}

/// Format a number the way the link writes G-code: at most five decimals,
/// no trailing zeros and no `-0`.
pub fn format_number(value: f64) -> String {
    let text = format!("{:.5}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

/// Leading command word (`G1`, `M104`, `T0`), uppercased
pub fn command(line: &str) -> String {
    let code = strip_comment(line);
    let mut chars = code.char_indices();
    let Some((_, first)) = chars.next() else {
        return String::new();
    };
    if !first.is_ascii_alphabetic() {
        return code
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
    }
    let end = chars
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(code.len());
    code[..end].to_ascii_uppercase()
}

/// Check if the line starts with the given command word
pub fn is_command(line: &str, word: &str) -> bool {
    command(line) == word
}

/// Check if the line is a `G0`/`G1` move
pub fn is_move(line: &str) -> bool {
    matches!(command(line).as_str(), "G0" | "G1" | "G00" | "G01")
}

/// Check if the line is a slicer layer-change marker
pub fn is_layer_change(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with(";LAYER:") || trimmed.starts_with("; LAYER:")
}

/// Zero-based layer index of a layer-change marker
pub fn layer_number(line: &str) -> Option<u32> {
    if !is_layer_change(line) {
        return None;
    }
    line.split(':').nth(1)?.trim().parse().ok()
}

/// Split configured multi-line text on real or literal `\n`
pub fn split_lines(text: &str) -> Vec<String> {
    text.replace("\\n", "\n")
        .split('\n')
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Build a `G1` line for a destination
pub fn movement_line(destination: &Move) -> String {
    let mut line = format!(
        "G1 X{} Y{} Z{}",
        format_number(destination.x),
        format_number(destination.y),
        format_number(destination.z)
    );
    if destination.feed_rate > 0.0 {
        line.push_str(&format!(" F{}", format_number(destination.feed_rate)));
    }
    line
}

/// Tracks the position a stream of G-code commands leaves the machine at
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    position: Move,
    motion_mode: PositionMode,
    extrusion_mode: PositionMode,
}

impl PositionTracker {
    /// Create a tracker at the origin in absolute mode
    pub fn new() -> Self {
        Self::default()
    }

    /// Current believed position
    pub fn position(&self) -> Move {
        self.position
    }

    /// Overwrite the believed position
    pub fn set_position(&mut self, position: Move) {
        self.position = position;
    }

    /// Current XYZ mode
    pub fn motion_mode(&self) -> PositionMode {
        self.motion_mode
    }

    /// Current extruder mode
    pub fn extrusion_mode(&self) -> PositionMode {
        self.extrusion_mode
    }

    /// Destination of a move line without updating the tracker
    pub fn destination_of(&self, line: &str) -> Move {
        let mut destination = self.position;
        for axis in [Axis::X, Axis::Y, Axis::Z] {
            if let Some(value) = word_value(line, axis.letter()) {
                let base = match self.motion_mode {
                    PositionMode::Absolute => 0.0,
                    PositionMode::Relative => self.position.axis(axis),
                };
                destination.set_axis(axis, base + value);
            }
        }
        if let Some(value) = word_value(line, 'E') {
            let base = match self.extrusion_mode {
                PositionMode::Absolute => 0.0,
                PositionMode::Relative => self.position.e,
            };
            destination.e = base + value;
        }
        if let Some(feed) = word_value(line, 'F') {
            destination.feed_rate = feed;
        }
        destination
    }

    /// Update the tracker from an outgoing line
    pub fn apply(&mut self, line: &str) {
        match command(line).as_str() {
            "G0" | "G1" | "G00" | "G01" => self.position = self.destination_of(line),
            "G90" => {
                self.motion_mode = PositionMode::Absolute;
                self.extrusion_mode = PositionMode::Absolute;
            }
            "G91" => {
                self.motion_mode = PositionMode::Relative;
                self.extrusion_mode = PositionMode::Relative;
            }
            "M82" => self.extrusion_mode = PositionMode::Absolute,
            "M83" => self.extrusion_mode = PositionMode::Relative,
            "G92" => {
                let mut any = false;
                for axis in [Axis::X, Axis::Y, Axis::Z, Axis::E] {
                    if let Some(value) = word_value(line, axis.letter()) {
                        self.position.set_axis(axis, value);
                        any = true;
                    }
                }
                if !any {
                    self.position = Move {
                        feed_rate: self.position.feed_rate,
                        ..Move::default()
                    };
                }
            }
            "G28" => {
                let mut any = false;
                for axis in [Axis::X, Axis::Y, Axis::Z] {
                    if has_axis_flag(line, axis.letter()) {
                        self.position.set_axis(axis, 0.0);
                        any = true;
                    }
                }
                if !any {
                    self.position.x = 0.0;
                    self.position.y = 0.0;
                    self.position.z = 0.0;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_after() {
        assert_eq!(number_after("T:200.5 /210 B:60", "T:"), Some(200.5));
        assert_eq!(number_after("Resend: 3", ":"), Some(3.0));
        assert_eq!(number_after("rs N12", "N"), Some(12.0));
        assert_eq!(number_after("X: Y:5", "X:"), None);
        assert_eq!(number_after("M104 S-1", "S"), Some(-1.0));
    }

    #[test]
    fn test_word_value_ignores_command_letter() {
        assert_eq!(word_value("G1 X10 F3000", 'F'), Some(3000.0));
        assert_eq!(word_value("G1 X10 F3000", 'G'), None);
        assert_eq!(word_value("G1 X10 ; E5", 'E'), None);
        assert_eq!(word_value("G1X10Y5", 'Y'), Some(5.0));
    }

    #[test]
    fn test_replace_and_remove_word() {
        assert_eq!(replace_word("G1 X10 F3000", 'F', 1500.0), "G1 X10 F1500");
        assert_eq!(replace_word("G1 X10", 'Z', 0.2), "G1 X10 Z0.2");
        assert_eq!(remove_word("G1 X10 F3000 E1", 'F'), "G1 X10 E1");
        assert_eq!(remove_word("G1 X10 F3000", 'F'), "G1 X10");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1500.0), "1500");
        assert_eq!(format_number(0.123456), "0.12346");
        assert_eq!(format_number(-0.000001), "0");
        assert_eq!(format_number(10.5), "10.5");
    }

    #[test]
    fn test_command_and_comments() {
        assert_eq!(command("g1 x10"), "G1");
        assert_eq!(command("M104 S200 ; heat"), "M104");
        assert_eq!(command("T1"), "T1");
        assert_eq!(command("@pause"), "@pause");
        assert_eq!(strip_comment("G28 ; home"), "G28");
        assert!(is_move("G1X5"));
        assert!(!is_move("G10"));
    }

    #[test]
    fn test_layer_markers() {
        assert!(is_layer_change(";LAYER:3"));
        assert_eq!(layer_number("; LAYER:12"), Some(12));
        assert_eq!(layer_number("G1 X1"), None);
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines("G28\\nG1 Z5\n\nM84"), vec!["G28", "G1 Z5", "M84"]);
    }

    #[test]
    fn test_position_tracker_modes() {
        let mut tracker = PositionTracker::new();
        tracker.apply("G1 X10 Y10 Z1 E1 F1200");
        tracker.apply("G91");
        tracker.apply("G1 X5 E0.5");
        let pos = tracker.position();
        assert_eq!((pos.x, pos.y, pos.z, pos.e), (15.0, 10.0, 1.0, 1.5));
        assert_eq!(pos.feed_rate, 1200.0);

        tracker.apply("G90");
        tracker.apply("G92 E0");
        assert_eq!(tracker.position().e, 0.0);
        tracker.apply("G28 X");
        assert_eq!(tracker.position().x, 0.0);
        assert_eq!(tracker.position().y, 10.0);
    }
}

//! Parsers for printer report lines

use super::gcode::number_after;
use printlink_core::{FirmwareIdentity, Move};

/// Temperatures found in a report line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemperatureReport {
    /// Hot-end readings by index
    pub hotends: Vec<(usize, f64)>,
    /// Bed reading
    pub bed: Option<f64>,
}

impl TemperatureReport {
    /// Whether the line carried any reading
    pub fn is_empty(&self) -> bool {
        self.hotends.is_empty() && self.bed.is_none()
    }
}

/// Parse `T:200.0 /210.0 B:60.0 /60.0 T0:200.0 /210.0 T1:190.0 /0.0`.
///
/// Readings that are not numbers (`T:inf`) are skipped.
pub fn parse_temperatures(line: &str) -> TemperatureReport {
    let mut report = TemperatureReport::default();
    let tokens: Vec<&str> = line.split_whitespace().collect();

    for (i, token) in tokens.iter().enumerate() {
        let Some((key, value)) = token.split_once(':') else {
            continue;
        };
        let value = if value.is_empty() {
            tokens.get(i + 1).copied().unwrap_or_default()
        } else {
            value
        };
        let Some(reading) = value.parse::<f64>().ok().filter(|v| v.is_finite()) else {
            continue;
        };

        if key == "B" {
            report.bed = Some(reading);
        } else if key == "T" {
            upsert(&mut report.hotends, 0, reading);
        } else if let Some(index) = key
            .strip_prefix('T')
            .and_then(|digits| digits.parse::<usize>().ok())
        {
            upsert(&mut report.hotends, index, reading);
        }
    }

    report
}

fn upsert(readings: &mut Vec<(usize, f64)>, index: usize, value: f64) {
    match readings.iter_mut().find(|(i, _)| *i == index) {
        Some(entry) => entry.1 = value,
        None => readings.push((index, value)),
    }
}

/// Parse `X:10.00 Y:20.00 Z:0.30 E:0.00 Count X:...`, optionally `ok C:` prefixed
pub fn parse_position(line: &str) -> Option<Move> {
    let report = line.split(" Count").next().unwrap_or(line);
    let x = number_after(report, "X:")?;
    let y = number_after(report, "Y:")?;
    let z = number_after(report, "Z:")?;
    let e = number_after(report, "E:").unwrap_or(0.0);
    Some(Move::new(x, y, z).with_e(e))
}

/// Merge identification fields from an `M115` report into `identity`.
///
/// Returns true when the line carried a firmware name.
pub fn parse_firmware(line: &str, identity: &mut FirmwareIdentity) -> bool {
    let Some(name) = field(line, "FIRMWARE_NAME:") else {
        return false;
    };

    let lower = name.to_ascii_lowercase();
    identity.name = ["marlin", "repetier", "sprinter", "smoothie", "makerbot", "teacup"]
        .iter()
        .find(|family| lower.contains(*family))
        .map(|family| match *family {
            "smoothie" => "smoothieware".to_string(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| {
            lower
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string()
        });

    identity.version = field(line, "FIRMWARE_VERSION:").or_else(|| {
        name.split_whitespace()
            .nth(1)
            .filter(|word| word.starts_with(|c: char| c.is_ascii_digit()))
            .map(str::to_string)
    });

    if let Some(machine) = field(line, "MACHINE_TYPE:") {
        match machine.split_once('^') {
            Some((machine, code)) => {
                identity.machine_type = Some(machine.trim().to_string());
                identity.device_code = Some(code.trim().to_string());
            }
            None => identity.machine_type = Some(machine),
        }
    }

    if let Some(count) = number_after(line, "EXTRUDER_COUNT:") {
        identity.extruder_count = Some(count as u32);
    }

    true
}

/// Text after `key` up to the next `UPPER_CASE:` field
fn field(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)? + key.len();
    let words: Vec<&str> = line[start..]
        .split_whitespace()
        .take_while(|word| !is_field_key(word))
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

fn is_field_key(word: &str) -> bool {
    match word.split_once(':') {
        Some((key, _)) => {
            key.len() > 1
                && key
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit())
        }
        None => false,
    }
}

/// A resend request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResendRequest {
    /// Requested sequence number
    pub seq: u64,
    /// The firmware sends no `ok` after this request (`rs N<k>` style)
    pub implies_ack: bool,
}

/// Parse `Resend: 3`, `RS:3` or `rs N3`
pub fn parse_resend(line: &str) -> Option<ResendRequest> {
    if let Some(seq) = number_after(line, ":") {
        return Some(ResendRequest {
            seq: seq.max(0.0) as u64,
            implies_ack: false,
        });
    }
    number_after(line, "N").map(|seq| ResendRequest {
        seq: seq.max(0.0) as u64,
        implies_ack: true,
    })
}

/// Parse `SD printing byte 1234/5678`
pub fn parse_media_progress(line: &str) -> Option<(u64, u64)> {
    let rest = line.strip_prefix("SD printing byte")?.trim();
    let (printed, total) = rest.split_once('/')?;
    Some((printed.trim().parse().ok()?, total.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_marlin_temperatures() {
        let report = parse_temperatures("ok T:201.3 /210.0 B:59.8 /60.0 T0:201.3 /210.0 T1:25.0 /0.0 @:127");
        assert_eq!(report.bed, Some(59.8));
        assert_eq!(report.hotends, vec![(0, 201.3), (1, 25.0)]);
    }

    #[test]
    fn test_parse_temperatures_skips_inf() {
        let report = parse_temperatures("T:inf /0.0 B:21.0 /0.0");
        assert!(report.hotends.is_empty());
        assert_eq!(report.bed, Some(21.0));
        assert!(parse_temperatures("ok").is_empty());
    }

    #[test]
    fn test_parse_position() {
        let pos = parse_position("X:10.00 Y:20.00 Z:0.30 E:1.50 Count X:800 Y:1600 Z:120").unwrap();
        assert_eq!((pos.x, pos.y, pos.z, pos.e), (10.0, 20.0, 0.3, 1.5));
        let pos = parse_position("ok C: X:1.0 Y:2.0 Z:3.0 E:0.0").unwrap();
        assert_eq!(pos.z, 3.0);
        assert!(parse_position("ok").is_none());
    }

    #[test]
    fn test_parse_firmware() {
        let mut identity = FirmwareIdentity::default();
        assert!(parse_firmware(
            "FIRMWARE_NAME:Marlin 1.1.9 (Github) SOURCE_CODE_URL:https://github.com/MarlinFirmware/Marlin PROTOCOL_VERSION:1.0 MACHINE_TYPE:Pulse^PC-123 EXTRUDER_COUNT:2",
            &mut identity
        ));
        assert!(identity.is("marlin"));
        assert_eq!(identity.version.as_deref(), Some("1.1.9"));
        assert_eq!(identity.machine_type.as_deref(), Some("Pulse"));
        assert_eq!(identity.device_code.as_deref(), Some("PC-123"));
        assert_eq!(identity.extruder_count, Some(2));
    }

    #[test]
    fn test_parse_resend_variants() {
        assert_eq!(
            parse_resend("Resend: 3"),
            Some(ResendRequest { seq: 3, implies_ack: false })
        );
        assert_eq!(parse_resend("RS:12").map(|r| r.seq), Some(12));
        assert_eq!(
            parse_resend("rs N7"),
            Some(ResendRequest { seq: 7, implies_ack: true })
        );
        assert_eq!(parse_resend("rs"), None);
    }

    #[test]
    fn test_parse_media_progress() {
        assert_eq!(parse_media_progress("SD printing byte 10/200"), Some((10, 200)));
        assert_eq!(parse_media_progress("Not SD printing"), None);
    }
}

//! Text command to binary packet translation
//!
//! Each outgoing G-code line is classified by its command word and turned into
//! zero or more packets. Lines with no packet equivalent are acknowledged
//! locally. Responses are decoded back into the text vocabulary (`ok`, `RS:`,
//! temperature and position reports) the rest of the link understands.

use super::packet::{Packet, PacketBuilder};
use crate::protocol::gcode::{self, has_axis_flag, has_word, word_value};
use printlink_core::{keys, SettingsSource};
use std::time::Duration;

/// Response codes
pub mod response {
    /// Generic failure
    pub const GENERIC_ERROR: u8 = 0x80;
    /// Success
    pub const SUCCESS: u8 = 0x81;
    /// Action buffer full
    pub const BUFFER_OVERFLOW: u8 = 0x82;
    /// Packet failed its CRC on the device
    pub const CRC_MISMATCH: u8 = 0x83;
    /// Query too large
    pub const QUERY_TOO_BIG: u8 = 0x84;
    /// Command not supported
    pub const UNSUPPORTED: u8 = 0x85;
    /// Downstream timeout
    pub const DOWNSTREAM_TIMEOUT: u8 = 0x87;
    /// Tool lock timeout
    pub const TOOL_LOCK_TIMEOUT: u8 = 0x88;
    /// Build was cancelled on the device
    pub const BUILD_CANCELED: u8 = 0x89;
    /// Device shut down after overheating
    pub const OVERHEAT: u8 = 0x8B;
}

/// Text reported when the device shuts down after overheating
pub const OVERHEAT_TEXT: &str = "Error: Bot is Shutdown due to Overheat";

const HOST_VERSION: u16 = 0x28;
const DEFAULT_FEED_RATE: f64 = 3200.0;
const HOMING_TIMEOUT_S: u16 = 45;
const READY_POLL_MS: u16 = 100;
const READY_TIMEOUT_S: u16 = 1200;

/// Machine description needed for translation
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryConfig {
    /// X, Y, Z steps per millimeter
    pub steps_per_mm: [f64; 3],
    /// Extruder steps per millimeter
    pub extruder_steps_per_mm: f64,
    /// XY and Z homing feed rates
    pub homing_feed_rate: [f64; 2],
    /// The machine has a heated bed
    pub has_heated_bed: bool,
    /// Number of extruders
    pub extruder_count: u32,
    /// How long to wait for a response before assuming it was lost
    pub response_timeout: Duration,
}

impl Default for BinaryConfig {
    fn default() -> Self {
        Self {
            steps_per_mm: [88.573186, 88.573186, 400.0],
            extruder_steps_per_mm: 96.275,
            homing_feed_rate: [300.0, 400.0],
            has_heated_bed: true,
            extruder_count: 1,
            response_timeout: Duration::from_secs(3),
        }
    }
}

impl BinaryConfig {
    /// Read the machine description from settings, keeping defaults for
    /// anything missing
    pub fn from_settings(settings: &dyn SettingsSource) -> Self {
        let mut config = Self::default();

        let steps = settings.get_f64_list(keys::BINARY_STEPS_PER_MM);
        if steps.len() == 3 && steps.iter().all(|s| *s > 0.0) {
            config.steps_per_mm = [steps[0], steps[1], steps[2]];
        }
        if let Some(e_steps) = settings
            .get_f64(keys::BINARY_EXTRUDER_STEPS_PER_MM)
            .filter(|s| *s > 0.0)
        {
            config.extruder_steps_per_mm = e_steps;
        }
        let homing = settings.get_f64_list(keys::BINARY_HOMING_FEED_RATE);
        if homing.len() == 2 {
            config.homing_feed_rate = [homing[0], homing[1]];
        }
        if settings.get(keys::HAS_HEATED_BED).is_some() {
            config.has_heated_bed = settings.get_bool(keys::HAS_HEATED_BED);
        }
        config.extruder_count = settings.get_u32_or(keys::EXTRUDER_COUNT, 1).max(1);
        config
    }
}

/// What a packet asks the device for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Firmware version
    Version,
    /// A hot-end temperature
    HotendTemperature(u8),
    /// The bed temperature
    BedTemperature,
    /// Current position
    Position,
    /// Anything answered by a bare success
    Plain,
}

/// A packet waiting to be sent, with what its response means
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    /// Encoded packet
    pub bytes: Vec<u8>,
    /// Meaning of the response
    pub request: Request,
}

impl OutboundPacket {
    fn new(builder: PacketBuilder, request: Request) -> Self {
        Self {
            bytes: builder.build(),
            request,
        }
    }
}

/// A decoded response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Success, with any report text it carried
    Fragment(String),
    /// The device wants the last packet again
    Resend,
    /// The device reported a fault
    Fault(String),
}

/// Translates text commands into packets, tracking position and modes
#[derive(Debug, Clone)]
pub struct Translator {
    config: BinaryConfig,
    position: [f64; 3],
    extruder: f64,
    relative: bool,
    extruder_relative: bool,
    feed_rate: f64,
    active_tool: u8,
    line_number: u64,
}

impl Translator {
    /// Create a translator at the origin
    pub fn new(config: BinaryConfig) -> Self {
        Self {
            config,
            position: [0.0; 3],
            extruder: 0.0,
            relative: false,
            extruder_relative: false,
            feed_rate: DEFAULT_FEED_RATE,
            active_tool: 0,
            line_number: 0,
        }
    }

    /// Line number of the last framed line translated
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    /// Translate one text line. An empty result means the line is
    /// acknowledged without sending anything.
    pub fn translate(&mut self, text: &str) -> Vec<OutboundPacket> {
        let line = self.unframe(text);
        let code = gcode::strip_comment(&line);
        let command = gcode::command(code);

        match command.as_str() {
            "M115" => vec![OutboundPacket::new(
                PacketBuilder::new(0x00).u16(HOST_VERSION),
                Request::Version,
            )],
            "M105" => self.temperature_query(),
            "M114" => vec![OutboundPacket::new(PacketBuilder::new(21), Request::Position)],
            "M104" | "M109" => self.hotend_target(code, command == "M109"),
            "M140" | "M190" => self.bed_target(code, command == "M190"),
            "M106" | "M107" => {
                let on = command == "M106" && word_value(code, 'S').is_none_or(|s| s > 0.0);
                vec![OutboundPacket::new(
                    PacketBuilder::new(136)
                        .u8(self.active_tool)
                        .u8(13)
                        .u8(1)
                        .u8(u8::from(on)),
                    Request::Plain,
                )]
            }
            "M18" | "M84" => vec![OutboundPacket::new(PacketBuilder::new(137).u8(31), Request::Plain)],
            "M73" => {
                let percent = word_value(code, 'P').unwrap_or(0.0).clamp(0.0, 100.0) as u8;
                vec![OutboundPacket::new(
                    PacketBuilder::new(150).u8(percent).u8(0),
                    Request::Plain,
                )]
            }
            "M117" => {
                let message = code.get(4..).unwrap_or_default().trim();
                vec![OutboundPacket::new(
                    PacketBuilder::new(149).u8(4).u8(0).u8(0).u8(20).text(message),
                    Request::Plain,
                )]
            }
            "M82" => {
                self.extruder_relative = false;
                Vec::new()
            }
            "M83" => {
                self.extruder_relative = true;
                Vec::new()
            }
            "G90" => {
                self.relative = false;
                self.extruder_relative = false;
                Vec::new()
            }
            "G91" => {
                self.relative = true;
                self.extruder_relative = true;
                Vec::new()
            }
            "G4" => {
                let ms = word_value(code, 'P')
                    .filter(|p| *p > 0.0)
                    .unwrap_or_else(|| word_value(code, 'S').unwrap_or(0.0) * 1000.0);
                vec![OutboundPacket::new(
                    PacketBuilder::new(0x85).u32(ms.max(0.0) as u32),
                    Request::Plain,
                )]
            }
            "G28" => self.home(code),
            "G92" => self.set_position(code),
            "G0" | "G1" | "G00" | "G01" => self.linear_move(code),
            "M135" => self.select_tool(word_value(code, 'T').unwrap_or(0.0) as u8),
            tool if tool.starts_with('T') && tool.len() > 1 => {
                self.select_tool(tool[1..].parse::<f64>().unwrap_or(0.0) as u8)
            }
            _ => {
                if !matches!(command.as_str(), "M110" | "G21" | "M92" | "") {
                    tracing::debug!("No binary translation for '{}', acknowledging locally", code);
                }
                Vec::new()
            }
        }
    }

    /// Strip `N<k> ... *<cs>` framing, remembering the line number
    fn unframe(&mut self, text: &str) -> String {
        let text = text.trim();
        let Some(rest) = text.strip_prefix('N') else {
            return text.to_string();
        };
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let Ok(number) = rest[..digits].parse::<u64>() else {
            return text.to_string();
        };
        self.line_number = number;
        let body = &rest[digits..];
        let body = body.rsplit_once('*').map(|(body, _)| body).unwrap_or(body);
        body.trim().to_string()
    }

    fn temperature_query(&self) -> Vec<OutboundPacket> {
        let mut packets = vec![OutboundPacket::new(
            PacketBuilder::new(0x0A).u8(0).u8(2),
            Request::HotendTemperature(0),
        )];
        if self.config.has_heated_bed {
            packets.push(OutboundPacket::new(
                PacketBuilder::new(0x0A).u8(0).u8(30),
                Request::BedTemperature,
            ));
        }
        if self.config.extruder_count > 1 {
            packets.push(OutboundPacket::new(
                PacketBuilder::new(0x0A).u8(1).u8(2),
                Request::HotendTemperature(1),
            ));
        }
        packets
    }

    fn hotend_target(&self, code: &str, wait: bool) -> Vec<OutboundPacket> {
        let tool = word_value(code, 'T')
            .map(|t| t as u8)
            .unwrap_or(self.active_tool);
        let temperature = word_value(code, 'S').unwrap_or(0.0).clamp(0.0, 65535.0) as u16;

        let mut packets = vec![
            OutboundPacket::new(
                PacketBuilder::new(136).u8(tool).u8(3).u8(2).u16(temperature),
                Request::Plain,
            ),
            OutboundPacket::new(
                PacketBuilder::new(136)
                    .u8(tool)
                    .u8(12)
                    .u8(1)
                    .u8(u8::from(temperature > 0)),
                Request::Plain,
            ),
        ];
        if wait {
            packets.push(OutboundPacket::new(
                PacketBuilder::new(135)
                    .u8(tool)
                    .u16(READY_POLL_MS)
                    .u16(READY_TIMEOUT_S),
                Request::Plain,
            ));
        }
        packets
    }

    fn bed_target(&self, code: &str, wait: bool) -> Vec<OutboundPacket> {
        let temperature = word_value(code, 'S').unwrap_or(0.0).clamp(0.0, 65535.0) as u16;
        let mut packets = vec![OutboundPacket::new(
            PacketBuilder::new(136).u8(0).u8(31).u8(2).u16(temperature),
            Request::Plain,
        )];
        if wait {
            packets.push(OutboundPacket::new(
                PacketBuilder::new(141)
                    .u8(0)
                    .u16(READY_POLL_MS)
                    .u16(READY_TIMEOUT_S),
                Request::Plain,
            ));
        }
        packets
    }

    fn home(&mut self, code: &str) -> Vec<OutboundPacket> {
        let explicit = ['X', 'Y', 'Z']
            .iter()
            .any(|axis| has_axis_flag(code, *axis));
        let (home_x, home_y, home_z) = if explicit {
            (
                has_axis_flag(code, 'X'),
                has_axis_flag(code, 'Y'),
                has_axis_flag(code, 'Z'),
            )
        } else {
            (true, true, true)
        };

        let mut packets = Vec::new();
        let xy_mask = u8::from(home_x) | (u8::from(home_y) << 1);
        if xy_mask != 0 {
            packets.push(OutboundPacket::new(
                PacketBuilder::new(132)
                    .u8(xy_mask)
                    .u32(self.config.homing_feed_rate[0] as u32)
                    .u16(HOMING_TIMEOUT_S),
                Request::Plain,
            ));
        }
        if home_z {
            packets.push(OutboundPacket::new(
                PacketBuilder::new(131)
                    .u8(0x04)
                    .u32(self.config.homing_feed_rate[1] as u32)
                    .u16(HOMING_TIMEOUT_S),
                Request::Plain,
            ));
        }

        for (index, homed) in [home_x, home_y, home_z].into_iter().enumerate() {
            if homed {
                self.position[index] = 0.0;
            }
        }
        self.extruder = 0.0;
        packets.push(self.position_packet());
        packets
    }

    fn set_position(&mut self, code: &str) -> Vec<OutboundPacket> {
        let mut any = false;
        for (index, axis) in ['X', 'Y', 'Z'].into_iter().enumerate() {
            if let Some(value) = word_value(code, axis) {
                self.position[index] = value;
                any = true;
            }
        }
        if let Some(value) = word_value(code, 'E') {
            self.extruder = value;
            any = true;
        }
        if !any {
            self.position = [0.0; 3];
            self.extruder = 0.0;
        }
        vec![self.position_packet()]
    }

    fn position_packet(&self) -> OutboundPacket {
        let [sx, sy, sz] = self.config.steps_per_mm;
        let e_steps = steps(self.extruder, self.config.extruder_steps_per_mm);
        let (a, b) = if self.active_tool == 0 { (e_steps, 0) } else { (0, e_steps) };
        OutboundPacket::new(
            PacketBuilder::new(140)
                .i32(steps(self.position[0], sx))
                .i32(steps(self.position[1], sy))
                .i32(steps(self.position[2], sz))
                .i32(a)
                .i32(b),
            Request::Plain,
        )
    }

    fn linear_move(&mut self, code: &str) -> Vec<OutboundPacket> {
        if let Some(feed) = word_value(code, 'F').filter(|f| *f > 0.0) {
            self.feed_rate = feed;
        }
        let moves_axis = ['X', 'Y', 'Z', 'E'].iter().any(|axis| has_word(code, *axis));
        if !moves_axis {
            return Vec::new();
        }

        let mut target = if self.relative { [0.0; 3] } else { self.position };
        for (index, axis) in ['X', 'Y', 'Z'].into_iter().enumerate() {
            if let Some(value) = word_value(code, axis) {
                target[index] = value;
            }
        }
        let e_value = word_value(code, 'E');
        let extruder_target = match (e_value, self.extruder_relative) {
            (Some(value), _) => value,
            (None, true) => 0.0,
            (None, false) => self.extruder,
        };

        let xyz_distance = if self.relative {
            target.iter().map(|v| v * v).sum::<f64>().sqrt()
        } else {
            target
                .iter()
                .zip(self.position.iter())
                .map(|(t, p)| (t - p) * (t - p))
                .sum::<f64>()
                .sqrt()
        };
        let distance = if xyz_distance > 0.0 {
            xyz_distance
        } else if self.extruder_relative {
            extruder_target.abs()
        } else {
            (extruder_target - self.extruder).abs()
        };

        let relative_mask = if self.relative {
            31
        } else if self.extruder_relative {
            24
        } else {
            0
        };

        let [sx, sy, sz] = self.config.steps_per_mm;
        let e_steps = steps(extruder_target, self.config.extruder_steps_per_mm);
        let (a, b) = if self.active_tool == 0 { (e_steps, 0) } else { (0, e_steps) };

        let packet = PacketBuilder::new(155)
            .i32(steps(target[0], sx))
            .i32(steps(target[1], sy))
            .i32(steps(target[2], sz))
            .i32(a)
            .i32(b)
            .u32((self.feed_rate * sx / 60.0) as u32)
            .u8(relative_mask)
            .f32(distance as f32)
            .u16(((self.feed_rate / 60.0) * 64.0).clamp(0.0, 65535.0) as u16);

        if self.relative {
            for (position, offset) in self.position.iter_mut().zip(target) {
                *position += offset;
            }
        } else {
            self.position = target;
        }
        self.extruder = if self.extruder_relative {
            self.extruder + extruder_target
        } else {
            extruder_target
        };

        vec![OutboundPacket::new(packet, Request::Plain)]
    }

    fn select_tool(&mut self, tool: u8) -> Vec<OutboundPacket> {
        self.active_tool = tool;
        vec![OutboundPacket::new(PacketBuilder::new(134).u8(tool), Request::Plain)]
    }

    /// Decode a response to the given request
    pub fn decode(&self, packet: &Packet, request: Request) -> Response {
        match packet.code() {
            response::SUCCESS => Response::Fragment(self.success_text(packet, request)),
            response::GENERIC_ERROR
            | response::BUFFER_OVERFLOW
            | response::CRC_MISMATCH
            | response::DOWNSTREAM_TIMEOUT
            | response::TOOL_LOCK_TIMEOUT => Response::Resend,
            response::QUERY_TOO_BIG | response::UNSUPPORTED => {
                tracing::warn!(
                    "Device rejected {:?} with code {:#04x}",
                    request,
                    packet.code()
                );
                Response::Fragment(String::new())
            }
            response::BUILD_CANCELED => Response::Fault("Error: Build canceled on device".to_string()),
            response::OVERHEAT => Response::Fault(OVERHEAT_TEXT.to_string()),
            other => {
                tracing::warn!("Unknown response code {:#04x}", other);
                Response::Fragment(String::new())
            }
        }
    }

    fn success_text(&self, packet: &Packet, request: Request) -> String {
        match request {
            Request::Version => match packet.arg_u16(0) {
                Some(version) => format!(
                    "FIRMWARE_NAME:Makerbot FIRMWARE_VERSION:{}.{}",
                    version / 100,
                    version % 100
                ),
                None => String::new(),
            },
            Request::HotendTemperature(0) => packet
                .arg_u16(0)
                .map(|t| format!("T:{}", t))
                .unwrap_or_default(),
            Request::HotendTemperature(tool) => packet
                .arg_u16(0)
                .map(|t| format!("T{}:{}", tool, t))
                .unwrap_or_default(),
            Request::BedTemperature => packet
                .arg_u16(0)
                .map(|t| format!("B:{}", t))
                .unwrap_or_default(),
            Request::Position => {
                let [sx, sy, sz] = self.config.steps_per_mm;
                let values = (
                    packet.arg_i32(0),
                    packet.arg_i32(4),
                    packet.arg_i32(8),
                    packet.arg_i32(12),
                );
                match values {
                    (Some(x), Some(y), Some(z), Some(a)) => format!(
                        "C: X:{} Y:{} Z:{} E:{}",
                        gcode::format_number(f64::from(x) / sx),
                        gcode::format_number(f64::from(y) / sy),
                        gcode::format_number(f64::from(z) / sz),
                        gcode::format_number(f64::from(a) / self.config.extruder_steps_per_mm)
                    ),
                    _ => String::new(),
                }
            }
            Request::Plain => String::new(),
        }
    }
}

fn steps(mm: f64, steps_per_mm: f64) -> i32 {
    (mm * steps_per_mm) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> Translator {
        Translator::new(BinaryConfig::default())
    }

    fn opcodes(packets: &[OutboundPacket]) -> Vec<u8> {
        packets.iter().map(|p| p.bytes[2]).collect()
    }

    #[test]
    fn test_identify_and_position_queries() {
        let mut t = translator();
        let packets = t.translate("M115");
        assert_eq!(packets[0].bytes, PacketBuilder::new(0x00).u16(0x28).build());
        assert_eq!(packets[0].request, Request::Version);
        assert_eq!(opcodes(&t.translate("M114")), vec![21]);
    }

    #[test]
    fn test_temperature_query_packets() {
        let mut t = translator();
        let packets = t.translate("M105");
        assert_eq!(opcodes(&packets), vec![0x0A, 0x0A]);
        assert_eq!(packets[1].request, Request::BedTemperature);

        let mut config = BinaryConfig::default();
        config.has_heated_bed = false;
        config.extruder_count = 2;
        let packets = Translator::new(config).translate("M105");
        assert_eq!(packets[1].request, Request::HotendTemperature(1));
    }

    #[test]
    fn test_heat_and_wait() {
        let mut t = translator();
        let packets = t.translate("M109 S210");
        assert_eq!(opcodes(&packets), vec![136, 136, 135]);
        assert_eq!(&packets[0].bytes[3..8], &[0, 3, 2, 210, 0]);
        assert_eq!(opcodes(&t.translate("M190 S60")), vec![136, 141]);
    }

    #[test]
    fn test_framing_is_stripped() {
        let mut t = translator();
        let framed = crate::protocol::codec::frame(7, "M84");
        assert_eq!(opcodes(&t.translate(&framed)), vec![137]);
        assert_eq!(t.line_number(), 7);
    }

    #[test]
    fn test_local_acknowledgments() {
        let mut t = translator();
        for line in ["M82", "M83", "M110 N0", "G21", "G90", "G91", "M92 X80"] {
            assert!(t.translate(line).is_empty(), "{} should not send", line);
        }
        assert!(t.translate("G1 F1200").is_empty());
    }

    #[test]
    fn test_move_encodes_steps() {
        let mut t = translator();
        let packets = t.translate("G1 X10 Y0 Z0.2 F1200");
        let bytes = &packets[0].bytes;
        assert_eq!(bytes[2], 155);
        let x = i32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
        assert_eq!(x, (10.0 * 88.573186) as i32);
        let z = i32::from_le_bytes([bytes[11], bytes[12], bytes[13], bytes[14]]);
        assert_eq!(z, 80);
        let rel = bytes[3 + 24];
        assert_eq!(rel, 0);
    }

    #[test]
    fn test_home_all_axes() {
        let mut t = translator();
        t.translate("G1 X10 Y10 Z10");
        let packets = t.translate("G28");
        assert_eq!(opcodes(&packets), vec![132, 131, 140]);
        assert_eq!(packets[0].bytes[3], 3);
        assert_eq!(opcodes(&t.translate("G28 X")), vec![132, 140]);
    }

    #[test]
    fn test_decode_temperature_like_text_report() {
        let t = translator();
        let reply = Packet::new(PacketBuilder::new(0x81).u16(205).build()[2..5].to_vec());
        assert_eq!(
            t.decode(&reply, Request::HotendTemperature(0)),
            Response::Fragment("T:205".to_string())
        );
        let busy = Packet::new(vec![response::BUFFER_OVERFLOW]);
        assert_eq!(t.decode(&busy, Request::Plain), Response::Resend);
        let hot = Packet::new(vec![response::OVERHEAT]);
        assert_eq!(
            t.decode(&hot, Request::Plain),
            Response::Fault(OVERHEAT_TEXT.to_string())
        );
    }

    #[test]
    fn test_decode_version() {
        let t = translator();
        let reply = Packet::new(vec![0x81, 0xF8, 0x02]);
        assert_eq!(
            t.decode(&reply, Request::Version),
            Response::Fragment("FIRMWARE_NAME:Makerbot FIRMWARE_VERSION:7.60".to_string())
        );
    }
}

//! Binary protocol adapter
//!
//! [`BinaryTransport`] sits between the link and a byte transport. The link
//! writes text lines and reads text responses as it would from any text
//! firmware. Underneath, each line becomes one or more packets sent one at a
//! time, and the device's responses are turned back into `ok` lines.

use super::packet::PacketDecoder;
use super::translator::{BinaryConfig, OutboundPacket, Response, Translator};
use crate::transport::Transport;
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 256;

/// Text-speaking transport over a binary packet device
pub struct BinaryTransport {
    inner: Box<dyn Transport>,
    translator: Translator,
    decoder: PacketDecoder,
    response_timeout: Duration,
    pending_text: String,
    in_flight: Option<OutboundPacket>,
    sent_at: Instant,
    overflow: VecDeque<OutboundPacket>,
    fragments: Vec<String>,
    output: VecDeque<u8>,
}

impl BinaryTransport {
    /// Wrap a byte transport
    pub fn new(inner: Box<dyn Transport>, config: BinaryConfig) -> Self {
        Self {
            inner,
            response_timeout: config.response_timeout,
            translator: Translator::new(config),
            decoder: PacketDecoder::new(),
            pending_text: String::new(),
            in_flight: None,
            sent_at: Instant::now(),
            overflow: VecDeque::new(),
            fragments: Vec::new(),
            output: VecDeque::new(),
        }
    }

    /// Packets translated but not yet sent
    pub fn queued_packets(&self) -> usize {
        self.overflow.len()
    }

    fn emit_line(&mut self, text: &str) {
        self.output.extend(text.as_bytes());
        self.output.push_back(b'\n');
    }

    fn send(&mut self, packet: OutboundPacket) -> io::Result<()> {
        self.inner.write_all(&packet.bytes)?;
        self.sent_at = Instant::now();
        self.in_flight = Some(packet);
        Ok(())
    }

    fn submit_line(&mut self, line: &str) -> io::Result<()> {
        let packets = self.translator.translate(line);
        if packets.is_empty() {
            self.emit_line("ok");
            return Ok(());
        }
        for packet in packets {
            if self.in_flight.is_none() && self.overflow.is_empty() {
                self.send(packet)?;
            } else {
                self.overflow.push_back(packet);
            }
        }
        Ok(())
    }

    /// Send the next queued packet, or report the finished command as `ok`
    fn advance(&mut self) -> io::Result<()> {
        if let Some(next) = self.overflow.pop_front() {
            return self.send(next);
        }
        let report = self
            .fragments
            .drain(..)
            .filter(|f| !f.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if report.is_empty() {
            self.emit_line("ok");
        } else {
            self.emit_line(&format!("ok {}", report));
        }
        Ok(())
    }

    fn pump(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let count = self.inner.read(&mut chunk)?;
        if count > 0 {
            self.decoder.push(&chunk[..count]);
        }

        while let Some(result) = self.decoder.next_packet() {
            let packet = match result {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::warn!("Dropping response: {}", e);
                    continue;
                }
            };
            let Some(sent) = self.in_flight.take() else {
                tracing::debug!("Unsolicited response {:#04x}", packet.code());
                continue;
            };
            match self.translator.decode(&packet, sent.request) {
                Response::Fragment(text) => {
                    self.fragments.push(text);
                    self.advance()?;
                }
                Response::Resend => {
                    let line_number = self.translator.line_number();
                    if line_number == 0 {
                        tracing::debug!("Device asked for packet {:#04x} again", sent.bytes[2]);
                        self.send(sent)?;
                    } else {
                        tracing::debug!("Device rejected packet, requesting line {}", line_number);
                        self.fragments.clear();
                        self.overflow.clear();
                        self.emit_line(&format!("RS:{}", line_number));
                        self.emit_line("ok");
                    }
                }
                Response::Fault(text) => {
                    tracing::error!("{}", text);
                    self.fragments.clear();
                    self.overflow.clear();
                    self.emit_line(&text);
                }
            }
        }

        if self.in_flight.is_some() && self.sent_at.elapsed() >= self.response_timeout {
            if self.overflow.is_empty() {
                tracing::warn!("No response from device, requesting line again");
                self.in_flight = None;
                self.fragments.clear();
                let line_number = self.translator.line_number();
                self.emit_line(&format!("RS:{}", line_number));
                self.emit_line("ok");
            } else {
                self.advance()?;
            }
        }
        Ok(())
    }
}

impl Transport for BinaryTransport {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.pending_text.push_str(&String::from_utf8_lossy(data));
        while let Some(end) = self.pending_text.find('\n') {
            let line: String = self.pending_text.drain(..=end).collect();
            let line = line.trim();
            if !line.is_empty() {
                self.submit_line(line)?;
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.output.is_empty() {
            self.pump()?;
        }
        let count = buf.len().min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn close(&mut self) -> io::Result<()> {
        self.in_flight = None;
        self.overflow.clear();
        self.inner.close()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

//! Read loop
//!
//! Runs on a blocking task for the life of an open link. Each pass offers the
//! write path a chance to send, drains the transport, reassembles lines and
//! hands every complete line to the callbacks.

use super::shared::LinkCore;
use parking_lot::Mutex;
use printlink_core::LinkState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Unrecognized characters tolerated before a line ends during the handshake
pub const MAX_HANDSHAKE_UNKNOWN: usize = 3;

const READ_BUFFER_SIZE: usize = 1024;
const IDLE_DELAY: Duration = Duration::from_millis(5);

/// Splits a byte stream into lines
///
/// `\r\n`, `\r` and `\n` all end a line. An incomplete trailing fragment is
/// kept for the next push.
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: String,
    last_was_cr: bool,
    unknown: usize,
    worst: usize,
}

impl LineAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Add bytes, returning every line they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        self.worst = self.unknown;
        for ch in String::from_utf8_lossy(bytes).chars() {
            match ch {
                '\r' => {
                    self.finish_line(&mut lines);
                    self.last_was_cr = true;
                }
                '\n' => {
                    if !self.last_was_cr {
                        self.finish_line(&mut lines);
                    }
                    self.last_was_cr = false;
                }
                other => {
                    self.last_was_cr = false;
                    if other == '?' || other == char::REPLACEMENT_CHARACTER {
                        self.unknown += 1;
                    }
                    self.partial.push(other);
                }
            }
        }
        self.worst = self.worst.max(self.unknown);
        lines
    }

    /// Most unrecognized characters in any one line touched by the last push.
    ///
    /// Lines completed during the push count, as does the fragment left over.
    pub fn worst_unknown(&self) -> usize {
        self.worst
    }

    /// Unrecognized characters seen since the last line ended
    pub fn unknown_since_line(&self) -> usize {
        self.unknown
    }

    /// The incomplete fragment carried to the next push
    pub fn partial(&self) -> &str {
        &self.partial
    }

    /// Forget any partial line
    pub fn clear(&mut self) {
        self.partial.clear();
        self.last_was_cr = false;
        self.unknown = 0;
        self.worst = 0;
    }

    fn finish_line(&mut self, lines: &mut Vec<String>) {
        let line = self.partial.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
        self.partial.clear();
        self.worst = self.worst.max(self.unknown);
        self.unknown = 0;
    }
}

/// Flag a bad handshake when a line is mostly noise.
///
/// Only applies while connecting. The first reason recorded wins.
pub(crate) fn check_handshake_noise(core: &mut LinkCore, unknown: usize) {
    if core.state == LinkState::Connecting
        && unknown > MAX_HANDSHAKE_UNKNOWN
        && core.handshake_failure.is_none()
    {
        tracing::warn!("Printer sent {} unrecognized characters", unknown);
        core.handshake_failure = Some(format!(
            "printer sent {} unrecognized characters, check the baud rate",
            unknown
        ));
    }
}

/// Drive the link until it closes or `shutdown` is set
pub(crate) fn run(core: Arc<Mutex<LinkCore>>, shutdown: Arc<AtomicBool>) {
    let mut assembler = LineAssembler::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];
    tracing::debug!("Read loop started");

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let now = Instant::now();
        let read = {
            let mut guard = core.lock();
            if !guard.state.keeps_reading() || !guard.transport_is_open() {
                break;
            }

            let written = if guard.state == LinkState::PrintingFromRemovableMedia {
                guard.poll_removable_media(now)
            } else {
                guard.try_write_next(now)
            };
            match written {
                Ok(()) => guard.read_transport(&mut buf),
                Err(e) => Err(e),
            }
        };

        match read {
            Ok(0) => std::thread::sleep(IDLE_DELAY),
            Ok(n) => {
                let lines = assembler.push(&buf[..n]);
                let mut guard = core.lock();
                check_handshake_noise(&mut guard, assembler.worst_unknown());
                for line in lines {
                    guard.process_line(&line);
                }
            }
            Err(e) => {
                if !shutdown.load(Ordering::SeqCst) {
                    core.lock().connection_lost(&e.to_string());
                }
                break;
            }
        }
    }

    tracing::debug!("Read loop stopped");
}

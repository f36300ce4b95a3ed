//! Connect handshake
//!
//! The printer is probed with a raw temperature query until it answers. The
//! attempt ends on an answer, on a bad handshake reported by the read loop,
//! when halted, or when the connect timeout runs out.

use super::shared::LinkCore;
use parking_lot::Mutex;
use printlink_core::{ConnectionError, LinkState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Query sent until the printer answers
pub const PROBE: &str = "M105";
/// Default handshake timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

const PROBE_INTERVAL: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Probe until the printer answers
pub(crate) fn run(
    core: &Mutex<LinkCore>,
    halt: &AtomicBool,
    timeout: Duration,
) -> Result<(), ConnectionError> {
    let started = Instant::now();
    let mut last_probe: Option<Instant> = None;

    loop {
        if halt.load(Ordering::SeqCst) {
            return Err(ConnectionError::Aborted {
                reason: "connection attempt halted".to_string(),
            });
        }

        {
            let mut guard = core.lock();
            if let Some(reason) = guard.handshake_failure.take() {
                return Err(ConnectionError::HandshakeFailed { reason });
            }
            if guard.heard_from_printer {
                tracing::debug!("Printer answered after {:?}", started.elapsed());
                return Ok(());
            }
            if guard.state != LinkState::Connecting {
                return Err(ConnectionError::Aborted {
                    reason: format!("link is {}", guard.state),
                });
            }

            let now = Instant::now();
            if last_probe.is_none_or(|at| now.duration_since(at) >= PROBE_INTERVAL) {
                last_probe = Some(now);
                guard
                    .write_raw(PROBE)
                    .map_err(|e| ConnectionError::Io {
                        message: e.to_string(),
                    })?;
            }
        }

        if started.elapsed() >= timeout {
            return Err(ConnectionError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

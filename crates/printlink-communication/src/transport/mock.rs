//! Scripted in-memory transport
//!
//! Tests push the bytes the "printer" sends and inspect what the link wrote.
//! An optional responder answers each written line, which is enough to drive
//! a full connect and print cycle without hardware.

use super::{wrap_protocol, Transport, TransportFactory};
use parking_lot::Mutex;
use printlink_core::{ConnectionError, Result, SettingsSource};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

#[derive(Default)]
struct MockState {
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    partial: String,
    open: bool,
    fail_reads: bool,
    fail_writes: bool,
    responder: Option<Responder>,
}

/// In-memory transport sharing its buffers between clones
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create an open mock transport
    pub fn new() -> Self {
        let mock = Self::default();
        mock.state.lock().open = true;
        mock
    }

    /// Answer every written line with the lines returned by `responder`
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
        self
    }

    /// Queue a line the printer sends
    pub fn push_line(&self, line: &str) {
        self.push_bytes(format!("{}\n", line).as_bytes());
    }

    /// Queue raw bytes the printer sends
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.state.lock().inbound.extend(bytes.iter().copied());
    }

    /// Every byte written so far
    pub fn written_bytes(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Every complete line written so far
    pub fn written_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.state.lock().written)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Forget what was written
    pub fn clear_written(&self) {
        self.state.lock().written.clear();
    }

    /// Make every read fail, as when a cable is pulled
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Make every write fail
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Reopen after a close
    pub fn reopen(&self) {
        self.state.lock().open = true;
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTransport")
            .field("open", &state.open)
            .field("inbound", &state.inbound.len())
            .field("written", &state.written.len())
            .finish()
    }
}

impl Transport for MockTransport {
    fn name(&self) -> String {
        "mock".to_string()
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "mock closed"));
        }
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        state.written.extend_from_slice(data);

        if state.responder.is_none() {
            return Ok(());
        }

        let text = String::from_utf8_lossy(data).to_string();
        state.partial.push_str(&text);
        while let Some(end) = state.partial.find('\n') {
            let line: String = state.partial.drain(..=end).collect();
            let line = line.trim().to_string();
            let replies = match state.responder.as_mut() {
                Some(responder) => responder(&line),
                None => Vec::new(),
            };
            for reply in replies {
                state.inbound.extend(reply.bytes());
                state.inbound.push_back(b'\n');
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "mock closed"));
        }
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock read failure"));
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.lock().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

/// Factory handing out clones of one mock transport
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    transport: MockTransport,
    fail_open: Arc<Mutex<bool>>,
}

impl MockTransportFactory {
    /// Create a factory for the given mock
    pub fn new(transport: MockTransport) -> Self {
        Self {
            transport,
            fail_open: Arc::new(Mutex::new(false)),
        }
    }

    /// Make the next opens fail as if the port were missing
    pub fn fail_open(&self, fail: bool) {
        *self.fail_open.lock() = fail;
    }

    /// The shared mock transport
    pub fn transport(&self) -> &MockTransport {
        &self.transport
    }
}

impl TransportFactory for MockTransportFactory {
    fn open(&self, settings: &dyn SettingsSource) -> Result<Box<dyn Transport>> {
        if *self.fail_open.lock() {
            return Err(ConnectionError::PortUnavailable {
                port: "mock".to_string(),
                reason: "port not found".to_string(),
            }
            .into());
        }
        self.transport.reopen();
        Ok(wrap_protocol(Box::new(self.transport.clone()), settings))
    }
}

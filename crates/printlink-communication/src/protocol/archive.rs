//! Resend archive
//!
//! Keeps the most recent framed lines in a fixed ring keyed by sequence
//! number so the printer can ask for any of them again. Also owns the
//! sequence counter, since every framed line is archived.

use super::codec;
use printlink_core::ProtocolError;

/// Default number of retained lines
pub const DEFAULT_CAPACITY: usize = 64;

/// A line as it was framed and sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLine {
    /// Sequence number
    pub seq: u64,
    /// Line text before framing
    pub line: String,
    /// Exact text written, without the newline
    pub framed: String,
    /// Checksum of the framed text
    pub checksum: u8,
}

/// Bounded history of framed lines plus the replay cursor
#[derive(Debug, Clone)]
pub struct ResendArchive {
    slots: Vec<Option<PendingLine>>,
    next_seq: u64,
    cursor: Option<u64>,
}

impl ResendArchive {
    /// Create an archive retaining `capacity` lines
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            next_seq: 1,
            cursor: None,
        }
    }

    /// Number of retained lines
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Sequence number the next framed line receives
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Forget every line and re-base the counter
    pub fn reset(&mut self, next_seq: u64) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.next_seq = next_seq;
        self.cursor = None;
    }

    /// Frame a line, archive it and return what to send.
    ///
    /// `M110 N<k>` is framed with its own number `k` and re-bases the counter
    /// to `k + 1`. `M999` is framed normally and re-bases the counter to 1.
    pub fn record(&mut self, line: &str) -> PendingLine {
        let seq = if codec::is_reset(line) {
            let k = super::gcode::word_value(line, 'N')
                .filter(|n| *n >= 0.0)
                .map(|n| n as u64)
                .unwrap_or(0);
            self.reset(k);
            k
        } else {
            self.next_seq
        };

        let framed = codec::frame(seq, line);
        let pending = PendingLine {
            seq,
            line: line.to_string(),
            checksum: codec::checksum(&format!("N{} {}", seq, line)),
            framed,
        };

        let index = self.index(seq);
        self.slots[index] = Some(pending.clone());
        self.next_seq = seq + 1;

        if codec::is_restart(line) {
            tracing::debug!("M999 sent, line numbers restart at 1");
            self.reset(1);
        }

        pending
    }

    /// Archived line for a sequence number, if still retained
    pub fn get(&self, seq: u64) -> Option<&PendingLine> {
        if seq >= self.next_seq {
            return None;
        }
        self.slots[self.index(seq)]
            .as_ref()
            .filter(|pending| pending.seq == seq)
    }

    /// Check if a sequence number is still retained
    pub fn contains(&self, seq: u64) -> bool {
        self.get(seq).is_some()
    }

    /// Replay from `seq` on the next writes
    pub fn rewind_to(&mut self, seq: u64) -> Result<(), ProtocolError> {
        if !self.contains(seq) {
            return Err(ProtocolError::ResendOutOfWindow { requested: seq });
        }
        self.cursor = Some(seq);
        Ok(())
    }

    /// Whether archived lines are waiting to be replayed
    pub fn is_replaying(&self) -> bool {
        self.cursor.is_some_and(|seq| seq < self.next_seq)
    }

    /// Next archived line to replay, advancing the cursor
    pub fn next_replay(&mut self) -> Option<PendingLine> {
        let seq = self.cursor?;
        match self.get(seq).cloned() {
            Some(pending) => {
                self.cursor = if seq + 1 < self.next_seq {
                    Some(seq + 1)
                } else {
                    None
                };
                Some(pending)
            }
            None => {
                self.cursor = None;
                None
            }
        }
    }

    fn index(&self, seq: u64) -> usize {
        (seq % self.slots.len() as u64) as usize
    }
}

impl Default for ResendArchive {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

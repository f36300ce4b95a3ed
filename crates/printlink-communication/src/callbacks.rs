//! Line callback registry
//!
//! Handlers are keyed by a literal prefix or substring. Every handler whose
//! key matches a line runs, in registration order. A handler can mark the line
//! consumed, which keeps it out of the generic line-received notification but
//! does not stop the remaining handlers.

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A line offered to handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundLine {
    /// Line text without its terminator
    pub line: String,
    /// Set by a handler to suppress generic delivery
    pub consumed: bool,
}

impl FoundLine {
    /// Wrap a line
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            consumed: false,
        }
    }
}

/// Handler invoked with the registry owner's context
pub type LineHandler<C> = Arc<dyn Fn(&mut C, &mut FoundLine) + Send + Sync>;

/// Identifies a registration so it can be removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(Uuid);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which table a registration lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    /// Received line starts with the key
    ReadPrefix,
    /// Received line contains the key
    ReadContains,
    /// Written line starts with the key
    WritePrefix,
}

struct Entry<C> {
    id: CallbackId,
    key: String,
    handler: LineHandler<C>,
}

impl<C> Clone for Entry<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            key: self.key.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Prefix and substring handler tables for read and written lines
pub struct CallbackRegistry<C> {
    read_prefix: Vec<Entry<C>>,
    read_contains: Vec<Entry<C>>,
    write_prefix: Vec<Entry<C>>,
}

impl<C> CallbackRegistry<C> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            read_prefix: Vec::new(),
            read_contains: Vec::new(),
            write_prefix: Vec::new(),
        }
    }

    fn table_mut(&mut self, rule: MatchRule) -> &mut Vec<Entry<C>> {
        match rule {
            MatchRule::ReadPrefix => &mut self.read_prefix,
            MatchRule::ReadContains => &mut self.read_contains,
            MatchRule::WritePrefix => &mut self.write_prefix,
        }
    }

    /// Register a handler for a key
    pub fn register<F>(&mut self, rule: MatchRule, key: impl Into<String>, handler: F) -> CallbackId
    where
        F: Fn(&mut C, &mut FoundLine) + Send + Sync + 'static,
    {
        let id = CallbackId(Uuid::new_v4());
        self.table_mut(rule).push(Entry {
            id,
            key: key.into(),
            handler: Arc::new(handler),
        });
        id
    }

    /// Register one handler under several keys
    pub fn register_all<F>(&mut self, rule: MatchRule, keys: &[&str], handler: F) -> Vec<CallbackId>
    where
        F: Fn(&mut C, &mut FoundLine) + Send + Sync + 'static,
    {
        let handler: LineHandler<C> = Arc::new(handler);
        keys.iter()
            .map(|key| {
                let id = CallbackId(Uuid::new_v4());
                self.table_mut(rule).push(Entry {
                    id,
                    key: (*key).to_string(),
                    handler: Arc::clone(&handler),
                });
                id
            })
            .collect()
    }

    /// Remove a registration, returning whether it existed
    pub fn unregister(&mut self, id: CallbackId) -> bool {
        let mut removed = false;
        for table in [
            &mut self.read_prefix,
            &mut self.read_contains,
            &mut self.write_prefix,
        ] {
            let before = table.len();
            table.retain(|entry| entry.id != id);
            removed |= table.len() != before;
        }
        removed
    }

    /// Number of registrations across all tables
    pub fn len(&self) -> usize {
        self.read_prefix.len() + self.read_contains.len() + self.write_prefix.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handlers matching a received line: prefix matches first, then substring matches
    pub fn read_handlers(&self, line: &str) -> Vec<LineHandler<C>> {
        let prefix = self
            .read_prefix
            .iter()
            .filter(|entry| line.starts_with(entry.key.as_str()));
        let contains = self
            .read_contains
            .iter()
            .filter(|entry| line.contains(entry.key.as_str()));
        prefix
            .chain(contains)
            .map(|entry| Arc::clone(&entry.handler))
            .collect()
    }

    /// Handlers matching a written line
    pub fn write_handlers(&self, line: &str) -> Vec<LineHandler<C>> {
        self.write_prefix
            .iter()
            .filter(|entry| line.starts_with(entry.key.as_str()))
            .map(|entry| Arc::clone(&entry.handler))
            .collect()
    }

    /// Run every matching read handler against `context`
    pub fn dispatch_read(&self, context: &mut C, found: &mut FoundLine) {
        for handler in self.read_handlers(&found.line) {
            handler(context, found);
        }
    }

    /// Run every matching write handler against `context`
    pub fn dispatch_write(&self, context: &mut C, found: &mut FoundLine) {
        for handler in self.write_handlers(&found.line) {
            handler(context, found);
        }
    }
}

impl<C> Default for CallbackRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for CallbackRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            read_prefix: self.read_prefix.clone(),
            read_contains: self.read_contains.clone(),
            write_prefix: self.write_prefix.clone(),
        }
    }
}

impl<C> fmt::Debug for CallbackRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("read_prefix", &self.read_prefix.len())
            .field("read_contains", &self.read_contains.len())
            .field("write_prefix", &self.write_prefix.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_matching_handlers_run_in_order() {
        let mut registry: CallbackRegistry<Vec<String>> = CallbackRegistry::new();
        registry.register(MatchRule::ReadPrefix, "ok", |log, _| log.push("ok".into()));
        registry.register(MatchRule::ReadPrefix, "ok T:", |log, found| {
            log.push("ok T:".into());
            found.consumed = true;
        });
        registry.register(MatchRule::ReadContains, "T:", |log, _| log.push("T:".into()));
        registry.register(MatchRule::ReadPrefix, "wait", |log, _| log.push("wait".into()));

        let mut log = Vec::new();
        let mut found = FoundLine::new("ok T:200 B:60");
        registry.dispatch_read(&mut log, &mut found);

        assert_eq!(log, vec!["ok", "ok T:", "T:"]);
        assert!(found.consumed);
    }

    #[test]
    fn test_write_handlers_ignore_read_tables() {
        let mut registry: CallbackRegistry<u32> = CallbackRegistry::new();
        registry.register(MatchRule::ReadPrefix, "M104", |count, _| *count += 100);
        registry.register(MatchRule::WritePrefix, "M104", |count, _| *count += 1);

        let mut count = 0;
        registry.dispatch_write(&mut count, &mut FoundLine::new("M104 S200"));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unregister() {
        let mut registry: CallbackRegistry<u32> = CallbackRegistry::new();
        let ids = registry.register_all(MatchRule::ReadContains, &["MINTEMP", "MAXTEMP"], |count, _| {
            *count += 1
        });
        assert_eq!(registry.len(), 2);
        assert!(registry.unregister(ids[0]));
        assert!(!registry.unregister(ids[0]));

        let mut count = 0;
        registry.dispatch_read(&mut count, &mut FoundLine::new("Error: MINTEMP triggered"));
        assert_eq!(count, 0);
        registry.dispatch_read(&mut count, &mut FoundLine::new("Error: MAXTEMP triggered"));
        assert_eq!(count, 1);
    }
}

// Log Sink
// Presentation-independent output for pipeline runs: append entries, update them in place

use crate::protocol::MemoryKind;

use std::sync::{Mutex, MutexGuard};

/// Progress-meter families collapsed into a single updating entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressKind {
    Training,
    Validation,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    /// Ordinary script output
    Plain,
    Progress(ProgressKind),
    Memory(MemoryKind),
    Error,
    /// Messages produced by the executor itself
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub category: LogCategory,
    pub text: String,
    /// Stage the entry belongs to, if any
    pub stage_id: Option<String>,
}

impl LogEntry {
    pub fn new(category: LogCategory, text: impl Into<String>) -> Self {
        Self {
            category,
            text: text.into(),
            stage_id: None,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(LogCategory::Info, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(LogCategory::Error, text)
    }

    pub fn for_stage(mut self, stage_id: Option<&str>) -> Self {
        self.stage_id = stage_id.map(str::to_string);
        self
    }
}

/// Handle to an appended entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u64);

/// Destination for log entries
pub trait LogSink: Send + Sync {
    fn append(&self, entry: LogEntry) -> EntryId;

    /// Replace the content of an existing entry
    fn update(&self, id: EntryId, entry: LogEntry);
}

/// Keeps every entry in memory; ids are indices
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, entry: LogEntry) -> EntryId {
        let mut entries = self.lock();
        entries.push(entry);
        EntryId(entries.len() as u64 - 1)
    }

    fn update(&self, id: EntryId, entry: LogEntry) {
        if let Some(slot) = self.lock().get_mut(id.0 as usize) {
            *slot = entry;
        }
    }
}

/// Forwards entries to `tracing`. Progress updates go out at debug level.
#[derive(Debug, Default)]
pub struct TracingLogSink {
    next_id: std::sync::atomic::AtomicU64,
}

impl TracingLogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogSink for TracingLogSink {
    fn append(&self, entry: LogEntry) -> EntryId {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let stage = entry.stage_id.as_deref().unwrap_or("-");
        match entry.category {
            LogCategory::Error => tracing::error!(stage, "{}", entry.text),
            LogCategory::Memory(_) => tracing::info!(stage, kind = "memory", "{}", entry.text),
            LogCategory::Progress(_) => tracing::info!(stage, kind = "progress", "{}", entry.text),
            LogCategory::Plain | LogCategory::Info => tracing::info!(stage, "{}", entry.text),
        }
        EntryId(id)
    }

    fn update(&self, id: EntryId, entry: LogEntry) {
        tracing::debug!(entry = id.0, "{}", entry.text);
    }
}

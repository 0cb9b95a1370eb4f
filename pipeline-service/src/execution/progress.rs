// Progress Classifier
// Collapses repeated progress-meter output into a single updating log entry per meter kind

use crate::execution::sink::{EntryId, LogCategory, LogEntry, LogSink, ProgressKind};
use crate::protocol::WireMessage;

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

struct Patterns {
    training: Regex,
    validation: Regex,
    generic: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        // "  3/50   2.1G   1.234   0.876 ...  45%|████  | 10/22"
        training: Regex::new(r"^\s*\d+/\d+\s+\d+(\.\d+)?G\s.*\d{1,3}%")
            .expect("training pattern is valid"),
        // "  Class  Images  Instances  Box(P  R  mAP50 ...): 100%|██████| 3/3"
        validation: Regex::new(r"Class\s+Images\s+Instances.*\d{1,3}%")
            .expect("validation pattern is valid"),
        // "45%|████" or "10% 1/10 [00:01<00:09]"
        generic: Regex::new(r"\b\d{1,3}%(\s*\||\s+\d+/\d+)").expect("generic pattern is valid"),
    })
}

/// Non-empty lines of a message, treating carriage returns as line breaks
pub fn visible_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| c == '\r' || c == '\n')
        .map(str::trim_end)
        .filter(|segment| !segment.trim().is_empty())
}

/// Last visible line of a message
pub fn last_line(text: &str) -> &str {
    visible_lines(text).last().unwrap_or("")
}

/// Progress family of a line, or `None` for plain output
pub fn classify_line(line: &str) -> Option<ProgressKind> {
    let p = patterns();
    if p.training.is_match(line) {
        Some(ProgressKind::Training)
    } else if p.validation.is_match(line) {
        Some(ProgressKind::Validation)
    } else if p.generic.is_match(line) {
        Some(ProgressKind::Generic)
    } else {
        None
    }
}

/// Turns decoded wire messages into log entries, keeping at most one open
/// entry per progress kind
pub struct ProgressClassifier {
    sink: Arc<dyn LogSink>,
    open: HashMap<ProgressKind, EntryId>,
    stage_id: Option<String>,
}

impl ProgressClassifier {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            open: HashMap::new(),
            stage_id: None,
        }
    }

    /// Tag subsequent entries with a stage; closes any open progress entries
    pub fn set_stage(&mut self, stage_id: Option<&str>) {
        self.stage_id = stage_id.map(str::to_string);
        self.reset();
    }

    /// Forget open progress entries so the next meter starts a new one
    pub fn reset(&mut self) {
        self.open.clear();
    }

    pub fn open_entries(&self) -> usize {
        self.open.len()
    }

    fn entry(&self, category: LogCategory, text: impl Into<String>) -> LogEntry {
        LogEntry::new(category, text).for_stage(self.stage_id.as_deref())
    }

    pub fn handle(&mut self, message: &WireMessage) {
        match message {
            WireMessage::Heartbeat(_) => {}
            WireMessage::Finished => self.reset(),
            WireMessage::Error(msg) => {
                self.reset();
                self.sink.append(self.entry(LogCategory::Error, msg.clone()));
            }
            WireMessage::Memory { kind, .. } => {
                self.reset();
                self.sink
                    .append(self.entry(LogCategory::Memory(*kind), message.to_string()));
            }
            WireMessage::Line(text) => self.handle_line(text),
        }
    }

    fn handle_line(&mut self, text: &str) {
        let line = last_line(text);
        if line.is_empty() {
            return;
        }

        match classify_line(line) {
            Some(kind) => {
                let entry = self.entry(LogCategory::Progress(kind), line);
                match self.open.get(&kind) {
                    Some(id) => self.sink.update(*id, entry),
                    None => {
                        let id = self.sink.append(entry);
                        self.open.insert(kind, id);
                    }
                }
            }
            None => {
                self.reset();
                for line in visible_lines(text) {
                    self.sink.append(self.entry(LogCategory::Plain, line));
                }
            }
        }
    }
}

// Console Sink
// Prints script output as it arrives, rewriting progress meters in place

use crate::output;

use std::sync::Mutex;
use training_pipeline::execution::{EntryId, LogCategory, LogEntry, LogSink};

#[derive(Debug, Default)]
struct ConsoleState {
    next_id: u64,
    /// Progress entry currently occupying the last terminal line
    open_progress: Option<EntryId>,
}

#[derive(Debug, Default)]
pub struct ConsoleSink {
    state: Mutex<ConsoleState>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn open_progress(&self) -> Option<EntryId> {
        self.state.lock().unwrap().open_progress
    }
}

impl LogSink for ConsoleSink {
    fn append(&self, entry: LogEntry) -> EntryId {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = EntryId(state.next_id);
        state.next_id += 1;

        // executor info lines are covered by the event stream
        if entry.category == LogCategory::Info {
            return id;
        }
        if state.open_progress.take().is_some() {
            output::end_progress();
        }

        match entry.category {
            LogCategory::Progress(_) => {
                output::progress(&entry.text, false);
                state.open_progress = Some(id);
            }
            LogCategory::Memory(_) => output::memory(&entry.text),
            LogCategory::Error => output::script_error(&entry.text),
            LogCategory::Plain | LogCategory::Info => output::script_output(&entry.text),
        }
        id
    }

    fn update(&self, id: EntryId, entry: LogEntry) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.open_progress == Some(id) {
            output::progress(&entry.text, true);
            return;
        }

        if state.open_progress.take().is_some() {
            output::end_progress();
        }
        output::progress(&entry.text, false);
        state.open_progress = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use training_pipeline::execution::ProgressKind;

    #[test]
    fn test_progress_line_closed_by_plain_output() {
        let sink = ConsoleSink::new();
        let meter = sink.append(LogEntry::new(
            LogCategory::Progress(ProgressKind::Generic),
            " 40%|####      | 4/10",
        ));
        assert_eq!(sink.open_progress(), Some(meter));

        sink.update(meter, LogEntry::new(LogCategory::Progress(ProgressKind::Generic), " 50%|#####     | 5/10"));
        assert_eq!(sink.open_progress(), Some(meter));

        let plain = sink.append(LogEntry::new(LogCategory::Plain, "saved checkpoint"));
        assert_ne!(plain, meter);
        assert_eq!(sink.open_progress(), None);
    }

    #[test]
    fn test_info_entries_not_printed() {
        let sink = ConsoleSink::new();
        let meter = sink.append(LogEntry::new(LogCategory::Progress(ProgressKind::Training), "1/3 2.1G 10%"));
        sink.append(LogEntry::info("Starting stage: Train"));
        assert_eq!(sink.open_progress(), Some(meter));
    }
}

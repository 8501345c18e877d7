//! Realtime monitor progress.

use std::collections::HashMap;

/// Highest message id seen per donor channel by the realtime monitor.
///
/// Not persisted: after a restart the ledger alone keeps the first cycle
/// from re-sending anything.
#[derive(Debug, Clone, Default)]
pub struct HighWaterMarks {
    marks: HashMap<String, i32>,
}

impl HighWaterMarks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, channel: &str) -> Option<i32> {
        self.marks.get(channel).copied()
    }

    /// Raises the mark for `channel` to `id`. Never lowers it.
    ///
    /// Returns whether the mark moved.
    pub fn advance(&mut self, channel: &str, id: i32) -> bool {
        match self.marks.get_mut(channel) {
            Some(mark) if *mark >= id => false,
            Some(mark) => {
                *mark = id;
                true
            }
            None => {
                self.marks.insert(channel.to_owned(), id);
                true
            }
        }
    }

    /// Drops the mark so the next cycle starts from the ledger again.
    pub fn forget(&mut self, channel: &str) -> Option<i32> {
        self.marks.remove(channel)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

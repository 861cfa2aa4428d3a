//! Last-read file text paired with the change time it was read under.

use std::time::SystemTime;

/// Freshness cache for the backing file.
///
/// Text and change time live in one `Option` so they only ever update
/// together. A reconciliation cycle stats the file first; when the change
/// time matches the cached one, the cached text is merged against without
/// a read.
#[derive(Debug, Default)]
pub struct FileSnapshot {
    state: Option<(String, SystemTime)>,
}

impl FileSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the file must be read: nothing cached yet, or the file's
    /// change time moved since the cached read.
    pub fn should_reread(&self, change_time: SystemTime) -> bool {
        match &self.state {
            Some((_, cached)) => *cached != change_time,
            None => true,
        }
    }

    /// Replace the cache after a successful read.
    pub fn store(&mut self, text: String, change_time: SystemTime) {
        self.state = Some((text, change_time));
    }

    pub fn text(&self) -> Option<&str> {
        self.state.as_ref().map(|(text, _)| text.as_str())
    }
}

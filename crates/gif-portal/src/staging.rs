//! pending input held before submission

/// text typed but not yet submitted
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputStaging {
    pending: String,
}

impl InputStaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.pending = text.into();
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// take the pending text for submission
    ///
    /// the held text is cleared before anything is sent, so it is gone even if
    /// the submission later fails. `None` when there is nothing to submit.
    pub fn submit(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }
}

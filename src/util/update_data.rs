use serde::{Deserialize, Serialize};

/// Accumulated outcome of the last remote operation on a reservation or
/// delegation. Travels inside update messages and is echoed back to the
/// client on the next update cycle.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateData {
    failed: bool,
    message: Option<String>,
    events: Vec<String>,
}

impl UpdateData {
    pub fn new() -> Self {
        UpdateData::default()
    }

    /// Records an informational event notice.
    pub fn post(&mut self, event: impl Into<String>) {
        self.events.push(event.into());
    }

    /// Records a failure with its message. Overwrites a previous message.
    pub fn error(&mut self, message: impl Into<String>) {
        self.failed = true;
        self.message = Some(message.into());
    }

    /// Merges notices received from a remote peer into the local record.
    pub fn absorb(&mut self, other: &UpdateData) {
        if other.failed {
            self.failed = true;
            self.message = other.message.clone();
        }
        self.events.extend(other.events.iter().cloned());
    }

    pub fn clear(&mut self) {
        self.failed = false;
        self.message = None;
        self.events.clear();
    }

    pub fn successful(&self) -> bool {
        !self.failed
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn events(&self) -> &[String] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_carries_failure_and_events() {
        let mut remote = UpdateData::new();
        remote.error("server cannot satisfy request");
        remote.post("ticket denied");

        let mut local = UpdateData::new();
        local.post("ticket requested");
        local.absorb(&remote);

        assert!(!local.successful());
        assert_eq!(local.message(), Some("server cannot satisfy request"));
        assert_eq!(local.events().len(), 2);
    }

    #[test]
    fn clear_resets_everything() {
        let mut data = UpdateData::new();
        data.error("boom");
        data.clear();
        assert!(data.successful());
        assert!(data.message().is_none());
        assert!(data.events().is_empty());
    }
}

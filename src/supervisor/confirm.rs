//! Error & confirmation bus. A pending destructive action is represented
//! as a data value, not a pair of callback fields: `confirm_action`
//! stores `{message, action}`; confirm/cancel are dispatched by whoever
//! drives the UI, not by the bus calling back into itself. This avoids
//! storing closures in an overlay's state, which would make that state
//! neither `Clone` nor easily inspectable in tests.

use std::time::{Duration, Instant};

/// The destructive action a confirmation gates. Intentionally data, not a
/// closure: the main loop (or, for the scripted CLI, the subcommand
/// handler) matches on this and performs the real work itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmableAction {
    Kill { title: String },
    Push { title: String, commit_message: String, open_pr: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub message: String,
    pub action: ConfirmableAction,
}

/// At most one confirmation pending at a time; a new `confirm_action`
/// silently overwrites whatever was pending.
#[derive(Default)]
pub struct ConfirmBus {
    pending: Option<PendingAction>,
}

impl ConfirmBus {
    pub fn new() -> Self {
        Self { pending: None }
    }

    pub fn confirm_action(&mut self, message: impl Into<String>, action: ConfirmableAction) {
        self.pending = Some(PendingAction { message: message.into(), action });
    }

    pub fn pending(&self) -> Option<&PendingAction> {
        self.pending.as_ref()
    }

    /// `y`: takes and returns the pending action so the caller can run it.
    pub fn confirm(&mut self) -> Option<PendingAction> {
        self.pending.take()
    }

    /// `n` / `esc`: discards the pending action.
    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

const ERROR_DISMISS: Duration = Duration::from_secs(3);

/// Normalises error surfacing: every error handed to `handle_error` is
/// displayed until `ERROR_DISMISS` elapses, then considered dismissed.
/// There is no background timer here — `current` lazily reports dismissal
/// once the caller asks, matching a single-threaded event loop that only
/// checks state when it has something to render.
#[derive(Default)]
pub struct ErrorBus {
    last: Option<(String, Instant)>,
}

impl ErrorBus {
    pub fn new() -> Self {
        Self { last: None }
    }

    pub fn handle_error(&mut self, message: impl Into<String>) {
        self.last = Some((message.into(), Instant::now()));
    }

    /// The currently displayed error, or `None` if nothing is pending or
    /// the dismiss window has elapsed.
    pub fn current(&self) -> Option<&str> {
        match &self.last {
            Some((message, at)) if at.elapsed() < ERROR_DISMISS => Some(message.as_str()),
            _ => None,
        }
    }

    pub fn dismiss(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_action_overwrites_previous_pending() {
        let mut bus = ConfirmBus::new();
        bus.confirm_action("kill a?", ConfirmableAction::Kill { title: "a".into() });
        bus.confirm_action("kill b?", ConfirmableAction::Kill { title: "b".into() });
        let pending = bus.pending().unwrap();
        assert_eq!(pending.message, "kill b?");
    }

    #[test]
    fn confirm_takes_and_clears_the_pending_action() {
        let mut bus = ConfirmBus::new();
        bus.confirm_action("kill a?", ConfirmableAction::Kill { title: "a".into() });
        let taken = bus.confirm();
        assert!(taken.is_some());
        assert!(bus.pending().is_none());
    }

    #[test]
    fn cancel_discards_the_pending_action() {
        let mut bus = ConfirmBus::new();
        bus.confirm_action("kill a?", ConfirmableAction::Kill { title: "a".into() });
        bus.cancel();
        assert!(bus.pending().is_none());
    }

    #[test]
    fn error_is_visible_until_dismiss_window_elapses() {
        let mut bus = ErrorBus::new();
        bus.handle_error("boom");
        assert_eq!(bus.current(), Some("boom"));
    }

    #[test]
    fn dismiss_clears_immediately() {
        let mut bus = ErrorBus::new();
        bus.handle_error("boom");
        bus.dismiss();
        assert_eq!(bus.current(), None);
    }
}

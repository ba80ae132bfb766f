//! Ticker scheduler: the 500 ms metadata tick and the single-in-flight +
//! generation-counter pattern for the 100 ms preview refresh, which
//! discards a capture that completes after the operator has navigated
//! away from the instance it was fetched for.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use anyhow::Result;

/// Guards the metadata tick against overlapping with itself: a tick
/// skips entirely if the previous one is still in flight.
#[derive(Clone, Default)]
pub struct TickGuard {
    in_flight: Arc<AtomicBool>,
}

impl TickGuard {
    pub fn new() -> Self {
        Self { in_flight: Arc::new(AtomicBool::new(false)) }
    }

    /// Attempts to enter the tick; `None` if one is already running.
    /// Dropping the returned `TickRun` clears the flag.
    pub fn try_begin(&self) -> Option<TickRun> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Some(TickRun { in_flight: Arc::clone(&self.in_flight) })
        } else {
            None
        }
    }
}

pub struct TickRun {
    in_flight: Arc<AtomicBool>,
}

impl Drop for TickRun {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

/// The monotonic generation counter behind preview-refresh results. The
/// operator navigating to a different instance bumps the generation;
/// in-flight captures started under a stale generation are discarded when
/// they complete instead of overwriting the newly selected instance's
/// preview.
#[derive(Clone, Default)]
pub struct PreviewGeneration {
    current: Arc<AtomicU64>,
}

impl PreviewGeneration {
    pub fn new() -> Self {
        Self { current: Arc::new(AtomicU64::new(0)) }
    }

    /// Call when the operator selects a different instance. Returns the
    /// new generation, to be captured by the next `spawn_preview_fetch`.
    pub fn bump(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current.load(Ordering::SeqCst) == generation
    }
}

/// A completed preview capture, or `None` if it arrived after the
/// operator had already navigated away (a stale generation).
pub type PreviewResult = Option<(String, String)>;

/// Runs `capture` on a background thread and posts the result back
/// through the returned channel, tagged with whether it is still current
/// by the time it completes. `title` identifies which instance the
/// capture belongs to, so a late result for a previously-selected
/// instance can be told apart from the current selection's own capture.
pub fn spawn_preview_fetch(
    title: String,
    generation: u64,
    tracker: PreviewGeneration,
    capture: impl FnOnce() -> Result<String> + Send + 'static,
) -> Receiver<PreviewResult> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = capture();
        let payload = match result {
            Ok(content) if tracker.is_current(generation) => Some((title, content)),
            _ => None,
        };
        let _ = tx.send(payload);
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn try_begin_fails_while_a_run_is_in_flight() {
        let guard = TickGuard::new();
        let run = guard.try_begin();
        assert!(run.is_some());
        assert!(guard.try_begin().is_none());
    }

    #[test]
    fn dropping_a_run_frees_the_guard_for_the_next_tick() {
        let guard = TickGuard::new();
        {
            let _run = guard.try_begin().unwrap();
        }
        assert!(guard.try_begin().is_some());
    }

    #[test]
    fn stale_generation_capture_is_discarded() {
        let tracker = PreviewGeneration::new();
        let stale_generation = tracker.bump();
        // Operator navigates away before the stale capture completes.
        tracker.bump();

        let rx = spawn_preview_fetch(
            "a".to_string(),
            stale_generation,
            tracker.clone(),
            || Ok("late output".to_string()),
        );
        let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn current_generation_capture_is_delivered() {
        let tracker = PreviewGeneration::new();
        let generation = tracker.bump();
        let rx = spawn_preview_fetch(
            "a".to_string(),
            generation,
            tracker.clone(),
            || Ok("fresh output".to_string()),
        );
        let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(result, Some(("a".to_string(), "fresh output".to_string())));
    }
}

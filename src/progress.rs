//! Observer trait for pipeline progress events.
//!
//! Inject an [`Observer`] into the [`crate::controller::Pipeline`] to receive
//! step-level events and sub-progress while a run is in flight. The CLI
//! forwards them to an indicatif progress bar, the web server mirrors them
//! into the [`crate::jobs::JobTracker`].
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a channel, a tracker record or a terminal
//! bar without the library knowing how the host communicates. The trait is
//! `Send + Sync` because sub-progress fires from concurrently running tasks.
//!
//! # Example
//!
//! ```rust
//! use slide2thesis::PipelineObserver;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingObserver {
//!     completed: AtomicUsize,
//! }
//!
//! impl PipelineObserver for CountingObserver {
//!     fn on_step_complete(&self, step: &'static str) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{step} done");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the pipeline controller as steps run.
///
/// All methods have default no-op implementations so implementors only
/// override what they care about. `on_subtask_progress` may be called
/// concurrently from different tasks.
pub trait PipelineObserver: Send + Sync {
    /// A step is about to run.
    fn on_step_start(&self, step: &'static str) {
        let _ = step;
    }

    /// A step was skipped because its outputs already exist.
    fn on_step_skipped(&self, step: &'static str) {
        let _ = step;
    }

    /// A step finished successfully.
    fn on_step_complete(&self, step: &'static str) {
        let _ = step;
    }

    /// A step failed; the run stops after this event.
    fn on_step_failed(&self, step: &'static str, error: &str) {
        let _ = (step, error);
    }

    /// `done` of `total` sub-tasks of `step` have finished.
    ///
    /// # Arguments
    /// * `message`: human-readable status, e.g. `"processing page 3 of 12"`
    fn on_subtask_progress(&self, step: &'static str, done: usize, total: usize, message: &str) {
        let _ = (step, done, total, message);
    }
}

/// Observer that ignores every event. The default.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Shared observer handle as stored by the pipeline.
pub type Observer = Arc<dyn PipelineObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl PipelineObserver for Recording {
        fn on_step_start(&self, step: &'static str) {
            self.events.lock().unwrap().push(format!("start {step}"));
        }

        fn on_subtask_progress(&self, step: &'static str, done: usize, total: usize, _message: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{step} {done}/{total}"));
        }
    }

    #[test]
    fn unimplemented_events_are_ignored() {
        let observer = Recording::default();
        observer.on_step_start("extract");
        observer.on_step_skipped("extract");
        observer.on_subtask_progress("extract", 1, 3, "processing page 1 of 3");
        observer.on_step_failed("extract", "boom");
        assert_eq!(
            *observer.events.lock().unwrap(),
            vec!["start extract".to_string(), "extract 1/3".to_string()]
        );
    }

    #[test]
    fn noop_observer_is_object_safe() {
        let observer: Observer = Arc::new(NoopObserver);
        observer.on_step_complete("compile");
    }
}

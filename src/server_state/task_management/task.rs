//! # Task System Core Traits
//!
//! This module defines the fundamental building blocks of the task system,
//! which executes pure background work (collider builds, chunk saves) away from
//! the simulation thread.
//!
//! ## Core Components
//! - `Task`: Represents a unit of work that can be executed asynchronously
//! - `TaskResult`: Represents the result of a completed task
//! - `CancellationToken`: Cooperative cancellation flag shared with a running task
//!
//! ## Task Lifecycle
//! 1. A `Task` is created and scheduled via `TaskManager::publish_task()`
//! 2. The task's `process()` method is called on a worker thread
//! 3. The task returns a boxed `TaskResult`
//! 4. The result's `handle_result()` is called on the simulation thread
//! 5. The result can spawn follow-up tasks
//!
//! ## Thread Safety
//! - `Task` must be `Send` to be transferred between threads
//! - `TaskResult` must be `Send` to be transferred back to the simulation thread
//! - Tasks only read shared state; anything they produce is integrated back by
//!   the simulation thread

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A trait representing a unit of work that can be executed asynchronously.
///
/// Tasks should own (or hold shared read handles to) all the data they need.
/// They must never mutate entity, session or container state directly.
pub trait Task: Send {
    /// Processes the task and returns a result.
    ///
    /// Runs on a worker thread. Any failure must be folded into the returned
    /// result rather than panicking.
    ///
    /// # Returns
    /// A boxed `TaskResult` that will be processed on the simulation thread.
    fn process(&self) -> Box<dyn TaskResult>;
}

/// A trait representing the result of processing a `Task`.
///
/// Results are handled on the simulation thread, in the order the worker
/// channels deliver them.
pub trait TaskResult: Send {
    /// Handles the result of a completed task on the simulation thread.
    ///
    /// # Returns
    /// Follow-up tasks to schedule (usually empty).
    fn handle_result(self: Box<Self>) -> Vec<Box<dyn Task>>;
}

/// Shared flag used to cancel a task that may already be running.
///
/// Cancelling never blocks and never waits for the task; the task checks the
/// flag before doing expensive work and again before publishing anything.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the "not cancelled" state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token as cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

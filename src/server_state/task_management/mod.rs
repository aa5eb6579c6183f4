//! # Task Management System
//!
//! This module provides the worker pool that executes background work for the
//! simulation: collider rebuilds for edited chunks and periodic chunk saves.
//!
//! ## Architecture Overview
//!
//! The task management system consists of several key components:
//! - `TaskManager`: Central coordinator for task distribution and worker management
//! - `Task`: A unit of work that can be executed asynchronously
//! - `TaskResult`: The result of a completed task, which can spawn additional tasks
//! - `TaskChannel`: Communication channel between the simulation thread and a worker
//!
//! ## Task Lifecycle
//! 1. Tasks are created and published via `TaskManager::publish_task()`
//! 2. The manager distributes tasks to available worker channels using round-robin
//! 3. Workers process tasks asynchronously and return results
//! 4. Results are processed on the simulation thread in `process_completed_tasks()`
//! 5. Results can spawn new tasks
//!
//! ## Inline Mode
//! A manager created with zero workers never spawns a thread. Published tasks stay
//! queued until [`TaskManager::flush`] runs them on the calling thread, which makes
//! the completion point of every background job explicit and deterministic.
//!
//! ## Example Usage
//! ```rust
//! use voxel_server::server_state::task_management::{
//!     task::{Task, TaskResult},
//!     TaskManager,
//! };
//!
//! struct Ping;
//! struct Pong;
//!
//! impl Task for Ping {
//!     fn process(&self) -> Box<dyn TaskResult> {
//!         Box::new(Pong)
//!     }
//! }
//!
//! impl TaskResult for Pong {
//!     fn handle_result(self: Box<Self>) -> Vec<Box<dyn Task>> {
//!         Vec::new()
//!     }
//! }
//!
//! let mut task_manager = TaskManager::new(2);
//! task_manager.publish_task(Box::new(Ping));
//!
//! // In the simulation loop:
//! task_manager.process_completed_tasks();
//! task_manager.process_queued_tasks();
//!
//! // On shutdown:
//! task_manager.flush();
//! assert_eq!(task_manager.in_flight(), 0);
//! ```

pub mod task;

use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use task::{Task, TaskResult};

/// A communication channel between the simulation thread and a worker thread.
///
/// # Fields
/// - `task_sender`: Sends tasks from the simulation thread to the worker
/// - `result_receiver`: Receives task results from the worker
/// - `num_tasks_in_flight`: Tracks number of tasks currently being processed
/// - `worker`: Handle to the worker thread, joined when the manager is dropped
pub struct TaskChannel {
    task_sender: Option<Sender<Box<dyn Task>>>,
    result_receiver: Receiver<Box<dyn TaskResult>>,
    num_tasks_in_flight: usize,
    worker: Option<JoinHandle<()>>,
}

/// Manages a pool of worker threads and coordinates task execution.
///
/// The `TaskManager` is responsible for:
/// - Creating and managing worker threads
/// - Distributing tasks across available workers
/// - Collecting and processing task results
/// - Handling task queuing when all workers are busy
///
/// It is owned by the simulation thread; only the tasks themselves cross over to
/// the workers.
pub struct TaskManager {
    channels: Vec<TaskChannel>,
    queued_tasks: VecDeque<Box<dyn Task>>,
    current_channel: usize,
}

/// Maximum number of tasks that can be in flight per worker channel.
///
/// This is set to 1 so that a long task never delays another task queued behind
/// it on the same worker while a different worker sits idle.
pub const MAX_TASKS_IN_FLIGHT: usize = 1;

impl TaskManager {
    /// Creates a new `TaskManager` with the specified number of worker threads.
    ///
    /// # Arguments
    /// * `num_workers` - Number of worker threads to create. Zero selects inline
    ///   mode, where queued tasks only run during [`flush`](Self::flush).
    ///
    /// A worker thread that fails to spawn is logged and skipped.
    pub fn new(num_workers: usize) -> Self {
        let mut channels = Vec::with_capacity(num_workers);

        for worker_index in 0..num_workers {
            let (task_tx, task_rx) = channel::<Box<dyn Task>>();
            let (result_tx, result_rx) = channel::<Box<dyn TaskResult>>();

            let task_closure = move || {
                while let Ok(task) = task_rx.recv() {
                    let result = task.process();
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            };

            let worker = thread::Builder::new()
                .name(format!("task-worker-{worker_index}"))
                .spawn(task_closure);

            match worker {
                Ok(worker) => channels.push(TaskChannel {
                    task_sender: Some(task_tx),
                    result_receiver: result_rx,
                    num_tasks_in_flight: 0,
                    worker: Some(worker),
                }),
                Err(error) => {
                    warn!("Failed to spawn task worker {worker_index}: {error}");
                }
            }
        }

        info!(
            "Task manager started with {} worker(s) (available parallelism: {:?})",
            channels.len(),
            thread::available_parallelism()
        );

        TaskManager {
            channels,
            queued_tasks: VecDeque::new(),
            current_channel: 0,
        }
    }

    /// Number of worker threads. Zero means inline mode.
    pub fn worker_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of tasks currently being processed by workers.
    pub fn in_flight(&self) -> usize {
        self.channels
            .iter()
            .map(|channel| channel.num_tasks_in_flight)
            .sum()
    }

    /// Number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queued_tasks.len()
    }

    /// Attempts to send a task to a specific worker channel.
    ///
    /// # Returns
    /// - `Ok(())` if the task was successfully sent to the worker
    /// - `Err(task)` if the send failed (the worker is gone), so it can be requeued
    fn try_send_task(
        &mut self,
        task: Box<dyn Task>,
        channel_idx: usize,
    ) -> Result<(), Box<dyn Task>> {
        let channel = &mut self.channels[channel_idx];
        let Some(sender) = channel.task_sender.as_ref() else {
            return Err(task);
        };
        match sender.send(task) {
            Ok(()) => {
                channel.num_tasks_in_flight += 1;
                Ok(())
            }
            Err(error) => {
                warn!("Task worker {channel_idx} disconnected");
                channel.task_sender = None;
                Err(error.0)
            }
        }
    }

    /// Finds an available worker channel that can accept a new task.
    ///
    /// Round-robin starting from the channel after the last one used; channels at
    /// `MAX_TASKS_IN_FLIGHT` or whose worker has gone away are skipped.
    fn find_available_channel(&self) -> Option<usize> {
        if self.channels.is_empty() {
            return None;
        }

        let start_channel = self.current_channel % self.channels.len();
        let mut current = start_channel;

        loop {
            let channel = &self.channels[current];
            if channel.task_sender.is_some()
                && channel.num_tasks_in_flight < MAX_TASKS_IN_FLIGHT
            {
                return Some(current);
            }
            current = (current + 1) % self.channels.len();
            if current == start_channel {
                return None;
            }
        }
    }

    /// Publishes a new task for execution.
    ///
    /// # Returns
    /// - `true` if the task was immediately scheduled on an available worker
    /// - `false` if the task was queued because all workers are busy (or the
    ///   manager runs inline)
    pub fn publish_task(&mut self, task: Box<dyn Task>) -> bool {
        match self.find_available_channel() {
            Some(channel_idx) => match self.try_send_task(task, channel_idx) {
                Ok(()) => {
                    self.current_channel = (channel_idx + 1) % self.channels.len();
                    true
                }
                Err(task) => {
                    self.queued_tasks.push_back(task);
                    false
                }
            },
            None => {
                self.queued_tasks.push_back(task);
                false
            }
        }
    }

    /// Moves queued tasks to idle workers, oldest first.
    ///
    /// Called once per simulation tick. Stops as soon as every worker is busy.
    pub fn process_queued_tasks(&mut self) {
        while let Some(channel_idx) = self.find_available_channel() {
            let Some(task) = self.queued_tasks.pop_front() else {
                return;
            };
            match self.try_send_task(task, channel_idx) {
                Ok(()) => {
                    self.current_channel = (channel_idx + 1) % self.channels.len();
                }
                Err(task) => {
                    self.queued_tasks.push_front(task);
                }
            }
        }
    }

    /// Processes all completed task results from worker threads.
    ///
    /// Must be called on the simulation thread. Follow-up tasks returned by the
    /// results are published after every available result has been handled.
    pub fn process_completed_tasks(&mut self) {
        let mut tasks_to_queue = Vec::new();
        for channel in &mut self.channels {
            loop {
                match channel.result_receiver.try_recv() {
                    Ok(result) => {
                        channel.num_tasks_in_flight =
                            channel.num_tasks_in_flight.saturating_sub(1);
                        tasks_to_queue.extend(result.handle_result());
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        // The worker died mid-task; its result will never arrive.
                        channel.num_tasks_in_flight = 0;
                        channel.task_sender = None;
                        break;
                    }
                }
            }
        }

        for task in tasks_to_queue {
            self.publish_task(task);
        }
    }

    /// Blocks until no task is queued or in flight.
    ///
    /// In inline mode, or when every worker has gone away, the remaining tasks
    /// run on the calling thread.
    pub fn flush(&mut self) {
        loop {
            self.process_completed_tasks();
            self.process_queued_tasks();

            if self.in_flight() == 0 {
                if self.queued_tasks.is_empty() {
                    return;
                }
                self.run_queued_inline();
                continue;
            }

            self.wait_for_one_result();
        }
    }

    fn run_queued_inline(&mut self) {
        while let Some(task) = self.queued_tasks.pop_front() {
            let result = task.process();
            self.queued_tasks.extend(result.handle_result());
        }
    }

    fn wait_for_one_result(&mut self) {
        let mut follow_ups = Vec::new();
        if let Some(channel) = self
            .channels
            .iter_mut()
            .find(|channel| channel.num_tasks_in_flight > 0)
        {
            match channel.result_receiver.recv() {
                Ok(result) => {
                    channel.num_tasks_in_flight -= 1;
                    follow_ups = result.handle_result();
                }
                Err(_) => {
                    channel.num_tasks_in_flight = 0;
                    channel.task_sender = None;
                }
            }
        }
        for task in follow_ups {
            self.publish_task(task);
        }
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        if !self.queued_tasks.is_empty() {
            debug!(
                "Dropping task manager with {} queued task(s)",
                self.queued_tasks.len()
            );
        }
        for channel in &mut self.channels {
            channel.task_sender = None;
        }
        for channel in &mut self.channels {
            if let Some(worker) = channel.worker.take() {
                let _ = worker.join();
            }
        }
    }
}

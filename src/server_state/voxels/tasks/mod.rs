//! # Voxel Task System
//!
//! This module contains background tasks that work on voxel data. They only read
//! chunk content, so they run on the worker pool without holding up a tick.

pub mod save_chunks_task;

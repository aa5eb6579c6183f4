//! # Core Module
//!
//! This module provides the shared-ownership, event and allocation primitives the
//! rest of the server is built from.
//!
//! ## Key Components
//! - `MtResource`: Thread-safe reference-counted resource with read-write locking
//! - `StResource`: Single-threaded reference-counted resource with interior mutability
//! - `Signal`: Synchronous typed event subscription
//! - `SlotPool`: Free-list arena with two-phase reserve/construct allocation
//! - `HandleMap`: Generation-checked handle storage
//! - `IdAllocator`: Smallest-free-first allocator of small network ids
//!
//! ## Usage
//! ```rust
//! use voxel_server::core::{HandleMap, MtResource, StResource};
//!
//! // Thread-safe resource
//! let counter = MtResource::new(0);
//! *counter.get_mut() += 1;
//! assert_eq!(*counter.get(), 1);
//!
//! // Simulation-thread resource
//! let queue = StResource::new(Vec::<u32>::new());
//! queue.get_mut().push(3);
//!
//! // Handles go stale once their value is removed
//! let mut entities = HandleMap::new();
//! let handle = entities.insert("root");
//! entities.remove(handle);
//! assert!(entities.get(handle).is_none());
//! ```

pub mod handle_map;
pub mod id_allocator;
pub mod mt_resource;
pub mod signal;
pub mod slot_pool;
pub mod st_resource;

pub use handle_map::{Handle, HandleMap};
pub use id_allocator::IdAllocator;
pub use mt_resource::MtResource;
pub use signal::{Signal, SubscriptionId};
pub use slot_pool::SlotPool;
pub use st_resource::StResource;

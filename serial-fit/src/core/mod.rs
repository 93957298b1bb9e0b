//! Core abstractions shared by every port-pair thread.
//!
//! - [`types`]: protocol, lifecycle states
//! - [`sync`]: semaphores and cancellation tokens

pub mod sync;
pub mod types;

//! Anonymous 1:1 chat core: connection registry, matching queue, session
//! lifecycle, routing, and the dispatcher that serializes all of it.

pub mod dispatcher;
pub mod queue;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod session;
pub mod typing;

use std::time::Duration;

/// Upper bound for every configurable window, timeout and sweep period.
/// Deadlines are computed as `Instant + Duration`, which panics on overflow.
pub const MAX_TIMER_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

pub use dispatcher::{CloseReason, DispatchConfig, Dispatcher, DispatcherHandle, HubStats};
pub use registry::ConnectionId;

//! Core replack primitives shared across crates.
//!
//! Includes sequence ranges, server identities, correlation tokens, the
//! monotonic clock abstraction, and base errors.

pub mod error;
pub mod time;
pub mod types;

pub use error::CoreError;
pub use time::{duration_to_us, Clock, ManualClock, MonotonicClock};
pub use types::{CorrelationToken, SeqRange, ServerAddr};

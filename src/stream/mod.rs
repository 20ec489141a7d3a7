//! Stream combinators for display subscriptions

mod throttle;

pub use throttle::{Throttle, ThrottleExt};

//! Bandwidth throttling logic and state management.

mod cancel;
mod capability;
mod clock;
mod engine;
mod quota;
mod shared;
mod state;
mod stream;

pub use cancel::CancelToken;
pub use capability::{Chunk, Readable, Writable};
pub use clock::{Clock, SleepOutcome, SystemClock};
pub use quota::{parse_size, Quota, DEFAULT_LIMIT, DEFAULT_WINDOW};
pub use shared::SharedBudget;
pub use state::{Accounting, RateState, RateStats};
pub use stream::{Throttled, ThrottledBuilder};

#[cfg(any(test, feature = "test-helpers"))]
pub use clock::ManualClock;

pub mod retry;

pub use retry::{RetryPolicy, backoff_delay};

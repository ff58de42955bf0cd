pub mod retry;

pub use retry::{retry_async, RetryConfig};

//! Retry, circuit breaking and rate limiting for external calls.

pub mod circuit;
pub mod guarded;
pub mod rate_limited;
pub mod retry;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use guarded::{Guard, ResilientEmbedder, ResilientVerifier};
pub use rate_limited::{EmbedderExt, RateLimitedEmbedder};
pub use retry::RetryPolicy;

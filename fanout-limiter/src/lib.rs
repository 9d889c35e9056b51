//! Per-key rate limiting using the token bucket algorithm
//!
//! Every send is gated by three buckets: the calling user's, the sender
//! identity's, and one global bucket. A sliding-window spam tracker sits in
//! front of the buckets and temporarily blocklists callers that hammer the
//! engine, independent of the bucket outcome.
//!
//! # Token Bucket Algorithm
//!
//! - Tokens are added to a bucket at a constant rate (`refill_rate`)
//! - Each permitted action consumes tokens (usually one)
//! - Refill is lazy: computed at acquisition time from elapsed time × rate
//! - Bucket has maximum capacity (allows bursts)

mod bucket;
mod gate;
mod spam;

pub use bucket::{BucketStats, LimitKey, RateLimitConfig, RateLimiter};
pub use gate::Verdict;
pub use spam::SpamConfig;

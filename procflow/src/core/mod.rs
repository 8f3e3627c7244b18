//! Core building blocks shared by every layer: errors, retry policy,
//! serialization helpers and the clock.

pub mod clock;
pub mod error;
pub mod retry;
pub mod serialization;

pub use clock::{Clock, SystemClock, TokioClock};
pub use error::{Error, Result};
pub use retry::{retry_with_policy, RetryPolicy, Retryable};
pub use serialization::{
    deserialize_value, fingerprint, from_json, hash_params, serialize_value, to_json,
};

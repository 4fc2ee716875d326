//! Upstream card search: query expressions, payload shapes, retry/backoff, pagination.

pub mod backoff;
pub mod client;
pub mod envelope;
pub mod query;

pub use backoff::{backoff_delay, fetch_with_retry, JitterRng};
pub use client::{classify_status, CardSource, HttpCardSource, UpstreamClient, UpstreamPage};
pub use envelope::{parse_upstream_envelope, Envelope, RawRecord};
pub use query::{CardQuery, DexRange};

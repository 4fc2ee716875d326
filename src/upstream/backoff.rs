//! Exponential backoff with jitter around a single fallible upstream attempt.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryPolicy;
use crate::error::UpstreamError;

const SPLITMIX64_GOLDEN: u64 = 0x9e3779b97f4a7c15;
const SPLITMIX64_M1: u64 = 0xbf58476d1ce4e5b9;
const SPLITMIX64_M2: u64 = 0x94d049bb133111eb;

/// SplitMix64 jitter source. Not cryptographically secure; only spreads retries.
#[derive(Debug, Clone, Copy)]
pub struct JitterRng {
    state: u64,
}

impl JitterRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Seeded from the OS; falls back to the clock when entropy is unavailable.
    pub fn from_entropy() -> Self {
        let mut buf = [0_u8; 8];
        let seed = match getrandom::getrandom(&mut buf) {
            Ok(()) => u64::from_le_bytes(buf),
            Err(_) => std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(SPLITMIX64_GOLDEN),
        };
        Self::new(seed)
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(SPLITMIX64_GOLDEN);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(SPLITMIX64_M1);
        z = (z ^ (z >> 27)).wrapping_mul(SPLITMIX64_M2);
        z ^ (z >> 31)
    }

    /// Uniform-ish value in `[0, bound)`; 0 when `bound` is 0.
    pub fn below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            0
        } else {
            self.next_u64() % bound
        }
    }
}

/// Delay before retry number `attempt + 1`: `base * 2^attempt + [0, jitter)`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, rng: &mut JitterRng) -> Duration {
    let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let exponential = policy.base_delay_ms.saturating_mul(factor);
    Duration::from_millis(exponential.saturating_add(rng.below(policy.jitter_ms)))
}

/// Runs `op` until it succeeds, fails permanently, or `policy.max_retries`
/// retries are spent. The last error is returned on exhaustion.
pub async fn fetch_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut rng = JitterRng::from_entropy();
    let mut attempt = 0_u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = backoff_delay(policy, attempt, &mut rng);
                tracing::debug!(
                    query = label,
                    attempt = attempt + 1,
                    status = ?err.status(),
                    delay_ms = delay.as_millis() as u64,
                    "transient upstream failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

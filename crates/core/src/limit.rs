//! Bandwidth caps for uploads and downloads

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Shared token bucket; every worker draws from the same budget
#[derive(Debug)]
pub struct BandwidthLimiter {
    bytes_per_sec: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

impl BandwidthLimiter {
    /// A limiter allowing `bytes_per_sec` with a one-second burst
    pub fn new(bytes_per_sec: u64) -> Self {
        let rate = bytes_per_sec.max(1) as f64;
        Self {
            bytes_per_sec: rate,
            bucket: Mutex::new(Bucket {
                tokens: rate,
                last: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> u64 {
        self.bytes_per_sec as u64
    }

    /// Wait until `bytes` may pass
    ///
    /// The debt is booked before sleeping so concurrent callers queue behind it.
    pub async fn consume(&self, bytes: u64) {
        let wait = {
            let mut bucket = self.bucket.lock().await;
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last).as_secs_f64();
            bucket.last = now;
            bucket.tokens = (bucket.tokens + elapsed * self.bytes_per_sec).min(self.bytes_per_sec);
            bucket.tokens -= bytes as f64;
            if bucket.tokens < 0.0 {
                Duration::from_secs_f64(-bucket.tokens / self.bytes_per_sec)
            } else {
                Duration::ZERO
            }
        };
        if !wait.is_zero() {
            tracing::trace!(bytes, wait_ms = wait.as_millis() as u64, "bandwidth limit");
            tokio::time::sleep(wait).await;
        }
    }
}

/// Parse a byte size: `512`, `64KiB`, `10M`, `1.5GB`
///
/// Decimal suffixes (K, M, G, T) are powers of 1000; `i` suffixes are powers of 1024.
pub fn parse_size(input: &str) -> Result<u64> {
    let invalid = || Error::InvalidArgument(format!("invalid size '{input}'"));
    let s = input.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: f64 = number.parse().map_err(|_| invalid())?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1_000,
        "ki" | "kib" => 1 << 10,
        "m" | "mb" => 1_000_000,
        "mi" | "mib" => 1 << 20,
        "g" | "gb" => 1_000_000_000,
        "gi" | "gib" => 1 << 30,
        "t" | "tb" => 1_000_000_000_000,
        "ti" | "tib" => 1 << 40,
        _ => return Err(invalid()),
    };

    let bytes = number * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as u64)
}

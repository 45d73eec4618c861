use std::{net::IpAddr, time::Duration};

use ahash::AHashMap;
use parking_lot::Mutex;

/// Reflection replies per address per window.
pub const MAX_REQUESTS_PER_IP: usize = 20;

/// Distinct addresses tracked per window; once full, every further request
/// goes unanswered until the next reset.
pub const MAX_TRACKED_IPS: usize = 5000;

/// How often the counter is cleared.
pub const RESET_INTERVAL: Duration = Duration::from_secs(60);

/// Per-address request counter for the reflection responder.
///
/// Independent of the client table and its lock; the reflection socket
/// never touches relay state.
///
/// # Test
///
/// ```
/// use tunnel_server_service::limiter::{ReflectionLimiter, MAX_REQUESTS_PER_IP};
///
/// let limiter = ReflectionLimiter::default();
/// let ip = "203.0.113.5".parse().unwrap();
///
/// for _ in 0..MAX_REQUESTS_PER_IP {
///     assert!(limiter.permitted(ip));
/// }
/// assert!(!limiter.permitted(ip));
///
/// limiter.reset();
/// assert!(limiter.permitted(ip));
/// ```
#[derive(Default)]
pub struct ReflectionLimiter(Mutex<AHashMap<IpAddr, usize>>);

impl ReflectionLimiter {
    pub fn permitted(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        let mut counts = self.0.lock();

        if counts.len() >= MAX_TRACKED_IPS {
            return false;
        }

        match counts.get(&ip).copied() {
            Some(count) if count >= MAX_REQUESTS_PER_IP => false,
            _ => {
                *counts.entry(ip).or_insert(0) += 1;

                true
            }
        }
    }

    pub fn reset(&self) {
        self.0.lock().clear();
    }
}

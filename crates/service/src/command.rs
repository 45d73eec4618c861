use std::time::{Duration, Instant};

use parking_lot::Mutex;

use codec::crypto::{self, DIGEST_LEN};

/// The only assigned command byte: flip maintenance mode. Everything else
/// is reserved and ignored after authorization.
pub const MAINTENANCE_TOGGLE: u8 = 0x00;

/// Minimum spacing between processed command attempts, authorized or not.
pub const COMMAND_RATE_LIMIT: Duration = Duration::from_secs(60);

/// Outcome of a command authorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// Digest matched; execute the command.
    Granted,
    /// Digest mismatch. Worth a warning, never a reply.
    Denied,
    /// A previous attempt is still holding the window.
    RateLimited,
    /// No password configured; the command subprotocol is off.
    Disabled,
}

/// The password gate in front of the maintenance command.
///
/// The expected digest is computed once at startup; supplied digests are
/// compared in constant time. Failed attempts hold the rate-limit window
/// just like successful ones, so the gate cannot be hammered for a timing
/// or guessing oracle.
///
/// # Test
///
/// ```
/// use std::time::{Duration, Instant};
///
/// use codec::crypto::password_digest;
/// use tunnel_server_service::command::{Authorization, CommandGate};
///
/// let gate = CommandGate::new(Some("panda"));
/// let now = Instant::now();
///
/// assert_eq!(
///     gate.authorize(&password_digest("panda"), now),
///     Authorization::Granted
/// );
///
/// // Still inside the window.
/// assert_eq!(
///     gate.authorize(&password_digest("panda"), now + Duration::from_secs(30)),
///     Authorization::RateLimited
/// );
/// ```
pub struct CommandGate {
    digest: Option<[u8; DIGEST_LEN]>,
    last_attempt: Mutex<Option<Instant>>,
}

impl CommandGate {
    pub fn new(password: Option<&str>) -> Self {
        Self {
            digest: password.map(crypto::password_digest),
            last_attempt: Mutex::new(None),
        }
    }

    pub fn authorize(&self, supplied: &[u8], now: Instant) -> Authorization {
        let mut last = self.last_attempt.lock();

        if let Some(tick) = *last {
            if now.saturating_duration_since(tick) < COMMAND_RATE_LIMIT {
                return Authorization::RateLimited;
            }
        }

        let Some(expected) = self.digest.as_ref() else {
            return Authorization::Disabled;
        };

        *last = Some(now);

        if crypto::digest_eq(expected, supplied) {
            Authorization::Granted
        } else {
            Authorization::Denied
        }
    }
}

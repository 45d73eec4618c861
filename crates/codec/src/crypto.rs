use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

/// SHA-1 digest length; the maintenance command carries exactly this many
/// bytes of proof.
pub const DIGEST_LEN: usize = 20;

/// Digest a maintenance password the way clients are expected to:
/// SHA-1 over the UTF-8 bytes, nothing else mixed in.
///
/// # Test
///
/// ```
/// use tunnel_server_codec::crypto::{digest_eq, password_digest};
///
/// let digest = password_digest("panda");
///
/// assert!(digest_eq(&digest, &password_digest("panda")));
/// assert!(!digest_eq(&digest, &password_digest("raspberry")));
/// ```
pub fn password_digest(password: &str) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

/// Constant-time digest comparison.
///
/// The length check short-circuits, which is fine: the digest length is
/// fixed by the wire format and not a secret.
pub fn digest_eq(expected: &[u8; DIGEST_LEN], supplied: &[u8]) -> bool {
    supplied.len() == DIGEST_LEN && bool::from(expected[..].ct_eq(supplied))
}

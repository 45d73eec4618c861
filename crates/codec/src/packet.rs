use crate::crypto::DIGEST_LEN;

/// Fixed header size: two little-endian `u32` identifiers.
pub const HEADER_LEN: usize = 8;

/// The relay never accepts datagrams larger than this; the receive buffer
/// is sized to match and the OS truncates anything bigger.
pub const MAX_DATAGRAM_LEN: usize = 1024;

/// A latency probe is exactly this long on the wire.
pub const PING_LEN: usize = 50;

/// A probe reply echoes this many bytes of the request.
pub const PING_REPLY_LEN: usize = 12;

/// Header, one command byte, and a 20 byte password digest.
pub const COMMAND_LEN: usize = HEADER_LEN + 1 + DIGEST_LEN;

/// Reserved identifier marking subprotocol traffic; never admitted.
pub const ID_NONE: u32 = 0;

/// Reserved identifier addressing the maintenance command handler; never
/// admitted.
pub const ID_COMMAND: u32 = u32::MAX;

/// What a received tunnel datagram turned out to be.
///
/// Source-address filtering is the socket owner's job; classification only
/// looks at the bytes.
#[derive(Debug, PartialEq, Eq)]
pub enum Datagram<'a> {
    /// A latency probe. Carries the slice to echo back to the sender.
    Ping(&'a [u8]),
    /// A maintenance command with its supplied password digest.
    Command { command: u8, digest: &'a [u8] },
    /// A payload to relay between two registered clients.
    Relay { sender: u32, receiver: u32 },
    /// Anything else; dropped without a reply.
    Discard,
}

/// Classify a received datagram.
///
/// Identifier patterns are matched in precedence order: self-addressed
/// packets are hostile, the reserved sender selects a subprotocol by its
/// receiver, and everything else is relay traffic.
///
/// # Test
///
/// ```
/// use tunnel_server_codec::packet::{classify, Datagram};
///
/// let mut probe = [0u8; 50];
/// probe[8] = 0xAB;
/// assert_eq!(classify(&probe), Datagram::Ping(&probe[..12]));
///
/// let mut relay = [0u8; 12];
/// relay[0] = 7;
/// relay[4] = 9;
/// assert_eq!(classify(&relay), Datagram::Relay { sender: 7, receiver: 9 });
///
/// assert_eq!(classify(&[0u8; 7]), Datagram::Discard);
/// ```
pub fn classify(buf: &[u8]) -> Datagram<'_> {
    if buf.len() < HEADER_LEN {
        return Datagram::Discard;
    }

    let sender = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let receiver = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);

    // A packet addressed to its own sender has no legitimate use.
    if sender == receiver && sender != ID_NONE {
        return Datagram::Discard;
    }

    if sender == ID_NONE {
        return if receiver == ID_COMMAND && buf.len() >= COMMAND_LEN {
            Datagram::Command {
                command: buf[HEADER_LEN],
                digest: &buf[HEADER_LEN + 1..COMMAND_LEN],
            }
        } else if receiver == ID_NONE && buf.len() == PING_LEN {
            Datagram::Ping(&buf[..PING_REPLY_LEN])
        } else {
            Datagram::Discard
        };
    }

    Datagram::Relay { sender, receiver }
}

use std::net::Ipv4Addr;

use rand::Rng;

/// Tag value carried big-endian in the first two bytes of every request.
pub const REFLECTION_TAG: u16 = 26262;

/// Requests are exactly this long; anything else is dropped unanswered.
pub const REQUEST_LEN: usize = 48;

/// Replies are exactly this long.
pub const REPLY_LEN: usize = 40;

/// Receive buffer size for the reflection socket. Oversized requests get
/// truncated by the OS and fail the length check.
pub const RECV_BUFFER_LEN: usize = 64;

const OBFUSCATION_MASK: u8 = 0x20;

/// Check that a received datagram is a reflection request.
pub fn is_request(buf: &[u8]) -> bool {
    buf.len() == REQUEST_LEN && buf[..2] == REFLECTION_TAG.to_be_bytes()
}

/// The reply preamble, seeded once per process.
///
/// Replies are the template with the requester's address spliced into the
/// first six bytes; the random remainder makes replies useless to anyone
/// who did not just send a request from that address.
pub struct ReplyTemplate([u8; REPLY_LEN]);

impl ReplyTemplate {
    /// Seed the template with random bytes and write the tag at offset 6,
    /// where it stays for the lifetime of the process.
    pub fn generate() -> Self {
        let mut bytes = [0u8; REPLY_LEN];
        rand::rng().fill(&mut bytes);
        bytes[6..8].copy_from_slice(&REFLECTION_TAG.to_be_bytes());

        Self(bytes)
    }

    /// Build the reply for one requester.
    ///
    /// Bytes `[0..4)` carry the address octets, `[4..6)` the port in
    /// network byte order, all six XOR-ed with the obfuscation mask.
    ///
    /// # Test
    ///
    /// ```
    /// use std::net::Ipv4Addr;
    ///
    /// use tunnel_server_codec::reflection::ReplyTemplate;
    ///
    /// let template = ReplyTemplate::generate();
    /// let reply = template.reply(Ipv4Addr::new(203, 0, 113, 5), 51000);
    ///
    /// let decoded: Vec<u8> = reply[..6].iter().map(|byte| byte ^ 0x20).collect();
    /// assert_eq!(decoded, &[203, 0, 113, 5, 0xC7, 0x38]);
    /// ```
    pub fn reply(&self, ip: Ipv4Addr, port: u16) -> [u8; REPLY_LEN] {
        let mut reply = self.0;
        reply[0..4].copy_from_slice(&ip.octets());
        reply[4..6].copy_from_slice(&port.to_be_bytes());

        for byte in &mut reply[0..6] {
            *byte ^= OBFUSCATION_MASK;
        }

        reply
    }
}

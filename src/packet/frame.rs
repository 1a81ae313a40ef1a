//! The Velbus wire frame: a short, checksummed, STX/ETX-delimited packet.
//!
//! See the protocol reference at <https://github.com/velbus/packetprotocol>.

use bytes::Bytes;
use std::fmt;

/// Frame start sentinel.
pub const STX: u8 = 0x0F;
/// Frame end sentinel.
pub const ETX: u8 = 0x04;
/// Valid values for the priority byte. `HIGH` additionally gates bus-status
/// interpretation (see [`crate::bus_status`]).
pub const PRIORITIES: [u8; 4] = [0xF8, 0xF9, 0xFA, 0xFB];
pub const PRIORITY_HIGH: u8 = 0xF8;
/// Low nibble mask for the RTR|length byte.
pub const LENGTH_MASK: u8 = 0x0F;
/// Header length before the body: STX, priority, address, RTR|length.
pub const HEADER_LENGTH: usize = 4;
/// Maximum number of body bytes a frame may carry.
pub const MAX_BODY_LENGTH: usize = 8;
/// Smallest possible frame: STX, priority, address, RTR|length, checksum, ETX.
pub const MIN_FRAME_LENGTH: usize = 6;

/// A single validated Velbus frame.
///
/// Wraps the exact wire bytes (`STX ..= ETX`) rather than a re-parsed
/// struct, so a frame received from one transport can be forwarded to
/// another without re-encoding it.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    /// Wraps already-validated frame bytes.
    ///
    /// Callers outside this module should go through [`crate::packet::Parser`]
    /// or [`Frame::checksum`] rather than construct a `Frame` from
    /// unvalidated bytes.
    pub(crate) fn from_validated(bytes: Bytes) -> Self {
        debug_assert!(bytes.len() >= MIN_FRAME_LENGTH);
        debug_assert_eq!(bytes[0], STX);
        debug_assert_eq!(*bytes.last().unwrap(), ETX);
        Frame(bytes)
    }

    /// Builds a frame from its constituent fields, computing the checksum.
    ///
    /// Used by the NTP broadcaster to mint its fixed-shape frames.
    pub fn build(priority: u8, address: u8, body: &[u8]) -> Frame {
        assert!(body.len() <= MAX_BODY_LENGTH, "body too long for a frame");
        let mut buf = Vec::with_capacity(6 + body.len());
        buf.push(STX);
        buf.push(priority);
        buf.push(address);
        buf.push(body.len() as u8);
        buf.extend_from_slice(body);
        let checksum = Frame::checksum(&buf);
        buf.push(checksum);
        buf.push(ETX);
        Frame(Bytes::from(buf))
    }

    /// Two's complement of the sum of `bytes`, truncated to 8 bits.
    pub fn checksum(bytes: &[u8]) -> u8 {
        let sum: u32 = bytes.iter().map(|&b| b as u32).sum();
        (!sum).wrapping_add(1) as u8
    }

    pub fn priority(&self) -> u8 {
        self.0[1]
    }

    pub fn address(&self) -> u8 {
        self.0[2]
    }

    /// The low nibble of the RTR|length byte: the declared body length.
    pub fn body_len(&self) -> usize {
        (self.0[3] & LENGTH_MASK) as usize
    }

    /// Whether the frame carries any body bytes (`body_len() > 0`).
    ///
    /// The original Velbus implementation tests this with `(packet[3] and
    /// 0x0F) != 0`, which due to a missing bitwise `&` actually tests
    /// `packet[3] != 0`. This is the corrected bitwise form.
    pub fn has_body(&self) -> bool {
        (self.0[3] & LENGTH_MASK) != 0
    }

    pub fn body(&self) -> &[u8] {
        let n = self.body_len();
        &self.0[HEADER_LENGTH..HEADER_LENGTH + n]
    }

    pub fn checksum_byte(&self) -> u8 {
        self.0[self.0.len() - 2]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("priority", &format_args!("{:#04x}", self.priority()))
            .field("address", &format_args!("{:#04x}", self.address()))
            .field("body", &self.body())
            .finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = self.0.iter();
        if let Some(first) = parts.next() {
            write!(f, "{:02x}", first)?;
        }
        for byte in parts {
            write!(f, " {:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_two_complement_of_sum() {
        let bytes = [STX, PRIORITY_HIGH, 0x00, 0x01, 0x09];
        let cksum = Frame::checksum(&bytes);
        let mut total: u32 = bytes.iter().map(|&b| b as u32).sum();
        total += cksum as u32;
        assert_eq!(total & 0xFF, 0);
    }

    #[test]
    fn build_produces_well_formed_frame() {
        let frame = Frame::build(0xFB, 0x00, &[0x04, 0xD8, 0x05, 0x0A, 0x1E]);
        assert_eq!(frame.as_bytes()[0], STX);
        assert_eq!(*frame.as_bytes().last().unwrap(), ETX);
        assert_eq!(frame.body(), &[0x04, 0xD8, 0x05, 0x0A, 0x1E]);
    }

    #[test]
    fn has_body_uses_bitwise_and_not_truthiness() {
        // RTR bit (0x10) set, length nibble zero: has_body must be false.
        let frame = Frame::from_validated(Bytes::from(vec![
            STX,
            PRIORITY_HIGH,
            0x00,
            0x10,
            Frame::checksum(&[STX, PRIORITY_HIGH, 0x00, 0x10]),
            ETX,
        ]));
        assert!(!frame.has_body());
    }
}

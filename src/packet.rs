//! Outgoing RTP packet, as the history sees it.

use std::time::Instant;

use crate::id::{SeqNo, Ssrc};

/// An outgoing RTP packet.
///
/// The payload is the serialized packet and is opaque to the history. All the
/// eviction policy needs from it is its size and the RTP sequence number it
/// was assigned at send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// RTP sequence number. 16-bit wrapping space, unique among packets
    /// currently resident in the history.
    pub seq_no: SeqNo,

    /// The stream this packet belongs to.
    pub ssrc: Ssrc,

    /// Serialized packet bytes.
    pub payload: Vec<u8>,

    /// When the media in this packet was captured.
    ///
    /// `None` until stamped, either by the producing pipeline or by the
    /// history on insertion.
    pub capture_time: Option<Instant>,
}

impl RtpPacket {
    /// Create a packet with no capture time set.
    pub fn new(seq_no: SeqNo, ssrc: Ssrc, payload: Vec<u8>) -> Self {
        RtpPacket {
            seq_no,
            ssrc,
            payload,
            capture_time: None,
        }
    }

    /// Size of the packet in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

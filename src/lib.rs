//! A Sans I/O RTP packet retransmission history.
//!
//! Real-time media senders keep a short window of already-sent RTP packets
//! around so they can be resent when the receiver signals loss (NACK), or
//! duplicated as padding that looks like real media. This crate implements
//! that window: [`PacketHistory`], a bounded, time- and feedback-aware cache
//! of outgoing packets.
//!
//! Like the rest of a Sans I/O stack, the history does no network talking and
//! has no internal threads or async tasks. It is a passive data structure:
//! the sender/pacer inserts and retrieves packets, and the feedback
//! processing path prunes packets once the remote end acknowledges them via
//! transport-wide feedback. All public operations serialize on one internal
//! lock, so a single instance can be shared between those threads directly.
//!
//! Time is always obtained through the [`Clock`] trait rather than
//! `Instant::now()`, which keeps the eviction policy deterministic under test
//! (see [`SimulatedClock`]).
//!
//! ```
//! use std::sync::Arc;
//! use rtp_history::{PacketHistory, RtpPacket, StorageKind, StorageMode, SystemClock};
//!
//! let history = PacketHistory::new(Arc::new(SystemClock));
//! history.set_store_packets_status(StorageMode::StoreAndCull, 1000);
//!
//! // Media path: cache the packet as it is queued for sending.
//! let packet = RtpPacket::new(47_000.into(), 0x1234_5678.into(), vec![0u8; 1200]);
//! history.put_packet(packet, StorageKind::Retransmittable, None);
//!
//! // Pacer: a NACK for the packet arrived, pull it back out for resending.
//! let resend = history.get_packet_and_set_send_time(47_000.into(), true);
//! assert!(resend.is_some());
//! ```
//!
//! Cache misses are not errors. Requests for sequence numbers that are
//! absent, already acknowledged, or throttled because a retransmission is
//! still in flight all return `None`, and the caller simply has nothing to
//! resend this round.
#![forbid(unsafe_code)]
#![allow(clippy::new_without_default)]
#![deny(missing_docs)]

mod clock;
mod history;
mod id;
mod packet;

pub use clock::{Clock, SimulatedClock, SystemClock};
pub use history::{PacketHistory, PacketState, StorageKind, StorageMode};
pub use id::{SeqNo, Ssrc, TransportSeqNo};
pub use packet::RtpPacket;

#[cfg(test)]
pub(crate) fn init_log() {
    use std::sync::Once;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    static START: Once = Once::new();

    START.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    });
}

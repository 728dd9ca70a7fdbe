//! Bounded history of sent RTP packets, for retransmission and padding.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::clock::Clock;
use crate::id::{SeqNo, Ssrc, TransportSeqNo};
use crate::packet::RtpPacket;

/// Governs whether packets are retained at all, and which eviction policies
/// run on top of the capacity limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Nothing is retained. Inserted packets are dropped.
    #[default]
    Disabled,
    /// Packets are retained and evicted on capacity and age.
    Store,
    /// Like [`StorageMode::Store`], but packets acknowledged via transport
    /// feedback are pruned early, and sent packets time out even when the
    /// history is under its target size.
    StoreAndCull,
}

/// How a stored packet may be handed back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// The packet stays resident after retrieval. The caller gets a clone.
    Retransmittable,
    /// The packet is handed out exactly once, with ownership, and the slot
    /// is removed in the same operation. Lets a pacer pull a just-enqueued
    /// packet without leaving a copy behind.
    SingleUse,
}

/// Read-only snapshot of the bookkeeping for one stored packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketState {
    /// RTP sequence number the packet is stored under.
    pub seq_no: SeqNo,
    /// Transport-wide sequence number, once the packet has been handed to
    /// the network layer.
    pub transport_seq_no: Option<TransportSeqNo>,
    /// Last time the packet was put on the wire. `None` if never sent.
    pub send_time: Option<Instant>,
    /// When the media in the packet was captured.
    pub capture_time: Instant,
    /// The stream the packet belongs to.
    pub ssrc: Ssrc,
    /// Packet size in bytes.
    pub payload_size: usize,
    /// How many times the packet has been handed out again after its first
    /// send.
    pub times_retransmitted: u32,
}

struct StoredPacket {
    packet: RtpPacket,
    transport_seq_no: Option<TransportSeqNo>,
    send_time: Option<Instant>,
    capture_time: Instant,
    times_retransmitted: u32,
    kind: StorageKind,
}

impl StoredPacket {
    fn state(&self, seq_no: SeqNo) -> PacketState {
        PacketState {
            seq_no,
            transport_seq_no: self.transport_seq_no,
            send_time: self.send_time,
            capture_time: self.capture_time,
            ssrc: self.packet.ssrc,
            payload_size: self.packet.size(),
            times_retransmitted: self.times_retransmitted,
        }
    }
}

/// Bounded cache of sent RTP packets.
///
/// Packets are inserted as they are queued for sending and retrieved again
/// when a retransmission is requested. Eviction happens on insertion: the
/// oldest packets are culled once they are both sent and older than the
/// current packet duration (derived from RTT), once the history exceeds its
/// configured target, or unconditionally at the absolute capacity ceiling.
/// In [`StorageMode::StoreAndCull`], positive transport feedback prunes
/// packets as soon as the remote end has them.
///
/// All methods serialize on one internal lock and never block on I/O.
pub struct PacketHistory {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    mode: StorageMode,
    number_to_store: usize,
    rtt: Option<Duration>,
    packets: BTreeMap<SeqNo, StoredPacket>,
    oldest_seq_no: Option<SeqNo>,
    by_transport_seq_no: BTreeMap<TransportSeqNo, SeqNo>,
    bytes_in_history: usize,
}

impl PacketHistory {
    /// Absolute maximum number of resident packets. The soft target set via
    /// [`PacketHistory::set_store_packets_status`] is clamped to this, and
    /// unsent packets cannot push the history past it.
    pub const MAX_CAPACITY: usize = 9600;

    /// Sent packets are kept at least this long, so that retransmission
    /// requests racing ahead of eviction do not fail needlessly.
    pub const MIN_PACKET_DURATION: Duration = Duration::from_millis(100);

    /// Minimum retention for sent packets, expressed in RTTs. The effective
    /// packet duration is the larger of this times the current RTT and
    /// [`PacketHistory::MIN_PACKET_DURATION`].
    pub const MIN_PACKET_DURATION_RTT: u32 = 3;

    /// In [`StorageMode::StoreAndCull`], a sent packet this many packet
    /// durations old is evicted even when the history is under target.
    pub const CULLING_DELAY_FACTOR: u32 = 3;

    /// Smallest target size [`PacketHistory::get_best_fitting_packet`]
    /// honors. Below this a padding packet is not worth manufacturing.
    pub const MIN_REQUEST_BYTES: usize = 50;

    /// Create a history in [`StorageMode::Disabled`].
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        PacketHistory {
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Set the storage mode and the soft target for retained packet count.
    ///
    /// Clears all previously stored packets, also when re-setting the
    /// current mode. `number_to_store` is clamped to
    /// [`PacketHistory::MAX_CAPACITY`].
    pub fn set_store_packets_status(&self, mode: StorageMode, number_to_store: usize) {
        let mut inner = self.lock();
        if mode != StorageMode::Disabled && inner.mode != StorageMode::Disabled {
            warn!("Purging packet history in order to re-set status");
        }
        inner.reset();
        inner.mode = mode;
        inner.number_to_store = number_to_store.min(Self::MAX_CAPACITY);
    }

    /// The current storage mode.
    pub fn storage_mode(&self) -> StorageMode {
        self.lock().mode
    }

    /// Update the round-trip time estimate feeding the retention and
    /// retransmission throttling policies.
    pub fn set_rtt(&self, rtt: Duration) {
        self.lock().rtt = Some(rtt);
    }

    /// Store a packet, keyed by its RTP sequence number.
    ///
    /// Dropped without effect in [`StorageMode::Disabled`]. Runs the
    /// eviction pass before inserting. `send_time` is `None` when the packet
    /// goes through a pacer and has not actually been transmitted yet.
    ///
    /// The sequence number must not collide with a resident packet.
    pub fn put_packet(&self, mut packet: RtpPacket, kind: StorageKind, send_time: Option<Instant>) {
        let now = self.clock.now();
        let mut inner = self.lock();
        if inner.mode == StorageMode::Disabled {
            return;
        }

        inner.cull_old_packets(now);

        if packet.capture_time.is_none() {
            packet.capture_time = Some(now);
        }
        let capture_time = packet.capture_time.unwrap_or(now);

        let seq_no = packet.seq_no;
        debug_assert!(
            !inner.packets.contains_key(&seq_no),
            "duplicate seq_no in packet history"
        );

        inner.bytes_in_history += packet.size();
        inner.packets.insert(
            seq_no,
            StoredPacket {
                packet,
                transport_seq_no: None,
                send_time,
                capture_time,
                times_retransmitted: 0,
                kind,
            },
        );

        if inner.oldest_seq_no.is_none() {
            inner.oldest_seq_no = Some(seq_no);
        }
    }

    /// Retrieve a packet for (re)sending, stamping its send time.
    ///
    /// Returns `None` when disabled, when no packet is stored under
    /// `seq_no`, or when `verify_rtt` is set and the packet was already
    /// retransmitted less than one RTT ago. A retrieval with a send time
    /// already set counts as a retransmission.
    ///
    /// [`StorageKind::SingleUse`] packets are removed and returned with
    /// ownership; others are returned as a clone and stay resident.
    pub fn get_packet_and_set_send_time(
        &self,
        seq_no: SeqNo,
        verify_rtt: bool,
    ) -> Option<RtpPacket> {
        let now = self.clock.now();
        let mut inner = self.lock();

        if !inner.verify_retrievable(seq_no, verify_rtt, now) {
            return None;
        }

        let single_use = {
            let stored = inner.packets.get_mut(&seq_no)?;
            if stored.send_time.is_some() {
                // Send time already set, this is a retransmission.
                stored.times_retransmitted += 1;
            }
            stored.send_time = Some(now);
            stored.kind == StorageKind::SingleUse
        };

        if single_use {
            inner.remove_packet(seq_no)
        } else {
            inner.packets.get(&seq_no).map(|s| s.packet.clone())
        }
    }

    /// Look up the state of a stored packet without side effects.
    ///
    /// Applies the same RTT gating as
    /// [`PacketHistory::get_packet_and_set_send_time`], but mutates nothing.
    pub fn get_packet_state(&self, seq_no: SeqNo, verify_rtt: bool) -> Option<PacketState> {
        let now = self.clock.now();
        let inner = self.lock();

        if !inner.verify_retrievable(seq_no, verify_rtt, now) {
            return None;
        }

        inner.packets.get(&seq_no).map(|s| s.state(seq_no))
    }

    /// Clone of the stored packet whose size is closest to `target_size`.
    ///
    /// Used to manufacture padding that looks like real retransmittable
    /// data. Returns `None` when the history is empty or `target_size` is
    /// below [`PacketHistory::MIN_REQUEST_BYTES`]. Ties go to the packet
    /// found first, and the packet is not removed.
    pub fn get_best_fitting_packet(&self, target_size: usize) -> Option<RtpPacket> {
        let inner = self.lock();
        if target_size < Self::MIN_REQUEST_BYTES {
            return None;
        }

        let mut best: Option<(&StoredPacket, usize)> = None;
        for stored in inner.packets.values() {
            let diff = stored.packet.size().abs_diff(target_size);
            if best.map_or(true, |(_, best_diff)| diff < best_diff) {
                best = Some((stored, diff));
                if diff == 0 {
                    break;
                }
            }
        }

        best.map(|(stored, _)| stored.packet.clone())
    }

    /// Record the transport-wide sequence number assigned when the packet
    /// under `seq_no` was handed to the network layer.
    ///
    /// No-op when the packet is absent (it may never have been cached) and
    /// in modes other than [`StorageMode::StoreAndCull`], where transport
    /// sequence numbers do not drive culling.
    pub fn on_transport_sequence_created(&self, seq_no: SeqNo, transport_seq_no: TransportSeqNo) {
        let mut inner = self.lock();
        if inner.mode != StorageMode::StoreAndCull {
            return;
        }

        let Some(stored) = inner.packets.get_mut(&seq_no) else {
            return;
        };
        stored.transport_seq_no = Some(transport_seq_no);

        let previous = inner.by_transport_seq_no.insert(transport_seq_no, seq_no);
        debug_assert!(previous.is_none(), "transport seq_no reused");
    }

    /// Remove packets acknowledged as received by transport feedback.
    ///
    /// The feedback decoder passes only the transport-wide sequence numbers
    /// reported as received. Unknown sequence numbers are skipped. No-op in
    /// modes other than [`StorageMode::StoreAndCull`].
    pub fn cull_acknowledged_packets(&self, acked: &[TransportSeqNo]) {
        let mut inner = self.lock();
        if inner.mode != StorageMode::StoreAndCull {
            return;
        }

        for transport_seq_no in acked {
            let Some(seq_no) = inner.by_transport_seq_no.get(transport_seq_no).copied() else {
                continue;
            };
            trace!("Culling {} acked via transport seq_no {}", seq_no, transport_seq_no);
            inner.remove_packet(seq_no);
        }
    }

    /// Total payload bytes currently resident.
    pub fn bytes_in_history(&self) -> usize {
        self.lock().bytes_in_history
    }

    /// Number of packets currently resident.
    pub fn packet_count(&self) -> usize {
        self.lock().packets.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for PacketHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("PacketHistory")
            .field("mode", &inner.mode)
            .field("number_to_store", &inner.number_to_store)
            .field("packet_count", &inner.packets.len())
            .field("bytes_in_history", &inner.bytes_in_history)
            .finish()
    }
}

impl Inner {
    fn reset(&mut self) {
        self.packets.clear();
        self.by_transport_seq_no.clear();
        self.oldest_seq_no = None;
        self.bytes_in_history = 0;
    }

    fn verify_retrievable(&self, seq_no: SeqNo, verify_rtt: bool, now: Instant) -> bool {
        if self.mode == StorageMode::Disabled {
            return false;
        }
        let Some(stored) = self.packets.get(&seq_no) else {
            return false;
        };

        if let Some(send_time) = stored.send_time {
            let rtt = self.rtt.unwrap_or(Duration::ZERO);
            if verify_rtt && stored.times_retransmitted > 0 && now < send_time + rtt {
                // Already retransmitted within one RTT, the packet is likely
                // still in the network pipe.
                trace!("Retransmit of {} denied, within one rtt of last send", seq_no);
                return false;
            }
        }

        true
    }

    // Sent packets are kept around long enough that a retransmission round
    // trip can complete before they go away.
    fn packet_duration(&self) -> Duration {
        let rtt = self.rtt.unwrap_or(Duration::ZERO);
        (rtt * PacketHistory::MIN_PACKET_DURATION_RTT).max(PacketHistory::MIN_PACKET_DURATION)
    }

    fn cull_old_packets(&mut self, now: Instant) {
        let packet_duration = self.packet_duration();

        while let Some(seq_no) = self.oldest_seq_no {
            if self.packets.len() >= PacketHistory::MAX_CAPACITY {
                // Absolute capacity ceiling, remove one unconditionally.
                trace!("At max capacity, culling {}", seq_no);
                self.remove_packet(seq_no);
                continue;
            }

            let Some(stored) = self.packets.get(&seq_no) else {
                break;
            };

            let Some(send_time) = stored.send_time else {
                // Unsent packets are not culled.
                return;
            };

            let age = now.saturating_duration_since(send_time);
            if age < packet_duration {
                // Culling this early would fail retransmission requests.
                return;
            }

            let timed_out = self.mode == StorageMode::StoreAndCull
                && age >= packet_duration * PacketHistory::CULLING_DELAY_FACTOR;

            if self.packets.len() >= self.number_to_store || timed_out {
                trace!("Culling {}", seq_no);
                self.remove_packet(seq_no);
            } else {
                return;
            }
        }
    }

    fn remove_packet(&mut self, seq_no: SeqNo) -> Option<RtpPacket> {
        let stored = self.packets.remove(&seq_no)?;

        if let Some(transport_seq_no) = stored.transport_seq_no {
            let removed = self.by_transport_seq_no.remove(&transport_seq_no);
            debug_assert!(removed.is_some());
        }

        self.bytes_in_history -= stored.packet.size();

        if self.oldest_seq_no == Some(seq_no) {
            self.oldest_seq_no = self.next_resident_after(seq_no);
        }

        Some(stored.packet)
    }

    // Next resident key after seq_no, wrapping around the 16-bit space.
    fn next_resident_after(&self, seq_no: SeqNo) -> Option<SeqNo> {
        self.packets
            .range((Bound::Excluded(seq_no), Bound::Unbounded))
            .map(|(s, _)| *s)
            .next()
            .or_else(|| self.packets.keys().next().copied())
    }
}

//! Transfer slot ring
//!
//! Per endpoint, `buffer_count` pre-allocated transfer buffers of
//! `packets_per_buffer` packets each, addressed as one circular sequence of
//! frame positions. Every slot carries an atomic `(epoch, state)` cell so the
//! completion context can publish "data landed" without locks and the reader
//! can tell "not arrived yet" from "arrived but dropped".

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::{IsochPacket, Seq, SlotId, TransferBufferHandle};

/// Slot progress within one schedule epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Never armed in this epoch
    Idle = 0,
    /// A read targets the buffer
    InFlight = 1,
    /// The read completed; packets are readable
    Complete = 2,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SlotState::InFlight,
            2 => SlotState::Complete,
            _ => SlotState::Idle,
        }
    }
}

#[inline]
fn pack(epoch: u32, state: SlotState) -> u64 {
    (epoch as u64) << 8 | state as u64
}

#[inline]
fn unpack(raw: u64) -> (u32, SlotState) {
    ((raw >> 8) as u32, SlotState::from_u8((raw & 0xFF) as u8))
}

/// Atomic `(epoch, state)` pair
#[derive(Debug, Default)]
struct SlotCell(AtomicU64);

impl SlotCell {
    fn load(&self) -> (u32, SlotState) {
        unpack(self.0.load(Ordering::Acquire))
    }

    fn store(&self, epoch: u32, state: SlotState) {
        self.0.store(pack(epoch, state), Ordering::Release);
    }

    fn swap_if(&self, epoch: u32, from: SlotState, to: SlotState) -> bool {
        self.0
            .compare_exchange(
                pack(epoch, from),
                pack(epoch, to),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Ring dimensions shared by every endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    pub buffer_count: usize,
    pub packets_per_buffer: usize,
}

impl RingGeometry {
    pub fn new(buffer_count: usize, packets_per_buffer: usize) -> Self {
        Self {
            buffer_count,
            packets_per_buffer,
        }
    }

    /// Total frame positions in one ring
    pub fn positions(&self) -> usize {
        self.buffer_count * self.packets_per_buffer
    }

    /// The position after `pos`, wrapping from the last buffer to the first
    #[inline]
    pub fn next(&self, pos: FramePosition) -> FramePosition {
        if pos.packet + 1 < self.packets_per_buffer {
            FramePosition {
                buffer: pos.buffer,
                packet: pos.packet + 1,
            }
        } else {
            FramePosition {
                buffer: (pos.buffer + 1) % self.buffer_count,
                packet: 0,
            }
        }
    }

    /// Every position in ring order, starting at buffer 0 packet 0
    pub fn iter(&self) -> impl Iterator<Item = FramePosition> + '_ {
        (0..self.buffer_count).flat_map(move |buffer| {
            (0..self.packets_per_buffer).map(move |packet| FramePosition { buffer, packet })
        })
    }
}

/// `(buffer, packet)` cursor into a ring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramePosition {
    pub buffer: usize,
    pub packet: usize,
}

/// What a reader finds at a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketPeek {
    /// The slot's read has not completed (or the buffer is being written)
    NotArrived,
    /// The read completed but this frame's packet is empty
    Missing,
    /// A full packet with this sequence number
    Received(Seq),
}

/// One buffer plus its state cell
#[derive(Debug)]
pub struct TransferSlot {
    buffer: TransferBufferHandle,
    cell: SlotCell,
}

impl TransferSlot {
    fn new(buffer: TransferBufferHandle) -> Self {
        Self {
            buffer,
            cell: SlotCell::default(),
        }
    }

    pub fn buffer(&self) -> &TransferBufferHandle {
        &self.buffer
    }

    /// Current `(epoch, state)`
    pub fn state(&self) -> (u32, SlotState) {
        self.cell.load()
    }

    /// A read for `epoch` is about to be submitted
    pub fn arm(&self, epoch: u32) {
        self.cell.store(epoch, SlotState::InFlight);
    }

    /// The read for `epoch` completed. False if the slot moved on meanwhile.
    pub fn complete(&self, epoch: u32) -> bool {
        self.cell.swap_if(epoch, SlotState::InFlight, SlotState::Complete)
    }

    /// The read for `epoch` was never queued
    pub fn disarm(&self, epoch: u32) -> bool {
        self.cell.swap_if(epoch, SlotState::InFlight, SlotState::Idle)
    }

    /// Forget contents; only reads of `epoch` may complete the slot again
    pub fn invalidate(&self, epoch: u32) {
        self.cell.store(epoch, SlotState::Idle);
    }

    fn is_readable(&self) -> bool {
        self.cell.load().1 == SlotState::Complete
    }
}

/// All slots of one endpoint
#[derive(Debug)]
pub struct SlotRing {
    endpoint: usize,
    geometry: RingGeometry,
    slots: Vec<TransferSlot>,
}

impl SlotRing {
    /// Wrap `geometry.buffer_count` buffers into a ring
    pub fn new(endpoint: usize, geometry: RingGeometry, buffers: Vec<TransferBufferHandle>) -> Self {
        debug_assert_eq!(buffers.len(), geometry.buffer_count);
        Self {
            endpoint,
            geometry,
            slots: buffers.into_iter().map(TransferSlot::new).collect(),
        }
    }

    pub fn endpoint(&self) -> usize {
        self.endpoint
    }

    pub fn geometry(&self) -> RingGeometry {
        self.geometry
    }

    pub fn slot(&self, buffer: usize) -> Option<&TransferSlot> {
        self.slots.get(buffer)
    }

    pub fn slots(&self) -> &[TransferSlot] {
        &self.slots
    }

    /// Inspect a position without consuming it
    pub fn peek(&self, pos: FramePosition) -> PacketPeek {
        self.read(pos, |packet| {
            if packet.is_received() {
                PacketPeek::Received(packet.sequence)
            } else {
                PacketPeek::Missing
            }
        })
        .unwrap_or(PacketPeek::NotArrived)
    }

    /// Run `f` on the packet at `pos` if its slot is complete and not being written
    pub fn read<R>(&self, pos: FramePosition, f: impl FnOnce(&IsochPacket) -> R) -> Option<R> {
        let slot = self.slots.get(pos.buffer)?;
        if !slot.is_readable() {
            return None;
        }
        let packets = slot.buffer.try_lock()?;
        packets.get(pos.packet).map(f)
    }

    /// Fold every packet's sequence number and byte count into `hash`
    fn fold_checksum(&self, mut hash: u64) -> u64 {
        for slot in &self.slots {
            // Contended buffers are being written; they will change anyway
            let Some(packets) = slot.buffer.try_lock() else {
                continue;
            };
            for packet in packets.iter() {
                hash ^= (packet.sequence.0 as u64) << 16 | packet.actual_bytes as u64;
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        }
        hash
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Slot rings for every endpoint
#[derive(Debug)]
pub struct SlotTable {
    geometry: RingGeometry,
    rings: Vec<SlotRing>,
}

impl SlotTable {
    pub fn new(geometry: RingGeometry, rings: Vec<SlotRing>) -> Self {
        Self { geometry, rings }
    }

    pub fn geometry(&self) -> RingGeometry {
        self.geometry
    }

    pub fn endpoint_count(&self) -> usize {
        self.rings.len()
    }

    pub fn ring(&self, endpoint: usize) -> Option<&SlotRing> {
        self.rings.get(endpoint)
    }

    pub fn rings(&self) -> &[SlotRing] {
        &self.rings
    }

    pub fn slot(&self, id: SlotId) -> Option<&TransferSlot> {
        self.rings.get(id.endpoint)?.slot(id.buffer)
    }

    /// Every buffer handle, endpoint by endpoint
    pub fn buffers(&self) -> impl Iterator<Item = &TransferBufferHandle> {
        self.rings
            .iter()
            .flat_map(|ring| ring.slots.iter().map(|slot| &slot.buffer))
    }

    /// Mark every slot idle under a fresh epoch
    pub fn invalidate_all(&self, epoch: u32) {
        for ring in &self.rings {
            for slot in &ring.slots {
                slot.invalidate(epoch);
            }
        }
    }

    /// Hash over every packet's sequence number
    ///
    /// Identical results across samples mean no buffer was written in between.
    pub fn sequence_checksum(&self) -> u64 {
        self.rings
            .iter()
            .fold(FNV_OFFSET, |hash, ring| ring.fold_checksum(hash))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use contracts::TransferBuffer;

    use super::*;

    fn ring(buffers: usize, packets: usize) -> SlotRing {
        let geometry = RingGeometry::new(buffers, packets);
        let handles = (0..buffers)
            .map(|i| Arc::new(TransferBuffer::new(i as u64, 0, packets)))
            .collect();
        SlotRing::new(0, geometry, handles)
    }

    fn fill(ring: &SlotRing, buffer: usize, first_seq: u16) {
        let slot = ring.slot(buffer).unwrap();
        let mut packets = slot.buffer().lock();
        for (i, packet) in packets.iter_mut().enumerate() {
            packet.sequence = Seq(first_seq.wrapping_add(i as u16));
            packet.actual_bytes = contracts::PACKET_BYTES as u16;
        }
    }

    #[test]
    fn test_position_wraps() {
        let geometry = RingGeometry::new(2, 3);
        let mut pos = FramePosition::default();
        for _ in 0..geometry.positions() {
            pos = geometry.next(pos);
        }
        assert_eq!(pos, FramePosition::default());
        assert_eq!(
            geometry.next(FramePosition { buffer: 0, packet: 2 }),
            FramePosition { buffer: 1, packet: 0 }
        );
        assert_eq!(geometry.iter().count(), 6);
    }

    #[test]
    fn test_peek_requires_completion() {
        let ring = ring(2, 4);
        fill(&ring, 0, 100);
        let pos = FramePosition { buffer: 0, packet: 1 };

        assert_eq!(ring.peek(pos), PacketPeek::NotArrived);

        let slot = ring.slot(0).unwrap();
        slot.arm(0);
        assert_eq!(ring.peek(pos), PacketPeek::NotArrived);
        assert!(slot.complete(0));
        assert_eq!(ring.peek(pos), PacketPeek::Received(Seq(101)));
    }

    #[test]
    fn test_empty_packet_is_missing() {
        let ring = ring(1, 4);
        fill(&ring, 0, 0);
        ring.slot(0).unwrap().buffer().lock()[2].clear_received();
        let slot = ring.slot(0).unwrap();
        slot.arm(3);
        slot.complete(3);
        assert_eq!(
            ring.peek(FramePosition { buffer: 0, packet: 2 }),
            PacketPeek::Missing
        );
    }

    #[test]
    fn test_stale_epoch_cannot_complete() {
        let ring = ring(1, 1);
        let slot = ring.slot(0).unwrap();
        slot.arm(1);
        slot.invalidate(2);
        assert!(!slot.complete(1));
        assert_eq!(slot.state(), (2, SlotState::Idle));

        slot.arm(2);
        assert!(!slot.complete(1));
        assert!(slot.complete(2));
    }

    #[test]
    fn test_locked_buffer_reads_as_not_arrived() {
        let ring = ring(1, 2);
        fill(&ring, 0, 5);
        let slot = ring.slot(0).unwrap();
        slot.arm(0);
        slot.complete(0);
        let _guard = slot.buffer().lock();
        assert_eq!(
            ring.peek(FramePosition::default()),
            PacketPeek::NotArrived
        );
    }

    #[test]
    fn test_checksum_tracks_writes() {
        let ring = ring(2, 2);
        let table = SlotTable::new(ring.geometry(), vec![ring]);
        let before = table.sequence_checksum();
        assert_eq!(before, table.sequence_checksum());

        fill(table.ring(0).unwrap(), 1, 42);
        assert_ne!(before, table.sequence_checksum());
    }
}

//! Endpoint reader
//!
//! A cursor walking one endpoint's slot ring in sequence order. The reader
//! only moves onto a position whose packet is either empty (a dropped frame,
//! which still consumes a sequence number) or carries exactly the next
//! sequence number. Anything else marks it lost until the next resync.

use contracts::Seq;

use crate::slots::{FramePosition, PacketPeek, SlotRing};

/// Per-endpoint read cursor
#[derive(Debug, Clone)]
pub struct EndpointReader {
    endpoint: usize,
    position: FramePosition,
    sequence: Seq,
    /// The packet at `position` is a full packet
    has_packet: bool,
    lost: bool,
}

impl EndpointReader {
    pub fn new(endpoint: usize) -> Self {
        Self {
            endpoint,
            position: FramePosition::default(),
            sequence: Seq(0),
            has_packet: false,
            lost: false,
        }
    }

    pub fn endpoint(&self) -> usize {
        self.endpoint
    }

    pub fn position(&self) -> FramePosition {
        self.position
    }

    /// Sequence number at the current position
    pub fn sequence(&self) -> Seq {
        self.sequence
    }

    /// Whether the current position holds a full packet
    pub fn has_packet(&self) -> bool {
        self.has_packet
    }

    /// An out-of-order packet was met; only [`find_newest`](Self::find_newest) recovers
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Walk forward until `dest` is reached, data runs out, or `max_steps` positions
    ///
    /// Never moves when `dest` is not ahead of the current sequence number.
    /// Returns the sequence number reached.
    pub fn advance_to(&mut self, ring: &SlotRing, dest: Seq, max_steps: usize) -> Seq {
        let geometry = ring.geometry();
        let mut steps = 0;
        while !self.lost && steps < max_steps && dest.is_newer_than(self.sequence) {
            let next = geometry.next(self.position);
            match ring.peek(next) {
                PacketPeek::NotArrived => break,
                PacketPeek::Missing => {
                    self.position = next;
                    self.sequence = self.sequence.next();
                    self.has_packet = false;
                }
                PacketPeek::Received(seq) if seq.follows(self.sequence) => {
                    self.position = next;
                    self.sequence = seq;
                    self.has_packet = true;
                }
                PacketPeek::Received(_) => {
                    self.lost = true;
                }
            }
            steps += 1;
        }
        self.sequence
    }

    /// Jump to the newest full packet anywhere in the ring
    ///
    /// Clears the lost flag on success. Returns `None` when no readable slot
    /// holds a full packet.
    pub fn find_newest(&mut self, ring: &SlotRing) -> Option<Seq> {
        let mut newest: Option<(FramePosition, Seq)> = None;
        for pos in ring.geometry().iter() {
            if let PacketPeek::Received(seq) = ring.peek(pos) {
                match newest {
                    Some((_, best)) if !seq.is_newer_than(best) => {}
                    _ => newest = Some((pos, seq)),
                }
            }
        }
        let (position, sequence) = newest?;
        self.position = position;
        self.sequence = sequence;
        self.has_packet = true;
        self.lost = false;
        Some(sequence)
    }
}

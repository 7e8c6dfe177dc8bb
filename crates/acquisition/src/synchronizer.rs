//! Frame synchronizer
//!
//! Every cycle targets `last_emitted + 1`. Both readers walk toward it; when
//! both hold a full packet for that sequence number the packets are decoded
//! into one [`SensorFrame`] and handed to the listener. A sequence number
//! that one endpoint dropped is consumed without a frame. A reader that met
//! an out-of-order packet forces a resync of every reader onto the newest
//! data.

use std::sync::Arc;

use contracts::{codec, ErrorCode, FrameListener, Seq, SensorFrame};
use tracing::{debug, info, instrument, warn};

use crate::counters::StreamCounters;
use crate::reader::EndpointReader;
use crate::slots::SlotTable;

/// Synchronizer tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncParams {
    /// Positions a reader may walk per cycle
    pub max_advance_steps: usize,
    /// Frames discarded after the first synchronization
    pub startup_frames: u32,
    /// Consecutive frameless cycles before reporting the device unresponsive
    pub unresponsive_cycles: u64,
}

/// Result of one synchronization cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No endpoint has data yet
    Unsynced,
    /// Readers were placed on the newest data
    Synchronized(Seq),
    /// A frame went to the listener
    Emitted(Seq),
    /// A warm-up frame was decoded and thrown away
    Discarded(Seq),
    /// An endpoint dropped this sequence number; no frame
    Dropped(Seq),
    /// A reader was lost or overrun; readers moved to the newest data
    Resynchronized,
    /// Waiting for data
    Waiting,
    /// The device is not streaming; nothing was attempted
    Inactive,
}

/// Two-endpoint frame synchronizer
pub struct FrameSynchronizer {
    slots: Arc<SlotTable>,
    counters: Arc<StreamCounters>,
    listener: Arc<dyn FrameListener>,
    params: SyncParams,
    readers: Vec<EndpointReader>,
    last_emitted: Seq,
    /// At least one sequence number was consumed
    consumed: bool,
    synced: bool,
    /// `on_startup` already delivered
    started: bool,
    warmup_remaining: u32,
    idle_cycles: u64,
    unresponsive_reported: bool,
    reported_unknown_errors: u64,
    pending_reports: Vec<(ErrorCode, String)>,
}

impl FrameSynchronizer {
    pub fn new(
        slots: Arc<SlotTable>,
        counters: Arc<StreamCounters>,
        listener: Arc<dyn FrameListener>,
        params: SyncParams,
    ) -> Self {
        let readers = (0..slots.endpoint_count())
            .map(EndpointReader::new)
            .collect();
        Self {
            slots,
            counters,
            listener,
            params,
            readers,
            last_emitted: Seq(0),
            consumed: false,
            synced: false,
            started: false,
            warmup_remaining: params.startup_frames,
            idle_cycles: 0,
            unresponsive_reported: false,
            reported_unknown_errors: 0,
            pending_reports: Vec::new(),
        }
    }

    /// Last sequence number consumed (emitted, discarded or dropped)
    pub fn last_emitted(&self) -> Seq {
        self.last_emitted
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn readers(&self) -> &[EndpointReader] {
        &self.readers
    }

    /// One synchronization attempt. Emits at most one frame.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.counters.record_cycle();

        if !self.synced {
            let outcome = self.synchronize();
            if outcome == CycleOutcome::Unsynced {
                self.note_idle();
            }
            return outcome;
        }

        let target = self.last_emitted.next();
        let mut positioned = 0;
        let mut with_packet = 0;
        let mut lost = false;
        for reader in &mut self.readers {
            let Some(ring) = self.slots.ring(reader.endpoint()) else {
                continue;
            };
            let reached = reader.advance_to(ring, target, self.params.max_advance_steps);
            if reader.is_lost() {
                lost = true;
            } else if reached == target {
                positioned += 1;
                if reader.has_packet() {
                    with_packet += 1;
                }
            }
        }
        let endpoints = self.readers.len();

        if lost {
            self.counters.record_gap();
            metrics::counter!("taxel_stream_events_total", "event" => "sequence_gap").increment(1);
            warn!(expected = %target, "Out-of-order packet, resynchronizing readers");
            self.report(
                ErrorCode::SequenceGap,
                format!("out-of-order packet while expecting sequence {target}"),
            );
            return self.resynchronize();
        }

        if with_packet == endpoints {
            return self.deliver(target);
        }

        if positioned == endpoints {
            self.last_emitted = target;
            self.consumed = true;
            self.counters.record_dropped();
            metrics::counter!("taxel_stream_frames_total", "status" => "dropped").increment(1);
            debug!(sequence = %target, "Frame dropped by an endpoint");
            self.note_idle();
            return CycleOutcome::Dropped(target);
        }

        self.note_idle();
        CycleOutcome::Waiting
    }

    /// Abandon reader positions; the next cycle relocates onto fresh data
    pub fn invalidate(&mut self) {
        self.synced = false;
    }

    /// Deliver queued error notices, including new unknown transfer errors
    pub fn flush_reports(&mut self) {
        let unknown = self.counters.unknown_errors();
        if unknown > self.reported_unknown_errors {
            let delta = unknown - self.reported_unknown_errors;
            self.reported_unknown_errors = unknown;
            warn!(count = delta, "Transfers completed with unknown errors");
            self.report(
                ErrorCode::TransferErrors,
                format!("{delta} transfers completed with unknown errors"),
            );
        }
        for (code, message) in self.pending_reports.drain(..) {
            self.listener.on_error(code, &message);
        }
    }

    /// Queue a notice for the end of the cycle
    pub fn report(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.pending_reports.push((code, message.into()));
    }

    /// Place every reader on its newest packet
    #[instrument(name = "synchronizer_synchronize", skip(self))]
    fn synchronize(&mut self) -> CycleOutcome {
        let mut newest: Option<Seq> = None;
        for reader in &mut self.readers {
            let Some(ring) = self.slots.ring(reader.endpoint()) else {
                return CycleOutcome::Unsynced;
            };
            let Some(seq) = reader.find_newest(ring) else {
                return CycleOutcome::Unsynced;
            };
            newest = Some(newest.map_or(seq, |n| n.newest(seq)));
        }
        let Some(newest) = newest else {
            return CycleOutcome::Unsynced;
        };
        if self.is_stale(newest) {
            return CycleOutcome::Unsynced;
        }

        // Lagging readers catch up to the newest one before the next frame
        self.last_emitted = newest.prev();
        self.synced = true;
        let positions: Vec<Seq> = self.readers.iter().map(EndpointReader::sequence).collect();
        debug!(newest = %newest, ?positions, "Readers synchronized");
        CycleOutcome::Synchronized(newest)
    }

    /// The ring holds nothing past what was already consumed
    ///
    /// Data more than one ring lap behind is taken as a restarted sequence.
    fn is_stale(&self, newest: Seq) -> bool {
        self.consumed
            && !newest.is_newer_than(self.last_emitted)
            && usize::from(newest.distance_to(self.last_emitted)) <= self.slots.geometry().positions()
    }

    fn resynchronize(&mut self) -> CycleOutcome {
        self.synced = false;
        // Unsynced here just means the next cycle retries
        self.synchronize();
        CycleOutcome::Resynchronized
    }

    fn deliver(&mut self, target: Seq) -> CycleOutcome {
        let Some(frame) = self.fuse(target) else {
            self.counters.record_overrun();
            metrics::counter!("taxel_stream_events_total", "event" => "reader_overrun").increment(1);
            warn!(sequence = %target, "Slot refilled under the reader");
            self.report(
                ErrorCode::ReaderOverrun,
                format!("slot holding sequence {target} was refilled before it was read"),
            );
            return self.resynchronize();
        };

        self.last_emitted = target;
        self.consumed = true;
        self.idle_cycles = 0;
        self.unresponsive_reported = false;

        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            self.counters.record_discarded();
            if self.warmup_remaining == 0 {
                self.mark_started();
            }
            return CycleOutcome::Discarded(target);
        }
        if !self.started {
            self.mark_started();
        }

        self.listener.on_frame(&frame);
        self.counters.record_emitted();
        metrics::counter!("taxel_stream_frames_total", "status" => "emitted").increment(1);
        CycleOutcome::Emitted(target)
    }

    /// Decode both endpoints' packets for `target`
    ///
    /// Rechecks each sequence number under the buffer lock; `None` means a
    /// slot was refilled since the reader positioned on it.
    fn fuse(&self, target: Seq) -> Option<SensorFrame> {
        let mut frame = SensorFrame::zeroed(target);
        for reader in &self.readers {
            let ring = self.slots.ring(reader.endpoint())?;
            let decoded = ring.read(reader.position(), |packet| {
                if packet.is_received() && packet.sequence == target {
                    codec::decode_into(&packet.payload, reader.endpoint(), &mut frame.taxels);
                    true
                } else {
                    false
                }
            });
            if decoded != Some(true) {
                return None;
            }
        }
        Some(frame)
    }

    fn mark_started(&mut self) {
        self.started = true;
        info!(sequence = %self.last_emitted, "Stream started");
        self.listener.on_startup();
    }

    fn note_idle(&mut self) {
        self.idle_cycles += 1;
        if self.idle_cycles >= self.params.unresponsive_cycles && !self.unresponsive_reported {
            self.unresponsive_reported = true;
            warn!(cycles = self.idle_cycles, "Device unresponsive");
            self.report(
                ErrorCode::Unresponsive,
                format!("no frame for {} cycles", self.idle_cycles),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use contracts::{codec, TransferBuffer, PACKET_BYTES, TAXELS_PER_ENDPOINT};
    use parking_lot::Mutex;

    use super::*;
    use crate::slots::{RingGeometry, SlotRing};

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<SensorFrame>>,
        errors: Mutex<Vec<ErrorCode>>,
        startups: Mutex<u32>,
    }

    impl FrameListener for Recorder {
        fn on_startup(&self) {
            *self.startups.lock() += 1;
        }

        fn on_frame(&self, frame: &SensorFrame) {
            self.frames.lock().push(frame.clone());
        }

        fn on_error(&self, code: ErrorCode, _message: &str) {
            self.errors.lock().push(code);
        }
    }

    impl Recorder {
        fn sequences(&self) -> Vec<u16> {
            self.frames.lock().iter().map(|f| f.sequence.0).collect()
        }
    }

    const BUFFERS: usize = 4;
    const PACKETS: usize = 4;

    fn table() -> Arc<SlotTable> {
        let geometry = RingGeometry::new(BUFFERS, PACKETS);
        let rings = (0..2)
            .map(|endpoint| {
                let handles = (0..BUFFERS)
                    .map(|i| Arc::new(TransferBuffer::new(i as u64, endpoint, PACKETS)))
                    .collect();
                SlotRing::new(endpoint, geometry, handles)
            })
            .collect();
        Arc::new(SlotTable::new(geometry, rings))
    }

    /// Write one slot's packets and mark it complete. `None` = dropped frame.
    fn land(table: &SlotTable, endpoint: usize, buffer: usize, seqs: [Option<u16>; PACKETS]) {
        let slot = table.ring(endpoint).unwrap().slot(buffer).unwrap();
        {
            let mut packets = slot.buffer().lock();
            for (packet, seq) in packets.iter_mut().zip(seqs) {
                match seq {
                    Some(seq) => {
                        let mut raw = [0u16; TAXELS_PER_ENDPOINT];
                        raw[0] = seq & 0x0FFF;
                        codec::pack_raw(&raw, &mut packet.payload);
                        packet.sequence = Seq(seq);
                        packet.actual_bytes = PACKET_BYTES as u16;
                    }
                    None => packet.clear_received(),
                }
            }
        }
        let (epoch, _) = slot.state();
        slot.arm(epoch);
        slot.complete(epoch);
    }

    fn both(table: &SlotTable, buffer: usize, seqs: [Option<u16>; PACKETS]) {
        land(table, 0, buffer, seqs);
        land(table, 1, buffer, seqs);
    }

    fn params(startup_frames: u32) -> SyncParams {
        SyncParams {
            max_advance_steps: 32,
            startup_frames,
            unresponsive_cycles: 1000,
        }
    }

    fn synchronizer(
        table: &Arc<SlotTable>,
        startup_frames: u32,
    ) -> (FrameSynchronizer, Arc<Recorder>, Arc<StreamCounters>) {
        let recorder = Arc::new(Recorder::default());
        let counters = Arc::new(StreamCounters::new());
        let sync = FrameSynchronizer::new(
            table.clone(),
            counters.clone(),
            recorder.clone(),
            params(startup_frames),
        );
        (sync, recorder, counters)
    }

    fn run(sync: &mut FrameSynchronizer, cycles: usize) -> Vec<CycleOutcome> {
        (0..cycles)
            .map(|_| {
                let outcome = sync.run_cycle();
                sync.flush_reports();
                outcome
            })
            .collect()
    }

    #[test]
    fn test_waits_for_both_endpoints() {
        let table = table();
        let (mut sync, recorder, _) = synchronizer(&table, 0);
        land(&table, 0, 0, [Some(10), Some(11), Some(12), Some(13)]);
        assert_eq!(sync.run_cycle(), CycleOutcome::Unsynced);
        assert!(recorder.frames.lock().is_empty());
    }

    #[test]
    fn test_dropped_packet_skips_one_cycle() {
        let table = table();
        let (mut sync, recorder, counters) = synchronizer(&table, 0);
        // sync on 99
        land(&table, 0, 0, [Some(96), Some(97), Some(98), Some(99)]);
        land(&table, 1, 0, [Some(96), Some(97), Some(98), Some(99)]);
        assert_eq!(sync.run_cycle(), CycleOutcome::Synchronized(Seq(99)));
        assert_eq!(sync.run_cycle(), CycleOutcome::Emitted(Seq(99)));

        land(&table, 0, 1, [Some(100), Some(101), Some(102), Some(103)]);
        land(&table, 1, 1, [Some(100), Some(101), None, Some(103)]);

        let outcomes = run(&mut sync, 4);
        assert_eq!(
            outcomes,
            vec![
                CycleOutcome::Emitted(Seq(100)),
                CycleOutcome::Emitted(Seq(101)),
                CycleOutcome::Dropped(Seq(102)),
                CycleOutcome::Emitted(Seq(103)),
            ]
        );
        assert_eq!(recorder.sequences(), vec![99, 100, 101, 103]);
        assert!(recorder.errors.lock().is_empty());
        assert_eq!(counters.snapshot(Default::default()).frames_dropped, 1);
    }

    #[test]
    fn test_frames_fuse_both_endpoints() {
        let table = table();
        let (mut sync, recorder, _) = synchronizer(&table, 0);
        both(&table, 0, [Some(200), Some(201), Some(202), Some(203)]);
        run(&mut sync, 2);

        let frames = recorder.frames.lock();
        let frame = &frames[0];
        assert_eq!(frame.sequence, Seq(203));
        let expected = 203.0 / 4096.0;
        assert_eq!(frame.get(0, 0), expected);
        assert_eq!(frame.get(32, 0), expected);
        assert_eq!(frame.get(1, 0), 0.0);
    }

    #[test]
    fn test_out_of_order_reports_one_gap() {
        let table = table();
        let (mut sync, recorder, counters) = synchronizer(&table, 0);
        both(&table, 0, [Some(0), Some(1), Some(2), Some(3)]);
        run(&mut sync, 2);

        both(&table, 1, [Some(4), Some(6), Some(5), Some(7)]);
        both(&table, 2, [Some(8), Some(9), Some(10), Some(11)]);
        let outcomes = run(&mut sync, 12);

        assert_eq!(recorder.errors.lock().as_slice(), &[ErrorCode::SequenceGap]);
        assert_eq!(counters.snapshot(Default::default()).sequence_gaps, 1);
        assert!(outcomes.contains(&CycleOutcome::Resynchronized));

        // strictly increasing, no duplicates
        let seqs = recorder.sequences();
        assert!(seqs.windows(2).all(|w| Seq(w[1]).is_newer_than(Seq(w[0]))));
        assert_eq!(seqs.last(), Some(&11));
    }

    #[test]
    fn test_lagging_reader_catches_up_after_sync() {
        let table = table();
        let (mut sync, recorder, _) = synchronizer(&table, 0);
        land(&table, 0, 0, [Some(0), Some(1), Some(2), Some(3)]);
        land(&table, 0, 1, [Some(4), Some(5), Some(6), Some(7)]);
        land(&table, 1, 0, [Some(0), Some(1), Some(2), Some(3)]);

        assert_eq!(sync.run_cycle(), CycleOutcome::Synchronized(Seq(7)));
        assert_eq!(sync.last_emitted(), Seq(6));
        assert_eq!(sync.run_cycle(), CycleOutcome::Waiting);

        land(&table, 1, 1, [Some(4), Some(5), Some(6), Some(7)]);
        assert_eq!(sync.run_cycle(), CycleOutcome::Emitted(Seq(7)));
        assert_eq!(recorder.sequences(), vec![7]);
    }

    #[test]
    fn test_warmup_discards_then_starts() {
        let table = table();
        let (mut sync, recorder, counters) = synchronizer(&table, 2);
        both(&table, 0, [Some(0), Some(1), Some(2), Some(3)]);
        assert_eq!(sync.run_cycle(), CycleOutcome::Synchronized(Seq(3)));

        assert_eq!(sync.run_cycle(), CycleOutcome::Discarded(Seq(3)));
        assert_eq!(*recorder.startups.lock(), 0);

        both(&table, 1, [Some(4), Some(5), Some(6), Some(7)]);
        assert_eq!(sync.run_cycle(), CycleOutcome::Discarded(Seq(4)));
        assert_eq!(*recorder.startups.lock(), 1);
        assert_eq!(sync.run_cycle(), CycleOutcome::Emitted(Seq(5)));
        assert_eq!(recorder.sequences(), vec![5]);
        assert_eq!(counters.snapshot(Default::default()).frames_discarded, 2);
    }

    #[test]
    fn test_warmup_only_after_first_sync() {
        let table = table();
        let (mut sync, recorder, _) = synchronizer(&table, 1);
        both(&table, 0, [Some(0), Some(1), Some(2), Some(3)]);
        run(&mut sync, 2);
        assert!(sync.is_started());

        sync.invalidate();
        both(&table, 1, [Some(4), Some(5), Some(6), Some(7)]);
        assert_eq!(sync.run_cycle(), CycleOutcome::Synchronized(Seq(7)));
        assert_eq!(sync.run_cycle(), CycleOutcome::Emitted(Seq(7)));
        assert_eq!(*recorder.startups.lock(), 1);
    }

    #[test]
    fn test_overrun_detected_under_lock() {
        let table = table();
        let (mut sync, recorder, counters) = synchronizer(&table, 0);
        land(&table, 0, 0, [Some(0), Some(1), Some(2), Some(3)]);
        land(&table, 0, 1, [Some(4), Some(5), Some(6), Some(7)]);
        land(&table, 1, 0, [Some(0), Some(1), Some(2), Some(3)]);
        assert_eq!(sync.run_cycle(), CycleOutcome::Synchronized(Seq(7)));

        // endpoint 0 waits on 7 while its slot is refilled with a later lap
        land(&table, 0, 1, [Some(20), Some(21), Some(22), Some(23)]);
        land(&table, 1, 1, [Some(4), Some(5), Some(6), Some(7)]);

        let outcome = sync.run_cycle();
        sync.flush_reports();
        assert_eq!(outcome, CycleOutcome::Resynchronized);
        assert!(recorder.frames.lock().is_empty());
        assert_eq!(counters.snapshot(Default::default()).reader_overruns, 1);
        assert_eq!(recorder.errors.lock().as_slice(), &[ErrorCode::ReaderOverrun]);
    }

    #[test]
    fn test_resync_never_replays_consumed_frames() {
        let table = table();
        let (mut sync, recorder, _) = synchronizer(&table, 0);
        both(&table, 0, [Some(0), Some(1), Some(2), Some(3)]);
        both(&table, 1, [Some(4), Some(5), Some(6), Some(7)]);
        run(&mut sync, 6);
        assert_eq!(recorder.sequences(), vec![7]);

        // a stale lap lands behind the cursor
        both(&table, 2, [Some(0), Some(1), Some(2), Some(3)]);
        let outcomes = run(&mut sync, 3);
        assert_eq!(outcomes[0], CycleOutcome::Resynchronized);
        assert_eq!(&outcomes[1..], &[CycleOutcome::Unsynced, CycleOutcome::Unsynced]);
        assert!(!sync.is_synced());

        both(&table, 3, [Some(8), Some(9), Some(10), Some(11)]);
        let outcomes = run(&mut sync, 2);
        assert_eq!(
            outcomes,
            vec![
                CycleOutcome::Synchronized(Seq(11)),
                CycleOutcome::Emitted(Seq(11))
            ]
        );
        assert_eq!(recorder.sequences(), vec![7, 11]);
    }

    #[test]
    fn test_unresponsive_reported_once() {
        let table = table();
        let recorder = Arc::new(Recorder::default());
        let mut sync = FrameSynchronizer::new(
            table.clone(),
            Arc::new(StreamCounters::new()),
            recorder.clone(),
            SyncParams {
                max_advance_steps: 32,
                startup_frames: 0,
                unresponsive_cycles: 5,
            },
        );
        run(&mut sync, 20);
        assert_eq!(recorder.errors.lock().as_slice(), &[ErrorCode::Unresponsive]);
    }

    #[test]
    fn test_unknown_errors_reported_as_delta() {
        let table = table();
        let (mut sync, recorder, counters) = synchronizer(&table, 0);
        counters.record_unknown_error();
        counters.record_unknown_error();
        sync.flush_reports();
        sync.flush_reports();
        assert_eq!(recorder.errors.lock().as_slice(), &[ErrorCode::TransferErrors]);
    }
}

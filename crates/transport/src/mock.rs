//! Mock isochronous transport
//!
//! A simulated two-endpoint device with a frame clock. Reads complete once
//! every frame they cover has elapsed. The clock is moved either by hand
//! ([`MockTransport::advance`]) or by a paced bus thread
//! ([`MockTransport::spawn_bus`]).
//!
//! Fault injection covers the failure modes the acquisition core must
//! survive: dropped packets, swapped adjacent packets, frozen buffers,
//! unplugging, allocation exhaustion and unknown completion statuses.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    IsochRead, Seq, TransferBuffer, TransferBufferHandle, TransferStatus, TransportError,
    UsbTransport, ENDPOINT_COUNT,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::pattern;

/// Status code reported for injected unknown errors
pub const INJECTED_ERROR_CODE: i32 = -536_850_432;

/// Mock transport configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MockTransportConfig {
    /// Wall-clock length of one device frame (bus thread only)
    pub frame_period: Duration,
    /// Reads starting further ahead than this complete with `IsoTooNew`
    pub max_schedule_ahead: u64,
    /// Clock value at creation
    pub initial_clock: u64,
    /// Probability that any single packet is dropped
    pub drop_probability: f64,
    /// Seed for the drop generator; random when absent
    pub seed: Option<u64>,
    /// Allocation fails once this many buffers were handed out
    pub fail_allocation_after: Option<usize>,
    /// Freeze every endpoint when the clock reaches this frame
    pub freeze_at: Option<u64>,
}

impl Default for MockTransportConfig {
    fn default() -> Self {
        Self {
            frame_period: Duration::from_millis(1),
            max_schedule_ahead: 1024,
            initial_clock: 0,
            drop_probability: 0.0,
            seed: None,
            fail_allocation_after: None,
            freeze_at: None,
        }
    }
}

/// Mock bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    pub allocated: usize,
    pub released: usize,
    /// Buffers released while a read still targeted them
    pub released_in_flight: usize,
    pub submitted: u64,
    pub completed: u64,
    pub aborted: u64,
    pub too_old: u64,
    pub too_new: u64,
    pub dropped_packets: u64,
    /// Completions that left their buffer untouched (frozen endpoint)
    pub stale_completions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Deliver,
    TooOld,
    TooNew,
}

struct PendingRead {
    read: IsochRead,
    due: u64,
    disposition: Disposition,
}

struct BusState {
    clock: u64,
    pending: Vec<PendingRead>,
    next_buffer_id: u64,
    drops: HashSet<(usize, u64)>,
    reorders: HashSet<(usize, u64)>,
    unknown_status: HashSet<u64>,
    frozen: [bool; ENDPOINT_COUNT],
    /// First frame a contiguous continuation would request, per endpoint
    expected_next: [Option<u64>; ENDPOINT_COUNT],
    unplugged: bool,
    reject_submissions: bool,
    rng: StdRng,
    stats: MockStats,
}

/// Simulated isochronous device
pub struct MockTransport {
    config: MockTransportConfig,
    state: Mutex<BusState>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTransport")
            .field("clock", &state.clock)
            .field("pending", &state.pending.len())
            .field("unplugged", &state.unplugged)
            .finish()
    }
}

impl MockTransport {
    pub fn new(config: MockTransportConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let state = BusState {
            clock: config.initial_clock,
            pending: Vec::new(),
            next_buffer_id: 1,
            drops: HashSet::new(),
            reorders: HashSet::new(),
            unknown_status: HashSet::new(),
            frozen: [false; ENDPOINT_COUNT],
            expected_next: [None; ENDPOINT_COUNT],
            unplugged: false,
            reject_submissions: false,
            rng,
            stats: MockStats::default(),
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &MockTransportConfig {
        &self.config
    }

    /// Current frame number
    pub fn clock(&self) -> u64 {
        self.state.lock().clock
    }

    /// Jump the clock without completing anything
    pub fn set_clock(&self, frame: u64) {
        self.state.lock().clock = frame;
    }

    /// Reads queued and not yet completed
    pub fn pending_reads(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn stats(&self) -> MockStats {
        self.state.lock().stats.clone()
    }

    /// Drop the packet `endpoint` would deliver for `frame`
    pub fn drop_packet(&self, endpoint: usize, frame: u64) {
        self.state.lock().drops.insert((endpoint, frame));
    }

    /// Swap the packets of `frame` and `frame + 1` on `endpoint`
    pub fn reorder(&self, endpoint: usize, frame: u64) {
        self.state.lock().reorders.insert((endpoint, frame));
    }

    /// The read covering `frame` completes with an unknown status
    pub fn inject_unknown_status(&self, frame: u64) {
        self.state.lock().unknown_status.insert(frame);
    }

    /// Stop writing buffers on every endpoint
    ///
    /// Reads keep completing successfully. An endpoint thaws when a read
    /// arrives that does not continue its previous one.
    pub fn freeze(&self) {
        let mut state = self.state.lock();
        state.frozen = [true; ENDPOINT_COUNT];
        debug!(clock = state.clock, "Mock device frozen");
    }

    pub fn is_frozen(&self) -> bool {
        self.state.lock().frozen.iter().any(|f| *f)
    }

    /// Refuse every further submission
    pub fn reject_submissions(&self, reject: bool) {
        self.state.lock().reject_submissions = reject;
    }

    /// Detach the device: pending reads complete with `Aborted`
    pub fn unplug(&self) {
        let aborted = {
            let mut state = self.state.lock();
            state.unplugged = true;
            let pending = state.pending.len() as u64;
            state.stats.aborted += pending;
            std::mem::take(&mut state.pending)
        };
        debug!(aborted = aborted.len(), "Mock device unplugged");
        for pending in aborted {
            let read = pending.read;
            read.completion
                .on_transfer_complete(read.context, TransferStatus::Aborted);
        }
    }

    pub fn is_unplugged(&self) -> bool {
        self.state.lock().unplugged
    }

    /// Move the clock forward `frames` frames, completing due reads
    pub fn advance(&self, frames: u64) {
        for _ in 0..frames {
            self.tick();
        }
    }

    /// One device frame
    pub(crate) fn tick(&self) {
        let completions = {
            let mut state = self.state.lock();
            if state.unplugged {
                return;
            }
            state.clock += 1;
            let clock = state.clock;
            if self.config.freeze_at == Some(clock) {
                state.frozen = [true; ENDPOINT_COUNT];
                debug!(clock, "Mock device frozen");
            }

            let (mut due, waiting): (Vec<PendingRead>, Vec<PendingRead>) =
                std::mem::take(&mut state.pending)
                    .into_iter()
                    .partition(|p| p.due <= clock);
            state.pending = waiting;
            due.sort_by_key(|p| p.due);

            due.into_iter()
                .map(|pending| {
                    let status = self.fill(&mut state, &pending);
                    (pending.read, status)
                })
                .collect::<Vec<_>>()
        };

        for (read, status) in completions {
            read.completion.on_transfer_complete(read.context, status);
        }
    }

    /// Write a due read's buffer and pick its completion status
    fn fill(&self, state: &mut BusState, pending: &PendingRead) -> TransferStatus {
        let read = &pending.read;
        let endpoint = read.context.slot.endpoint;
        let mut packets = read.buffer.lock();

        match pending.disposition {
            Disposition::TooOld | Disposition::TooNew => {
                for packet in packets.iter_mut() {
                    packet.clear_received();
                    packet.status = TransferStatus::Pending;
                }
                return if pending.disposition == Disposition::TooOld {
                    state.stats.too_old += 1;
                    TransferStatus::IsoTooOld
                } else {
                    state.stats.too_new += 1;
                    TransferStatus::IsoTooNew
                };
            }
            Disposition::Deliver => {}
        }

        state.stats.completed += 1;
        if state.frozen.get(endpoint).copied().unwrap_or(false) {
            state.stats.stale_completions += 1;
            return TransferStatus::Success;
        }

        let drop_probability = self.config.drop_probability.clamp(0.0, 1.0);
        let mut dropped_any = false;
        let mut unknown = false;
        for (offset, packet) in packets.iter_mut().take(read.packet_count).enumerate() {
            let frame = read.frame_time + offset as u64;
            unknown |= state.unknown_status.contains(&frame);

            let dropped = state.drops.remove(&(endpoint, frame))
                || (drop_probability > 0.0 && state.rng.random_bool(drop_probability));
            if dropped {
                packet.clear_received();
                packet.status = TransferStatus::Underrun;
                packet.timestamp = frame;
                state.stats.dropped_packets += 1;
                dropped_any = true;
                continue;
            }

            let sequence = if state.reorders.contains(&(endpoint, frame)) {
                frame + 1
            } else if frame > 0 && state.reorders.contains(&(endpoint, frame - 1)) {
                frame - 1
            } else {
                frame
            };
            pattern::encode_packet(packet, Seq(sequence as u16), endpoint, frame);
            packet.status = TransferStatus::Success;
        }

        if unknown {
            TransferStatus::Unknown(INJECTED_ERROR_CODE)
        } else if dropped_any {
            TransferStatus::Underrun
        } else {
            TransferStatus::Success
        }
    }
}

impl UsbTransport for MockTransport {
    fn allocate_transfer_buffer(
        &self,
        endpoint: usize,
        packet_count: usize,
    ) -> Result<TransferBufferHandle, TransportError> {
        let mut state = self.state.lock();
        if state.unplugged {
            return Err(TransportError::NoDevice);
        }
        if let Some(limit) = self.config.fail_allocation_after {
            if state.stats.allocated >= limit {
                return Err(TransportError::AllocationFailed {
                    endpoint,
                    message: format!("simulated exhaustion after {limit} buffers"),
                });
            }
        }
        let id = state.next_buffer_id;
        state.next_buffer_id += 1;
        state.stats.allocated += 1;
        Ok(Arc::new(TransferBuffer::new(id, endpoint, packet_count)))
    }

    fn release_transfer_buffer(&self, buffer: TransferBufferHandle) {
        let mut state = self.state.lock();
        state.stats.released += 1;
        if state.pending.iter().any(|p| p.read.buffer.id() == buffer.id()) {
            state.stats.released_in_flight += 1;
            warn!(buffer = buffer.id(), "Buffer released while a read targets it");
        }
    }

    fn submit_isochronous_read(&self, read: IsochRead) -> Result<(), TransportError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.unplugged {
            return Err(TransportError::NoDevice);
        }
        if state.reject_submissions {
            return Err(TransportError::SubmitRejected {
                code: INJECTED_ERROR_CODE,
                message: "submission refused".to_string(),
            });
        }

        let endpoint = read.context.slot.endpoint;
        let end = read.frame_time + read.packet_count as u64;
        if let Some(expected) = state.expected_next.get_mut(endpoint) {
            let contiguous = *expected == Some(read.frame_time);
            *expected = Some(end);
            if let Some(frozen) = state.frozen.get_mut(endpoint) {
                if *frozen && !contiguous {
                    *frozen = false;
                    debug!(endpoint, frame = read.frame_time, "Mock endpoint thawed");
                }
            }
        }

        let clock = state.clock;
        let (due, disposition) = if read.frame_time < clock {
            (clock, Disposition::TooOld)
        } else if read.frame_time > clock + self.config.max_schedule_ahead {
            (clock, Disposition::TooNew)
        } else {
            (end, Disposition::Deliver)
        };
        state.stats.submitted += 1;
        state.pending.push(PendingRead {
            read,
            due,
            disposition,
        });
        Ok(())
    }

    fn current_device_clock(&self) -> Result<u64, TransportError> {
        let state = self.state.lock();
        if state.unplugged {
            return Err(TransportError::NoDevice);
        }
        Ok(state.clock)
    }
}

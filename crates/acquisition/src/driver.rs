//! Stream driver
//!
//! Owns one attached device: allocates the slot rings, arms the first lead
//! window, runs the process loop on a dedicated thread and tears everything
//! down when the device goes away.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use contracts::{
    ContractError, DeviceState, FrameListener, StreamConfig, StreamStats, TransferBufferHandle,
    UsbTransport, ENDPOINT_COUNT,
};
use parking_lot::Mutex;
use thread_priority::{ThreadBuilderExt, ThreadPriority};
use tracing::{error, info, instrument, warn};

use crate::counters::StreamCounters;
use crate::lifecycle::DeviceLifecycle;
use crate::process::ProcessLoop;
use crate::scheduler::{ScheduleParams, TransactionScheduler};
use crate::slots::{RingGeometry, SlotRing, SlotTable};
use crate::stall::StallDetector;
use crate::synchronizer::{FrameSynchronizer, SyncParams};

const SYNC_THREAD_NAME: &str = "taxel-sync";
const DRAIN_POLL: Duration = Duration::from_millis(1);

/// Allocate `buffer_count` buffers for every endpoint
///
/// On failure every buffer already obtained is handed back before the error
/// is returned.
pub fn allocate_slots(
    transport: &dyn UsbTransport,
    config: &StreamConfig,
) -> Result<SlotTable, ContractError> {
    let geometry = RingGeometry::new(config.buffer_count, config.packets_per_transfer);
    let mut rings = Vec::with_capacity(ENDPOINT_COUNT);
    let mut allocated: Vec<TransferBufferHandle> = Vec::new();

    for endpoint in 0..ENDPOINT_COUNT {
        let mut buffers = Vec::with_capacity(config.buffer_count);
        for _ in 0..config.buffer_count {
            match transport.allocate_transfer_buffer(endpoint, config.packets_per_transfer) {
                Ok(buffer) => {
                    allocated.push(Arc::clone(&buffer));
                    buffers.push(buffer);
                }
                Err(e) => {
                    warn!(
                        endpoint,
                        allocated = allocated.len(),
                        error = %e,
                        "Buffer allocation failed, releasing partial set"
                    );
                    drop(buffers);
                    drop(rings);
                    for buffer in allocated {
                        transport.release_transfer_buffer(buffer);
                    }
                    return Err(e.into());
                }
            }
        }
        rings.push(SlotRing::new(endpoint, geometry, buffers));
    }

    Ok(SlotTable::new(geometry, rings))
}

/// Running acquisition for one device
///
/// # Example
///
/// ```ignore
/// let driver = StreamDriver::start(transport, StreamConfig::default(), listener)?;
/// // ... frames arrive on the listener ...
/// driver.device_removed()?;
/// ```
pub struct StreamDriver {
    transport: Arc<dyn UsbTransport>,
    config: StreamConfig,
    lifecycle: Arc<DeviceLifecycle>,
    counters: Arc<StreamCounters>,
    slots: Arc<SlotTable>,
    scheduler: Arc<TransactionScheduler>,
    listener: Arc<dyn FrameListener>,
    process: Mutex<Option<ProcessLoop>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StreamDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDriver")
            .field("state", &self.lifecycle.state())
            .field("geometry", &self.slots.geometry())
            .finish()
    }
}

impl StreamDriver {
    /// Open the device and start the synchronizer thread
    ///
    /// # Errors
    /// Allocation, clock or thread failures. Nothing stays allocated and the
    /// device is back in `NoDevice` when this fails.
    pub fn start(
        transport: Arc<dyn UsbTransport>,
        config: StreamConfig,
        listener: Arc<dyn FrameListener>,
    ) -> Result<Self, ContractError> {
        let driver = Self::open(transport, config, listener)?;
        if let Err(e) = driver.spawn() {
            let _ = driver.abort_setup();
            return Err(e);
        }
        Ok(driver)
    }

    /// Allocate buffers and arm the lead window without starting the thread
    ///
    /// A config breaking the ring rules (see [`StreamConfig::check`]) is
    /// rejected before anything is allocated.
    ///
    /// The process loop is then available through
    /// [`take_process_loop`](Self::take_process_loop) for manual stepping.
    #[instrument(name = "driver_open", skip_all, fields(buffers = config.buffer_count, lead = config.lead_window))]
    pub fn open(
        transport: Arc<dyn UsbTransport>,
        config: StreamConfig,
        listener: Arc<dyn FrameListener>,
    ) -> Result<Self, ContractError> {
        config.check()?;

        let lifecycle = Arc::new(DeviceLifecycle::new());
        lifecycle.transition(DeviceState::Connected)?;

        let slots = match allocate_slots(transport.as_ref(), &config) {
            Ok(slots) => Arc::new(slots),
            Err(e) => {
                error!(error = %e, "Device setup failed");
                lifecycle.transition(DeviceState::Closing)?;
                lifecycle.transition(DeviceState::NoDevice)?;
                return Err(e);
            }
        };

        let counters = Arc::new(StreamCounters::new());
        let scheduler = TransactionScheduler::new(
            Arc::clone(&transport),
            Arc::clone(&slots),
            Arc::clone(&lifecycle),
            Arc::clone(&counters),
            ScheduleParams {
                lead_window: config.lead_window,
                start_offset_frames: config.start_offset_frames,
            },
        );

        let synchronizer = FrameSynchronizer::new(
            Arc::clone(&slots),
            Arc::clone(&counters),
            Arc::clone(&listener),
            SyncParams {
                max_advance_steps: config.max_advance_steps,
                startup_frames: config.startup_frames,
                unresponsive_cycles: config.unresponsive_cycles,
            },
        );
        let process = ProcessLoop::new(
            synchronizer,
            StallDetector::new(&config.stall),
            Arc::clone(&scheduler),
            Arc::clone(&slots),
            Arc::clone(&lifecycle),
            Arc::clone(&counters),
            config.poll_interval(),
        );

        let driver = Self {
            transport,
            config,
            lifecycle,
            counters,
            slots,
            scheduler,
            listener,
            process: Mutex::new(Some(process)),
            worker: Mutex::new(None),
        };

        if let Err(e) = driver.scheduler.arm_window(driver.scheduler.epoch()) {
            error!(error = %e, "Could not arm initial transfers");
            let _ = driver.abort_setup();
            return Err(e);
        }

        info!(
            endpoints = ENDPOINT_COUNT,
            carriers = driver.config.carrier_frequencies.len(),
            "Device connected"
        );
        Ok(driver)
    }

    /// Move the process loop onto its own thread
    pub fn spawn(&self) -> Result<(), ContractError> {
        let Some(process) = self.process.lock().take() else {
            return Err(ContractError::Other(
                "process loop already taken".to_string(),
            ));
        };

        let builder = thread::Builder::new().name(SYNC_THREAD_NAME.to_string());
        let handle = if self.config.elevated_priority {
            builder.spawn_with_priority(ThreadPriority::Max, move |result| {
                if let Err(e) = result {
                    warn!(error = ?e, "Could not raise synchronizer thread priority");
                }
                process.run();
            })
        } else {
            builder.spawn(move || process.run())
        };
        let handle = handle.map_err(|e| ContractError::ThreadSpawn {
            message: e.to_string(),
        })?;

        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Take the process loop to drive it by hand. `None` once spawned.
    pub fn take_process_loop(&self) -> Option<ProcessLoop> {
        self.process.lock().take()
    }

    pub fn state(&self) -> DeviceState {
        self.lifecycle.state()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Counter snapshot
    pub fn stats(&self) -> StreamStats {
        self.counters.snapshot(self.lifecycle.state())
    }

    /// Device notification: the device was unplugged
    ///
    /// Must not be called from a listener callback.
    pub fn device_removed(&self) -> Result<(), ContractError> {
        self.teardown("device removed")
    }

    /// Orderly shutdown, same path as removal
    pub fn shutdown(&self) -> Result<(), ContractError> {
        self.teardown("shutdown")
    }

    #[instrument(name = "driver_teardown", skip(self))]
    fn teardown(&self, reason: &'static str) -> Result<(), ContractError> {
        let previous = self.lifecycle.begin_closing()?;
        info!(previous = ?previous, reason, "Closing device");

        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() == thread::current().id() {
                warn!("Teardown requested from the synchronizer thread");
            } else if handle.join().is_err() {
                error!("Synchronizer thread panicked");
            }
        }

        self.listener.on_close();
        let released = self.release_buffers();
        self.lifecycle.transition(DeviceState::NoDevice)?;

        let stats = self.stats();
        info!(
            emitted = stats.frames_emitted,
            gaps = stats.sequence_gaps,
            resets = stats.stall_resets,
            "Device closed"
        );
        released
    }

    /// Setup failed after allocation: close without notifying the listener
    fn abort_setup(&self) -> Result<(), ContractError> {
        self.lifecycle.begin_closing()?;
        let released = self.release_buffers();
        self.lifecycle.transition(DeviceState::NoDevice)?;
        released
    }

    /// Wait (bounded) for outstanding reads, then return every buffer
    ///
    /// Buffers still targeted by a read after the deadline are leaked.
    fn release_buffers(&self) -> Result<(), ContractError> {
        let started = Instant::now();
        let deadline = started + self.config.drain_timeout();
        while self.counters.outstanding() > 0 && Instant::now() < deadline {
            thread::sleep(DRAIN_POLL);
        }

        let outstanding = self.counters.outstanding();
        if outstanding > 0 {
            let waited_ms = started.elapsed().as_millis() as u64;
            error!(outstanding, waited_ms, "Transfers did not drain, leaking buffers");
            return Err(ContractError::DrainTimeout {
                in_flight: outstanding,
                waited_ms,
            });
        }

        for buffer in self.slots.buffers() {
            self.transport.release_transfer_buffer(Arc::clone(buffer));
        }
        Ok(())
    }
}

impl Drop for StreamDriver {
    fn drop(&mut self) {
        if self.lifecycle.permits_transfers() {
            if let Err(e) = self.teardown("driver dropped") {
                warn!(error = %e, "Teardown on drop failed");
            }
        }
    }
}

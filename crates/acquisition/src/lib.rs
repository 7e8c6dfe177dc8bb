//! # Acquisition
//!
//! Two-endpoint isochronous acquisition core.
//!
//! Responsibilities:
//! - Keep a lead window of isochronous reads outstanding per endpoint
//! - Walk each endpoint's slot ring in sequence order
//! - Fuse packets carrying the same sequence number into one `SensorFrame`
//! - Detect frozen streams and rebuild the transfer chain
//! - Gate all of the above on the device lifecycle
//!
//! ## Threads
//!
//! | context | touches |
//! |---|---|
//! | transport completion | scheduler bookkeeping, slot state cells, atomics |
//! | synchronizer thread | readers, frame fusion, stall detector, listener |
//! | notification thread | lifecycle, teardown |
//!
//! ## Usage
//!
//! ```ignore
//! use acquisition::StreamDriver;
//!
//! let driver = StreamDriver::start(transport, StreamConfig::default(), listener)?;
//! println!("{:?}", driver.stats());
//! driver.device_removed()?;
//! ```

mod counters;
mod driver;
mod lifecycle;
mod process;
mod reader;
mod scheduler;
mod slots;
mod stall;
mod synchronizer;

pub use counters::StreamCounters;
pub use driver::{allocate_slots, StreamDriver};
pub use lifecycle::DeviceLifecycle;
pub use process::ProcessLoop;
pub use reader::EndpointReader;
pub use scheduler::{ScheduleParams, TransactionScheduler};
pub use slots::{FramePosition, PacketPeek, RingGeometry, SlotRing, SlotState, SlotTable, TransferSlot};
pub use stall::{StallDetector, StallVerdict};
pub use synchronizer::{CycleOutcome, FrameSynchronizer, SyncParams};

// Re-export contracts types
pub use contracts::{
    ContractError, DeviceState, ErrorCode, FrameListener, SensorFrame, StreamConfig, StreamStats,
};

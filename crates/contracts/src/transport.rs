//! UsbTransport trait - hardware transport abstraction
//!
//! The acquisition core depends only on these operations. Real USB backends
//! and the simulated device implement the same trait.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::{IsochPacket, TransferStatus, TransportError};

/// Identifies one transfer slot: `(endpoint, buffer_index)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub endpoint: usize,
    pub buffer: usize,
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep{}/slot{}", self.endpoint, self.buffer)
    }
}

/// Context handed back with every completion
///
/// An index into the scheduler's slot table plus the schedule epoch the
/// transfer belongs to. No back-pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferContext {
    pub slot: SlotId,
    pub epoch: u32,
}

/// Pre-allocated transfer buffer
///
/// The transport writes packets at completion time; the synchronizer reads
/// them afterwards. The two never overlap while the lead window holds, so the
/// lock is uncontended in practice. Readers use [`TransferBuffer::try_lock`]
/// and treat contention as "not arrived yet".
pub struct TransferBuffer {
    id: u64,
    endpoint: usize,
    packets: Mutex<Vec<IsochPacket>>,
}

impl fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBuffer")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl TransferBuffer {
    /// Create a buffer holding `packet_count` empty packets
    pub fn new(id: u64, endpoint: usize, packet_count: usize) -> Self {
        Self {
            id,
            endpoint,
            packets: Mutex::new(vec![IsochPacket::default(); packet_count]),
        }
    }

    /// Allocator-assigned identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Endpoint this buffer belongs to
    pub fn endpoint(&self) -> usize {
        self.endpoint
    }

    /// Lock for writing (transport side)
    pub fn lock(&self) -> MutexGuard<'_, Vec<IsochPacket>> {
        self.packets.lock()
    }

    /// Non-blocking access (reader side)
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Vec<IsochPacket>>> {
        self.packets.try_lock()
    }
}

/// Shared handle to a transfer buffer
pub type TransferBufferHandle = Arc<TransferBuffer>;

/// Completion sink invoked by the transport
///
/// Runs in the transport's completion context: implementations must not
/// block, allocate, log or take contended locks.
pub trait TransferCompletion: Send + Sync {
    fn on_transfer_complete(&self, context: TransferContext, status: TransferStatus);
}

/// One asynchronous isochronous read request
pub struct IsochRead {
    /// Handed back untouched in the completion
    pub context: TransferContext,

    /// Device clock frame of the first packet
    pub frame_time: u64,

    /// Number of consecutive frames (packets) to read
    pub packet_count: usize,

    /// Destination buffer
    pub buffer: TransferBufferHandle,

    /// Invoked exactly once when the request completes
    pub completion: Arc<dyn TransferCompletion>,
}

impl fmt::Debug for IsochRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsochRead")
            .field("context", &self.context)
            .field("frame_time", &self.frame_time)
            .field("packet_count", &self.packet_count)
            .finish()
    }
}

/// Hardware transport used by the acquisition core
///
/// # Example
///
/// ```ignore
/// let buffer = transport.allocate_transfer_buffer(0, 20)?;
/// let now = transport.current_device_clock()?;
/// transport.submit_isochronous_read(IsochRead {
///     context,
///     frame_time: now + 50,
///     packet_count: 20,
///     buffer,
///     completion,
/// })?;
/// ```
pub trait UsbTransport: Send + Sync {
    /// Allocate a buffer able to hold `packet_count` packets for `endpoint`
    ///
    /// # Errors
    /// Resource exhaustion; fatal to initialization.
    fn allocate_transfer_buffer(
        &self,
        endpoint: usize,
        packet_count: usize,
    ) -> Result<TransferBufferHandle, TransportError>;

    /// Return a buffer. Must not be called while a read targets it.
    fn release_transfer_buffer(&self, buffer: TransferBufferHandle);

    /// Queue an asynchronous read
    ///
    /// # Errors
    /// The request was not queued; its completion will never run.
    fn submit_isochronous_read(&self, read: IsochRead) -> Result<(), TransportError>;

    /// Current device clock frame number
    fn current_device_clock(&self) -> Result<u64, TransportError>;
}

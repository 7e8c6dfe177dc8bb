//! # Contracts
//!
//! Frozen interface contracts shared by every crate in the workspace.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Clock model
//! - The device clock counts USB frames (1 ms each at full speed)
//! - Every isochronous packet carries a 16-bit wrapping sequence number
//! - Sequence numbers are only ever compared relatively, see [`Seq`]

pub mod codec;
mod config;
mod device;
mod error;
mod frame;
mod listener;
mod packet;
mod sequence;
mod stats;
mod transport;

pub use config::*;
pub use device::*;
pub use error::*;
pub use frame::*;
pub use listener::*;
pub use packet::*;
pub use sequence::Seq;
pub use stats::*;
pub use transport::*;

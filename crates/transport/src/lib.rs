//! # Transport
//!
//! Simulated isochronous USB device implementing [`contracts::UsbTransport`].
//!
//! Used by unit and end-to-end tests and by the CLI's `run` command when no
//! hardware is attached.
//!
//! ## Usage
//!
//! ```ignore
//! use transport::{MockTransport, MockTransportConfig};
//!
//! let transport = Arc::new(MockTransport::new(MockTransportConfig::default()));
//! let _bus = transport.spawn_bus()?;
//! let driver = StreamDriver::start(transport.clone(), config, listener)?;
//! ```

mod bus;
mod mock;
pub mod pattern;

pub use bus::BusHandle;
pub use mock::{MockStats, MockTransport, MockTransportConfig, INJECTED_ERROR_CODE};

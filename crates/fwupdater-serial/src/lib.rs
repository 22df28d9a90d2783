//! fwupdater-serial - Serial transport adapters
//!
//! Implementations of [`fwupdater_core::SerialTransport`]:
//! - [`UartTransport`] over any tokio byte stream (UART driver, pty, duplex pipe)
//! - [`MockSerialTransport`] with scripted responses for testing
//!
//! # Example
//!
//! ```ignore
//! use fwupdater_serial::{SerialConfig, UartTransport};
//!
//! let transport = UartTransport::new(uart_stream, &SerialConfig::default());
//! let transport: Box<dyn SerialTransport> = Box::new(transport);
//! ```

pub mod config;
pub mod mock;
mod uart;

pub use config::SerialConfig;
pub use mock::MockSerialTransport;
pub use uart::UartTransport;

pub use fwupdater_core::{SerialTransport, TransportError};

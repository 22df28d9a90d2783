//! Integration tests for the firmware updater
//!
//! These tests drive the module dispatcher end to end against simulated
//! hardware, with firmware images stored in a temporary directory.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p fwupdater-tests
//! ```
//!
//! # Test Structure
//!
//! - `update_flow_test.rs` - Request validation, dispatch and full panel sessions
//! - `uart_link_test.rs` - Panel sessions over a UART transport with a simulated boot ROM

// This crate only contains tests, no library code

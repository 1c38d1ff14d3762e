//! Bluetooth Module
//!
//! GoPro BLE control: framing, decoding, command sequencing and the
//! connection supervisor.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SessionSupervisor                     │
//! │  (reconnects, runs poll / keep-alive / time loops)       │
//! └─────────────────────┬────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                     CameraSession                        │
//! │  (one operation at a time, response correlation)         │
//! └───────┬──────────────┬──────────────┬────────────────────┘
//!         │              │              │
//!         ▼              ▼              ▼
//! ┌─────────────┐ ┌────────────┐ ┌────────────┐
//! │ Reassembler │ │  Message   │ │ Fast path  │
//! │ - headers   │ │ - Complex  │ │ - digest   │
//! │ - chunks    │ │ - Query    │ │   offsets  │
//! └─────────────┘ └────────────┘ └────────────┘
//!                       │
//!                       ▼
//!              BleTransport (WinRT / mock)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs, channels and command encodings
//! - [`reassembler`] - Notification chunk reassembly and framing
//! - [`message`] - Complex / Query response decoding
//! - [`fast_path`] - Positional parsing of the digest queries
//! - [`transport`] - Platform BLE seam
//! - [`session`] - Command engine for one connected camera
//! - [`scanner`] - Found-camera registry and name matching
//! - [`service`] - Connection supervisor
//! - [`mock`] - Scripted in-memory transport

pub mod fast_path;
pub mod message;
pub mod mock;
pub mod protocol;
pub mod reassembler;
pub mod scanner;
pub mod service;
pub mod session;
pub mod transport;
#[cfg(windows)]
pub mod winrt;

pub use service::SessionSupervisor;
pub use session::CameraSession;

//! Bluetooth Module
//!
//! Single-connection BLE central: keeps one GATT link alive and serializes
//! every request on it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                     │
//! │   (tokio task - commands, radio events, timer expiry)   │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                      GattManager                        │
//! └──────┬──────────────┬──────────────┬──────────────┬─────┘
//!        │              │              │              │
//!        ▼              ▼              ▼              ▼
//! ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌────────────┐
//! │ Supervisor │ │   Queue    │ │   Router   │ │ Listeners  │
//! │            │ │            │ │            │ │            │
//! │ - connect  │ │ - FIFO     │ │ - classify │ │ - tagged   │
//! │ - retries  │ │ - single   │ │ - advance  │ │ - default  │
//! │ - timers   │ │   flight   │ │ - fan out  │ │   slot     │
//! └─────┬──────┘ └─────┬──────┘ └─────▲──────┘ └────────────┘
//!       │              │              │
//!       ▼              ▼              │
//! ┌─────────────────────────────────────────────────────────┐
//! │                  RadioLink (platform)                   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`radio`] - Platform GATT client interface and its events
//! - [`supervisor`] - Connection lifecycle, retries and timeouts
//! - [`queue`] - Single-flight operation queue
//! - [`router`] - Radio event classification and fan-out
//! - [`listeners`] - Tagged subscriber registry
//! - [`manager`] - Glue owning all of the above
//! - [`service`] - Async handle running the manager on its own task

#[cfg(test)]
mod fake;
pub mod listeners;
pub mod manager;
pub mod queue;
pub mod radio;
pub mod router;
pub mod service;
pub mod supervisor;
pub mod timers;

pub use listeners::{ListenerRegistry, ListenerTag};
pub use manager::GattManager;
pub use radio::{LinkHandle, RadioEvent, RadioEventSender, RadioLink, ScanOptions};
pub use service::{BluetoothService, ConfigChange};

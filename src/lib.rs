//! Single-connection BLE central link manager.
//!
//! A [`BluetoothService`] owns one GATT link, keeps it alive with
//! timeout-guarded reconnects, runs reads, writes and notification toggles
//! strictly one at a time, and fans every radio callback out to tagged
//! listeners. The platform stack plugs in through [`RadioLink`].

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{
    BondState, CharProperty, CharacteristicRef, CharacteristicResult, CharacteristicValue,
    ConnectionEvent, ConnectionState, DeviceId, Discovery, FailureKind, GattCharacteristic,
    GattFailure, GattService, ScanEvent, ScanRecord,
};
pub use domain::settings::{LinkSettings, LogSettings, Settings, SettingsService};
pub use error::{LinkError, Result};
pub use infrastructure::bluetooth::{
    BluetoothService, ConfigChange, GattManager, LinkHandle, ListenerTag, RadioEvent,
    RadioEventSender, RadioLink, ScanOptions,
};
pub use infrastructure::logging::{init_logger, LoggingGuard};

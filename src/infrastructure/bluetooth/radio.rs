//! Radio Link
//!
//! The boundary to the platform BLE stack. The manager drives the stack
//! through [`RadioLink`] and learns every outcome from [`RadioEvent`]s the
//! stack pushes through a [`RadioEventSender`], possibly from another thread.

use crate::domain::models::{
    BondState, CharacteristicRef, DeviceId, GattService, ScanRecord,
};
use crate::error::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Client Characteristic Configuration descriptor (0x2902)
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// GATT status codes as reported by the stack
pub const GATT_SUCCESS: u16 = 0x0000;
pub const GATT_INSUFFICIENT_AUTHENTICATION: u16 = 0x0005;
pub const GATT_FAILURE: u16 = 0x0101;

/// Opaque handle to one live GATT client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Scan parameters handed to the stack; filters are the stack's business
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// How long to scan before stopping automatically; zero means the
    /// configured default period
    pub period: Duration,
    pub report_delay: Duration,
}

/// Asynchronous callbacks from the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    ConnectionStateChanged {
        handle: LinkHandle,
        state: LinkState,
        status: u16,
    },
    ServicesDiscovered {
        handle: LinkHandle,
        status: u16,
    },
    CharacteristicRead {
        handle: LinkHandle,
        target: CharacteristicRef,
        value: Vec<u8>,
        status: u16,
    },
    CharacteristicWrite {
        handle: LinkHandle,
        target: CharacteristicRef,
        value: Vec<u8>,
        status: u16,
    },
    CharacteristicChanged {
        handle: LinkHandle,
        target: CharacteristicRef,
        value: Vec<u8>,
    },
    DescriptorWrite {
        handle: LinkHandle,
        target: CharacteristicRef,
        descriptor: Uuid,
        status: u16,
    },
    ScanResult(ScanRecord),
    BatchScanResults(Vec<ScanRecord>),
    ScanFailed(i32),
}

impl RadioEvent {
    /// The link that produced the event; scan events are not tied to one
    pub fn handle(&self) -> Option<LinkHandle> {
        match self {
            Self::ConnectionStateChanged { handle, .. }
            | Self::ServicesDiscovered { handle, .. }
            | Self::CharacteristicRead { handle, .. }
            | Self::CharacteristicWrite { handle, .. }
            | Self::CharacteristicChanged { handle, .. }
            | Self::DescriptorWrite { handle, .. } => Some(*handle),
            Self::ScanResult(_) | Self::BatchScanResults(_) | Self::ScanFailed(_) => None,
        }
    }
}

/// Cloneable entry point for stack callbacks. Events are queued and handled
/// later on the manager's own context, never on the caller's thread.
#[derive(Debug, Clone)]
pub struct RadioEventSender {
    tx: mpsc::UnboundedSender<RadioEvent>,
}

impl RadioEventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RadioEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the manager is gone
    pub fn send(&self, event: RadioEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Primitives of the platform GATT client. Every submission returns
/// immediately; `true` only means the stack accepted the request, the
/// outcome arrives later as a [`RadioEvent`].
pub trait RadioLink: Send + 'static {
    fn connect(
        &mut self,
        device: &DeviceId,
        auto_connect: bool,
        events: RadioEventSender,
    ) -> Result<LinkHandle>;

    fn disconnect(&mut self, handle: LinkHandle);

    /// Release the handle and everything the stack holds for it
    fn close(&mut self, handle: LinkHandle);

    fn discover_services(&mut self, handle: LinkHandle) -> bool;

    /// Current service table, empty until discovery completes
    fn services(&self, handle: LinkHandle) -> Vec<GattService>;

    fn get_service(&self, handle: LinkHandle, service: &Uuid) -> Option<GattService> {
        self.services(handle).into_iter().find(|s| &s.uuid == service)
    }

    fn read_characteristic(&mut self, handle: LinkHandle, target: &CharacteristicRef) -> bool;

    fn write_characteristic(
        &mut self,
        handle: LinkHandle,
        target: &CharacteristicRef,
        value: &[u8],
    ) -> bool;

    /// Toggle local delivery of notifications; does not talk to the peer
    fn set_notification_enabled(
        &mut self,
        handle: LinkHandle,
        target: &CharacteristicRef,
        enable: bool,
    ) -> bool;

    fn write_descriptor(
        &mut self,
        handle: LinkHandle,
        target: &CharacteristicRef,
        descriptor: &Uuid,
        value: &[u8],
    ) -> bool;

    fn bond_state(&self, handle: LinkHandle) -> BondState;

    /// Drop the stack's cached attribute table for this device
    fn refresh_cache(&mut self, handle: LinkHandle) -> bool;

    fn start_scan(&mut self, options: &ScanOptions) -> bool;

    fn stop_scan(&mut self);
}

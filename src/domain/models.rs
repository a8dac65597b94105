use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of the peripheral to connect to (MAC address or platform id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Progress of service discovery while the link is up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    Pending,
    Ready,
}

/// Link lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected(Discovery),
    Disconnecting,
    /// Transient: a timeout gave up on the current attempt, a retry follows.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

/// Bonding state as reported by the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BondState {
    #[default]
    None,
    Bonding,
    Bonded,
}

/// GATT characteristic property (Core spec Vol 3, Part G, 3.3.1.1)
#[derive(Debug, EnumSetType)]
pub enum CharProperty {
    Read,
    WriteNoResponse,
    Write,
    Notify,
    Indicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: EnumSet<CharProperty>,
    pub descriptors: Vec<Uuid>,
}

impl GattCharacteristic {
    pub fn has_descriptor(&self, uuid: &Uuid) -> bool {
        self.descriptors.contains(uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| &c.uuid == uuid)
    }
}

/// (service, characteristic) pair; resolved against the live service table
/// each time it is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharacteristicRef {
    pub fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub device: DeviceId,
    pub name: Option<String>,
    pub rssi: i16,
    /// Raw advertisement payload
    pub advertisement: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Result(ScanRecord),
    Batch(Vec<ScanRecord>),
    Failed(i32),
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connecting,
    Connected,
    Disconnected,
    ServicesDiscovered(Vec<GattService>),
    /// A connect request was refused because the link is already up
    ConnectFailed,
}

/// Value carried by a read, write or notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicValue {
    pub target: CharacteristicRef,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The peer rejected the request for lack of authentication (bond lost)
    Authentication,
    /// Any other stack error
    Stack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattFailure {
    pub target: CharacteristicRef,
    pub kind: FailureKind,
    pub reason: &'static str,
    /// Raw status code from the stack
    pub status: u16,
}

impl fmt::Display for GattFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {:#06X}) on {}", self.reason, self.status, self.target)
    }
}

/// Outcome delivered to read and write listeners
pub type CharacteristicResult = std::result::Result<CharacteristicValue, GattFailure>;

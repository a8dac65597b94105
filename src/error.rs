//! Errors reported synchronously to callers of the link manager.
//!
//! Link-level GATT failures are not errors here; they reach listeners as
//! [`GattFailure`](crate::domain::models::GattFailure) values.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Device is already connected")]
    AlreadyConnected,

    #[error("No live link to the device")]
    NotConnected,

    #[error("Service not found: {service}")]
    ServiceNotFound { service: Uuid },

    #[error("Characteristic not found: {characteristic} in service {service}")]
    CharacteristicNotFound { service: Uuid, characteristic: Uuid },

    #[error("Radio refused the request: {0}")]
    Radio(String),

    #[error("Bluetooth service has stopped")]
    ServiceStopped,
}

pub type Result<T> = std::result::Result<T, LinkError>;

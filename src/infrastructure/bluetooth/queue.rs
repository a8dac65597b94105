//! Operation Queue
//!
//! The stack runs one GATT request at a time and its completion callbacks
//! carry no request id. Requests therefore wait in a strict FIFO and only the
//! head is ever submitted: the head *is* the in-flight operation, and a
//! completion always belongs to it.
//!
//! A head the radio refuses (missing property, unresolved characteristic)
//! produces no completion, so the queue stays parked on it until it is
//! cleared or the link is rebuilt.

use crate::domain::models::{CharProperty, CharacteristicRef};
use crate::infrastructure::bluetooth::radio::{
    LinkHandle, RadioLink, CLIENT_CHARACTERISTIC_CONFIG, DISABLE_NOTIFICATION_VALUE,
    ENABLE_NOTIFICATION_VALUE,
};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Write {
        target: CharacteristicRef,
        payload: Vec<u8>,
    },
    Read {
        target: CharacteristicRef,
    },
    SetNotification {
        target: CharacteristicRef,
        enable: bool,
    },
}

impl Operation {
    pub fn target(&self) -> &CharacteristicRef {
        match self {
            Self::Write { target, .. }
            | Self::Read { target }
            | Self::SetNotification { target, .. } => target,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Write { .. } => "write",
            Self::Read { .. } => "read",
            Self::SetNotification { .. } => "set-notification",
        }
    }
}

/// Why the head could not be handed to the radio
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no live link")]
    NoLink,
    #[error("service {0} not in the current service table")]
    ServiceMissing(uuid::Uuid),
    #[error("characteristic {0} not in the current service table")]
    CharacteristicMissing(CharacteristicRef),
    #[error("characteristic {target} lacks the {property} property")]
    MissingProperty {
        target: CharacteristicRef,
        property: &'static str,
    },
    #[error("characteristic {0} has no client configuration descriptor")]
    MissingDescriptor(CharacteristicRef),
    #[error("radio refused the {0} request")]
    Refused(&'static str),
}

#[derive(Debug, Default)]
pub struct OperationQueue {
    ops: VecDeque<Operation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append; returns true when the queue was idle and the new entry must
    /// be dispatched now
    pub fn push(&mut self, op: Operation) -> bool {
        self.ops.push_back(op);
        self.ops.len() == 1
    }

    /// The operation currently in flight, if any
    pub fn head(&self) -> Option<&Operation> {
        self.ops.front()
    }

    /// Drop the completed head and return the next one to dispatch.
    /// Completing an empty queue is a no-op.
    pub fn advance(&mut self) -> Option<&Operation> {
        if let Some(done) = self.ops.pop_front() {
            debug!("Completed {} on {}", done.name(), done.target());
        }
        self.ops.front()
    }

    /// Forget every queued entry. An entry already submitted keeps running
    /// in the stack; its completion then pops an empty queue.
    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Submit `op` to the radio, resolving its characteristic against the
/// current service table.
pub fn dispatch<R: RadioLink>(
    radio: &mut R,
    handle: Option<LinkHandle>,
    op: &Operation,
) -> Result<(), DispatchError> {
    let handle = handle.ok_or(DispatchError::NoLink)?;
    let target = op.target();

    let service = radio
        .get_service(handle, &target.service)
        .ok_or(DispatchError::ServiceMissing(target.service))?;
    let characteristic = service
        .characteristic(&target.characteristic)
        .ok_or(DispatchError::CharacteristicMissing(*target))?;
    let properties = characteristic.properties;

    debug!("Dispatching {} on {}", op.name(), target);

    let submitted = match op {
        Operation::Write { payload, .. } => {
            if properties.is_disjoint(CharProperty::Write | CharProperty::WriteNoResponse) {
                return Err(DispatchError::MissingProperty {
                    target: *target,
                    property: "write",
                });
            }
            radio.write_characteristic(handle, target, payload)
        }
        Operation::Read { .. } => {
            if !properties.contains(CharProperty::Read) {
                return Err(DispatchError::MissingProperty {
                    target: *target,
                    property: "read",
                });
            }
            radio.read_characteristic(handle, target)
        }
        Operation::SetNotification { enable, .. } => {
            if !properties.contains(CharProperty::Notify) {
                return Err(DispatchError::MissingProperty {
                    target: *target,
                    property: "notify",
                });
            }
            radio.set_notification_enabled(handle, target, *enable);
            if !characteristic.has_descriptor(&CLIENT_CHARACTERISTIC_CONFIG) {
                return Err(DispatchError::MissingDescriptor(*target));
            }
            let value = if *enable {
                ENABLE_NOTIFICATION_VALUE
            } else {
                DISABLE_NOTIFICATION_VALUE
            };
            radio.write_descriptor(handle, target, &CLIENT_CHARACTERISTIC_CONFIG, &value)
        }
    };

    if submitted {
        Ok(())
    } else {
        Err(DispatchError::Refused(op.name()))
    }
}

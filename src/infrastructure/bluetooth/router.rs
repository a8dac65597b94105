//! Event Router
//!
//! Sole consumer of radio callbacks. Each event updates the supervisor or
//! the queue and is then fanned out to the matching listener category.

use crate::domain::models::{
    CharacteristicRef, CharacteristicResult, CharacteristicValue, ConnectionEvent, FailureKind,
    GattFailure, ScanEvent,
};
use crate::infrastructure::bluetooth::manager::GattManager;
use crate::infrastructure::bluetooth::radio::{
    LinkHandle, LinkState, RadioEvent, RadioLink, GATT_INSUFFICIENT_AUTHENTICATION, GATT_SUCCESS,
};
use tracing::{info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Turn a read/write completion into the result handed to listeners
fn classify(
    access: Access,
    target: CharacteristicRef,
    value: Vec<u8>,
    status: u16,
) -> CharacteristicResult {
    if status == GATT_SUCCESS {
        return Ok(CharacteristicValue { target, value });
    }

    let (kind, reason) = match (status, access) {
        (GATT_INSUFFICIENT_AUTHENTICATION, _) => {
            (FailureKind::Authentication, "lost bonding information")
        }
        (_, Access::Read) => (FailureKind::Stack, "error reading characteristic"),
        (_, Access::Write) => (FailureKind::Stack, "error writing characteristic"),
    };
    Err(GattFailure {
        target,
        kind,
        reason,
        status,
    })
}

impl<R: RadioLink> GattManager<R> {
    /// Route one radio callback. Must run on the manager's own context.
    pub fn handle_radio_event(&mut self, event: RadioEvent) {
        if let Some(handle) = event.handle() {
            if self.supervisor.handle() != Some(handle) {
                trace!("Dropping event from released link {:?}: {:?}", handle, event);
                return;
            }
        }
        trace!("Radio event: {:?}", event);

        match event {
            RadioEvent::ConnectionStateChanged { state, status, .. } => {
                if status != GATT_SUCCESS {
                    warn!("Connection state {:?} reported with status {:#06X}", state, status);
                }
                match state {
                    LinkState::Connected => self.on_link_up(),
                    LinkState::Disconnected => self.on_link_down(),
                }
            }
            RadioEvent::ServicesDiscovered { handle, status } => {
                self.on_services_discovered(handle, status)
            }
            RadioEvent::CharacteristicRead {
                target,
                value,
                status,
                ..
            } => {
                let result = classify(Access::Read, target, value, status);
                if let Err(failure) = &result {
                    warn!("Read failed: {}", failure);
                }
                self.listeners.emit_read(&result);
                self.complete_head();
            }
            RadioEvent::CharacteristicWrite {
                target,
                value,
                status,
                ..
            } => {
                let result = classify(Access::Write, target, value, status);
                if let Err(failure) = &result {
                    warn!("Write failed: {}", failure);
                }
                self.listeners.emit_write(&result);
                self.complete_head();
            }
            RadioEvent::CharacteristicChanged { target, value, .. } => {
                self.listeners
                    .emit_notification(&CharacteristicValue { target, value });
            }
            RadioEvent::DescriptorWrite { target, status, .. } => {
                if status != GATT_SUCCESS {
                    warn!(
                        "Descriptor write on {} failed with status {:#06X}",
                        target, status
                    );
                }
                self.complete_head();
            }
            RadioEvent::ScanResult(record) => {
                self.listeners.emit_scan(&ScanEvent::Result(record));
            }
            RadioEvent::BatchScanResults(records) => {
                self.listeners.emit_scan(&ScanEvent::Batch(records));
            }
            RadioEvent::ScanFailed(code) => {
                warn!("Scan failed with code {}", code);
                self.listeners.emit_scan(&ScanEvent::Failed(code));
            }
        }
    }

    fn on_link_up(&mut self) {
        self.supervisor.on_link_up(&mut self.timers);
        if self.supervisor.settings().stop_scan_on_connect {
            self.stop_scan();
        }
        self.listeners.emit_connection(&ConnectionEvent::Connected);
    }

    fn on_link_down(&mut self) {
        info!("Link down");
        self.supervisor.on_link_down();
        self.listeners.emit_connection(&ConnectionEvent::Disconnected);
    }

    fn on_services_discovered(&mut self, handle: LinkHandle, status: u16) {
        if !self.supervisor.on_services_discovered(status == GATT_SUCCESS) {
            warn!("Service discovery failed with status {:#06X}", status);
            return;
        }

        let services = self.radio.services(handle);
        info!("Discovered {} services", services.len());
        self.listeners
            .emit_connection(&ConnectionEvent::ServicesDiscovered(services));

        // The head submitted on a previous link never completes
        if !self.queue.is_empty() && self.dispatched_on != Some(handle) {
            self.dispatch_head();
        }
    }
}

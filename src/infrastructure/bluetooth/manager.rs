//! GATT link manager
//!
//! One instance drives exactly one peripheral. It is not thread-safe by
//! itself: every call, radio event and timer expiry must be delivered from a
//! single context, which [`BluetoothService`](super::service::BluetoothService)
//! provides.

use crate::domain::models::{
    CharacteristicRef, ConnectionEvent, ConnectionState, DeviceId, ScanEvent,
};
use crate::domain::settings::LinkSettings;
use crate::error::{LinkError, Result};
use crate::infrastructure::bluetooth::listeners::ListenerRegistry;
use crate::infrastructure::bluetooth::queue::{self, Operation, OperationQueue};
use crate::infrastructure::bluetooth::radio::{LinkHandle, RadioEventSender, RadioLink, ScanOptions};
use crate::infrastructure::bluetooth::supervisor::ConnectionSupervisor;
use crate::infrastructure::bluetooth::timers::{Timer, TimerSchedule};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct GattManager<R: RadioLink> {
    pub(super) radio: R,
    pub(super) supervisor: ConnectionSupervisor,
    pub(super) queue: OperationQueue,
    pub(super) listeners: ListenerRegistry,
    pub(super) events: RadioEventSender,
    pub(super) timers: TimerSchedule,
    /// Link the queue head was submitted on, None while nothing is in flight
    pub(super) dispatched_on: Option<LinkHandle>,
    scanning: bool,
    scan_generation: u64,
}

impl<R: RadioLink> GattManager<R> {
    /// `events` is handed to the radio on every connect; whatever it
    /// delivers must come back through [`GattManager::handle_radio_event`].
    pub fn new(radio: R, settings: LinkSettings, events: RadioEventSender) -> Self {
        Self {
            radio,
            supervisor: ConnectionSupervisor::new(settings),
            queue: OperationQueue::new(),
            listeners: ListenerRegistry::new(),
            events,
            timers: TimerSchedule::default(),
            dispatched_on: None,
            scanning: false,
            scan_generation: 0,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub fn connect(&mut self, device: DeviceId, auto_connect: bool) -> Result<()> {
        let result = self.supervisor.connect(
            &mut self.radio,
            &device,
            auto_connect,
            &self.events,
            &mut self.timers,
        );
        match &result {
            Ok(()) => self.listeners.emit_connection(&ConnectionEvent::Connecting),
            Err(LinkError::AlreadyConnected) => {
                self.listeners.emit_connection(&ConnectionEvent::ConnectFailed)
            }
            Err(_) => {}
        }
        result
    }

    pub fn disconnect(&mut self) -> bool {
        self.supervisor.disconnect(&mut self.radio)
    }

    pub fn close(&mut self) -> bool {
        self.supervisor.close(&mut self.radio)
    }

    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn services_discovered(&self) -> bool {
        self.supervisor.services_discovered()
    }

    pub fn settings(&self) -> &LinkSettings {
        self.supervisor.settings()
    }

    // ── Configuration ────────────────────────────────────────────────

    pub fn set_retry_enabled(&mut self, enable: bool) {
        self.supervisor.set_retry_enabled(enable);
    }

    pub fn set_retry_count(&mut self, count: u32) {
        self.supervisor.set_retry_count(count);
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.supervisor.set_connect_timeout(timeout);
    }

    pub fn set_discovery_timeout(&mut self, timeout: Duration) {
        self.supervisor.set_discovery_timeout(timeout);
    }

    pub fn set_stop_scan_on_connect(&mut self, enable: bool) {
        self.supervisor.set_stop_scan_on_connect(enable);
    }

    // ── Operation queue ──────────────────────────────────────────────

    pub fn enqueue_write(
        &mut self,
        payload: Vec<u8>,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<()> {
        let target = self.resolve(service, characteristic)?;
        self.enqueue(Operation::Write { target, payload });
        Ok(())
    }

    pub fn enqueue_read(&mut self, service: Uuid, characteristic: Uuid) -> Result<()> {
        let target = self.resolve(service, characteristic)?;
        self.enqueue(Operation::Read { target });
        Ok(())
    }

    /// Queue one notification toggle per characteristic. Nothing is queued
    /// unless every characteristic resolves.
    pub fn enqueue_set_notification(
        &mut self,
        enable: bool,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<()> {
        let targets = characteristics
            .iter()
            .map(|c| self.resolve(service, *c))
            .collect::<Result<Vec<_>>>()?;
        for target in targets {
            self.enqueue(Operation::SetNotification { target, enable });
        }
        Ok(())
    }

    /// Drop every queued operation without cancelling the one in flight
    pub fn clear_queue(&mut self) {
        debug!("Clearing {} queued operations", self.queue.len());
        self.queue.clear();
        self.dispatched_on = None;
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn resolve(&self, service: Uuid, characteristic: Uuid) -> Result<CharacteristicRef> {
        let handle = self.supervisor.handle().ok_or(LinkError::NotConnected)?;
        let table = self
            .radio
            .get_service(handle, &service)
            .ok_or(LinkError::ServiceNotFound { service })?;
        if table.characteristic(&characteristic).is_none() {
            return Err(LinkError::CharacteristicNotFound {
                service,
                characteristic,
            });
        }
        Ok(CharacteristicRef::new(service, characteristic))
    }

    fn enqueue(&mut self, op: Operation) {
        if self.queue.push(op) {
            self.dispatch_head();
        }
    }

    /// Submit the head. A refusal leaves it in place and the queue parked.
    pub(super) fn dispatch_head(&mut self) {
        let handle = self.supervisor.handle();
        let Some(op) = self.queue.head() else {
            return;
        };
        match queue::dispatch(&mut self.radio, handle, op) {
            Ok(()) => self.dispatched_on = handle,
            Err(e) => {
                warn!(
                    "Queue stalled on {} {}: {} ({} waiting)",
                    op.name(),
                    op.target(),
                    e,
                    self.queue.len()
                );
                self.dispatched_on = None;
            }
        }
    }

    /// The in-flight operation finished, successfully or not
    pub(super) fn complete_head(&mut self) {
        self.dispatched_on = None;
        if self.queue.advance().is_some() {
            self.dispatch_head();
        }
    }

    // ── Listeners ────────────────────────────────────────────────────

    pub fn listeners(&mut self) -> &mut ListenerRegistry {
        &mut self.listeners
    }

    // ── Scanning ─────────────────────────────────────────────────────

    /// Start a scan session that stops itself after the scan period.
    /// A running session is stopped first.
    pub fn start_scan(&mut self, mut options: ScanOptions) -> bool {
        self.stop_scan();

        if options.period.is_zero() {
            options.period = self.settings().scan_period();
        }
        if options.report_delay.is_zero() {
            options.report_delay = Duration::from_millis(self.settings().scan_report_delay_ms);
        }

        info!("Starting scan for {:?}", options.period);
        if !self.radio.start_scan(&options) {
            warn!("Radio refused to start scanning");
            return false;
        }

        self.scanning = true;
        self.scan_generation += 1;
        self.timers
            .arm(options.period, Timer::ScanPeriod(self.scan_generation));
        true
    }

    pub fn stop_scan(&mut self) {
        if !self.scanning {
            return;
        }
        self.radio.stop_scan();
        self.scanning = false;
        info!("Scan stopped");
        self.listeners.emit_scan(&ScanEvent::Completed);
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Ask the stack to drop its cached attribute table for the device
    pub fn clear_device_cache(&mut self) -> Result<bool> {
        let handle = self.supervisor.handle().ok_or(LinkError::NotConnected)?;
        let refreshed = self.radio.refresh_cache(handle);
        info!("Refresh device cache: {}", refreshed);
        Ok(refreshed)
    }

    // ── Timers ───────────────────────────────────────────────────────

    /// Timers requested since the last call, as (delay, timer) pairs. Each
    /// must be fed back through [`GattManager::handle_timer`] once it expires.
    pub fn take_timers(&mut self) -> Vec<(Duration, Timer)> {
        self.timers.drain()
    }

    pub fn handle_timer(&mut self, timer: Timer) {
        debug!("Timer fired: {:?}", timer);
        match timer {
            Timer::ConnectTimeout(attempt) => {
                if self.supervisor.on_connect_timeout(
                    attempt,
                    &mut self.radio,
                    &self.events,
                    &mut self.timers,
                ) {
                    self.listeners.emit_connection(&ConnectionEvent::Connecting);
                }
            }
            Timer::DiscoveryTimeout(attempt) => {
                if self.supervisor.on_discovery_timeout(
                    attempt,
                    &mut self.radio,
                    &self.events,
                    &mut self.timers,
                ) {
                    self.listeners.emit_connection(&ConnectionEvent::Connecting);
                }
            }
            Timer::BondingGrace(attempt) => {
                self.supervisor
                    .on_bonding_grace(attempt, &mut self.radio, &mut self.timers);
            }
            Timer::ScanPeriod(generation) => {
                if generation == self.scan_generation {
                    self.stop_scan();
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::models::{CharacteristicResult, CharacteristicValue};
    use crate::infrastructure::bluetooth::fake::{self, FakeRadio, RadioCall};
    use crate::infrastructure::bluetooth::radio::{LinkState, RadioEvent, GATT_SUCCESS};
    use std::sync::{Arc, Mutex};

    pub(crate) fn manager(settings: LinkSettings) -> (GattManager<FakeRadio>, FakeRadio) {
        let radio = FakeRadio::with_default_table();
        let (events, _rx) = RadioEventSender::channel();
        (GattManager::new(radio.clone(), settings, events), radio)
    }

    /// Manager with the link up and services discovered
    pub(crate) fn ready_manager() -> (GattManager<FakeRadio>, FakeRadio) {
        let (mut manager, radio) = manager(LinkSettings::default());
        manager.connect(DeviceId::from("AA:BB"), false).unwrap();
        let handle = radio.last_handle();
        manager.handle_radio_event(RadioEvent::ConnectionStateChanged {
            handle,
            state: LinkState::Connected,
            status: GATT_SUCCESS,
        });
        manager.handle_radio_event(RadioEvent::ServicesDiscovered {
            handle,
            status: GATT_SUCCESS,
        });
        radio.clear_calls();
        (manager, radio)
    }

    pub(crate) fn write_done(
        radio: &FakeRadio,
        target: CharacteristicRef,
        status: u16,
    ) -> RadioEvent {
        RadioEvent::CharacteristicWrite {
            handle: radio.last_handle(),
            target,
            value: vec![],
            status,
        }
    }

    fn record_connection_events(
        manager: &mut GattManager<FakeRadio>,
    ) -> Arc<Mutex<Vec<ConnectionEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        manager
            .listeners()
            .set_connection_listener(Box::new(move |e: &ConnectionEvent| {
                sink.lock().unwrap().push(e.clone())
            }));
        seen
    }

    #[test]
    fn test_enqueue_needs_a_link() {
        let (mut manager, _radio) = manager(LinkSettings::default());
        let target = fake::writable();
        assert_eq!(
            manager.enqueue_write(vec![1], target.service, target.characteristic),
            Err(LinkError::NotConnected)
        );
    }

    #[test]
    fn test_enqueue_rejects_unknown_attributes() {
        let (mut manager, _radio) = ready_manager();
        let unknown = Uuid::from_u128(0xDEAD);
        assert_eq!(
            manager.enqueue_read(unknown, fake::readable().characteristic),
            Err(LinkError::ServiceNotFound { service: unknown })
        );
        assert_eq!(
            manager.enqueue_read(fake::SERVICE, unknown),
            Err(LinkError::CharacteristicNotFound {
                service: fake::SERVICE,
                characteristic: unknown
            })
        );
        assert_eq!(
            manager.enqueue_set_notification(
                true,
                fake::SERVICE,
                &[fake::notifying().characteristic, unknown]
            ),
            Err(LinkError::CharacteristicNotFound {
                service: fake::SERVICE,
                characteristic: unknown
            })
        );
        assert_eq!(manager.queue_len(), 0);
    }

    #[test]
    fn test_second_write_waits_for_first_completion() {
        let (mut manager, radio) = ready_manager();
        let a = fake::writable();
        let b = fake::write_no_response();

        manager.enqueue_write(vec![0xA], a.service, a.characteristic).unwrap();
        manager.enqueue_write(vec![0xB], b.service, b.characteristic).unwrap();
        assert_eq!(radio.gatt_calls(), vec![RadioCall::Write(a, vec![0xA])]);

        manager.handle_radio_event(write_done(&radio, a, 0x0085));
        assert_eq!(
            radio.gatt_calls(),
            vec![RadioCall::Write(a, vec![0xA]), RadioCall::Write(b, vec![0xB])]
        );

        manager.handle_radio_event(write_done(&radio, b, GATT_SUCCESS));
        assert_eq!(radio.gatt_calls().len(), 2);
        assert_eq!(manager.queue_len(), 0);
    }

    #[test]
    fn test_n_operations_dispatch_in_order() {
        let (mut manager, radio) = ready_manager();
        let w = fake::writable();
        let r = fake::readable();

        for i in 0..5u8 {
            manager.enqueue_write(vec![i], w.service, w.characteristic).unwrap();
            manager.enqueue_read(r.service, r.characteristic).unwrap();
        }

        for i in 0..5u8 {
            manager.handle_radio_event(write_done(&radio, w, GATT_SUCCESS));
            manager.handle_radio_event(RadioEvent::CharacteristicRead {
                handle: radio.last_handle(),
                target: r,
                value: vec![i],
                status: GATT_SUCCESS,
            });
        }

        let expected: Vec<RadioCall> = (0..5u8)
            .flat_map(|i| [RadioCall::Write(w, vec![i]), RadioCall::Read(r)])
            .collect();
        assert_eq!(radio.gatt_calls(), expected);
    }

    #[test]
    fn test_notification_without_notify_property_stalls() {
        let (mut manager, radio) = ready_manager();
        let plain = fake::readable();
        let w = fake::writable();

        manager
            .enqueue_set_notification(true, plain.service, &[plain.characteristic])
            .unwrap();
        manager.enqueue_write(vec![1], w.service, w.characteristic).unwrap();

        assert!(radio.gatt_calls().is_empty());
        assert_eq!(manager.queue_len(), 2);

        manager.clear_queue();
        manager.enqueue_write(vec![2], w.service, w.characteristic).unwrap();
        assert_eq!(radio.gatt_calls(), vec![RadioCall::Write(w, vec![2])]);
    }

    #[test]
    fn test_clear_queue_never_drains_old_entries() {
        let (mut manager, radio) = ready_manager();
        let w = fake::writable();

        manager.enqueue_write(vec![1], w.service, w.characteristic).unwrap();
        manager.enqueue_write(vec![2], w.service, w.characteristic).unwrap();
        manager.clear_queue();

        // Late completion of the write already in the stack
        manager.handle_radio_event(write_done(&radio, w, GATT_SUCCESS));
        assert_eq!(radio.gatt_calls(), vec![RadioCall::Write(w, vec![1])]);

        manager.enqueue_write(vec![3], w.service, w.characteristic).unwrap();
        manager.handle_radio_event(write_done(&radio, w, GATT_SUCCESS));
        assert_eq!(
            radio.gatt_calls(),
            vec![RadioCall::Write(w, vec![1]), RadioCall::Write(w, vec![3])]
        );
    }

    #[test]
    fn test_descriptor_write_advances_queue() {
        let (mut manager, radio) = ready_manager();
        let n = fake::notifying();
        let r = fake::readable();

        manager
            .enqueue_set_notification(true, n.service, &[n.characteristic])
            .unwrap();
        manager.enqueue_read(r.service, r.characteristic).unwrap();
        assert_eq!(radio.gatt_calls().len(), 2);

        manager.handle_radio_event(RadioEvent::DescriptorWrite {
            handle: radio.last_handle(),
            target: n,
            descriptor: crate::infrastructure::bluetooth::radio::CLIENT_CHARACTERISTIC_CONFIG,
            status: GATT_SUCCESS,
        });
        assert_eq!(radio.gatt_calls().last(), Some(&RadioCall::Read(r)));
    }

    #[test]
    fn test_connect_fans_out_connecting_and_failure() {
        let (mut manager, _radio) = manager(LinkSettings::default());
        let seen = record_connection_events(&mut manager);

        manager.connect(DeviceId::from("AA:BB"), false).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![ConnectionEvent::Connecting]);

        let (mut manager, radio) = ready_manager();
        let seen = record_connection_events(&mut manager);

        assert_eq!(
            manager.connect(DeviceId::from("AA:BB"), false),
            Err(LinkError::AlreadyConnected)
        );
        assert_eq!(*seen.lock().unwrap(), vec![ConnectionEvent::ConnectFailed]);
        assert_eq!(radio.connect_count(), 0);
        assert!(manager.is_connected());
    }

    #[test]
    fn test_scan_session_auto_stops() {
        let (mut manager, radio) = manager(LinkSettings::default());
        let completed = Arc::new(Mutex::new(0));
        let c = completed.clone();
        manager.listeners().add_scan_listener(
            "ui".into(),
            Box::new(move |e: &ScanEvent| {
                if *e == ScanEvent::Completed {
                    *c.lock().unwrap() += 1;
                }
            }),
        );

        assert!(manager.start_scan(ScanOptions::default()));
        assert!(manager.is_scanning());
        let timers = manager.take_timers();
        assert_eq!(timers, vec![(Duration::from_secs(10), Timer::ScanPeriod(1))]);

        manager.handle_timer(Timer::ScanPeriod(1));
        assert!(!manager.is_scanning());
        assert_eq!(*completed.lock().unwrap(), 1);
        assert_eq!(radio.calls(), vec![RadioCall::StartScan, RadioCall::StopScan]);

        // Stale auto-stop from an earlier session must not end a new one
        assert!(manager.start_scan(ScanOptions::default()));
        manager.handle_timer(Timer::ScanPeriod(1));
        assert!(manager.is_scanning());
    }

    #[test]
    fn test_clear_device_cache() {
        let (mut manager, radio) = manager(LinkSettings::default());
        assert_eq!(manager.clear_device_cache(), Err(LinkError::NotConnected));

        manager.connect(DeviceId::from("AA:BB"), false).unwrap();
        assert_eq!(manager.clear_device_cache(), Ok(true));
        assert!(radio
            .calls()
            .contains(&RadioCall::RefreshCache(radio.last_handle())));
    }

    #[test]
    fn test_read_result_reaches_listener() {
        let (mut manager, radio) = ready_manager();
        let r = fake::readable();
        let got = Arc::new(Mutex::new(None));
        let g = got.clone();
        manager
            .listeners()
            .set_read_listener(Box::new(move |res: &CharacteristicResult| {
                *g.lock().unwrap() = Some(res.clone())
            }));

        manager.enqueue_read(r.service, r.characteristic).unwrap();
        manager.handle_radio_event(RadioEvent::CharacteristicRead {
            handle: radio.last_handle(),
            target: r,
            value: vec![0x64],
            status: GATT_SUCCESS,
        });

        assert_eq!(
            *got.lock().unwrap(),
            Some(Ok(CharacteristicValue {
                target: r,
                value: vec![0x64]
            }))
        );
    }
}

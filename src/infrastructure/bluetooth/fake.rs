//! Scripted radio for tests. Clones share state, so a test can keep one
//! copy while the manager owns another.

use crate::domain::models::{
    BondState, CharProperty, CharacteristicRef, DeviceId, GattCharacteristic, GattService,
};
use crate::error::{LinkError, Result};
use crate::infrastructure::bluetooth::radio::{
    LinkHandle, RadioEventSender, RadioLink, ScanOptions, CLIENT_CHARACTERISTIC_CONFIG,
};
use enumset::EnumSet;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub const SERVICE: Uuid = Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb);
const WRITABLE: Uuid = Uuid::from_u128(0x0000fff1_0000_1000_8000_00805f9b34fb);
const WRITE_NO_RESPONSE: Uuid = Uuid::from_u128(0x0000fff2_0000_1000_8000_00805f9b34fb);
const READABLE: Uuid = Uuid::from_u128(0x0000fff3_0000_1000_8000_00805f9b34fb);
const NOTIFYING: Uuid = Uuid::from_u128(0x0000fff4_0000_1000_8000_00805f9b34fb);

pub fn writable() -> CharacteristicRef {
    CharacteristicRef::new(SERVICE, WRITABLE)
}

pub fn write_no_response() -> CharacteristicRef {
    CharacteristicRef::new(SERVICE, WRITE_NO_RESPONSE)
}

pub fn readable() -> CharacteristicRef {
    CharacteristicRef::new(SERVICE, READABLE)
}

pub fn notifying() -> CharacteristicRef {
    CharacteristicRef::new(SERVICE, NOTIFYING)
}

pub fn default_table() -> Vec<GattService> {
    let characteristic = |uuid, properties, descriptors: Vec<Uuid>| GattCharacteristic {
        uuid,
        properties,
        descriptors,
    };
    vec![GattService {
        uuid: SERVICE,
        characteristics: vec![
            characteristic(WRITABLE, EnumSet::only(CharProperty::Write), vec![]),
            characteristic(
                WRITE_NO_RESPONSE,
                EnumSet::only(CharProperty::WriteNoResponse),
                vec![],
            ),
            characteristic(READABLE, EnumSet::only(CharProperty::Read), vec![]),
            characteristic(
                NOTIFYING,
                CharProperty::Notify | CharProperty::Read,
                vec![CLIENT_CHARACTERISTIC_CONFIG],
            ),
        ],
    }]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    Connect(DeviceId, bool),
    Disconnect(LinkHandle),
    Close(LinkHandle),
    DiscoverServices(LinkHandle),
    Read(CharacteristicRef),
    Write(CharacteristicRef, Vec<u8>),
    SetNotification(CharacteristicRef, bool),
    WriteDescriptor(CharacteristicRef, Vec<u8>),
    RefreshCache(LinkHandle),
    StartScan,
    StopScan,
}

impl RadioCall {
    fn is_gatt(&self) -> bool {
        matches!(
            self,
            Self::Read(_) | Self::Write(..) | Self::SetNotification(..) | Self::WriteDescriptor(..)
        )
    }
}

struct FakeState {
    calls: Vec<RadioCall>,
    services: Vec<GattService>,
    accept_requests: bool,
    bond: BondState,
    next_handle: u64,
    events: Option<RadioEventSender>,
}

#[derive(Clone)]
pub struct FakeRadio {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRadio {
    pub fn with_default_table() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                calls: Vec::new(),
                services: default_table(),
                accept_requests: true,
                bond: BondState::None,
                next_handle: 1,
                events: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Hand out a handle without going through `connect`
    pub fn open(&mut self) -> LinkHandle {
        let mut state = self.lock();
        let handle = LinkHandle(state.next_handle);
        state.next_handle += 1;
        handle
    }

    pub fn set_services(&self, services: Vec<GattService>) {
        self.lock().services = services;
    }

    pub fn set_accept_requests(&self, accept: bool) {
        self.lock().accept_requests = accept;
    }

    pub fn set_bond_state(&self, bond: BondState) {
        self.lock().bond = bond;
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.lock().calls.clone()
    }

    pub fn gatt_calls(&self) -> Vec<RadioCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_gatt())
            .cloned()
            .collect()
    }

    pub fn connect_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, RadioCall::Connect(..)))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Sender captured by the most recent `connect`
    pub fn events(&self) -> RadioEventSender {
        self.lock()
            .events
            .clone()
            .expect("connect has not been called")
    }

    /// Handle returned by the most recent `connect`
    pub fn last_handle(&self) -> LinkHandle {
        LinkHandle(self.lock().next_handle - 1)
    }

    fn record(&self, call: RadioCall) -> bool {
        let mut state = self.lock();
        state.calls.push(call);
        state.accept_requests
    }
}

impl RadioLink for FakeRadio {
    fn connect(
        &mut self,
        device: &DeviceId,
        auto_connect: bool,
        events: RadioEventSender,
    ) -> Result<LinkHandle> {
        if !self.record(RadioCall::Connect(device.clone(), auto_connect)) {
            return Err(LinkError::Radio("connect refused".to_string()));
        }
        let mut state = self.lock();
        state.events = Some(events);
        let handle = LinkHandle(state.next_handle);
        state.next_handle += 1;
        Ok(handle)
    }

    fn disconnect(&mut self, handle: LinkHandle) {
        self.record(RadioCall::Disconnect(handle));
    }

    fn close(&mut self, handle: LinkHandle) {
        self.record(RadioCall::Close(handle));
    }

    fn discover_services(&mut self, handle: LinkHandle) -> bool {
        self.record(RadioCall::DiscoverServices(handle))
    }

    fn services(&self, _handle: LinkHandle) -> Vec<GattService> {
        self.lock().services.clone()
    }

    fn read_characteristic(&mut self, _handle: LinkHandle, target: &CharacteristicRef) -> bool {
        self.record(RadioCall::Read(*target))
    }

    fn write_characteristic(
        &mut self,
        _handle: LinkHandle,
        target: &CharacteristicRef,
        value: &[u8],
    ) -> bool {
        self.record(RadioCall::Write(*target, value.to_vec()))
    }

    fn set_notification_enabled(
        &mut self,
        _handle: LinkHandle,
        target: &CharacteristicRef,
        enable: bool,
    ) -> bool {
        self.record(RadioCall::SetNotification(*target, enable))
    }

    fn write_descriptor(
        &mut self,
        _handle: LinkHandle,
        target: &CharacteristicRef,
        _descriptor: &Uuid,
        value: &[u8],
    ) -> bool {
        self.record(RadioCall::WriteDescriptor(*target, value.to_vec()))
    }

    fn bond_state(&self, _handle: LinkHandle) -> BondState {
        self.lock().bond
    }

    fn refresh_cache(&mut self, handle: LinkHandle) -> bool {
        self.record(RadioCall::RefreshCache(handle))
    }

    fn start_scan(&mut self, _options: &ScanOptions) -> bool {
        self.record(RadioCall::StartScan)
    }

    fn stop_scan(&mut self) {
        self.record(RadioCall::StopScan);
    }
}

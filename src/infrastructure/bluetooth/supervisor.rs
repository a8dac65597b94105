//! Connection Supervisor
//!
//! Owns the link lifecycle:
//!
//! ```text
//! Idle ──connect──▶ Connecting ──link up──▶ Connected(Pending)
//!  ▲                    ▲                        │ services discovered
//!  │                    │ retry                  ▼
//!  │                  Failed ◀──timeout──  Connected(Ready)
//!  │                                             │ disconnect
//!  └──────────────── link down ◀──── Disconnecting
//! ```
//!
//! Connection establishment is unreliable, so a connect attempt and the
//! following service discovery are each guarded by a timeout that reconnects
//! while the retry budget lasts.

use crate::domain::models::{BondState, ConnectionState, DeviceId, Discovery};
use crate::domain::settings::LinkSettings;
use crate::error::{LinkError, Result};
use crate::infrastructure::bluetooth::radio::{LinkHandle, RadioEventSender, RadioLink};
use crate::infrastructure::bluetooth::timers::{Timer, TimerSchedule};
use std::time::Duration;
use tracing::{info, warn};

pub struct ConnectionSupervisor {
    settings: LinkSettings,
    device: Option<DeviceId>,
    auto_connect: bool,
    state: ConnectionState,
    bond_state: BondState,
    services_discovered: bool,
    /// Reconnect attempts left for the current session
    retry_budget: u32,
    /// Cleared by an explicit disconnect/close so stale timers stand down
    wanted: bool,
    /// Bumped on every connect attempt and link-up; timers armed under an
    /// older value are ignored
    attempt: u64,
    handle: Option<LinkHandle>,
}

impl ConnectionSupervisor {
    pub fn new(settings: LinkSettings) -> Self {
        Self {
            retry_budget: settings.retry_count,
            settings,
            device: None,
            auto_connect: false,
            state: ConnectionState::Idle,
            bond_state: BondState::None,
            services_discovered: false,
            wanted: false,
            attempt: 0,
            handle: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn handle(&self) -> Option<LinkHandle> {
        self.handle
    }

    pub fn device(&self) -> Option<&DeviceId> {
        self.device.as_ref()
    }

    pub fn bond_state(&self) -> BondState {
        self.bond_state
    }

    pub fn services_discovered(&self) -> bool {
        self.services_discovered
    }

    pub fn retry_budget(&self) -> u32 {
        self.retry_budget
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn set_retry_enabled(&mut self, enable: bool) {
        self.settings.retry_enabled = enable;
    }

    pub fn set_retry_count(&mut self, count: u32) {
        self.settings.retry_count = count;
        self.retry_budget = count;
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.settings.connect_timeout_ms = timeout.as_millis() as u64;
    }

    pub fn set_discovery_timeout(&mut self, timeout: Duration) {
        self.settings.discovery_timeout_ms = timeout.as_millis() as u64;
    }

    pub fn set_stop_scan_on_connect(&mut self, enable: bool) {
        self.settings.stop_scan_on_connect = enable;
    }

    /// Start a new connection session.
    ///
    /// Refused while the link is up. Any previous handle is released first,
    /// whether or not it ever connected.
    pub fn connect<R: RadioLink>(
        &mut self,
        radio: &mut R,
        device: &DeviceId,
        auto_connect: bool,
        events: &RadioEventSender,
        timers: &mut TimerSchedule,
    ) -> Result<()> {
        if self.state.is_connected() {
            info!("Already connected to {:?}, connect refused", self.device);
            return Err(LinkError::AlreadyConnected);
        }

        self.retry_budget = self.settings.retry_count;
        self.wanted = true;
        self.open(radio, device, auto_connect, events, timers)
    }

    fn open<R: RadioLink>(
        &mut self,
        radio: &mut R,
        device: &DeviceId,
        auto_connect: bool,
        events: &RadioEventSender,
        timers: &mut TimerSchedule,
    ) -> Result<()> {
        self.device = Some(device.clone());
        self.auto_connect = auto_connect;
        self.services_discovered = false;
        self.attempt += 1;

        if let Some(stale) = self.handle.take() {
            warn!("Link handle {:?} already existed, releasing it", stale);
            radio.disconnect(stale);
            radio.close(stale);
        }

        info!("Connecting to {} (auto_connect: {})", device, auto_connect);
        match radio.connect(device, auto_connect, events.clone()) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = ConnectionState::Connecting;
            }
            Err(e) => {
                warn!("Radio refused to connect to {}: {}", device, e);
                self.state = ConnectionState::Idle;
                return Err(e);
            }
        }

        if self.retry_armed(self.settings.connect_timeout()) {
            timers.arm(
                self.settings.connect_timeout(),
                Timer::ConnectTimeout(self.attempt),
            );
        }
        Ok(())
    }

    fn retry_armed(&self, timeout: Duration) -> bool {
        self.settings.retry_enabled && self.retry_budget > 0 && !timeout.is_zero()
    }

    fn retry<R: RadioLink>(
        &mut self,
        radio: &mut R,
        events: &RadioEventSender,
        timers: &mut TimerSchedule,
    ) -> bool {
        let Some(device) = self.device.clone() else {
            return false;
        };

        self.retry_budget -= 1;
        self.state = ConnectionState::Failed;
        info!(
            "Retrying connection to {} ({} attempts left)",
            device, self.retry_budget
        );
        self.open(radio, &device, self.auto_connect, events, timers)
            .is_ok()
    }

    /// Connect timeout fired. Returns true if a new attempt was issued.
    pub fn on_connect_timeout<R: RadioLink>(
        &mut self,
        attempt: u64,
        radio: &mut R,
        events: &RadioEventSender,
        timers: &mut TimerSchedule,
    ) -> bool {
        if attempt != self.attempt
            || !self.wanted
            || self.state.is_connected()
            || self.retry_budget == 0
        {
            return false;
        }
        warn!("Connection attempt timed out");
        self.retry(radio, events, timers)
    }

    /// Discovery timeout fired. Returns true if a new attempt was issued.
    ///
    /// The link is still up at this point, so the retry tears it down before
    /// reconnecting.
    pub fn on_discovery_timeout<R: RadioLink>(
        &mut self,
        attempt: u64,
        radio: &mut R,
        events: &RadioEventSender,
        timers: &mut TimerSchedule,
    ) -> bool {
        if attempt != self.attempt
            || !self.wanted
            || self.state != ConnectionState::Connected(Discovery::Pending)
            || self.retry_budget == 0
        {
            return false;
        }
        warn!("Service discovery timed out");
        self.retry(radio, events, timers)
    }

    pub fn on_link_up(&mut self, timers: &mut TimerSchedule) {
        info!("Link up, services pending");
        self.state = ConnectionState::Connected(Discovery::Pending);
        self.services_discovered = false;
        self.attempt += 1;
        timers.arm(
            self.settings.bonding_grace(),
            Timer::BondingGrace(self.attempt),
        );
    }

    /// Grace period after link-up elapsed: start discovery unless bonding is
    /// still being negotiated. Returns true if discovery was requested.
    pub fn on_bonding_grace<R: RadioLink>(
        &mut self,
        attempt: u64,
        radio: &mut R,
        timers: &mut TimerSchedule,
    ) -> bool {
        if attempt != self.attempt
            || self.state != ConnectionState::Connected(Discovery::Pending)
        {
            return false;
        }
        let Some(handle) = self.handle else {
            return false;
        };

        self.bond_state = radio.bond_state(handle);
        if self.bond_state == BondState::Bonding {
            info!("Bonding in progress, skipping service discovery");
            return false;
        }

        if !radio.discover_services(handle) {
            warn!("Radio refused service discovery");
        }
        if self.retry_armed(self.settings.discovery_timeout()) {
            timers.arm(
                self.settings.discovery_timeout(),
                Timer::DiscoveryTimeout(self.attempt),
            );
        }
        true
    }

    /// Returns true if the link moved to `Connected(Ready)`
    pub fn on_services_discovered(&mut self, success: bool) -> bool {
        if !success || !self.state.is_connected() {
            self.services_discovered = false;
            return false;
        }
        self.services_discovered = true;
        self.state = ConnectionState::Connected(Discovery::Ready);
        true
    }

    pub fn on_link_down(&mut self) {
        self.state = ConnectionState::Idle;
        self.services_discovered = false;
    }

    /// Drop the link but keep the handle for reuse. Only effective while
    /// connected.
    pub fn disconnect<R: RadioLink>(&mut self, radio: &mut R) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        let Some(handle) = self.handle else {
            return false;
        };

        info!("Disconnecting");
        self.wanted = false;
        self.services_discovered = false;
        self.state = ConnectionState::Disconnecting;
        radio.disconnect(handle);
        true
    }

    /// Release the handle entirely. Events still in flight for it are
    /// dropped on arrival.
    pub fn close<R: RadioLink>(&mut self, radio: &mut R) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };

        info!("Closing link");
        self.wanted = false;
        self.services_discovered = false;
        self.state = ConnectionState::Idle;
        radio.close(handle);
        true
    }
}

//! Bluetooth Service Module
//!
//! Runs one [`GattManager`] on its own tokio task. Caller commands, radio
//! callbacks and timer expiries all land in the same task, so the manager
//! never sees two of them at once.

use crate::domain::models::{
    CharacteristicResult, CharacteristicValue, ConnectionEvent, ConnectionState, DeviceId,
    ScanEvent,
};
use crate::domain::settings::LinkSettings;
use crate::error::{LinkError, Result};
use crate::infrastructure::bluetooth::listeners::{ListenerRegistry, ListenerTag};
use crate::infrastructure::bluetooth::manager::GattManager;
use crate::infrastructure::bluetooth::radio::{
    RadioEvent, RadioEventSender, RadioLink, ScanOptions,
};
use crate::infrastructure::bluetooth::timers::Timer;
use std::time::Duration;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Runtime configuration change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    RetryEnabled(bool),
    RetryCount(u32),
    ConnectTimeout(Duration),
    DiscoveryTimeout(Duration),
    StopScanOnConnect(bool),
}

type Reply<T> = oneshot::Sender<T>;
type RegistryEdit = Box<dyn FnOnce(&mut ListenerRegistry) + Send>;

enum Command {
    Connect {
        device: DeviceId,
        auto_connect: bool,
        reply: Reply<Result<()>>,
    },
    Disconnect(Reply<bool>),
    Close(Reply<bool>),
    State(Reply<ConnectionState>),
    ServicesDiscovered(Reply<bool>),
    Configure(ConfigChange),
    Write {
        payload: Vec<u8>,
        service: Uuid,
        characteristic: Uuid,
        reply: Reply<Result<()>>,
    },
    Read {
        service: Uuid,
        characteristic: Uuid,
        reply: Reply<Result<()>>,
    },
    SetNotification {
        enable: bool,
        service: Uuid,
        characteristics: Vec<Uuid>,
        reply: Reply<Result<()>>,
    },
    ClearQueue,
    Listeners(RegistryEdit),
    StartScan(ScanOptions, Reply<bool>),
    StopScan,
    IsScanning(Reply<bool>),
    ClearDeviceCache(Reply<Result<bool>>),
    Shutdown,
}

/// Cloneable handle to the manager task
#[derive(Clone)]
pub struct BluetoothService {
    inbox: mpsc::UnboundedSender<Command>,
    events: RadioEventSender,
}

impl BluetoothService {
    /// Start the manager task. It runs until [`BluetoothService::shutdown`]
    /// or until every handle is dropped.
    pub fn spawn<R: RadioLink>(radio: R, settings: LinkSettings) -> (Self, JoinHandle<()>) {
        let (inbox, commands) = mpsc::unbounded_channel();
        let (events, radio_rx) = RadioEventSender::channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let actor = ManagerActor {
            manager: GattManager::new(radio, settings, events.clone()),
            commands,
            radio_rx,
            timer_tx,
            timer_rx,
        };
        let handle = tokio::spawn(actor.run());
        (Self { inbox, events }, handle)
    }

    /// Sender for radio callbacks that are not tied to a connect call, such
    /// as scan results
    pub fn radio_events(&self) -> RadioEventSender {
        self.events.clone()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.inbox
            .send(command)
            .map_err(|_| LinkError::ServiceStopped)
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await.map_err(|_| LinkError::ServiceStopped)
    }

    fn edit_listeners(
        &self,
        edit: impl FnOnce(&mut ListenerRegistry) + Send + 'static,
    ) -> Result<()> {
        self.send(Command::Listeners(Box::new(edit)))
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub async fn connect(&self, device: DeviceId, auto_connect: bool) -> Result<()> {
        self.request(|reply| Command::Connect {
            device,
            auto_connect,
            reply,
        })
        .await?
    }

    pub async fn disconnect(&self) -> Result<bool> {
        self.request(Command::Disconnect).await
    }

    pub async fn close(&self) -> Result<bool> {
        self.request(Command::Close).await
    }

    pub async fn state(&self) -> Result<ConnectionState> {
        self.request(Command::State).await
    }

    pub async fn is_connected(&self) -> bool {
        self.state()
            .await
            .map(|state| state.is_connected())
            .unwrap_or(false)
    }

    pub async fn services_discovered(&self) -> bool {
        self.request(Command::ServicesDiscovered)
            .await
            .unwrap_or(false)
    }

    /// Stop the manager task, closing the link
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    // ── Configuration ────────────────────────────────────────────────

    pub fn configure(&self, change: ConfigChange) -> Result<()> {
        self.send(Command::Configure(change))
    }

    pub fn set_retry_enabled(&self, enable: bool) -> Result<()> {
        self.configure(ConfigChange::RetryEnabled(enable))
    }

    pub fn set_retry_count(&self, count: u32) -> Result<()> {
        self.configure(ConfigChange::RetryCount(count))
    }

    pub fn set_connect_timeout(&self, timeout: Duration) -> Result<()> {
        self.configure(ConfigChange::ConnectTimeout(timeout))
    }

    pub fn set_discovery_timeout(&self, timeout: Duration) -> Result<()> {
        self.configure(ConfigChange::DiscoveryTimeout(timeout))
    }

    pub fn set_stop_scan_on_connect(&self, enable: bool) -> Result<()> {
        self.configure(ConfigChange::StopScanOnConnect(enable))
    }

    // ── Operation queue ──────────────────────────────────────────────

    pub async fn write(&self, payload: Vec<u8>, service: Uuid, characteristic: Uuid) -> Result<()> {
        self.request(|reply| Command::Write {
            payload,
            service,
            characteristic,
            reply,
        })
        .await?
    }

    pub async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<()> {
        self.request(|reply| Command::Read {
            service,
            characteristic,
            reply,
        })
        .await?
    }

    pub async fn set_notification(
        &self,
        enable: bool,
        service: Uuid,
        characteristics: Vec<Uuid>,
    ) -> Result<()> {
        self.request(|reply| Command::SetNotification {
            enable,
            service,
            characteristics,
            reply,
        })
        .await?
    }

    pub fn clear_queue(&self) -> Result<()> {
        self.send(Command::ClearQueue)
    }

    // ── Listeners ────────────────────────────────────────────────────

    pub fn add_scan_listener(
        &self,
        tag: impl Into<ListenerTag>,
        listener: impl FnMut(&ScanEvent) + Send + 'static,
    ) -> Result<()> {
        let tag = tag.into();
        self.edit_listeners(move |r| r.add_scan_listener(tag, Box::new(listener)))
    }

    pub fn set_scan_listener(
        &self,
        listener: impl FnMut(&ScanEvent) + Send + 'static,
    ) -> Result<()> {
        self.edit_listeners(move |r| r.set_scan_listener(Box::new(listener)))
    }

    pub fn add_connection_listener(
        &self,
        tag: impl Into<ListenerTag>,
        listener: impl FnMut(&ConnectionEvent) + Send + 'static,
    ) -> Result<()> {
        let tag = tag.into();
        self.edit_listeners(move |r| r.add_connection_listener(tag, Box::new(listener)))
    }

    pub fn set_connection_listener(
        &self,
        listener: impl FnMut(&ConnectionEvent) + Send + 'static,
    ) -> Result<()> {
        self.edit_listeners(move |r| r.set_connection_listener(Box::new(listener)))
    }

    pub fn add_notification_listener(
        &self,
        tag: impl Into<ListenerTag>,
        listener: impl FnMut(&CharacteristicValue) + Send + 'static,
    ) -> Result<()> {
        let tag = tag.into();
        self.edit_listeners(move |r| r.add_notification_listener(tag, Box::new(listener)))
    }

    pub fn set_notification_listener(
        &self,
        listener: impl FnMut(&CharacteristicValue) + Send + 'static,
    ) -> Result<()> {
        self.edit_listeners(move |r| r.set_notification_listener(Box::new(listener)))
    }

    pub fn add_write_listener(
        &self,
        tag: impl Into<ListenerTag>,
        listener: impl FnMut(&CharacteristicResult) + Send + 'static,
    ) -> Result<()> {
        let tag = tag.into();
        self.edit_listeners(move |r| r.add_write_listener(tag, Box::new(listener)))
    }

    pub fn set_write_listener(
        &self,
        listener: impl FnMut(&CharacteristicResult) + Send + 'static,
    ) -> Result<()> {
        self.edit_listeners(move |r| r.set_write_listener(Box::new(listener)))
    }

    pub fn add_read_listener(
        &self,
        tag: impl Into<ListenerTag>,
        listener: impl FnMut(&CharacteristicResult) + Send + 'static,
    ) -> Result<()> {
        let tag = tag.into();
        self.edit_listeners(move |r| r.add_read_listener(tag, Box::new(listener)))
    }

    pub fn set_read_listener(
        &self,
        listener: impl FnMut(&CharacteristicResult) + Send + 'static,
    ) -> Result<()> {
        self.edit_listeners(move |r| r.set_read_listener(Box::new(listener)))
    }

    /// Remove every tagged listener registered under `tag`
    pub fn cancel(&self, tag: impl Into<ListenerTag>) -> Result<()> {
        let tag = tag.into();
        self.edit_listeners(move |r| {
            let removed = r.cancel(&tag);
            debug!("Cancelled {} listeners tagged {}", removed, tag);
        })
    }

    pub fn destroy_tag(&self, tag: impl Into<ListenerTag>) -> Result<()> {
        self.cancel(tag)
    }

    /// Remove every tagged listener; default listeners stay
    pub fn cancel_all(&self) -> Result<()> {
        self.edit_listeners(|r| r.cancel_all())
    }

    /// Clear every default listener; tagged listeners stay
    pub fn destroy(&self) -> Result<()> {
        self.edit_listeners(|r| r.destroy())
    }

    // ── Scanning ─────────────────────────────────────────────────────

    pub async fn start_scan(&self, options: ScanOptions) -> Result<bool> {
        self.request(|reply| Command::StartScan(options, reply)).await
    }

    pub fn stop_scan(&self) -> Result<()> {
        self.send(Command::StopScan)
    }

    pub async fn is_scanning(&self) -> bool {
        self.request(Command::IsScanning).await.unwrap_or(false)
    }

    pub async fn clear_device_cache(&self) -> Result<bool> {
        self.request(Command::ClearDeviceCache).await?
    }
}

struct ManagerActor<R: RadioLink> {
    manager: GattManager<R>,
    commands: mpsc::UnboundedReceiver<Command>,
    radio_rx: mpsc::UnboundedReceiver<RadioEvent>,
    timer_tx: mpsc::UnboundedSender<Timer>,
    timer_rx: mpsc::UnboundedReceiver<Timer>,
}

impl<R: RadioLink> ManagerActor<R> {
    async fn run(mut self) {
        info!("Bluetooth manager starting up");

        loop {
            select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        info!("All service handles dropped");
                        break;
                    };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                Some(event) = self.radio_rx.recv() => self.manager.handle_radio_event(event),
                Some(timer) = self.timer_rx.recv() => self.manager.handle_timer(timer),
            }
            self.arm_timers();
        }

        self.manager.stop_scan();
        self.manager.close();
        info!("Bluetooth manager stopped");
    }

    fn arm_timers(&mut self) {
        for (delay, timer) in self.manager.take_timers() {
            let tx = self.timer_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(timer);
            });
        }
    }

    /// Returns false when the actor should stop
    fn handle_command(&mut self, cmd: Command) -> bool {
        let manager = &mut self.manager;
        match cmd {
            Command::Connect {
                device,
                auto_connect,
                reply,
            } => {
                let _ = reply.send(manager.connect(device, auto_connect));
            }
            Command::Disconnect(reply) => {
                let _ = reply.send(manager.disconnect());
            }
            Command::Close(reply) => {
                let _ = reply.send(manager.close());
            }
            Command::State(reply) => {
                let _ = reply.send(manager.state());
            }
            Command::ServicesDiscovered(reply) => {
                let _ = reply.send(manager.services_discovered());
            }
            Command::Configure(change) => {
                debug!("Configuration change: {:?}", change);
                match change {
                    ConfigChange::RetryEnabled(v) => manager.set_retry_enabled(v),
                    ConfigChange::RetryCount(v) => manager.set_retry_count(v),
                    ConfigChange::ConnectTimeout(v) => manager.set_connect_timeout(v),
                    ConfigChange::DiscoveryTimeout(v) => manager.set_discovery_timeout(v),
                    ConfigChange::StopScanOnConnect(v) => manager.set_stop_scan_on_connect(v),
                }
            }
            Command::Write {
                payload,
                service,
                characteristic,
                reply,
            } => {
                let _ = reply.send(manager.enqueue_write(payload, service, characteristic));
            }
            Command::Read {
                service,
                characteristic,
                reply,
            } => {
                let _ = reply.send(manager.enqueue_read(service, characteristic));
            }
            Command::SetNotification {
                enable,
                service,
                characteristics,
                reply,
            } => {
                let result = manager.enqueue_set_notification(enable, service, &characteristics);
                let _ = reply.send(result);
            }
            Command::ClearQueue => manager.clear_queue(),
            Command::Listeners(edit) => edit(manager.listeners()),
            Command::StartScan(options, reply) => {
                let _ = reply.send(manager.start_scan(options));
            }
            Command::StopScan => manager.stop_scan(),
            Command::IsScanning(reply) => {
                let _ = reply.send(manager.is_scanning());
            }
            Command::ClearDeviceCache(reply) => {
                let _ = reply.send(manager.clear_device_cache());
            }
            Command::Shutdown => {
                info!("Bluetooth manager shutting down");
                return false;
            }
        }
        true
    }
}

//! Listener Registry
//!
//! Five independent categories (scan, connection, notification,
//! characteristic write, characteristic read). Each holds an ordered list of
//! tagged listeners plus one untagged default slot. Every event goes to the
//! tagged listeners in registration order, then to the default.
//!
//! Registering the same tag twice keeps both entries; `cancel` removes all
//! of them.

use crate::domain::models::{
    CharacteristicResult, CharacteristicValue, ConnectionEvent, ScanEvent,
};
use std::borrow::Cow;
use std::fmt;

/// Opaque key used to cancel a group of listeners. Named and numeric tags
/// never compare equal, so `7u64` and `"7"` are distinct groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenerTag {
    Name(Cow<'static, str>),
    Id(u64),
}

impl ListenerTag {
    pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
        Self::Name(tag.into())
    }
}

impl fmt::Display for ListenerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Id(id) => write!(f, "#{}", id),
        }
    }
}

impl From<&'static str> for ListenerTag {
    fn from(tag: &'static str) -> Self {
        Self::Name(Cow::Borrowed(tag))
    }
}

impl From<String> for ListenerTag {
    fn from(tag: String) -> Self {
        Self::Name(Cow::Owned(tag))
    }
}

impl From<u64> for ListenerTag {
    fn from(tag: u64) -> Self {
        Self::Id(tag)
    }
}

pub type Listener<E> = Box<dyn FnMut(&E) + Send + 'static>;

pub type ScanListener = Listener<ScanEvent>;
pub type ConnectionListener = Listener<ConnectionEvent>;
pub type NotificationListener = Listener<CharacteristicValue>;
pub type WriteListener = Listener<CharacteristicResult>;
pub type ReadListener = Listener<CharacteristicResult>;

/// Which of the five lists a listener belongs to
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Scan,
    Connection,
    Notification,
    Write,
    Read,
}

struct Subscribers<E> {
    tagged: Vec<(ListenerTag, Listener<E>)>,
    default: Option<Listener<E>>,
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            tagged: Vec::new(),
            default: None,
        }
    }
}

impl<E> Subscribers<E> {
    fn add(&mut self, tag: ListenerTag, listener: Listener<E>) {
        self.tagged.push((tag, listener));
    }

    fn set_default(&mut self, listener: Listener<E>) {
        self.default = Some(listener);
    }

    fn cancel(&mut self, tag: &ListenerTag) -> usize {
        let before = self.tagged.len();
        self.tagged.retain(|(t, _)| t != tag);
        before - self.tagged.len()
    }

    fn emit(&mut self, event: &E) {
        for (_, listener) in self.tagged.iter_mut() {
            listener(event);
        }
        if let Some(listener) = self.default.as_mut() {
            listener(event);
        }
    }

    #[cfg(test)]
    fn tagged_len(&self) -> usize {
        self.tagged.len()
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    scan: Subscribers<ScanEvent>,
    connection: Subscribers<ConnectionEvent>,
    notification: Subscribers<CharacteristicValue>,
    write: Subscribers<CharacteristicResult>,
    read: Subscribers<CharacteristicResult>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scan_listener(&mut self, tag: ListenerTag, listener: ScanListener) {
        self.scan.add(tag, listener);
    }

    pub fn set_scan_listener(&mut self, listener: ScanListener) {
        self.scan.set_default(listener);
    }

    pub fn add_connection_listener(&mut self, tag: ListenerTag, listener: ConnectionListener) {
        self.connection.add(tag, listener);
    }

    pub fn set_connection_listener(&mut self, listener: ConnectionListener) {
        self.connection.set_default(listener);
    }

    pub fn add_notification_listener(&mut self, tag: ListenerTag, listener: NotificationListener) {
        self.notification.add(tag, listener);
    }

    pub fn set_notification_listener(&mut self, listener: NotificationListener) {
        self.notification.set_default(listener);
    }

    pub fn add_write_listener(&mut self, tag: ListenerTag, listener: WriteListener) {
        self.write.add(tag, listener);
    }

    pub fn set_write_listener(&mut self, listener: WriteListener) {
        self.write.set_default(listener);
    }

    pub fn add_read_listener(&mut self, tag: ListenerTag, listener: ReadListener) {
        self.read.add(tag, listener);
    }

    pub fn set_read_listener(&mut self, listener: ReadListener) {
        self.read.set_default(listener);
    }

    /// Remove every tagged listener registered under `tag`, in all
    /// categories. Default slots are kept.
    pub fn cancel(&mut self, tag: &ListenerTag) -> usize {
        self.scan.cancel(tag)
            + self.connection.cancel(tag)
            + self.notification.cancel(tag)
            + self.write.cancel(tag)
            + self.read.cancel(tag)
    }

    /// Drop all tagged listeners. Default slots are kept.
    pub fn cancel_all(&mut self) {
        self.scan.tagged.clear();
        self.connection.tagged.clear();
        self.notification.tagged.clear();
        self.write.tagged.clear();
        self.read.tagged.clear();
    }

    /// Drop all default listeners. Tagged listeners are kept.
    pub fn destroy(&mut self) {
        self.scan.default = None;
        self.connection.default = None;
        self.notification.default = None;
        self.write.default = None;
        self.read.default = None;
    }

    pub fn emit_scan(&mut self, event: &ScanEvent) {
        self.scan.emit(event);
    }

    pub fn emit_connection(&mut self, event: &ConnectionEvent) {
        self.connection.emit(event);
    }

    pub fn emit_notification(&mut self, event: &CharacteristicValue) {
        self.notification.emit(event);
    }

    pub fn emit_write(&mut self, event: &CharacteristicResult) {
        self.write.emit(event);
    }

    pub fn emit_read(&mut self, event: &CharacteristicResult) {
        self.read.emit(event);
    }

    /// Number of tagged listeners in one category
    #[cfg(test)]
    pub(crate) fn tagged_count(&self, category: Category) -> usize {
        match category {
            Category::Scan => self.scan.tagged_len(),
            Category::Connection => self.connection.tagged_len(),
            Category::Notification => self.notification.tagged_len(),
            Category::Write => self.write.tagged_len(),
            Category::Read => self.read.tagged_len(),
        }
    }

    #[cfg(test)]
    pub(crate) fn has_default(&self, category: Category) -> bool {
        match category {
            Category::Scan => self.scan.default.is_some(),
            Category::Connection => self.connection.default.is_some(),
            Category::Notification => self.notification.default.is_some(),
            Category::Write => self.write.default.is_some(),
            Category::Read => self.read.default.is_some(),
        }
    }
}

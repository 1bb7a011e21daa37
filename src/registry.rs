//! Attachment Registry: fixed-capacity tables for status sets, data
//! streams, the parameter set, the command table and the resource table.
//! Handles are 0-based indices into the backing table; slots are reused by
//! clearing them to `None` rather than shifting, like the other
//! fixed-size `heapless` arrays in this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use heapless::Vec as HVec;

use crate::error::Error;
use crate::named::{Name, NamedCollection};
use crate::value::Value;

/// Compile-time capacity of the status-set table.
pub const K_STATUS: usize = 8;
/// Compile-time capacity of the data-stream table.
pub const K_DATA: usize = 8;
/// Compile-time capacity of the command table.
pub const K_COMMANDS: usize = 16;
/// Compile-time capacity of the resource table.
pub const K_RESOURCES: usize = 8;

/// A handle into one of the fixed attachment tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle(pub usize);

/// How a data stream's identity string is built from a caller-supplied token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamIdMode {
    /// Use the token unprefixed, as given.
    Literal,
    /// `urn:lo:nsid:<ns>:<dev>!<id>`
    Urn,
    /// `<ns>:<dev>!<id>`
    Namespaced,
}

/// A lat/lon/alt/time geo-fix attached to a data stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFix {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub time: u64,
}

/// A status set: a named collection plus a dirty flag.
pub struct StatusSet {
    pub collection: NamedCollection,
    dirty: AtomicBool,
}

impl StatusSet {
    pub fn new(collection: NamedCollection) -> Self {
        Self {
            collection,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }
}

/// A data stream: a named collection plus stream identity and dirty flag.
pub struct DataStream {
    pub collection: NamedCollection,
    pub stream_id: Name,
    pub model: Option<Name>,
    pub tags: Option<Name>,
    pub geo: Option<GeoFix>,
    dirty: AtomicBool,
}

impl DataStream {
    pub fn new(stream_id: Name, collection: NamedCollection) -> Self {
        Self {
            collection,
            stream_id,
            model: None,
            tags: None,
            geo: None,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Build the stream identity from a caller token and a prefix mode,
    /// truncating to [`MAX_NAME_LEN`](crate::named::MAX_NAME_LEN) bytes at a
    /// UTF-8 character boundary rather than rejecting an overlong result.
    pub fn set_stream_id(&mut self, token: &str, mode: StreamIdMode, namespace: &str, device_id: &str) {
        let mut full = String::new();
        match mode {
            StreamIdMode::Literal => full.push_str(token),
            StreamIdMode::Urn => {
                full.push_str("urn:lo:nsid:");
                full.push_str(namespace);
                full.push(':');
                full.push_str(device_id);
                full.push('!');
                full.push_str(token);
            }
            StreamIdMode::Namespaced => {
                full.push_str(namespace);
                full.push(':');
                full.push_str(device_id);
                full.push('!');
                full.push_str(token);
            }
        }
        let mut cap = full.len().min(Name::new().capacity());
        while cap > 0 && !full.is_char_boundary(cap) {
            cap -= 1;
        }
        full.truncate(cap);
        self.stream_id = Name::try_from(full.as_str()).unwrap_or_default();
    }
}

/// `{correlation id, list of accepted parameter names}`.
#[derive(Debug, Clone, Default)]
pub struct PendingParamUpdate {
    pub cid: u32,
    pub accepted: Vec<Name>,
}

/// A per-parameter validator: given the name and tentative new value, accept or reject it.
pub type Validator = Box<dyn Fn(&str, &Value) -> bool + Send>;

/// The single parameter set.
pub struct ParameterSet {
    pub collection: NamedCollection,
    validator: Option<Validator>,
    dirty: AtomicBool,
    pub pending: Mutex<Option<PendingParamUpdate>>,
}

impl ParameterSet {
    pub fn new(collection: NamedCollection, validator: Option<Validator>) -> Self {
        Self {
            collection,
            validator,
            dirty: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    /// Run the validator, if any, for a tentative value; absent validator accepts everything.
    pub fn validate(&self, name: &str, tentative: &Value) -> bool {
        self.validator.as_ref().map(|v| v(name, tentative)).unwrap_or(true)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }
}

/// A single command's callback: given its argument collection, return an
/// integer result (>0 immediate, 0/negative deferred/failure).
pub type CommandCallback = Box<dyn FnMut(&[(String, Value)]) -> i32 + Send>;

/// An entry in the command table.
pub struct Command {
    pub name: Name,
    callback: Mutex<CommandCallback>,
}

impl Command {
    pub fn invoke(&self, args: &[(String, Value)]) -> i32 {
        (self.callback.lock().unwrap())(args)
    }
}

/// A resource's callbacks.
///
/// `on_complete` is the notify callback (1 success / 2 MD5 failure).
/// `on_data` pushes each streamed-and-hashed chunk plus its ending offset
/// directly to the application, rather than requiring it to pull chunks
/// back through a re-entrant callback (see DESIGN.md for the rationale).
pub struct ResourceDescriptor {
    pub name: Name,
    pub version: Mutex<Name>,
    on_complete: Mutex<Box<dyn FnMut(u8) + Send>>,
    on_data: Mutex<Box<dyn FnMut(&[u8], u64) + Send>>,
}

impl ResourceDescriptor {
    pub fn new(
        name: Name,
        version: Name,
        on_complete: Box<dyn FnMut(u8) + Send>,
        on_data: Box<dyn FnMut(&[u8], u64) + Send>,
    ) -> Self {
        Self {
            name,
            version: Mutex::new(version),
            on_complete: Mutex::new(on_complete),
            on_data: Mutex::new(on_data),
        }
    }

    pub fn notify(&self, code: u8) {
        (self.on_complete.lock().unwrap())(code)
    }

    pub fn push_data(&self, bytes: &[u8], offset: u64) {
        (self.on_data.lock().unwrap())(bytes, offset)
    }

    pub fn version(&self) -> Name {
        self.version.lock().unwrap().clone()
    }

    pub fn set_version(&self, version: Name) {
        *self.version.lock().unwrap() = version;
    }
}

/// Feature enable state as a small explicit enum rather than a raw
/// current/desired bit pair, while preserving the same four reachable states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableFlag {
    Disabled,
    WantEnable,
    Enabled,
    WantDisable,
}

impl Default for EnableFlag {
    fn default() -> Self {
        EnableFlag::Disabled
    }
}

impl EnableFlag {
    /// Request the feature be turned on (no-op if already enabled or pending).
    pub fn request_enable(&mut self) {
        if *self == EnableFlag::Disabled {
            *self = EnableFlag::WantEnable;
        }
    }

    /// Request the feature be turned off.
    pub fn request_disable(&mut self) {
        if *self == EnableFlag::Enabled {
            *self = EnableFlag::WantDisable;
        }
    }

    /// The broker accepted the pending subscribe/unsubscribe.
    pub fn confirm(&mut self) {
        *self = match *self {
            EnableFlag::WantEnable => EnableFlag::Enabled,
            EnableFlag::WantDisable => EnableFlag::Disabled,
            other => other,
        };
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, EnableFlag::Enabled | EnableFlag::WantDisable)
    }

    pub fn wants_subscribe(&self) -> bool {
        matches!(self, EnableFlag::WantEnable)
    }

    pub fn wants_unsubscribe(&self) -> bool {
        matches!(self, EnableFlag::WantDisable)
    }
}

/// An ordered command table plus its feature enable flag. The flag is
/// mutex-guarded since `control_commands` may be called from any thread
/// while the session thread reconciles it against the subscription table.
#[derive(Default)]
pub struct CommandTable {
    commands: HVec<Command, K_COMMANDS>,
    pub enable: Mutex<EnableFlag>,
}

impl CommandTable {
    pub fn attach(&mut self, name: &str, callback: CommandCallback) -> Result<Handle, Error> {
        if self.commands.iter().any(|c| c.name.as_str() == name) {
            return Err(Error::AttachmentFull);
        }
        let entry = Command {
            name: Name::try_from(name).map_err(|_| Error::StringTooLong)?,
            callback: Mutex::new(callback),
        };
        self.commands.push(entry).map_err(|_| Error::AttachmentFull)?;
        Ok(Handle(self.commands.len() - 1))
    }

    pub fn find(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name.as_str() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }
}

/// An ordered resource table plus its feature enable flag.
#[derive(Default)]
pub struct ResourceTable {
    resources: HVec<ResourceDescriptor, K_RESOURCES>,
    pub enable: Mutex<EnableFlag>,
    dirty: AtomicBool,
}

impl ResourceTable {
    pub fn attach(
        &mut self,
        name: &str,
        version: &str,
        on_complete: Box<dyn FnMut(u8) + Send>,
        on_data: Box<dyn FnMut(&[u8], u64) + Send>,
    ) -> Result<Handle, Error> {
        if self.resources.iter().any(|r| r.name.as_str() == name) {
            return Err(Error::AttachmentFull);
        }
        let entry = ResourceDescriptor::new(
            Name::try_from(name).map_err(|_| Error::StringTooLong)?,
            Name::try_from(version).map_err(|_| Error::StringTooLong)?,
            on_complete,
            on_data,
        );
        self.resources.push(entry).map_err(|_| Error::AttachmentFull)?;
        Ok(Handle(self.resources.len() - 1))
    }

    pub fn find(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|r| r.name.as_str() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.resources.iter()
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }
}

/// Fixed-capacity tables for status sets and data streams, plus the single
/// parameter set, command table, and resource table. Attached only while
/// disconnected; removed only while disconnected.
#[derive(Default)]
pub struct AttachmentRegistry {
    status: HVec<Option<StatusSet>, K_STATUS>,
    data: HVec<Option<DataStream>, K_DATA>,
    pub params: Option<ParameterSet>,
    pub commands: CommandTable,
    pub resources: ResourceTable,
}

impl AttachmentRegistry {
    pub fn new() -> Self {
        let mut status = HVec::new();
        for _ in 0..K_STATUS {
            let _ = status.push(None);
        }
        let mut data = HVec::new();
        for _ in 0..K_DATA {
            let _ = data.push(None);
        }
        Self {
            status,
            data,
            params: None,
            commands: CommandTable::default(),
            resources: ResourceTable::default(),
        }
    }

    pub fn attach_status(&mut self, collection: NamedCollection) -> Result<Handle, Error> {
        let slot = self.status.iter_mut().position(|s| s.is_none()).ok_or(Error::AttachmentFull)?;
        self.status[slot] = Some(StatusSet::new(collection));
        Ok(Handle(slot))
    }

    pub fn remove_status(&mut self, handle: Handle) -> Result<(), Error> {
        let slot = self.status.get_mut(handle.0).ok_or(Error::InvalidHandle)?;
        *slot = None;
        Ok(())
    }

    pub fn status(&self, handle: Handle) -> Result<&StatusSet, Error> {
        self.status.get(handle.0).and_then(Option::as_ref).ok_or(Error::InvalidHandle)
    }

    pub fn iter_status(&self) -> impl Iterator<Item = (Handle, &StatusSet)> {
        self.status
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (Handle(i), s)))
    }

    pub fn attach_data(&mut self, stream: DataStream) -> Result<Handle, Error> {
        let slot = self.data.iter_mut().position(|s| s.is_none()).ok_or(Error::AttachmentFull)?;
        self.data[slot] = Some(stream);
        Ok(Handle(slot))
    }

    pub fn remove_data(&mut self, handle: Handle) -> Result<(), Error> {
        let slot = self.data.get_mut(handle.0).ok_or(Error::InvalidHandle)?;
        *slot = None;
        Ok(())
    }

    pub fn data(&self, handle: Handle) -> Result<&DataStream, Error> {
        self.data.get(handle.0).and_then(Option::as_ref).ok_or(Error::InvalidHandle)
    }

    pub fn data_mut(&mut self, handle: Handle) -> Result<&mut DataStream, Error> {
        self.data.get_mut(handle.0).and_then(Option::as_mut).ok_or(Error::InvalidHandle)
    }

    pub fn iter_data(&self) -> impl Iterator<Item = (Handle, &DataStream)> {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (Handle(i), s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_attach_past_capacity_returns_error_without_mutating() {
        let mut reg = AttachmentRegistry::new();
        for _ in 0..K_STATUS {
            reg.attach_status(NamedCollection::new()).unwrap();
        }
        let before = reg.iter_status().count();
        let err = reg.attach_status(NamedCollection::new());
        assert_eq!(err.unwrap_err(), Error::AttachmentFull);
        assert_eq!(reg.iter_status().count(), before);
    }

    #[test]
    fn enable_flag_transitions_require_subscribe_ack() {
        let mut flag = EnableFlag::Disabled;
        flag.request_enable();
        assert_eq!(flag, EnableFlag::WantEnable);
        assert!(flag.wants_subscribe());
        flag.confirm();
        assert_eq!(flag, EnableFlag::Enabled);
        flag.request_disable();
        assert_eq!(flag, EnableFlag::WantDisable);
        flag.confirm();
        assert_eq!(flag, EnableFlag::Disabled);
    }

    #[test]
    fn stream_id_modes_produce_expected_prefixes() {
        let mut s = DataStream::new(Name::try_from("x").unwrap(), NamedCollection::new());
        s.set_stream_id("probe1", StreamIdMode::Literal, "ns1", "dev1");
        assert_eq!(s.stream_id.as_str(), "probe1");
        s.set_stream_id("probe1", StreamIdMode::Namespaced, "ns1", "dev1");
        assert_eq!(s.stream_id.as_str(), "ns1:dev1!probe1");
        s.set_stream_id("probe1", StreamIdMode::Urn, "ns1", "dev1");
        assert_eq!(s.stream_id.as_str(), "urn:lo:nsid:ns1:dev1!probe1");
    }

    #[test]
    fn stream_id_longer_than_capacity_is_truncated_not_rejected() {
        let mut s = DataStream::new(Name::try_from("x").unwrap(), NamedCollection::new());
        let long_token = "a".repeat(64);
        s.set_stream_id(&long_token, StreamIdMode::Literal, "ns1", "dev1");
        assert_eq!(s.stream_id.len(), s.stream_id.capacity());
    }

    #[test]
    fn double_enable_request_is_idempotent() {
        let mut flag = EnableFlag::Disabled;
        flag.request_enable();
        flag.request_enable();
        assert_eq!(flag, EnableFlag::WantEnable);
    }
}

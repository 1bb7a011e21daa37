//! Public API Facade: attach/detach schemas, push-triggers, and start/stop
//! the session controller. This is the surface a host program links
//! against; everything else in this crate is reached through it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::codec::encode_cmd_result;
use crate::config::ClientConfig;
use crate::controller::{Controller, ControllerState, QUEUE_CAPACITY};
use crate::error::{Error, Result};
use crate::identity::{check_api_key, NoopResolver, Resolver};
use crate::named::NamedCollection;
use crate::queue::{PublishKind, PublishQueue, QueueEntry};
use crate::registry::{AttachmentRegistry, CommandCallback, DataStream, Handle, Validator};
use crate::transport::{HttpResource, MqttTransport};

/// Device-side client: owns the attachment registry before the session
/// starts, and a handle to the running controller once it has.
pub struct Client {
    config: ClientConfig,
    registry: Arc<AttachmentRegistry>,
    queue: Arc<PublishQueue<QUEUE_CAPACITY>>,
    running: Arc<AtomicBool>,
    state_handle: Arc<Mutex<ControllerState>>,
    resolver: Arc<Mutex<Box<dyn Resolver>>>,
    handle: Option<JoinHandle<()>>,
    /// The synchronous-usage controller built by `connect`/`cycle`/`yield_now`.
    /// Distinct from the controller `thread_start` builds and moves onto its
    /// own thread — the two usage modes are not meant to be interleaved.
    controller: Option<Controller>,
}

impl Client {
    /// `init`: one-time initialisation. Validates the key format.
    pub fn new(config: ClientConfig) -> Result<Self> {
        check_api_key(&crate::identity::api_key_password(config.apikey_hi, config.apikey_lo))?;
        Ok(Self {
            config,
            registry: Arc::new(AttachmentRegistry::new()),
            queue: Arc::new(PublishQueue::new()),
            running: Arc::new(AtomicBool::new(false)),
            state_handle: Arc::new(Mutex::new(ControllerState::Down)),
            resolver: Arc::new(Mutex::new(Box::new(NoopResolver::default()) as Box<dyn Resolver>)),
            handle: None,
            controller: None,
        })
    }

    pub fn set_device_id(&mut self, device_id: impl Into<String>) {
        self.config.device_id = device_id.into();
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.config.namespace = namespace.into();
    }

    fn registry_mut(&mut self) -> &mut AttachmentRegistry {
        Arc::get_mut(&mut self.registry).expect("attachments must be registered before connect() or thread_start()")
    }

    pub fn attach_status(&mut self, collection: NamedCollection) -> Result<Handle> {
        Ok(self.registry_mut().attach_status(collection)?)
    }

    pub fn attach_data(&mut self, stream: DataStream) -> Result<Handle> {
        Ok(self.registry_mut().attach_data(stream)?)
    }

    /// Rebuild a data stream's identity string from `token` under the given
    /// prefix mode; overlong results are truncated, not rejected.
    pub fn set_stream_id(&mut self, handle: Handle, token: &str, mode: crate::registry::StreamIdMode) -> Result<()> {
        let namespace = self.config.namespace.clone();
        let device_id = self.config.device_id.clone();
        self.registry_mut().data_mut(handle)?.set_stream_id(token, mode, &namespace, &device_id);
        Ok(())
    }

    pub fn attach_cfg_params(&mut self, collection: NamedCollection, validator: Option<Validator>) -> Result<()> {
        self.registry_mut().params = Some(crate::registry::ParameterSet::new(collection, validator));
        Ok(())
    }

    pub fn attach_commands(&mut self, name: &str, callback: CommandCallback) -> Result<Handle> {
        Ok(self.registry_mut().commands.attach(name, callback)?)
    }

    pub fn attach_resources(
        &mut self,
        name: &str,
        version: &str,
        on_complete: Box<dyn FnMut(u8) + Send>,
        on_data: Box<dyn FnMut(&[u8], u64) + Send>,
    ) -> Result<Handle> {
        Ok(self.registry_mut().resources.attach(name, version, on_complete, on_data)?)
    }

    pub fn push_status(&self, handle: Handle) -> Result<()> {
        self.registry.status(handle)?.mark_dirty();
        Ok(())
    }

    pub fn push_data(&self, handle: Handle) -> Result<()> {
        self.registry.data(handle)?.mark_dirty();
        Ok(())
    }

    pub fn push_cfg_params(&self) -> Result<()> {
        match &self.registry.params {
            Some(params) => {
                params.mark_dirty();
                Ok(())
            }
            None => Err(Error::InvalidHandle),
        }
    }

    pub fn push_resources(&self) {
        self.registry.resources.mark_dirty();
    }

    /// Publish a deferred command result, enqueued for the session thread.
    pub fn command_response(&self, cid: u32, result: i32, values: Option<&NamedCollection>) -> Result<()> {
        let body = encode_cmd_result(cid, result, values)?;
        self.queue.put(QueueEntry {
            kind: PublishKind::CommandResponse,
            payload: body.into_bytes(),
        })?;
        Ok(())
    }

    pub fn control_commands(&self, enable: bool) {
        let mut flag = self.registry.commands.enable.lock().unwrap();
        if enable {
            flag.request_enable();
        } else {
            flag.request_disable();
        }
    }

    pub fn control_resources(&self, enable: bool) {
        let mut flag = self.registry.resources.enable.lock().unwrap();
        if enable {
            flag.request_enable();
        } else {
            flag.request_disable();
        }
    }

    /// Ad-hoc publish enqueue, delivered eventually by the session thread.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.queue.put(QueueEntry {
            kind: PublishKind::UserTopic(topic.to_string()),
            payload: payload.to_vec(),
        })?;
        Ok(())
    }

    pub fn dns_set_fqdn(&self, fqdn: &str) {
        self.resolver.lock().unwrap().set_fqdn(fqdn);
    }

    pub fn dns_resolve(&self) -> Option<String> {
        self.resolver.lock().unwrap().resolve()
    }

    pub fn set_resolver(&mut self, resolver: Box<dyn Resolver>) {
        self.resolver = Arc::new(Mutex::new(resolver));
    }

    /// `set_dbg_level`: raise or lower the global log verbosity (0 = off,
    /// increasing to `Trace`). A thin pass-through onto [`log::set_max_level`].
    pub fn set_dbg_level(&self, level: u8) {
        let filter = match level {
            0 => log::LevelFilter::Off,
            1 => log::LevelFilter::Error,
            2 => log::LevelFilter::Warn,
            3 => log::LevelFilter::Info,
            4 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        log::set_max_level(filter);
    }

    /// `set_dbg_dump`: toggle the most verbose logging on or off.
    pub fn set_dbg_dump(&self, enable: bool) {
        log::set_max_level(if enable { log::LevelFilter::Trace } else { log::LevelFilter::Info });
    }

    fn build_controller(&self, transport: Box<dyn MqttTransport>, http: Box<dyn HttpResource>) -> Controller {
        Controller::new(
            self.config.clone(),
            self.registry.clone(),
            self.queue.clone(),
            self.running.clone(),
            self.state_handle.clone(),
            transport,
            http,
            self.resolver.clone(),
        )
    }

    /// `connect`: build the synchronous-usage controller (on first call) and
    /// attempt one TCP+MQTT connect on the caller's own thread. Subsequent
    /// calls reuse the same controller and its transport/HTTP collaborators,
    /// ignoring the `transport`/`http` arguments; pass the same pair you
    /// used the first time. Returns whether the attempt succeeded.
    pub fn connect(&mut self, transport: Box<dyn MqttTransport>, http: Box<dyn HttpResource>) -> bool {
        if self.controller.is_none() {
            self.controller = Some(self.build_controller(transport, http));
        }
        self.controller.as_mut().expect("controller just constructed").connect()
    }

    /// `disconnect`: gracefully end the MQTT session on the synchronous
    /// controller built by `connect`/`cycle`. A no-op if `connect` was never
    /// called.
    pub fn disconnect(&mut self) {
        if let Some(controller) = self.controller.as_mut() {
            controller.disconnect();
        }
    }

    /// `yield`: process inbound MQTT traffic for up to `timeout_ms` on the
    /// caller's own thread. Requires `connect` to have been called first.
    pub fn yield_now(&mut self, timeout_ms: u32) -> Result<()> {
        self.controller
            .as_mut()
            .ok_or(Error::Disconnected)?
            .yield_once(timeout_ms)
            .map_err(Error::from)
    }

    /// `cycle`: run one iteration of the connect/publish/yield body for
    /// hosts that drive their own loop, on the synchronous controller built
    /// by `connect`. Requires `connect` to have been called first.
    pub fn cycle(&mut self, timeout_ms: u32) -> Result<ControllerState> {
        Ok(self.controller.as_mut().ok_or(Error::Disconnected)?.cycle(timeout_ms))
    }

    /// `run`: build a controller the same way `thread_start` does, but drive
    /// its full reconnect loop synchronously on the caller's own thread
    /// until `stop()` is called, invoking `state_cb` on every transition.
    pub fn run(
        &mut self,
        transport: Box<dyn MqttTransport>,
        http: Box<dyn HttpResource>,
        state_cb: impl FnMut(ControllerState),
    ) {
        let mut controller = self.build_controller(transport, http);
        controller.run(state_cb);
    }

    /// Build the controller and spawn the session thread, calling `state_cb`
    /// on every state transition. Attachments must not be touched afterward.
    pub fn thread_start(
        &mut self,
        transport: Box<dyn MqttTransport>,
        http: Box<dyn HttpResource>,
        mut state_cb: impl FnMut(ControllerState) + Send + 'static,
    ) {
        let mut controller = self.build_controller(transport, http);
        self.handle = Some(std::thread::spawn(move || {
            controller.run(move |s| state_cb(s));
        }));
    }

    pub fn thread_state(&self) -> ControllerState {
        *self.state_handle.lock().unwrap()
    }

    /// `stop`: request the session thread to exit at the next loop boundary.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::named::NamedValue;
    use crate::value::{Tag, Value};

    fn config() -> ClientConfig {
        ClientConfig::new("dev1", "ns1").with_api_key(0x1111_1111_1111_1111, 0x2222_2222_2222_2222)
    }

    #[test]
    fn push_status_marks_dirty() {
        let mut client = Client::new(config()).unwrap();
        let mut c = NamedCollection::new();
        c.push(NamedValue::new("up", Tag::Bool, 1, Value::from(true)));
        let handle = client.attach_status(c).unwrap();
        client.push_status(handle).unwrap();
        assert!(client.registry.status(handle).unwrap().is_dirty());
    }

    #[test]
    fn push_status_on_unknown_handle_errors() {
        let client = Client::new(config()).unwrap();
        assert_eq!(client.push_status(Handle(3)), Err(Error::InvalidHandle));
    }

    #[test]
    fn control_commands_requests_enable() {
        let client = Client::new(config()).unwrap();
        client.control_commands(true);
        assert!(client.registry.commands.enable.lock().unwrap().wants_subscribe());
    }

    #[test]
    fn synchronous_connect_cycle_disconnect_drive_the_facade() {
        use crate::transport::testsupport::{StubHttp, StubMqtt};

        let mut client = Client::new(config()).unwrap();
        assert!(client.connect(Box::new(StubMqtt::new()), Box::new(StubHttp::new(vec![]))));
        assert_eq!(client.cycle(10).unwrap(), ControllerState::Connected);
        client.disconnect();
    }

    #[test]
    fn yield_now_before_connect_reports_disconnected() {
        let mut client = Client::new(config()).unwrap();
        assert_eq!(client.yield_now(10), Err(Error::Disconnected));
    }

    #[test]
    fn ad_hoc_publish_enqueues_user_topic() {
        let client = Client::new(config()).unwrap();
        client.publish("dev/custom", b"hi").unwrap();
        let entry = client.queue.get().unwrap();
        match entry.kind {
            PublishKind::UserTopic(topic) => assert_eq!(topic, "dev/custom"),
            _ => panic!("expected UserTopic"),
        }
        assert_eq!(entry.payload, b"hi");
    }
}

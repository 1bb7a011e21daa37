//! Session Controller: the reconnect loop that owns the MQTT session
//! lifecycle, drives subscriptions, and periodically services the publish
//! pipelines. Runs on a single thread; every other thread interacts with it
//! only through dirty flags, the publish queue, and the shared state handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::codec::{decode_command, decode_param_update, decode_resource_directive, encode_cmd_result, encode_rsc_update_result};
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::identity::{api_key_password, client_id, Resolver};
use crate::pipelines::{run_cycle, ForceFlags};
use crate::queue::{PublishKind, PublishQueue};
use crate::registry::{AttachmentRegistry, PendingParamUpdate};
use crate::resource::ResourceEngine;
use crate::subscription::{Feature, SubscriptionTable};
use crate::topics::{MQTT_USERNAME, TOPIC_CFG_UPD, TOPIC_CMD, TOPIC_CMD_RES, TOPIC_RSC_UPD, TOPIC_RSC_UPD_RES};
use crate::transport::{HttpResource, InboundMessage, MqttTransport};

/// Capacity of the publish queue each controller owns.
pub const QUEUE_CAPACITY: usize = 16;

/// The four states a host program observes through the state callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Connecting,
    Connected,
    Disconnected,
    Down,
}

mod sm {
    use smlang::statemachine;

    statemachine! {
        transitions: {
            *Idle + Start = Connecting,
            Connecting + ConnectOk = Connected,
            Connecting + ConnectFail = Connecting,
            Connected + LinkLost = Disconnected,
            Disconnected + BackoffElapsed = Connecting,
            _ + Stop = Down,
        }
    }

    pub struct Context;

    impl StateMachineContext for Context {}
}

impl From<sm::States> for ControllerState {
    fn from(state: sm::States) -> Self {
        match state {
            sm::States::Idle | sm::States::Connecting => ControllerState::Connecting,
            sm::States::Connected => ControllerState::Connected,
            sm::States::Disconnected => ControllerState::Disconnected,
            sm::States::Down => ControllerState::Down,
        }
    }
}

/// Owns the MQTT/HTTP collaborators and the per-session bookkeeping
/// (subscriptions, resource engine, force flags). Constructed once per
/// connection attempt series and driven either by [`Controller::run`] on its
/// own thread, or one step at a time via [`Controller::cycle`].
pub struct Controller {
    config: ClientConfig,
    registry: Arc<AttachmentRegistry>,
    queue: Arc<PublishQueue<QUEUE_CAPACITY>>,
    running: Arc<AtomicBool>,
    state_handle: Arc<Mutex<ControllerState>>,
    transport: Box<dyn MqttTransport>,
    http: Box<dyn HttpResource>,
    resolver: Arc<Mutex<Box<dyn Resolver>>>,
    subs: SubscriptionTable,
    engine: ResourceEngine,
    force: ForceFlags,
    sm: sm::StateMachine<sm::Context>,
}

impl Controller {
    pub fn new(
        config: ClientConfig,
        registry: Arc<AttachmentRegistry>,
        queue: Arc<PublishQueue<QUEUE_CAPACITY>>,
        running: Arc<AtomicBool>,
        state_handle: Arc<Mutex<ControllerState>>,
        transport: Box<dyn MqttTransport>,
        http: Box<dyn HttpResource>,
        resolver: Arc<Mutex<Box<dyn Resolver>>>,
    ) -> Self {
        let subs = SubscriptionTable::new(TOPIC_CFG_UPD, TOPIC_CMD, TOPIC_RSC_UPD);
        let engine = ResourceEngine::new().with_retry_limit(config.resource_retry_limit);
        Self {
            config,
            registry,
            queue,
            running,
            state_handle,
            transport,
            http,
            resolver,
            subs,
            engine,
            force: ForceFlags::default(),
            sm: sm::StateMachine::new(sm::Context),
        }
    }

    fn set_state(&mut self, state: ControllerState, cb: &mut dyn FnMut(ControllerState)) {
        *self.state_handle.lock().unwrap() = state;
        cb(state);
    }

    /// Drive the full reconnect loop until `stop()` is called.
    pub fn run(&mut self, mut state_cb: impl FnMut(ControllerState)) {
        self.running.store(true, Ordering::SeqCst);
        'outer: while self.running.load(Ordering::SeqCst) {
            self.subs.reset();
            self.queue.purge();
            self.force = ForceFlags {
                status: true,
                data: false,
                resources: true,
                config: true,
            };
            let _ = self.sm.process_event(sm::Events::Start);
            self.set_state(ControllerState::Connecting, &mut state_cb);

            loop {
                if !self.running.load(Ordering::SeqCst) {
                    break 'outer;
                }
                if self.attempt_connect() {
                    let _ = self.sm.process_event(sm::Events::ConnectOk);
                    break;
                }
                let _ = self.sm.process_event(sm::Events::ConnectFail);
                std::thread::sleep(Duration::from_secs(self.config.reconnect_backoff_secs));
            }
            self.set_state(ControllerState::Connected, &mut state_cb);

            while self.running.load(Ordering::SeqCst) && self.transport.is_connected() {
                self.drain_queue();
                run_cycle(&self.registry, &mut self.engine, self.transport.as_mut(), self.http.as_mut(), &mut self.force);

                if self.yield_once(self.config.yield_timeout_ms).is_err() {
                    break;
                }
                self.reconcile_subscriptions();
                if !self.transport.is_alive() {
                    log::warn!("link lost");
                    break;
                }
            }

            self.transport.disconnect();
            let _ = self.sm.process_event(sm::Events::LinkLost);
            self.set_state(ControllerState::Disconnected, &mut state_cb);
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(Duration::from_secs(self.config.reconnect_backoff_secs));
            let _ = self.sm.process_event(sm::Events::BackoffElapsed);
        }
        let _ = self.sm.process_event(sm::Events::Stop);
        self.set_state(ControllerState::Down, &mut state_cb);
    }

    /// Perform one iteration of the connected body for hosts that drive
    /// their own loop. Returns the current state afterward.
    pub fn cycle(&mut self, timeout_ms: u32) -> ControllerState {
        if !self.transport.is_connected() {
            if self.connect() {
                return ControllerState::Connected;
            }
            return ControllerState::Connecting;
        }
        self.drain_queue();
        run_cycle(&self.registry, &mut self.engine, self.transport.as_mut(), self.http.as_mut(), &mut self.force);
        if self.yield_once(timeout_ms).is_err() {
            self.transport.disconnect();
            return ControllerState::Disconnected;
        }
        self.reconcile_subscriptions();
        if !self.transport.is_alive() {
            self.transport.disconnect();
            return ControllerState::Disconnected;
        }
        ControllerState::Connected
    }

    /// `connect`: attempt one TCP+MQTT connection attempt synchronously, for
    /// hosts that want to drive the connect/reconnect sequence themselves
    /// instead of calling [`Controller::run`]. Returns whether it succeeded.
    pub fn connect(&mut self) -> bool {
        self.attempt_connect()
    }

    /// `disconnect`: gracefully end the MQTT session and close the transport.
    pub fn disconnect(&mut self) {
        self.transport.disconnect();
    }

    /// `yield`: process inbound MQTT traffic for up to `timeout_ms`,
    /// dispatching any decoded directives to the registry/resource engine.
    /// Shared by [`Controller::run`] and [`Controller::cycle`], and exposed
    /// directly for hosts that want to drive polling themselves.
    pub fn yield_once(&mut self, timeout_ms: u32) -> Result<(), TransportError> {
        let messages = self.transport.poll(timeout_ms).map_err(|e| {
            log::warn!("yield failed: {e}");
            e
        })?;
        for message in &messages {
            self.handle_inbound(message);
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn attempt_connect(&mut self) -> bool {
        let fqdn = self
            .resolver
            .lock()
            .unwrap()
            .resolve()
            .unwrap_or_else(|| self.config.host.clone());
        let id = client_id(&self.config.namespace, &self.config.device_id);
        let password = api_key_password(self.config.apikey_hi, self.config.apikey_lo);
        log::info!("connecting to {fqdn}:{} as {id}", self.config.port);
        match self.transport.connect(&id, MQTT_USERNAME, &password, self.config.keepalive_secs) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("connect failed: {e}");
                false
            }
        }
    }

    fn drain_queue(&mut self) {
        while let Some(entry) = self.queue.get() {
            let topic = match &entry.kind {
                PublishKind::UserTopic(topic) => topic.as_str(),
                PublishKind::Status => crate::topics::TOPIC_INFO,
                PublishKind::Data => crate::topics::TOPIC_DATA,
                PublishKind::Config => crate::topics::TOPIC_CFG,
                PublishKind::Resource => crate::topics::TOPIC_RSC,
                PublishKind::CommandResponse => TOPIC_CMD_RES,
            };
            if let Err(e) = self.transport.publish(topic, &entry.payload) {
                log::warn!("queued publish to {topic} failed: {e}");
            }
        }
    }

    fn reconcile_subscriptions(&mut self) {
        if !self.subs.entry(Feature::ConfigUpdate).subscribed {
            match self.transport.subscribe(TOPIC_CFG_UPD) {
                Ok(()) => self.subs.entry_mut(Feature::ConfigUpdate).subscribed = true,
                Err(e) => log::warn!("subscribe {TOPIC_CFG_UPD} failed: {e}"),
            }
        }
        self.reconcile_feature(Feature::Command, TOPIC_CMD);
        self.reconcile_feature(Feature::ResourceUpdate, TOPIC_RSC_UPD);
    }

    fn reconcile_feature(&mut self, feature: Feature, topic: &str) {
        let flag = match feature {
            Feature::Command => &self.registry.commands.enable,
            Feature::ResourceUpdate => &self.registry.resources.enable,
            Feature::ConfigUpdate => return,
        };
        let wants_subscribe = flag.lock().unwrap().wants_subscribe();
        let wants_unsubscribe = flag.lock().unwrap().wants_unsubscribe();
        if wants_subscribe {
            match self.transport.subscribe(topic) {
                Ok(()) => {
                    flag.lock().unwrap().confirm();
                    self.subs.entry_mut(feature).subscribed = true;
                }
                Err(e) => log::warn!("subscribe {topic} failed: {e}"),
            }
        } else if wants_unsubscribe {
            match self.transport.unsubscribe(topic) {
                Ok(()) => {
                    flag.lock().unwrap().confirm();
                    self.subs.entry_mut(feature).subscribed = false;
                }
                Err(e) => log::warn!("unsubscribe {topic} failed: {e}"),
            }
        }
    }

    fn handle_inbound(&mut self, message: &InboundMessage) {
        let Ok(payload) = std::str::from_utf8(&message.payload) else {
            log::warn!("inbound message on {} was not UTF-8", message.topic);
            return;
        };
        match message.topic.as_str() {
            TOPIC_CFG_UPD => self.handle_config_update(payload),
            TOPIC_CMD => self.handle_command(payload),
            TOPIC_RSC_UPD => self.handle_resource_directive(payload),
            other => log::debug!("inbound on unrecognised topic {other}"),
        }
    }

    fn handle_config_update(&mut self, payload: &str) {
        let Some(params) = self.registry.params.as_ref() else {
            log::warn!("config update received but no parameter set is attached");
            return;
        };
        let request = match decode_param_update(payload) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("malformed config update: {e}");
                return;
            }
        };
        let mut accepted = Vec::new();
        for (name, tentative) in &request.updates {
            let Some(schema) = params.collection.get(name) else {
                log::warn!("config update names unknown parameter {name}");
                continue;
            };
            if !params.validate(name, tentative) {
                continue;
            }
            if schema.cell().set(schema.tag(), schema.dimension(), tentative.clone()).is_ok() {
                if let Ok(n) = crate::named::Name::try_from(name.as_str()) {
                    accepted.push(n);
                }
            }
        }
        *params.pending.lock().unwrap() = Some(PendingParamUpdate { cid: request.cid, accepted });
        params.mark_dirty();
    }

    fn handle_command(&mut self, payload: &str) {
        let request = match decode_command(payload) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("malformed command request: {e}");
                return;
            }
        };
        let Some(command) = self.registry.commands.find(&request.name) else {
            log::warn!("unknown command {}", request.name);
            return;
        };
        let result = command.invoke(&request.args);
        if result > 0 {
            match encode_cmd_result(request.cid, result, None) {
                Ok(body) => {
                    if let Err(e) = self.transport.publish(TOPIC_CMD_RES, body.as_bytes()) {
                        log::warn!("publish {TOPIC_CMD_RES} failed: {e}");
                    }
                }
                Err(e) => log::error!("encode {TOPIC_CMD_RES} failed: {e}"),
            }
        }
    }

    fn handle_resource_directive(&mut self, payload: &str) {
        let directive = match decode_resource_directive(payload) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("malformed resource directive: {e}");
                return;
            }
        };
        let cid = directive.cid;
        let code = self.engine.accept(directive, &self.registry.resources);
        match encode_rsc_update_result(cid, code as i32) {
            Ok(body) => {
                if let Err(e) = self.transport.publish(TOPIC_RSC_UPD_RES, body.as_bytes()) {
                    log::warn!("publish {TOPIC_RSC_UPD_RES} failed: {e}");
                }
            }
            Err(e) => log::error!("encode {TOPIC_RSC_UPD_RES} failed: {e}"),
        }
    }
}

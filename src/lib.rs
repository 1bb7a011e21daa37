//! Device-side session client for an IoT telemetry broker: MQTT session
//! lifecycle, publish pipelines, and firmware resource updates over an
//! out-of-band HTTP GET.
//!
//! The crate is organised the way the session controller drives it: a
//! [`value`]/[`named`] data model, a wire [`codec`], a fixed-capacity
//! [`registry`] of attachments, a [`queue`] and [`subscription`] table the
//! controller reconciles every iteration, a [`resource`] download engine, the
//! [`pipelines`] that flush dirty attachments, the [`controller`] reconnect
//! loop itself, and the [`api`] facade a host program links against.

pub mod api;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod identity;
pub mod named;
pub mod pipelines;
pub mod queue;
pub mod registry;
pub mod resource;
pub mod subscription;
pub mod topics;
pub mod transport;
pub mod value;

pub use api::Client;
pub use config::ClientConfig;
pub use controller::{Controller, ControllerState};
pub use error::{CodecError, Error, Result, TransportError};
pub use identity::{NoopResolver, Resolver};
pub use named::{Name, NamedCollection, NamedValue};
pub use registry::{DataStream, GeoFix, Handle, StreamIdMode};
pub use resource::{ResourceState, ResultCode};
pub use transport::{HttpResource, InboundMessage, MqttTransport};
pub use value::{Scalar, Tag, Value};

//! Collaborator traits for the pieces this crate places out of scope: the
//! MQTT wire implementation, the TLS stack (folded into the MQTT transport
//! here, since both are "connect/publish/yield" from the controller's point
//! of view), and the out-of-band HTTP GET client used for resource
//! downloads. Trait objects stand in for generics here because the session
//! controller is a concrete, non-generic `struct` that owns a thread, not a
//! leaf type threaded through user code.

use crate::error::TransportError;

/// A single inbound MQTT message surfaced by [`MqttTransport::poll`].
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// The MQTT session, abstracted. A concrete implementation wraps a real
/// broker connection (optionally over TLS); this crate never constructs one
/// itself.
pub trait MqttTransport: Send {
    /// Open a TCP (+ optional TLS) connection and send MQTT CONNECT.
    fn connect(
        &mut self,
        client_id: &str,
        username: &str,
        password: &str,
        keepalive_secs: u16,
    ) -> Result<(), TransportError>;

    /// Gracefully end the MQTT session and close the underlying socket.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Process inbound traffic for up to `timeout_ms`, returning any
    /// messages received.
    fn poll(&mut self, timeout_ms: u32) -> Result<Vec<InboundMessage>, TransportError>;

    /// Liveness check independent of the last `poll` result.
    fn is_alive(&self) -> bool;
}

/// The out-of-band HTTP GET client used by the resource engine. `open`
/// issues a ranged GET starting at `offset` of a resource whose total size
/// is `size`; `read` streams bytes from the open response.
pub trait HttpResource: Send {
    fn open(&mut self, uri: &str, offset: u64, size: u64) -> Result<(), TransportError>;

    /// Write up to `buf.len()` bytes into `buf`, returning the count
    /// actually written. `Ok(0)` means no data is available right now.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn close(&mut self);
}

/// Deterministic stub implementations for tests.
#[cfg(any(test, feature = "testsupport"))]
pub mod testsupport {
    use std::collections::VecDeque;

    use super::*;

    /// A scripted MQTT stub: connect/poll outcomes are queued up-front so
    /// tests can drive scenarios like a connect happy path or a yield error.
    #[derive(Default)]
    pub struct StubMqtt {
        pub connect_should_fail: bool,
        connected: bool,
        pub published: Vec<(String, Vec<u8>)>,
        pub subscribed: Vec<String>,
        pub unsubscribed: Vec<String>,
        pub inbound: VecDeque<InboundMessage>,
        pub poll_should_fail: bool,
        pub publish_should_fail: bool,
        pub alive: bool,
    }

    impl StubMqtt {
        pub fn new() -> Self {
            Self {
                alive: true,
                ..Default::default()
            }
        }

        /// Queue an inbound message to be returned by the next `poll`.
        pub fn push_inbound(&mut self, topic: &str, payload: &[u8]) {
            self.inbound.push_back(InboundMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            });
        }
    }

    impl MqttTransport for StubMqtt {
        fn connect(
            &mut self,
            _client_id: &str,
            _username: &str,
            _password: &str,
            _keepalive_secs: u16,
        ) -> Result<(), TransportError> {
            if self.connect_should_fail {
                return Err(TransportError::ConnectFailed);
            }
            self.connected = true;
            self.alive = true;
            Ok(())
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
            self.subscribed.push(topic.to_string());
            Ok(())
        }

        fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
            self.unsubscribed.push(topic.to_string());
            Ok(())
        }

        fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
            if self.publish_should_fail {
                return Err(TransportError::Io);
            }
            self.published.push((topic.to_string(), payload.to_vec()));
            Ok(())
        }

        fn poll(&mut self, _timeout_ms: u32) -> Result<Vec<InboundMessage>, TransportError> {
            if self.poll_should_fail {
                return Err(TransportError::Io);
            }
            Ok(self.inbound.drain(..).collect())
        }

        fn is_alive(&self) -> bool {
            self.alive
        }
    }

    /// A scripted HTTP stub that serves `body` from `open`'s offset onward,
    /// optionally injecting a run of zero-byte reads before data flows, to
    /// exercise retry boundary behaviour.
    #[derive(Default)]
    pub struct StubHttp {
        pub body: Vec<u8>,
        pub stalls_before_data: u32,
        offset: u64,
        stalls_remaining: u32,
    }

    impl StubHttp {
        pub fn new(body: Vec<u8>) -> Self {
            Self {
                body,
                ..Default::default()
            }
        }
    }

    impl HttpResource for StubHttp {
        fn open(&mut self, _uri: &str, offset: u64, _size: u64) -> Result<(), TransportError> {
            self.offset = offset;
            self.stalls_remaining = self.stalls_before_data;
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            if self.stalls_remaining > 0 {
                self.stalls_remaining -= 1;
                return Ok(0);
            }
            let remaining = &self.body[self.offset as usize..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.offset += n as u64;
            Ok(n)
        }

        fn close(&mut self) {}
    }
}

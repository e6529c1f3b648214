// One-shot MQTT publisher. Each call opens its own connection with
// `rumqttc`, waits for the CONNACK, publishes a single click command and
// then disconnects. Nothing survives the call: the client and event loop
// are locals that are dropped once the session reaches `Done`.
use async_trait::async_trait;
use rand::Rng;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions,
    Outgoing, QoS,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::{BrokerTarget, DeviceTarget};

/// Bound on the CONNECT/CONNACK exchange; also used as the keep-alive.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);
pub const TOPIC_SUFFIX: &str = "/garage_door_clicker/open/set";
pub const PAYLOAD_LEN: usize = 6;

const CLIENT_ID_PREFIX: &str = "garage-door-clicker-";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection to broker failed: {0}")]
    ConnectionFailure(String),
    #[error("publish could not be queued: {0}")]
    Publish(#[from] rumqttc::ClientError),
}

/// The single message sent by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishJob {
    pub topic: String,
    pub payload: String,
}

impl PublishJob {
    pub fn for_device(device: &DeviceTarget) -> Self {
        PublishJob {
            topic: topic_for(device),
            payload: random_lowercase(PAYLOAD_LEN),
        }
    }
}

pub fn topic_for(device: &DeviceTarget) -> String {
    format!("{}{}{}", device.base_topic, device.device_id, TOPIC_SUFFIX)
}

/// `len` characters drawn independently and uniformly from `a..=z`.
pub fn random_lowercase(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

/// How the CONNECT/CONNACK exchange ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    Accepted,
    Refused(String),
    Error(String),
    TimedOut(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    Handshake(HandshakeEvent),
    Published,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
    Publishing,
    Disconnecting,
    Done,
}

impl SessionState {
    /// Pure transition function. Events that make no sense in the current
    /// state leave it unchanged.
    pub fn next(&self, event: &SessionEvent) -> SessionState {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Disconnected, E::Start) => S::Connecting,
            (S::Connecting, E::Handshake(HandshakeEvent::Accepted)) => S::Connected,
            (S::Connecting, E::Handshake(HandshakeEvent::Refused(code))) => {
                S::Failed(format!("broker refused connection: {code}"))
            }
            (S::Connecting, E::Handshake(HandshakeEvent::Error(msg))) => S::Failed(msg.clone()),
            (S::Connecting, E::Handshake(HandshakeEvent::TimedOut(bound))) => {
                S::Failed(format!("no CONNACK within {}s", bound.as_secs()))
            }
            (S::Connected, E::Published) => S::Publishing,
            (S::Publishing, E::Closed) | (S::Failed(_), E::Closed) => S::Disconnecting,
            (S::Disconnecting, E::Closed) => S::Done,
            (state, _) => state.clone(),
        }
    }
}

fn mqtt_options(broker: &BrokerTarget) -> MqttOptions {
    let client_id = format!("{CLIENT_ID_PREFIX}{}", random_lowercase(8));
    let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
    options.set_keep_alive(HANDSHAKE_TIMEOUT);
    if let Some((user, pass)) = broker.credentials() {
        options.set_credentials(user, pass);
        debug!(username = user, "Using broker credentials");
    }
    options
}

async fn await_connack(eventloop: &mut EventLoop, bound: Duration) -> HandshakeEvent {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    HandshakeEvent::Accepted
                } else {
                    HandshakeEvent::Refused(format!("{:?}", ack.code))
                };
            }
            Ok(_) => continue,
            Err(ConnectionError::ConnectionRefused(code)) => {
                return HandshakeEvent::Refused(format!("{code:?}"));
            }
            Err(ConnectionError::NetworkTimeout) => return HandshakeEvent::TimedOut(bound),
            Err(e) => return HandshakeEvent::Error(e.to_string()),
        }
    }
}

/// Drive the event loop until the queued DISCONNECT has gone out, or the
/// connection drops on its own.
async fn drain_until_disconnect(eventloop: &mut EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(ev) => debug!(event = ?ev, "mqtt event while disconnecting"),
            Err(e) => {
                debug!(error = %e, "connection closed while disconnecting");
                break;
            }
        }
    }
}

/// Run one complete publisher session against `broker`.
///
/// Returns once the session has reached its terminal state. The connection
/// is closed on every path; a failed handshake skips the publish.
pub async fn run_session(
    broker: &BrokerTarget,
    device: &DeviceTarget,
) -> Result<PublishJob, SessionError> {
    run_session_with_timeout(broker, device, HANDSHAKE_TIMEOUT).await
}

/// [`run_session`] with an explicit bound on the CONNECT/CONNACK exchange.
pub async fn run_session_with_timeout(
    broker: &BrokerTarget,
    device: &DeviceTarget,
    handshake_timeout: Duration,
) -> Result<PublishJob, SessionError> {
    let mut state = SessionState::default().next(&SessionEvent::Start);
    info!(host = %broker.host, port = broker.port, "Connecting to mqtt broker");

    let (client, mut eventloop) = AsyncClient::new(mqtt_options(broker), 10);
    // rumqttc bounds TCP connect and CONNACK with its own (5s) default
    eventloop
        .network_options
        .set_connection_timeout(handshake_timeout.as_secs().max(1));

    let handshake = tokio::time::timeout(
        handshake_timeout,
        await_connack(&mut eventloop, handshake_timeout),
    )
    .await
    .unwrap_or(HandshakeEvent::TimedOut(handshake_timeout));
    state = state.next(&SessionEvent::Handshake(handshake));
    let connected = state == SessionState::Connected;

    let outcome = match state.clone() {
        SessionState::Connected => {
            let job = PublishJob::for_device(device);
            info!(topic = %job.topic, payload = %job.payload, "Publishing click message");
            let published = client
                .publish(job.topic.clone(), QoS::AtMostOnce, false, job.payload.clone())
                .await;
            state = state.next(&SessionEvent::Published);
            published.map(|_| job).map_err(SessionError::from)
        }
        SessionState::Failed(reason) => {
            debug!(reason = %reason, "Connection failed");
            Err(SessionError::ConnectionFailure(reason))
        }
        other => Err(SessionError::ConnectionFailure(format!(
            "unexpected session state {other:?}"
        ))),
    };

    state = state.next(&SessionEvent::Closed);
    if connected {
        if let Err(e) = client.disconnect().await {
            error!(error = %e, "Failed to queue disconnect");
        } else {
            drain_until_disconnect(&mut eventloop).await;
        }
    }
    // Dropping the event loop closes whatever socket is still open.
    drop(eventloop);
    state = state.next(&SessionEvent::Closed);
    debug!(state = ?state, "Session finished");

    outcome
}

/// Seam between the trigger endpoint and the broker.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        broker: &BrokerTarget,
        device: &DeviceTarget,
    ) -> Result<PublishJob, SessionError>;
}

/// Publishes through a real broker connection via [`run_session`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttPublisher;

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(
        &self,
        broker: &BrokerTarget,
        device: &DeviceTarget,
    ) -> Result<PublishJob, SessionError> {
        run_session(broker, device).await
    }
}

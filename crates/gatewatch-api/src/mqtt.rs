// ── MQTT bus adapter ──
//
// `rumqttc` splits a connection into a cheap `AsyncClient` and an `EventLoop`
// that must be polled for anything to happen. The event loop runs on its own
// task: it forwards inbound publishes, restores subscriptions after the
// broker session is re-established, and backs off between failed polls.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::bus::{BusClient, BusMessage};
use crate::error::BusError;

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const INBOUND_CHANNEL_CAPACITY: usize = 256;
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);
/// Floor for one probe connect; the probe interval is the usual bound.
const MIN_PROBE_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
/// Bound on waiting for room in the client's request queue.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

// ── Configuration ────────────────────────────────────────────────────

/// Broker reachability probing before the client is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Attempts before giving up. Default: 30.
    pub attempts: u32,
    /// Delay between attempts. Default: 2s.
    pub interval: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(2),
        }
    }
}

/// Connection settings for [`MqttBus`].
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub keep_alive: Duration,
    pub probe: ProbeConfig,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "gatewatch".into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            probe: ProbeConfig::default(),
        }
    }
}

/// Exponential backoff between failed event-loop polls.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failure. Default: 1s.
    pub initial_delay: Duration,
    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

// ── Broker probe ─────────────────────────────────────────────────────

/// Wait until a TCP connection to `host:port` succeeds.
///
/// Tries `probe.attempts` times, `probe.interval` apart, each connect bounded
/// by the interval (at least 500ms). Returns
/// [`BusError::Unreachable`] when every attempt fails and
/// [`BusError::Cancelled`] if `cancel` fires first.
pub async fn wait_for_broker(
    host: &str,
    port: u16,
    probe: &ProbeConfig,
    cancel: &CancellationToken,
) -> Result<(), BusError> {
    let attempts = probe.attempts.max(1);
    let connect_timeout = probe.interval.max(MIN_PROBE_CONNECT_TIMEOUT);

    for attempt in 1..=attempts {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(BusError::Cancelled),
            outcome = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port))) => outcome,
        };

        match outcome {
            Ok(Ok(_)) => {
                tracing::info!(host, port, attempt, "message broker reachable");
                return Ok(());
            }
            Ok(Err(e)) => {
                tracing::debug!(host, port, attempt, error = %e, "broker not reachable yet");
            }
            Err(_) => {
                tracing::debug!(host, port, attempt, timeout = ?connect_timeout, "broker connect timed out");
            }
        }

        if attempt < attempts {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(BusError::Cancelled),
                () = tokio::time::sleep(probe.interval) => {}
            }
        }
    }

    Err(BusError::Unreachable {
        host: host.to_owned(),
        port,
        attempts,
    })
}

// ── MqttBus ──────────────────────────────────────────────────────────

/// [`BusClient`] backed by `rumqttc`.
///
/// Cheaply cloneable. Every subscribed topic is remembered and
/// re-subscribed whenever the broker acknowledges a new connection.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    topics: Arc<Mutex<Vec<String>>>,
}

impl MqttBus {
    /// Probe the broker, then start the client and its event loop.
    ///
    /// Inbound publishes for subscribed topics arrive on the returned
    /// receiver. The event loop stops when `cancel` fires.
    pub async fn connect(
        config: &MqttConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<BusMessage>), BusError> {
        wait_for_broker(&config.host, config.port, &config.probe, &cancel).await?;

        let (client, event_loop) =
            AsyncClient::new(build_options(config), REQUEST_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let topics = Arc::new(Mutex::new(Vec::new()));

        let bus = Self {
            client: client.clone(),
            topics: Arc::clone(&topics),
        };

        tokio::spawn(run_event_loop(
            event_loop,
            client,
            topics,
            inbound_tx,
            ReconnectConfig::default(),
            cancel,
        ));

        Ok((bus, inbound_rx))
    }

    /// Ask the broker for a clean disconnect.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "MQTT disconnect request failed");
        }
    }
}

impl BusClient for MqttBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        // The request queue stops draining while the event loop backs off.
        let request = self
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec());
        match tokio::time::timeout(PUBLISH_TIMEOUT, request).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BusError::Publish {
                topic: topic.to_owned(),
                reason: e.to_string(),
            }),
            Err(_) => Err(BusError::Publish {
                topic: topic.to_owned(),
                reason: format!("request queue still full after {PUBLISH_TIMEOUT:?}"),
            }),
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        {
            let mut topics = self.topics.lock().await;
            if !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_owned());
            }
        }
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| BusError::Subscribe {
                topic: topic.to_owned(),
                reason: e.to_string(),
            })
    }
}

fn build_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive.max(MIN_KEEP_ALIVE));
    options.set_clean_session(true);
    if let Some(username) = &config.username {
        let password = config
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_owned())
            .unwrap_or_default();
        options.set_credentials(username, password);
    }
    options
}

// ── Background event loop ────────────────────────────────────────────

/// Poll → dispatch → on error, backoff → poll again (which reconnects).
async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    topics: Arc<Mutex<Vec<String>>>,
    inbound: mpsc::Sender<BusMessage>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;
    let mut connected_once = false;

    loop {
        let polled = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            polled = event_loop.poll() => polled,
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                failures = 0;
                tracing::info!(code = ?ack.code, "connected to message broker");
                if connected_once {
                    // Requests queue behind this loop, so `try_subscribe`
                    // is the only form that cannot deadlock here.
                    for topic in topics.lock().await.iter() {
                        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                            tracing::warn!(topic = %topic, error = %e, "resubscribe failed");
                        }
                    }
                }
                connected_once = true;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = BusMessage {
                    topic: publish.topic,
                    payload: Bytes::from(publish.payload.to_vec()),
                };
                if inbound.send(message).await.is_err() {
                    tracing::debug!("inbound consumer gone, stopping MQTT event loop");
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                let delay = calculate_backoff(failures, &reconnect);
                tracing::warn!(
                    error = %e,
                    attempt = failures,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "MQTT connection error, retrying"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                failures = failures.saturating_add(1);
            }
        }
    }

    tracing::debug!("MQTT event loop exiting");
}

/// `delay = min(initial * 2^attempt, max)`
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.min(16));
    config
        .initial_delay
        .saturating_mul(factor)
        .min(config.max_delay)
}

// ── Tests ────────────────────────────────────────────────────────────

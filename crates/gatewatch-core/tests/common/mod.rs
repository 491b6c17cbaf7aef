//! Scripted in-memory collaborators for lifecycle tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use gatewatch_api::{
    BusClient, BusError, DiscoveredDevice, DisconnectNotifier, MacAddress, Transport,
    TransportError,
};
use gatewatch_core::{Gate, GateMonitor, GateRegistry, MonitorConfig, SessionState};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const GATE1_ADDR: &str = "AA:BB:CC:DD:EE:FF";

pub fn mac(raw: &str) -> MacAddress {
    MacAddress::parse(raw).unwrap()
}

pub fn gate(name: &str, address: &str) -> Gate {
    Gate::new(name, address, format!("{name}/ir")).unwrap()
}

pub fn busy() -> TransportError {
    TransportError::StackBusy {
        reason: "org.bluez.Error.InProgress".into(),
    }
}

// ── Transport ────────────────────────────────────────────────────────

/// Transport-level operation, in the order the fake saw them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Discover,
    Connect(MacAddress),
    Disconnect(MacAddress),
}

#[derive(Debug, Clone)]
pub struct FakeHandle {
    pub address: MacAddress,
    pub generation: u64,
    id: u64,
}

struct Link {
    id: u64,
    connected: bool,
    notifier: DisconnectNotifier,
    notify_tx: Option<mpsc::Sender<Bytes>>,
}

#[derive(Default)]
struct State {
    visible: HashSet<MacAddress>,
    connect_script: HashMap<MacAddress, VecDeque<TransportError>>,
    always_fail: HashSet<MacAddress>,
    signal_on_subscribe: HashSet<MacAddress>,
    links: HashMap<MacAddress, Link>,
    next_id: u64,
    writes: Vec<(MacAddress, Uuid, Vec<u8>)>,
    connects: HashMap<MacAddress, u32>,
    connect_times: Vec<(MacAddress, Instant)>,
    ops: Vec<Op>,
    in_flight: u32,
    max_in_flight: u32,
}

/// Scripted radio. Connect and disconnect take `op_delay` so overlapping
/// calls would be visible in `max_in_flight`.
pub struct FakeTransport {
    state: Mutex<State>,
    op_delay: Duration,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            op_delay: Duration::from_millis(100),
        }
    }
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn show(&self, address: &str) {
        self.with(|s| s.visible.insert(mac(address)));
    }

    pub fn script_connect_errors(&self, address: &str, errors: Vec<TransportError>) {
        self.with(|s| s.connect_script.insert(mac(address), errors.into()));
    }

    pub fn fail_forever(&self, address: &str) {
        self.with(|s| s.always_fail.insert(mac(address)));
    }

    /// Deliver a sensor notification on the gate's live link.
    pub async fn notify(&self, address: &str, payload: &[u8]) {
        let tx = self.with(|s| {
            s.links
                .get(&mac(address))
                .and_then(|l| l.notify_tx.clone())
        });
        tx.expect("no subscribed link")
            .send(Bytes::copy_from_slice(payload))
            .await
            .unwrap();
    }

    /// The link drops: notifications stop and the disconnect token fires.
    pub fn drop_link(&self, address: &str) {
        let notifier = self.with(|s| {
            let link = s.links.get_mut(&mac(address)).expect("no link");
            link.connected = false;
            link.notify_tx = None;
            link.notifier.clone()
        });
        notifier.notify();
    }

    /// Only the notification stream ends; no token is raised.
    pub fn end_stream(&self, address: &str) {
        self.with(|s| {
            let link = s.links.get_mut(&mac(address)).expect("no link");
            link.connected = false;
            link.notify_tx = None;
        });
    }

    /// Raise the current link's token again without touching the link.
    pub fn signal_disconnect(&self, address: &str) {
        self.current_notifier(address).notify();
    }

    /// The next successful subscribe also raises that link's token, as if
    /// the link dropped while it was being armed.
    pub fn signal_during_next_subscribe(&self, address: &str) {
        self.with(|s| s.signal_on_subscribe.insert(mac(address)));
    }

    pub fn current_notifier(&self, address: &str) -> DisconnectNotifier {
        self.with(|s| s.links.get(&mac(address)).expect("no link").notifier.clone())
    }

    pub fn connect_count(&self, address: &str) -> u32 {
        self.with(|s| s.connects.get(&mac(address)).copied().unwrap_or(0))
    }

    pub fn connect_times(&self) -> Vec<(MacAddress, Instant)> {
        self.with(|s| s.connect_times.clone())
    }

    pub fn writes(&self, address: &str) -> Vec<(Uuid, Vec<u8>)> {
        let address = mac(address);
        self.with(|s| {
            s.writes
                .iter()
                .filter(|(a, _, _)| *a == address)
                .map(|(_, u, p)| (*u, p.clone()))
                .collect()
        })
    }

    pub fn ops(&self) -> Vec<Op> {
        self.with(|s| s.ops.clone())
    }

    pub fn max_in_flight(&self) -> u32 {
        self.with(|s| s.max_in_flight)
    }

    fn enter(&self, op: Op) {
        self.with(|s| {
            s.ops.push(op);
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
        });
    }

    fn leave(&self) {
        self.with(|s| s.in_flight -= 1);
    }
}

impl Transport for FakeTransport {
    type Handle = FakeHandle;

    async fn discover(&self, window: Duration) -> Result<Vec<DiscoveredDevice>, TransportError> {
        self.with(|s| s.ops.push(Op::Discover));
        tokio::time::sleep(window).await;
        Ok(self.with(|s| {
            s.visible
                .iter()
                .map(|address| DiscoveredDevice {
                    address: address.clone(),
                    name: Some("Thingy".into()),
                    rssi: Some(-60),
                })
                .collect()
        }))
    }

    async fn connect(
        &self,
        address: &MacAddress,
        _timeout: Duration,
        on_disconnect: DisconnectNotifier,
    ) -> Result<FakeHandle, TransportError> {
        self.enter(Op::Connect(address.clone()));
        tokio::time::sleep(self.op_delay).await;

        let result = self.with(|s| {
            *s.connects.entry(address.clone()).or_default() += 1;
            s.connect_times.push((address.clone(), Instant::now()));

            if s.always_fail.contains(address) {
                return Err(TransportError::ConnectFailed {
                    address: address.clone(),
                    reason: "le-connection-abort-by-local".into(),
                });
            }
            if let Some(err) = s
                .connect_script
                .get_mut(address)
                .and_then(VecDeque::pop_front)
            {
                return Err(err);
            }
            if !s.visible.contains(address) {
                return Err(TransportError::DeviceNotFound {
                    address: address.clone(),
                });
            }

            s.next_id += 1;
            let handle = FakeHandle {
                address: address.clone(),
                generation: on_disconnect.token().generation,
                id: s.next_id,
            };
            s.links.insert(
                address.clone(),
                Link {
                    id: handle.id,
                    connected: true,
                    notifier: on_disconnect,
                    notify_tx: None,
                },
            );
            Ok(handle)
        });

        self.leave();
        result
    }

    async fn disconnect(&self, handle: &FakeHandle) -> Result<(), TransportError> {
        self.enter(Op::Disconnect(handle.address.clone()));
        tokio::time::sleep(self.op_delay).await;
        self.with(|s| {
            if let Some(link) = s.links.get_mut(&handle.address) {
                if link.id == handle.id {
                    link.connected = false;
                    link.notify_tx = None;
                }
            }
        });
        self.leave();
        Ok(())
    }

    async fn subscribe(
        &self,
        handle: &FakeHandle,
        _characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Bytes>, TransportError> {
        let (rx, signal) = self.with(|s| {
            let signal = s.signal_on_subscribe.contains(&handle.address);
            match s.links.get_mut(&handle.address) {
                Some(link) if link.id == handle.id && link.connected => {
                    let (tx, rx) = mpsc::channel(16);
                    link.notify_tx = Some(tx);
                    let notifier = link.notifier.clone();
                    if signal {
                        s.signal_on_subscribe.remove(&handle.address);
                    }
                    Ok((rx, signal.then_some(notifier)))
                }
                _ => Err(TransportError::NotConnected),
            }
        })?;
        if let Some(notifier) = signal {
            notifier.notify();
        }
        Ok(rx)
    }

    async fn write(
        &self,
        handle: &FakeHandle,
        characteristic: Uuid,
        payload: &[u8],
        _ack_required: bool,
    ) -> Result<(), TransportError> {
        self.with(|s| {
            s.writes
                .push((handle.address.clone(), characteristic, payload.to_vec()));
            match s.links.get(&handle.address) {
                Some(link) if link.id == handle.id && link.connected => Ok(()),
                _ => Err(TransportError::NotConnected),
            }
        })
    }

    async fn is_connected(&self, handle: &FakeHandle) -> bool {
        self.with(|s| {
            s.links
                .get(&handle.address)
                .is_some_and(|l| l.id == handle.id && l.connected)
        })
    }
}

// ── Bus ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingBus {
    published: Mutex<Vec<(String, String)>>,
    subscriptions: Mutex<Vec<String>>,
}

impl RecordingBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }
}

impl BusClient for RecordingBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_owned(), payload.to_owned()));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        self.subscriptions.lock().unwrap().push(topic.to_owned());
        Ok(())
    }
}

// ── Harness ──────────────────────────────────────────────────────────

pub type TestMonitor = GateMonitor<FakeTransport, RecordingBus>;

pub fn monitor_with(
    config: MonitorConfig,
    transport: &Arc<FakeTransport>,
    bus: &Arc<RecordingBus>,
) -> TestMonitor {
    GateMonitor::new(
        config,
        Arc::clone(transport),
        Arc::clone(bus),
        Arc::new(GateRegistry::new()),
        CancellationToken::new(),
    )
}

pub fn monitor(transport: &Arc<FakeTransport>, bus: &Arc<RecordingBus>) -> TestMonitor {
    monitor_with(MonitorConfig::default(), transport, bus)
}

/// Let virtual time run until `cond` holds. Panics after five virtual minutes.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..3000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached");
}

/// Like [`eventually`], for the session state of `address`.
pub async fn wait_for_state(monitor: &TestMonitor, address: &str, want: SessionState) {
    let address = mac(address);
    for _ in 0..3000 {
        if monitor.session_state(&address).await == Some(want) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!(
        "session never reached {want:?}, last {:?}",
        monitor.session_state(&address).await
    );
}

/// Let every task run to quiescence for `secs` of virtual time.
pub async fn settle(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

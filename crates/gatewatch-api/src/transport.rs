// ── Wireless transport capability ──
//
// The session layer sees the radio only through this trait. Link loss is
// not a callback into session state: the transport pushes a token onto a
// channel the session task owns, tagged with the connection generation it
// was handed at connect time.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::address::MacAddress;
use crate::error::TransportError;

/// A device seen during one discovery window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: MacAddress,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Identifies the physical connection a disconnect refers to.
///
/// `generation` increases with every connect the session performs, so a
/// token raised by a link that has since been replaced is recognisably stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectToken {
    pub address: MacAddress,
    pub generation: u64,
}

/// Sending half of a session's disconnect channel, bound to one connection.
///
/// Transports call [`notify`](Self::notify) from whatever context observes
/// the link drop. It never blocks and may be called any number of times.
#[derive(Clone)]
pub struct DisconnectNotifier {
    token: DisconnectToken,
    tx: mpsc::UnboundedSender<DisconnectToken>,
}

impl DisconnectNotifier {
    pub fn new(
        address: MacAddress,
        generation: u64,
        tx: mpsc::UnboundedSender<DisconnectToken>,
    ) -> Self {
        Self {
            token: DisconnectToken {
                address,
                generation,
            },
            tx,
        }
    }

    /// Signal that the link dropped. Returns `false` once the session is gone.
    pub fn notify(&self) -> bool {
        self.tx.send(self.token.clone()).is_ok()
    }

    pub fn token(&self) -> &DisconnectToken {
        &self.token
    }
}

impl fmt::Debug for DisconnectNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisconnectNotifier")
            .field("address", &self.token.address)
            .field("generation", &self.token.generation)
            .finish_non_exhaustive()
    }
}

/// Wireless discovery / connect / notify primitives.
///
/// Implementations must be safe to call from many sessions at once; the
/// caller serializes `connect` and `disconnect` through its own radio lock.
pub trait Transport: Send + Sync + 'static {
    /// Live connection to one device.
    type Handle: Clone + Send + Sync + fmt::Debug + 'static;

    /// Scan for `window` and return everything seen.
    fn discover(
        &self,
        window: Duration,
    ) -> impl Future<Output = Result<Vec<DiscoveredDevice>, TransportError>> + Send;

    /// Connect to `address`, giving up after `timeout`.
    ///
    /// The transport keeps `on_disconnect` for the lifetime of the handle and
    /// notifies it when the link drops for any reason other than
    /// [`disconnect`](Self::disconnect).
    fn connect(
        &self,
        address: &MacAddress,
        timeout: Duration,
        on_disconnect: DisconnectNotifier,
    ) -> impl Future<Output = Result<Self::Handle, TransportError>> + Send;

    fn disconnect(
        &self,
        handle: &Self::Handle,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Enable notifications on `characteristic`; payloads arrive on the
    /// returned receiver until the link drops.
    fn subscribe(
        &self,
        handle: &Self::Handle,
        characteristic: Uuid,
    ) -> impl Future<Output = Result<mpsc::Receiver<Bytes>, TransportError>> + Send;

    fn write(
        &self,
        handle: &Self::Handle,
        characteristic: Uuid,
        payload: &[u8],
        ack_required: bool,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn is_connected(&self, handle: &Self::Handle) -> impl Future<Output = bool> + Send;
}

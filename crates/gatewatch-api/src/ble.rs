// ── BLE transport adapter ──
//
// `btleplug` central. Link loss is observed on the adapter event stream
// (one watcher task per connection, alive until `disconnect`) and forwarded
// to the session through its `DisconnectNotifier`. Every drop also bumps a
// counter that ends the notification streams opened before it.

use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::address::MacAddress;
use crate::error::TransportError;
use crate::transport::{DiscoveredDevice, DisconnectNotifier, Transport};

const NOTIFICATION_CHANNEL_CAPACITY: usize = 32;

/// Live connection to one peripheral.
///
/// Dropping the last clone does not disconnect; call
/// [`Transport::disconnect`], which also stops the disconnect watcher.
#[derive(Clone, Debug)]
pub struct BleHandle {
    peripheral: Peripheral,
    address: MacAddress,
    watcher: CancellationToken,
    /// Number of link drops seen so far.
    drops: watch::Receiver<u64>,
}

impl BleHandle {
    pub fn address(&self) -> &MacAddress {
        &self.address
    }
}

/// [`Transport`] over the host's first Bluetooth adapter.
#[derive(Clone)]
pub struct BleTransport {
    adapter: Adapter,
}

impl BleTransport {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await.map_err(map_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(map_error)?
            .into_iter()
            .next()
            .ok_or(TransportError::AdapterUnavailable)?;
        Ok(Self { adapter })
    }

    async fn find_peripheral(&self, address: &MacAddress) -> Result<Peripheral, TransportError> {
        let peripherals = self.adapter.peripherals().await.map_err(map_error)?;
        peripherals
            .into_iter()
            .find(|p| address.matches(&p.address().to_string()))
            .ok_or_else(|| TransportError::DeviceNotFound {
                address: address.clone(),
            })
    }

    /// Watch for drops of `peripheral` until `stop` fires. Keeps running
    /// after a drop so a link that comes back and is re-armed is still
    /// covered.
    fn spawn_disconnect_watcher(
        &self,
        peripheral: &Peripheral,
        notifier: DisconnectNotifier,
        stop: CancellationToken,
    ) -> watch::Receiver<u64> {
        let (drops_tx, drops_rx) = watch::channel(0);
        let adapter = self.adapter.clone();
        let id = peripheral.id();
        tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot watch adapter events");
                    // Closing `drops_tx` early would end the notification streams.
                    stop.cancelled().await;
                    return;
                }
            };
            loop {
                let event = tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    event = events.next() => event,
                };
                match event {
                    Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                        tracing::debug!(
                            address = %notifier.token().address,
                            generation = notifier.token().generation,
                            "link dropped"
                        );
                        drops_tx.send_modify(|n| *n += 1);
                        if !notifier.notify() {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        });
    }
}

impl Transport for BleTransport {
    type Handle = BleHandle;

    async fn discover(&self, window: Duration) -> Result<Vec<DiscoveredDevice>, TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(map_error)?;
        tokio::time::sleep(window).await;
        if let Err(e) = self.adapter.stop_scan().await {
            tracing::debug!(error = %e, "stop_scan failed");
        }

        let mut found = Vec::new();
        for peripheral in self.adapter.peripherals().await.map_err(map_error)? {
            let Ok(address) = MacAddress::parse(peripheral.address().to_string()) else {
                continue;
            };
            let properties = peripheral.properties().await.ok().flatten();
            found.push(DiscoveredDevice {
                address,
                name: properties.as_ref().and_then(|p| p.local_name.clone()),
                rssi: properties.and_then(|p| p.rssi),
            });
        }
        Ok(found)
    }

    async fn connect(
        &self,
        address: &MacAddress,
        timeout: Duration,
        on_disconnect: DisconnectNotifier,
    ) -> Result<BleHandle, TransportError> {
        let peripheral = self.find_peripheral(address).await?;

        let connect = async {
            peripheral.connect().await.map_err(map_error)?;
            peripheral.discover_services().await.map_err(map_error)
        };
        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(())) => {}
            Ok(Err(TransportError::Io { reason })) => {
                return Err(TransportError::ConnectFailed {
                    address: address.clone(),
                    reason,
                });
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(TransportError::Timeout { after: timeout }),
        }

        let watcher = CancellationToken::new();
        let drops = self.spawn_disconnect_watcher(&peripheral, on_disconnect, watcher.clone());

        Ok(BleHandle {
            peripheral,
            address: address.clone(),
            watcher,
            drops,
        })
    }

    async fn disconnect(&self, handle: &BleHandle) -> Result<(), TransportError> {
        handle.watcher.cancel();
        handle.peripheral.disconnect().await.map_err(map_error)
    }

    async fn subscribe(
        &self,
        handle: &BleHandle,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Bytes>, TransportError> {
        let target = find_characteristic(&handle.peripheral, characteristic)?;
        handle
            .peripheral
            .subscribe(&target)
            .await
            .map_err(map_error)?;
        let stream = handle.peripheral.notifications().await.map_err(map_error)?;

        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        tokio::spawn(forward_notifications(
            stream,
            characteristic,
            tx,
            handle.drops.clone(),
        ));
        Ok(rx)
    }

    async fn write(
        &self,
        handle: &BleHandle,
        characteristic: Uuid,
        payload: &[u8],
        ack_required: bool,
    ) -> Result<(), TransportError> {
        let target = find_characteristic(&handle.peripheral, characteristic)?;
        let write_type = if ack_required {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        handle
            .peripheral
            .write(&target, payload, write_type)
            .await
            .map_err(map_error)
    }

    async fn is_connected(&self, handle: &BleHandle) -> bool {
        handle.peripheral.is_connected().await.unwrap_or(false)
    }
}

/// Forward `characteristic` payloads until the link drops, the handle is
/// disconnected or the receiver goes away. Returning closes `tx`, which is
/// how the session sees the end of the link.
async fn forward_notifications(
    mut stream: impl Stream<Item = ValueNotification> + Unpin,
    characteristic: Uuid,
    tx: mpsc::Sender<Bytes>,
    mut drops: watch::Receiver<u64>,
) {
    drops.mark_unchanged();
    loop {
        let next = tokio::select! {
            biased;
            // A new drop, or the watcher stopped.
            _ = drops.changed() => break,
            next = stream.next() => next,
        };
        let Some(notification) = next else { break };
        if notification.uuid != characteristic {
            continue;
        }
        if tx.send(Bytes::from(notification.value)).await.is_err() {
            break;
        }
    }
}

fn find_characteristic(
    peripheral: &Peripheral,
    uuid: Uuid,
) -> Result<Characteristic, TransportError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or(TransportError::CharacteristicNotFound { uuid })
}

#[allow(clippy::needless_pass_by_value)]
fn map_error(error: btleplug::Error) -> TransportError {
    match error {
        btleplug::Error::NotConnected => TransportError::NotConnected,
        btleplug::Error::TimedOut(after) => TransportError::Timeout { after },
        btleplug::Error::DeviceNotFound => TransportError::Io {
            reason: "device not found".into(),
        },
        other => TransportError::from_platform_message(other.to_string()),
    }
}

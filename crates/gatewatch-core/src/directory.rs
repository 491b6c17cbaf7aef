// ── Device directory ──
//
// Append-only registry of gates, keyed by normalized address and kept in
// insertion order. The per-gate reconnect locks live in the same table so
// that registration and lock creation never race.

use std::collections::HashMap;
use std::sync::Arc;

use gatewatch_api::MacAddress;
use indexmap::IndexMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::control::{ControlAck, ControlMessage};
use crate::model::Gate;

/// Result of registering one gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Added(Gate),
    /// A gate with the same address is already registered; this is it.
    AlreadyExists(Gate),
}

#[derive(Default)]
struct Tables {
    gates: IndexMap<MacAddress, Gate>,
    reconnect_locks: HashMap<MacAddress, Arc<Mutex<()>>>,
}

/// The device directory. Cheaply shareable behind an `Arc`.
#[derive(Default)]
pub struct GateRegistry {
    tables: Mutex<Tables>,
}

impl GateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gate unless its address is already known.
    pub async fn register(&self, gate: Gate) -> Registration {
        let mut tables = self.tables.lock().await;
        register_locked(&mut tables, gate)
    }

    /// Validate a raw control-plane payload and register its gates.
    ///
    /// Malformed payloads leave the directory untouched.
    pub async fn apply_control_message(&self, payload: &[u8]) -> ControlAck {
        let gates = match ControlMessage::parse(payload) {
            ControlMessage::Invalid(reason) => return ControlAck::Rejected { reason },
            message => message.into_gates(),
        };

        let mut tables = self.tables.lock().await;
        let mut added = Vec::new();
        let mut duplicates = Vec::new();
        for gate in gates {
            match register_locked(&mut tables, gate) {
                Registration::Added(gate) => added.push(gate),
                Registration::AlreadyExists(gate) => duplicates.push(gate),
            }
        }
        ControlAck::Accepted { added, duplicates }
    }

    pub async fn len(&self) -> usize {
        self.tables.lock().await.gates.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.lock().await.gates.is_empty()
    }

    pub async fn get(&self, address: &MacAddress) -> Option<Gate> {
        self.tables.lock().await.gates.get(address).cloned()
    }

    /// All gates in registration order.
    pub async fn snapshot(&self) -> Vec<Gate> {
        self.tables.lock().await.gates.values().cloned().collect()
    }

    /// The reconnect lock for `address`, created on first use.
    pub async fn reconnect_lock(&self, address: &MacAddress) -> Arc<Mutex<()>> {
        let mut tables = self.tables.lock().await;
        Arc::clone(
            tables
                .reconnect_locks
                .entry(address.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Whether a reconnect lock exists for `address` yet.
    pub async fn has_reconnect_lock(&self, address: &MacAddress) -> bool {
        self.tables.lock().await.reconnect_locks.contains_key(address)
    }

    /// Acquire the reconnect lock for `address`.
    pub async fn lock_reconnect(&self, address: &MacAddress) -> OwnedMutexGuard<()> {
        self.reconnect_lock(address).await.lock_owned().await
    }
}

fn register_locked(tables: &mut Tables, gate: Gate) -> Registration {
    if let Some(existing) = tables.gates.get(gate.address()) {
        tracing::info!(
            gate = %gate.name(),
            address = %gate.address(),
            existing = %existing.name(),
            "gate already registered"
        );
        return Registration::AlreadyExists(existing.clone());
    }
    tracing::info!(gate = %gate.name(), address = %gate.address(), topic = %gate.topic(), "gate registered");
    tables.gates.insert(gate.address().clone(), gate.clone());
    Registration::Added(gate)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn gate(name: &str, address: &str) -> Gate {
        Gate::new(name, address, format!("{name}/ir")).unwrap()
    }

    #[tokio::test]
    async fn register_is_case_insensitive() {
        let registry = GateRegistry::new();
        let first = gate("gate1", "AA:BB:CC:DD:EE:FF");

        assert_eq!(
            registry.register(first.clone()).await,
            Registration::Added(first.clone())
        );
        assert_eq!(
            registry.register(gate("other", "aa:bb:cc:dd:ee:ff")).await,
            Registration::AlreadyExists(first)
        );
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn snapshot_preserves_insertion_order() {
        let registry = GateRegistry::new();
        for (name, addr) in [
            ("c", "AA:BB:CC:DD:EE:03"),
            ("a", "AA:BB:CC:DD:EE:01"),
            ("b", "AA:BB:CC:DD:EE:02"),
        ] {
            registry.register(gate(name, addr)).await;
        }
        let names: Vec<_> = registry
            .snapshot()
            .await
            .iter()
            .map(|g| g.name().to_owned())
            .collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[tokio::test]
    async fn control_message_reports_added_and_duplicates() {
        let registry = GateRegistry::new();
        registry.register(gate("g1", "AA:BB:CC:DD:EE:01")).await;

        let ack = registry
            .apply_control_message(
                br#"[{"name":"g1","address":"aa:bb:cc:dd:ee:01","topic":"g1/ir"},
                     {"name":"g2","address":"AA:BB:CC:DD:EE:02","topic":"g2/ir"}]"#,
            )
            .await;

        let ControlAck::Accepted { added, duplicates } = ack else {
            panic!("expected accepted");
        };
        assert_eq!(added, vec![gate("g2", "AA:BB:CC:DD:EE:02")]);
        assert_eq!(duplicates, vec![gate("g1", "AA:BB:CC:DD:EE:01")]);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn repeated_address_within_one_message_registers_once() {
        let registry = GateRegistry::new();
        let ack = registry
            .apply_control_message(
                br#"[{"name":"a","address":"AA:BB:CC:DD:EE:01","topic":"a/ir"},
                     {"name":"b","address":"aa-bb-cc-dd-ee-01","topic":"b/ir"}]"#,
            )
            .await;
        assert_eq!(ack.added().len(), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn malformed_message_leaves_directory_untouched() {
        let registry = GateRegistry::new();
        registry.register(gate("g1", "AA:BB:CC:DD:EE:01")).await;

        let payloads: [&[u8]; 5] = [
            b"not json",
            br#"{"name":"x"}"#,
            br#"[{"name":"ok","address":"AA:BB:CC:DD:EE:09","topic":"ok/ir"}, 7]"#,
            br#"{"name":"","address":"AA:BB:CC:DD:EE:09","topic":"t"}"#,
            b"\"AA:BB:CC:DD:EE:09\"",
        ];
        for payload in payloads {
            let ack = registry.apply_control_message(payload).await;
            assert!(matches!(ack, ControlAck::Rejected { .. }), "{ack:?}");
        }

        assert_eq!(registry.snapshot().await, vec![gate("g1", "AA:BB:CC:DD:EE:01")]);
    }

    #[tokio::test]
    async fn reconnect_lock_is_shared_per_address() {
        let registry = GateRegistry::new();
        let a = MacAddress::parse("AA:BB:CC:DD:EE:01").unwrap();
        let b = MacAddress::parse("AA:BB:CC:DD:EE:02").unwrap();

        let lock_a1 = registry.reconnect_lock(&a).await;
        let lock_a2 = registry.reconnect_lock(&a).await;
        let lock_b = registry.reconnect_lock(&b).await;

        assert!(Arc::ptr_eq(&lock_a1, &lock_a2));
        assert!(!Arc::ptr_eq(&lock_a1, &lock_b));

        let _held = registry.lock_reconnect(&a).await;
        assert!(lock_a2.try_lock().is_err());
        assert!(lock_b.try_lock().is_ok());
    }
}

use tokio_util::sync::CancellationToken;

use crate::cli::GlobalOpts;
use crate::error::CliError;

#[cfg(not(feature = "ble"))]
#[allow(clippy::unused_async)]
pub async fn handle(global: &GlobalOpts, _shutdown: &CancellationToken) -> Result<(), CliError> {
    // Still validate so a misconfiguration is reported before the build
    // limitation.
    let config = crate::commands::load_config(global)?;
    config
        .resolve()
        .map_err(|e| CliError::config(crate::commands::config_display_path(global), e))?;
    Err(CliError::BleUnavailable {
        command: "run".into(),
    })
}

#[cfg(feature = "ble")]
pub async fn handle(global: &GlobalOpts, shutdown: &CancellationToken) -> Result<(), CliError> {
    use std::sync::Arc;
    use std::time::Duration;

    use gatewatch_api::{BleTransport, MqttBus};
    use gatewatch_core::{GateMonitor, GateRegistry};

    use crate::commands::{config_display_path, load_config};

    // Lets the final DISCONNECT leave before the bus event loop stops.
    const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

    let resolved = load_config(global)?
        .resolve()
        .map_err(|e| CliError::config(config_display_path(global), e))?;

    tracing::info!(
        broker = %format!("{}:{}", resolved.mqtt.host, resolved.mqtt.port),
        gates = resolved.gates.len(),
        "starting bridge"
    );

    // The bus outlives the monitor so sessions can publish until the end.
    let bus_cancel = CancellationToken::new();
    let Some(connected) = shutdown
        .run_until_cancelled(MqttBus::connect(&resolved.mqtt, bus_cancel.clone()))
        .await
    else {
        tracing::info!("interrupted while waiting for the broker");
        return Ok(());
    };
    let (bus, inbound) = connected?;

    let transport = match BleTransport::new().await {
        Ok(transport) => transport,
        Err(e) => {
            bus_cancel.cancel();
            return Err(e.into());
        }
    };

    let monitor = GateMonitor::new(
        resolved.monitor,
        Arc::new(transport),
        Arc::new(bus.clone()),
        Arc::new(GateRegistry::new()),
        shutdown.child_token(),
    );

    let outcome = match monitor.start(resolved.gates).await {
        Ok(()) => monitor.run(inbound).await,
        Err(e) => Err(e),
    };

    monitor.shutdown().await;
    bus.disconnect().await;
    tokio::time::sleep(DISCONNECT_GRACE).await;
    bus_cancel.cancel();

    tracing::info!("bridge stopped");
    outcome.map_err(CliError::from)
}

use tokio_util::sync::CancellationToken;

use crate::cli::{GlobalOpts, ScanArgs};
use crate::error::CliError;

#[cfg(not(feature = "ble"))]
#[allow(clippy::unused_async)]
pub async fn handle(
    _args: &ScanArgs,
    _global: &GlobalOpts,
    _shutdown: &CancellationToken,
) -> Result<(), CliError> {
    Err(CliError::BleUnavailable {
        command: "scan".into(),
    })
}

#[cfg(feature = "ble")]
pub async fn handle(
    args: &ScanArgs,
    global: &GlobalOpts,
    shutdown: &CancellationToken,
) -> Result<(), CliError> {
    use std::cmp::Reverse;
    use std::time::Duration;

    use gatewatch_api::{BleTransport, Transport};

    use crate::commands::{config_display_path, load_config};

    let gates = load_config(global)?
        .static_gates()
        .map_err(|e| CliError::config(config_display_path(global), e))?;

    let transport = BleTransport::new().await?;
    let window = Duration::from_secs(args.window);
    tracing::info!(?window, "scanning");

    let Some(found) = shutdown
        .run_until_cancelled(transport.discover(window))
        .await
    else {
        return Ok(());
    };
    let mut found = found?;
    found.sort_by_key(|device| Reverse(device.rssi));

    println!("{:<17}  {:>5}  {:<12}  NAME", "ADDRESS", "RSSI", "GATE");
    for device in &found {
        let gate = gates
            .iter()
            .find(|g| g.address() == &device.address)
            .map_or("-", |g| g.name());
        let rssi = device
            .rssi
            .map_or_else(|| "?".to_owned(), |r| r.to_string());
        println!(
            "{:<17}  {rssi:>5}  {gate:<12}  {}",
            device.address.as_str(),
            device.name.as_deref().unwrap_or("")
        );
    }
    println!("\n{} device(s) seen", found.len());
    Ok(())
}

//! Process-wide telemetry setup from a [`ZephyrConfig`].

use tracing::info;
use zephyr_config::ZephyrConfig;
use zephyr_telemetry::{init_logging, init_metrics, TelemetryResult};

/// Installs the logging subscriber and the metrics recorder described by
/// the `[telemetry]` section. Disabled subsystems are skipped.
///
/// # Errors
///
/// Fails if either subsystem was already installed or its settings are
/// invalid. Logging is installed first; a metrics failure leaves it in
/// place.
pub fn init_telemetry(config: &ZephyrConfig) -> TelemetryResult<()> {
    let telemetry = &config.telemetry;
    init_logging(&telemetry.logging.to_log_config())?;
    init_metrics(&telemetry.metrics.to_metrics_config())?;

    info!(
        service = %telemetry.service_name,
        logging = telemetry.logging.enabled,
        metrics = telemetry.metrics.enabled,
        api_dir = %config.server.api_dir.display(),
        "telemetry initialized"
    );
    Ok(())
}

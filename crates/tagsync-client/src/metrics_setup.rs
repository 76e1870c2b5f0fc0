//! Metrics recorder setup.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::error::Result;

/// Buckets para los histogramas de latencia (en segundos).
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, // 100 microsegundos
    0.0005, // 500 microsegundos
    0.001,  // 1 milisegundo
    0.005,  // 5 milisegundos
    0.01,   // 10 milisegundos
    0.05,   // 50 milisegundos
    0.1,    // 100 milisegundos
    0.5,    // 500 milisegundos
    1.0,    // 1 segundo
    5.0,    // 5 segundos
    30.0,   // timeout por defecto
];

/// Instala el recorder de Prometheus y describe las metricas del cache.
///
/// Solo puede llamarse una vez por proceso.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets(LATENCY_BUCKETS)?
        .install_recorder()?;

    tagsync_cache::describe_cache_metrics();
    metrics::describe_counter!(
        "tagsync_monitor_updates_total",
        "Total number of tag updates seen by the monitor listener"
    );

    info!("Metrics system initialized");
    Ok(handle)
}

//! Structured logging for the job runner.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging
///
/// Log levels come from `RUST_LOG` (default `info,sqlx=warn`). Records the
/// library emits through the `log` facade are forwarded to the same output.
///
/// # Example
///
/// ```no_run
/// logging::init();
/// tracing::info!("Job runner starting");
/// ```
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Log the outcome of a scheduled job
///
/// # Arguments
///
/// * `job` - Job name, e.g. `reset-weekly`
/// * `affected` - Rows or entries the job touched
/// * `duration_ms` - Wall time in milliseconds
pub fn log_job_event(job: &str, affected: u64, duration_ms: u64) {
    tracing::info!(
        job = job,
        affected = affected,
        duration_ms = duration_ms,
        "Job completed"
    );
}

/// Log database operation
///
/// # Arguments
///
/// * `operation` - What was run against the database
/// * `table` - Table name
/// * `duration_ms` - Duration in milliseconds
pub fn log_database_operation(operation: &str, table: &str, duration_ms: u64) {
    tracing::debug!(
        operation = operation,
        table = table,
        duration_ms = duration_ms,
        "Database operation"
    );

    if duration_ms > 1000 {
        tracing::warn!(
            operation = operation,
            table = table,
            duration_ms = duration_ms,
            "Slow database operation detected"
        );
    }
}

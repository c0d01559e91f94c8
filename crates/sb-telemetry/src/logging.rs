use sb_core::config::{GeneralConfig, LogFormat};
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events the configured level applies to. Everything else
/// (octocrab, hyper, ...) stays at `warn`.
const WORKSPACE_TARGETS: &[&str] = &["sb_core", "sb_github", "sb_orchestrator", "sb_telemetry"];

/// Filter directive for `level` scoped to the workspace crates.
///
/// A `level` that already contains directives (`sb_github=trace,info`) is
/// passed through untouched.
pub fn scoped_directive(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    let mut directive = String::from("warn");
    for target in WORKSPACE_TARGETS {
        directive.push_str(&format!(",{target}={level}"));
    }
    directive
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(scoped_directive(default_level)))
}

/// Human-readable output. `RUST_LOG` wins over `default_level`.
///
/// Later calls are no-ops, so tests may call this freely.
pub fn init_logging(service_name: &str, default_level: &str) {
    fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised (human-readable)");
}

/// JSON lines output, one object per event.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    fmt()
        .json()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_current_span(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised (json)");
}

/// Install the subscriber described by the `[general]` config section.
pub fn init_from_config(general: &GeneralConfig) {
    match general.log_format {
        LogFormat::Human => init_logging(&general.project_name, &general.log_level),
        LogFormat::Json => init_logging_json(&general.project_name, &general.log_level),
    }
}

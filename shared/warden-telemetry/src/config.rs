//! Telemetry Configuration

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// Level or full `EnvFilter` directive, e.g. `info,lapin=warn`.
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "user-service".to_string(),
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>, log_level: impl Into<String>, json_logs: bool) -> Self {
        Self {
            service_name: service_name.into(),
            log_level: log_level.into(),
            json_logs,
        }
    }
}

//! Configuration management.

use serde::Deserialize;

/// Main configuration for the access subsystem.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Authorization configuration
    #[serde(default)]
    pub authz: AuthzConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Audit pipeline configuration
    #[serde(default)]
    pub audit: AuditConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthzConfig {
    /// Global roles whose holders bypass resource-scoped checks.
    #[serde(default = "default_elevated_roles")]
    pub elevated_roles: Vec<String>,

    /// The global permission required to assess a fully verified resource.
    #[serde(default = "default_assess_permission")]
    pub assess_permission: String,

    /// Include required/held permission lists in denial response bodies.
    #[serde(default)]
    pub expose_denial_details: bool,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            elevated_roles: default_elevated_roles(),
            assess_permission: default_assess_permission(),
            expose_denial_details: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Buffered event capacity before new events are dropped.
    #[serde(default = "default_audit_buffer")]
    pub buffer: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            buffer: default_audit_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

// Default value functions
fn default_elevated_roles() -> Vec<String> {
    vec!["super_admin".to_string(), "admin".to_string()]
}
fn default_assess_permission() -> String { "assessment.perform".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_audit_buffer() -> usize { 1024 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("LOGBOOK").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("LOGBOOK").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let authz = AuthzConfig::default();
        assert_eq!(authz.elevated_roles, vec!["super_admin", "admin"]);
        assert_eq!(authz.assess_permission, "assessment.perform");
        assert!(!authz.expose_denial_details);
    }

    #[test]
    fn test_deserialize_minimal() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "database": { "url": "postgres://localhost/logbook" }
        }))
        .unwrap();
        assert_eq!(cfg.database.max_connections, 20);
        assert_eq!(cfg.audit.buffer, 1024);
        assert_eq!(cfg.observability.log_level, "info");
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub store: Store,
    #[serde(default)]
    pub sla: Sla,
    #[serde(default)]
    pub escalation: Escalation,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub health: Health,
    #[serde(default)]
    pub calibration: Calibration,
    #[serde(default)]
    pub collaborators: Collaborators,
    pub audit: Audit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "type")]
    pub kind: String,
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlaTarget {
    pub first_response_minutes: i64,
    pub resolution_minutes: i64,
}

/// Priority → deadline table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sla {
    #[serde(default = "default_sla_urgent")]
    pub urgent: SlaTarget,
    #[serde(default = "default_sla_high")]
    pub high: SlaTarget,
    #[serde(default = "default_sla_medium")]
    pub medium: SlaTarget,
    #[serde(default = "default_sla_low")]
    pub low: SlaTarget,
}

impl Default for Sla {
    fn default() -> Self {
        Self {
            urgent: default_sla_urgent(),
            high: default_sla_high(),
            medium: default_sla_medium(),
            low: default_sla_low(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    #[serde(default = "default_confidence_threshold")]
    pub default_confidence_threshold: f64,
    #[serde(default = "default_frustration_min_prior_messages")]
    pub frustration_min_prior_messages: usize,
}

impl Default for Escalation {
    fn default() -> Self {
        Self {
            default_confidence_threshold: default_confidence_threshold(),
            frustration_min_prior_messages: default_frustration_min_prior_messages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lifecycle {
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    #[serde(default = "default_follow_up_after_hours")]
    pub follow_up_after_hours: i64,
    #[serde(default = "default_auto_close_after_hours")]
    pub auto_close_after_hours: i64,
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
    #[serde(default = "default_stalled_after_hours")]
    pub stalled_after_hours: i64,
    #[serde(default = "default_revival_cooldown_days")]
    pub revival_cooldown_days: i64,
    #[serde(default = "default_check_in_after_days")]
    pub check_in_after_days: i64,
    #[serde(default = "default_true")]
    pub email_follow_ups: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            follow_up_after_hours: default_follow_up_after_hours(),
            auto_close_after_hours: default_auto_close_after_hours(),
            generation_timeout_ms: default_generation_timeout_ms(),
            stalled_after_hours: default_stalled_after_hours(),
            revival_cooldown_days: default_revival_cooldown_days(),
            check_in_after_days: default_check_in_after_days(),
            email_follow_ups: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    #[serde(default = "default_health_window_days")]
    pub window_days: i64,
    #[serde(default = "default_alert_cooldown_days")]
    pub alert_cooldown_days: i64,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            window_days: default_health_window_days(),
            alert_cooldown_days: default_alert_cooldown_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calibration {
    #[serde(default = "default_calibration_window_days")]
    pub window_days: i64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            window_days: default_calibration_window_days(),
            min_samples: default_min_samples(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Collaborators {
    #[serde(default)]
    pub language_model: LanguageModel,
    #[serde(default)]
    pub emailer: Emailer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageModel {
    #[serde(default = "default_language_model_mode")]
    pub mode: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for LanguageModel {
    fn default() -> Self {
        Self {
            mode: default_language_model_mode(),
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emailer {
    #[serde(default = "default_emailer_mode")]
    pub mode: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default = "default_email_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for Emailer {
    fn default() -> Self {
        Self {
            mode: default_emailer_mode(),
            endpoint: None,
            from_address: default_from_address(),
            timeout_ms: default_email_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub jsonl_path: String,
}

fn default_sla_urgent() -> SlaTarget {
    SlaTarget {
        first_response_minutes: 60,
        resolution_minutes: 4 * 60,
    }
}

fn default_sla_high() -> SlaTarget {
    SlaTarget {
        first_response_minutes: 4 * 60,
        resolution_minutes: 24 * 60,
    }
}

fn default_sla_medium() -> SlaTarget {
    SlaTarget {
        first_response_minutes: 8 * 60,
        resolution_minutes: 48 * 60,
    }
}

fn default_sla_low() -> SlaTarget {
    SlaTarget {
        first_response_minutes: 24 * 60,
        resolution_minutes: 72 * 60,
    }
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_frustration_min_prior_messages() -> usize {
    3
}

fn default_batch_limit() -> usize {
    100
}

fn default_follow_up_after_hours() -> i64 {
    48
}

fn default_auto_close_after_hours() -> i64 {
    7 * 24
}

fn default_generation_timeout_ms() -> u64 {
    5_000
}

fn default_stalled_after_hours() -> i64 {
    24
}

fn default_revival_cooldown_days() -> i64 {
    3
}

fn default_check_in_after_days() -> i64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_health_window_days() -> i64 {
    90
}

fn default_alert_cooldown_days() -> i64 {
    7
}

fn default_calibration_window_days() -> i64 {
    30
}

fn default_min_samples() -> usize {
    5
}

fn default_language_model_mode() -> String {
    "static".to_string()
}

fn default_emailer_mode() -> String {
    "log".to_string()
}

fn default_from_address() -> String {
    "support@localhost".to_string()
}

fn default_email_timeout_ms() -> u64 {
    10_000
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

/// Checks that survive schema validation but are not expressible in it,
/// plus everything a struct-literal config built in code must also satisfy.
pub fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.store.kind != "memory" && cfg.store.kind != "sqlite" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.type={} is not implemented; supported: memory, sqlite",
            cfg.store.kind
        )));
    }
    if cfg.store.kind == "memory" && cfg.store.sqlite_path.is_some() {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is not supported when store.type=memory".to_string(),
        ));
    }
    if cfg.store.kind == "sqlite"
        && cfg
            .store
            .sqlite_path
            .as_ref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is required when store.type=sqlite".to_string(),
        ));
    }
    for (name, target) in [
        ("urgent", cfg.sla.urgent),
        ("high", cfg.sla.high),
        ("medium", cfg.sla.medium),
        ("low", cfg.sla.low),
    ] {
        if target.first_response_minutes <= 0 || target.resolution_minutes <= 0 {
            return Err(ConfigError::UnsupportedConfig(format!(
                "sla.{name} minutes must be >= 1"
            )));
        }
    }
    if !(0.0..=1.0).contains(&cfg.escalation.default_confidence_threshold) {
        return Err(ConfigError::UnsupportedConfig(
            "escalation.default_confidence_threshold must be within [0, 1]".to_string(),
        ));
    }
    if cfg.lifecycle.batch_limit == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "lifecycle.batch_limit must be >= 1".to_string(),
        ));
    }
    if cfg.lifecycle.generation_timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "lifecycle.generation_timeout_ms must be >= 1".to_string(),
        ));
    }
    if cfg.calibration.min_samples == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "calibration.min_samples must be >= 1".to_string(),
        ));
    }
    match cfg.collaborators.language_model.mode.as_str() {
        "static" => {}
        "http" => require_endpoint(
            "collaborators.language_model.endpoint",
            &cfg.collaborators.language_model.endpoint,
        )?,
        other => {
            return Err(ConfigError::UnsupportedConfig(format!(
                "collaborators.language_model.mode={other} is not implemented; supported: static, http"
            )))
        }
    }
    match cfg.collaborators.emailer.mode.as_str() {
        "log" => {}
        "http" => require_endpoint(
            "collaborators.emailer.endpoint",
            &cfg.collaborators.emailer.endpoint,
        )?,
        other => {
            return Err(ConfigError::UnsupportedConfig(format!(
                "collaborators.emailer.mode={other} is not implemented; supported: log, http"
            )))
        }
    }
    Ok(())
}

fn require_endpoint(field: &str, endpoint: &Option<String>) -> Result<(), ConfigError> {
    if endpoint
        .as_ref()
        .map(|v| v.trim().is_empty())
        .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(format!(
            "{field} is required when mode=http"
        )));
    }
    Ok(())
}

//! Shroud Configuration
//!
//! Shared configuration crate for all Shroud components.
//!
//! Handles loading configuration from:
//! 1. SHROUD_CONFIG env var (explicit path)
//! 2. ./shroud.toml (current directory)
//! 3. ~/.shroud/shroud.toml (user home)
//!
//! Environment variables take precedence over TOML config. There is no
//! process-wide instance: load once at startup and hand each component the
//! section it needs.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs};

const CONFIG_FILE_NAME: &str = "shroud.toml";
const CONFIG_DIR_NAME: &str = ".shroud";

// ============================================================================
// Default Constants
// ============================================================================

const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_CHAIN_TYPE: &str = "solana";
const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_TOKEN_REFRESH_MARGIN_SECS: u64 = 60;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_CONFIRMATION_ATTEMPTS: u32 = 30;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 500;
const DEFAULT_RETRY_MAX_MS: u64 = 10_000;

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_SUCCESS_THRESHOLD: u32 = 3;
const DEFAULT_RECOVERY_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MONITORING_WINDOW_MS: u64 = 60_000;
const DEFAULT_FAILURE_RATE: f64 = 0.5;
const DEFAULT_MINIMUM_REQUESTS: u32 = 10;

const DEFAULT_PROOF_TIMEOUT_MS: u64 = 300_000;

const DEFAULT_NOTE_STORE_PATH: &str = "./shroud-notes.json";
const DEFAULT_ROOT_HISTORY: usize = 100;

// ============================================================================
// Config Structs
// ============================================================================

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShroudConfig {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerTomlConfig,
    #[serde(default)]
    pub rate_limit: RateLimitTomlConfig,
    #[serde(default)]
    pub prover: ProverConfig,
    #[serde(default)]
    pub notes: NotesConfig,
}

/// Relay connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chain_type")]
    pub chain_type: String,
    /// Per-call deadline
    #[serde(default = "default_call_timeout")]
    pub timeout_ms: u64,
    /// Refresh the bearer token this long before it expires
    #[serde(default = "default_token_refresh_margin")]
    pub token_refresh_margin_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_confirmation_attempts")]
    pub confirmation_attempts: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RELAY_URL.into(),
            api_key: None,
            chain_type: DEFAULT_CHAIN_TYPE.into(),
            timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            token_refresh_margin_secs: DEFAULT_TOKEN_REFRESH_MARGIN_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            confirmation_attempts: DEFAULT_CONFIRMATION_ATTEMPTS,
        }
    }
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn token_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.token_refresh_margin_secs)
    }
}

fn default_relay_url() -> String {
    DEFAULT_RELAY_URL.into()
}
fn default_chain_type() -> String {
    DEFAULT_CHAIN_TYPE.into()
}
fn default_call_timeout() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}
fn default_token_refresh_margin() -> u64 {
    DEFAULT_TOKEN_REFRESH_MARGIN_SECS
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_confirmation_attempts() -> u32 {
    DEFAULT_CONFIRMATION_ATTEMPTS
}

/// Retry-with-backoff configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_RETRY_BASE_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_MS,
        }
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_base_ms() -> u64 {
    DEFAULT_RETRY_BASE_MS
}
fn default_retry_max_ms() -> u64 {
    DEFAULT_RETRY_MAX_MS
}

/// Circuit breaker configuration (TOML format)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerTomlConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_ms: u64,
    #[serde(default = "default_monitoring_window")]
    pub monitoring_window_ms: u64,
    #[serde(default = "default_failure_rate")]
    pub failure_rate_threshold: f64,
    #[serde(default = "default_minimum_requests")]
    pub minimum_requests: u32,
}

impl Default for CircuitBreakerTomlConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            recovery_timeout_ms: DEFAULT_RECOVERY_TIMEOUT_MS,
            monitoring_window_ms: DEFAULT_MONITORING_WINDOW_MS,
            failure_rate_threshold: DEFAULT_FAILURE_RATE,
            minimum_requests: DEFAULT_MINIMUM_REQUESTS,
        }
    }
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}
fn default_success_threshold() -> u32 {
    DEFAULT_SUCCESS_THRESHOLD
}
fn default_recovery_timeout() -> u64 {
    DEFAULT_RECOVERY_TIMEOUT_MS
}
fn default_monitoring_window() -> u64 {
    DEFAULT_MONITORING_WINDOW_MS
}
fn default_failure_rate() -> f64 {
    DEFAULT_FAILURE_RATE
}
fn default_minimum_requests() -> u32 {
    DEFAULT_MINIMUM_REQUESTS
}

/// One fixed window: `max_requests` per `window_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl WindowConfig {
    pub const fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Rate limits per operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitTomlConfig {
    #[serde(default = "default_submit_window")]
    pub submit: WindowConfig,
    #[serde(default = "default_generate_window")]
    pub generate_proof: WindowConfig,
    #[serde(default = "default_verify_window")]
    pub verify_proof: WindowConfig,
    /// Applied to operations without their own entry
    #[serde(default = "default_other_window")]
    pub default: WindowConfig,
}

impl Default for RateLimitTomlConfig {
    fn default() -> Self {
        Self {
            submit: default_submit_window(),
            generate_proof: default_generate_window(),
            verify_proof: default_verify_window(),
            default: default_other_window(),
        }
    }
}

fn default_submit_window() -> WindowConfig {
    WindowConfig::new(10, 60_000)
}
fn default_generate_window() -> WindowConfig {
    WindowConfig::new(5, 60_000)
}
fn default_verify_window() -> WindowConfig {
    WindowConfig::new(30, 60_000)
}
fn default_other_window() -> WindowConfig {
    WindowConfig::new(60, 60_000)
}

/// Which proving backend to use
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProverMode {
    #[default]
    Mock,
    Remote,
}

impl FromStr for ProverMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "remote" => Ok(Self::Remote),
            other => bail!("unknown prover mode '{other}' (expected 'mock' or 'remote')"),
        }
    }
}

/// Prover configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProverConfig {
    #[serde(default)]
    pub mode: ProverMode,
    /// Prover coordinator base URL (remote mode)
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_proof_timeout")]
    pub timeout_ms: u64,
    /// Directory holding `{name}.wasm`, `{name}.zkey`, `verifier-{name}.json`
    #[serde(default)]
    pub circuit_dir: Option<String>,
    /// Base URL serving the same file layout as `circuit_dir`
    #[serde(default)]
    pub circuit_base_url: Option<String>,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            mode: ProverMode::Mock,
            url: None,
            timeout_ms: DEFAULT_PROOF_TIMEOUT_MS,
            circuit_dir: None,
            circuit_base_url: None,
        }
    }
}

impl ProverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_proof_timeout() -> u64 {
    DEFAULT_PROOF_TIMEOUT_MS
}

/// Coin selection policy
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicyToml {
    #[default]
    LargestFirst,
    SmallestFirst,
}

impl FromStr for SelectionPolicyToml {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "largest_first" => Ok(Self::LargestFirst),
            "smallest_first" => Ok(Self::SmallestFirst),
            other => bail!("unknown selection policy '{other}'"),
        }
    }
}

/// Note store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesConfig {
    #[serde(default = "default_note_store_path")]
    pub store_path: String,
    #[serde(default)]
    pub selection_policy: SelectionPolicyToml,
    /// Merkle roots remembered by the proof client
    #[serde(default = "default_root_history")]
    pub root_history: usize,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            store_path: DEFAULT_NOTE_STORE_PATH.into(),
            selection_policy: SelectionPolicyToml::LargestFirst,
            root_history: DEFAULT_ROOT_HISTORY,
        }
    }
}

fn default_note_store_path() -> String {
    DEFAULT_NOTE_STORE_PATH.into()
}
fn default_root_history() -> usize {
    DEFAULT_ROOT_HISTORY
}

// ============================================================================
// Environment Variable Helpers
// ============================================================================

/// Set field from variable if present
fn env_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut String) {
    if let Some(v) = lookup(key) {
        *field = v;
    }
}

/// Set Option<String> from variable if present
fn env_option_string(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    field: &mut Option<String>,
) {
    if let Some(v) = lookup(key) {
        *field = Some(v);
    }
}

/// Set field from variable if present and parseable
fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut T) {
    if let Some(v) = lookup(key) {
        match v.parse() {
            Ok(parsed) => *field = parsed,
            Err(_) => log::warn!("Ignoring unparseable value for {key}: {v}"),
        }
    }
}

// ============================================================================
// Implementation
// ============================================================================

impl ShroudConfig {
    /// Load configuration from config file with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                log::info!("Loading config from: {}", path.display());
                Self::read_file(&path)?
            }
            None => {
                log::info!("No config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Find the config file path
    fn find_config_file() -> Option<PathBuf> {
        // 1. Check SHROUD_CONFIG env var
        if let Ok(path) = env::var("SHROUD_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            log::warn!("SHROUD_CONFIG points at missing file: {}", path.display());
        }

        // 2. Check ./shroud.toml (current directory)
        let local_path = PathBuf::from(CONFIG_FILE_NAME);
        if local_path.exists() {
            return Some(local_path);
        }

        // 3. Check ~/.shroud/shroud.toml
        Self::default_config_path().filter(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Relay
        env_string(&lookup, "SHROUD_RELAY_URL", &mut self.relay.url);
        env_option_string(&lookup, "SHROUD_RELAY_API_KEY", &mut self.relay.api_key);
        env_string(&lookup, "SHROUD_CHAIN_TYPE", &mut self.relay.chain_type);
        env_parse(&lookup, "SHROUD_RELAY_TIMEOUT_MS", &mut self.relay.timeout_ms);
        env_parse(&lookup, "SHROUD_POLL_INTERVAL_MS", &mut self.relay.poll_interval_ms);

        // Retry
        env_parse(&lookup, "SHROUD_MAX_RETRIES", &mut self.retry.max_retries);
        env_parse(&lookup, "SHROUD_RETRY_BASE_MS", &mut self.retry.base_delay_ms);

        // Prover
        env_parse(&lookup, "SHROUD_PROVER_MODE", &mut self.prover.mode);
        env_option_string(&lookup, "SHROUD_PROVER_URL", &mut self.prover.url);
        env_option_string(&lookup, "SHROUD_CIRCUIT_DIR", &mut self.prover.circuit_dir);
        env_option_string(
            &lookup,
            "SHROUD_CIRCUIT_BASE_URL",
            &mut self.prover.circuit_base_url,
        );

        // Notes
        env_string(&lookup, "SHROUD_NOTE_STORE", &mut self.notes.store_path);
        env_parse(
            &lookup,
            "SHROUD_SELECTION_POLICY",
            &mut self.notes.selection_policy,
        );
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        let mut sample = Self::default();
        sample.relay.api_key = Some("replace-me".into());
        sample.prover.circuit_dir = Some("./circuits".into());
        toml::to_string_pretty(&sample).unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ShroudConfig::default();
        assert_eq!(config.relay.url, DEFAULT_RELAY_URL);
        assert_eq!(config.prover.mode, ProverMode::Mock);
        assert_eq!(config.retry.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.notes.selection_policy, SelectionPolicyToml::LargestFirst);
    }

    #[test]
    fn test_generate_sample() {
        let sample = ShroudConfig::generate_sample();
        assert!(sample.contains("[relay]"));
        assert!(sample.contains("[retry]"));
        assert!(sample.contains("[circuit_breaker]"));
        assert!(sample.contains("[prover]"));
        assert!(sample.contains("[notes]"));
    }

    #[test]
    fn test_parse_sample() {
        let sample = ShroudConfig::generate_sample();
        let parsed: ShroudConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.relay.api_key.as_deref(), Some("replace-me"));
        assert_eq!(parsed.rate_limit, RateLimitTomlConfig::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: ShroudConfig = toml::from_str(
            r#"
            [relay]
            url = "https://relay.example"

            [rate_limit.submit]
            max_requests = 2
            window_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(parsed.relay.url, "https://relay.example");
        assert_eq!(parsed.relay.chain_type, DEFAULT_CHAIN_TYPE);
        assert_eq!(parsed.rate_limit.submit, WindowConfig::new(2, 500));
        assert_eq!(parsed.rate_limit.generate_proof, default_generate_window());
    }

    #[test]
    fn test_overrides() {
        let mut config = ShroudConfig::default();
        config.apply_overrides(lookup(&[
            ("SHROUD_RELAY_URL", "https://relay.test"),
            ("SHROUD_PROVER_MODE", "REMOTE"),
            ("SHROUD_PROVER_URL", "http://prover:8080"),
            ("SHROUD_MAX_RETRIES", "7"),
            ("SHROUD_SELECTION_POLICY", "smallest-first"),
        ]));

        assert_eq!(config.relay.url, "https://relay.test");
        assert_eq!(config.prover.mode, ProverMode::Remote);
        assert_eq!(config.prover.url.as_deref(), Some("http://prover:8080"));
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.notes.selection_policy, SelectionPolicyToml::SmallestFirst);
    }

    #[test]
    fn test_bad_override_ignored() {
        let mut config = ShroudConfig::default();
        config.apply_overrides(lookup(&[
            ("SHROUD_PROVER_MODE", "groth16"),
            ("SHROUD_MAX_RETRIES", "lots"),
        ]));
        assert_eq!(config.prover.mode, ProverMode::Mock);
        assert_eq!(config.retry.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[prover]\nmode = \"remote\"\nurl = \"http://p\"\n").unwrap();

        let config = ShroudConfig::load_from(&path).unwrap();
        assert_eq!(config.prover.mode, ProverMode::Remote);
        assert_eq!(config.prover.url.as_deref(), Some("http://p"));

        fs::write(&path, "[prover\n").unwrap();
        assert!(ShroudConfig::read_file(&path).is_err());
    }
}

//! Robot configuration – reads/writes `~/.fieldbot/config.toml`.
//!
//! | Section | Contents |
//! |---|---|
//! | `[calibration]` | [`CalibrationProfile`] |
//! | `[parser]` | field-name aliases and instruction type aliases |
//! | `[monitor]` | obstacle threshold, sector, poll and reconnect timing |
//! | `[channel]` | listen address, telemetry interval, frame cap |
//! | `[runner]` | pause between pattern steps |

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fieldbot_kernel::MonitorConfig;
use fieldbot_middleware::ChannelConfig;
use fieldbot_types::{CalibrationProfile, FieldError, ParserConfig};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_threshold_mm")]
    pub threshold_mm: f64,
    #[serde(default = "default_half_angle_deg")]
    pub half_angle_deg: f64,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_threshold_mm() -> f64 {
    1000.0
}
fn default_half_angle_deg() -> f64 {
    30.0
}
fn default_poll_ms() -> u64 {
    100
}
fn default_backoff_initial_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    10_000
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            threshold_mm: default_threshold_mm(),
            half_angle_deg: default_half_angle_deg(),
            poll_ms: default_poll_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl MonitorSection {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            threshold_mm: self.threshold_mm,
            half_angle_deg: self.half_angle_deg,
            poll_interval: Duration::from_millis(self.poll_ms),
            backoff_initial: Duration::from_millis(self.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSection {
    /// Address the operator connection server binds.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_telemetry_interval_secs")]
    pub telemetry_interval_secs: u64,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8765".to_string()
}
fn default_telemetry_interval_secs() -> u64 {
    10
}
fn default_max_frame_bytes() -> usize {
    ChannelConfig::default().max_frame_bytes
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            telemetry_interval_secs: default_telemetry_interval_secs(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl ChannelSection {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            telemetry_interval: Duration::from_secs(self.telemetry_interval_secs),
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSection {
    #[serde(default = "default_inter_step_pause_ms")]
    pub inter_step_pause_ms: u64,
}

fn default_inter_step_pause_ms() -> u64 {
    fieldbot_runtime::DEFAULT_INTER_STEP_PAUSE.as_millis() as u64
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            inter_step_pause_ms: default_inter_step_pause_ms(),
        }
    }
}

impl RunnerSection {
    pub fn inter_step_pause(&self) -> Duration {
        Duration::from_millis(self.inter_step_pause_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FieldbotConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Persisted robot configuration stored in `~/.fieldbot/config.toml`.
///
/// Every section and field may be omitted; missing values take defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldbotConfig {
    #[serde(default)]
    pub calibration: CalibrationProfile,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub channel: ChannelSection,
    #[serde(default)]
    pub runner: RunnerSection,
}

impl FieldbotConfig {
    /// Reject values the robot cannot run with.
    ///
    /// # Errors
    ///
    /// [`FieldError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), FieldError> {
        self.calibration.validate()?;

        let m = &self.monitor;
        if !(m.threshold_mm.is_finite() && m.threshold_mm > 0.0) {
            return Err(FieldError::Config(format!(
                "monitor.threshold_mm must be positive, got {}",
                m.threshold_mm
            )));
        }
        if !(m.half_angle_deg > 0.0 && m.half_angle_deg <= 180.0) {
            return Err(FieldError::Config(format!(
                "monitor.half_angle_deg must be within (0, 180], got {}",
                m.half_angle_deg
            )));
        }
        if m.poll_ms == 0 || m.backoff_initial_ms == 0 {
            return Err(FieldError::Config("monitor poll and backoff intervals must be at least 1 ms".into()));
        }
        if m.backoff_max_ms < m.backoff_initial_ms {
            return Err(FieldError::Config("monitor.backoff_max_ms is below backoff_initial_ms".into()));
        }

        let c = &self.channel;
        if c.listen_addr.trim().is_empty() {
            return Err(FieldError::Config("channel.listen_addr is empty".into()));
        }
        if c.telemetry_interval_secs == 0 {
            return Err(FieldError::Config("channel.telemetry_interval_secs must be at least 1".into()));
        }
        if c.max_frame_bytes == 0 {
            return Err(FieldError::Config("channel.max_frame_bytes must be at least 1".into()));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Paths and persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Return the path to `~/.fieldbot/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".fieldbot").join("config.toml")
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.  Environment overrides are applied to what was read.
pub fn load_from(path: &Path) -> Result<Option<FieldbotConfig>, FieldError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| FieldError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: FieldbotConfig =
        toml::from_str(&raw).map_err(|e| FieldError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Load `path`, or write the defaults there on first run.
///
/// The second element is `true` when the file was just created.
pub fn load_or_init(path: &Path) -> Result<(FieldbotConfig, bool), FieldError> {
    if let Some(cfg) = load_from(path)? {
        return Ok((cfg, false));
    }
    let mut cfg = FieldbotConfig::default();
    save_to(&cfg, path)?;
    apply_env_overrides(&mut cfg);
    Ok((cfg, true))
}

/// Apply `FIELDBOT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FIELDBOT_LISTEN_ADDR` | `channel.listen_addr` |
/// | `FIELDBOT_DISTANCE_THRESHOLD_MM` | `monitor.threshold_mm` |
/// | `FIELDBOT_TELEMETRY_INTERVAL_SECS` | `channel.telemetry_interval_secs` |
/// | `FIELDBOT_KP` | `calibration.kp` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut FieldbotConfig) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut FieldbotConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("FIELDBOT_LISTEN_ADDR")
        && !v.trim().is_empty()
    {
        cfg.channel.listen_addr = v.trim().to_string();
    }
    if let Some(v) = lookup("FIELDBOT_DISTANCE_THRESHOLD_MM")
        && let Ok(mm) = v.trim().parse::<f64>()
        && mm.is_finite()
        && mm > 0.0
    {
        cfg.monitor.threshold_mm = mm;
    }
    if let Some(v) = lookup("FIELDBOT_TELEMETRY_INTERVAL_SECS")
        && let Ok(secs) = v.trim().parse::<u64>()
        && secs > 0
    {
        cfg.channel.telemetry_interval_secs = secs;
    }
    if let Some(v) = lookup("FIELDBOT_KP")
        && let Ok(kp) = v.trim().parse::<f64>()
        && kp.is_finite()
        && kp >= 0.0
    {
        cfg.calibration.kp = kp;
    }
}

/// Save the config to a specific path, creating its directory if needed.
pub fn save_to(cfg: &FieldbotConfig, path: &Path) -> Result<(), FieldError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| FieldError::Config(format!("failed to create config directory: {e}")))?;
        // Owner-only directory (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| FieldError::Config(format!("failed to set config directory permissions: {e}")))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| FieldError::Config(format!("failed to serialize config: {e}")))?;
    let write_err = |e: std::io::Error| FieldError::Config(format!("failed to write {}: {e}", path.display()));
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = FieldbotConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.calibration.wheel_diameter_cm, 6.5);
        assert_eq!(cfg.calibration.kp, 0.02);
        assert_eq!(cfg.monitor.monitor_config(), MonitorConfig::default());
        assert_eq!(cfg.channel.channel_config(), ChannelConfig::default());
        assert_eq!(cfg.runner.inter_step_pause(), Duration::from_millis(500));
        assert_eq!(cfg.channel.listen_addr, "0.0.0.0:8765");
    }

    #[test]
    fn config_path_points_to_fieldbot_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".fieldbot"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn first_run_writes_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let (_, created) = load_or_init(&path).expect("init");
        assert!(created);
        assert!(path.exists());

        let (_, created) = load_or_init(&path).expect("reload");
        assert!(!created);
    }

    #[test]
    fn roundtrip_custom_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = FieldbotConfig::default();
        cfg.calibration.wheel_base_cm = 22.0;
        cfg.parser.type_aliases.insert("spin".into(), "rotation".into());
        cfg.monitor.half_angle_deg = 45.0;
        cfg.runner.inter_step_pause_ms = 0;
        save_to(&cfg, &path).expect("save");

        let raw = fs::read_to_string(&path).expect("read");
        let loaded: FieldbotConfig = toml::from_str(&raw).expect("parse");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let cfg: FieldbotConfig = toml::from_str(
            r#"
            [calibration]
            cm_per_second = 42.0

            [channel]
            listen_addr = "127.0.0.1:9000"
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.calibration.cm_per_second, 42.0);
        assert_eq!(cfg.calibration.tick_ms, 50);
        assert_eq!(cfg.channel.listen_addr, "127.0.0.1:9000");
        assert_eq!(cfg.channel.telemetry_interval_secs, 10);
        assert_eq!(cfg.monitor, MonitorSection::default());
    }

    #[test]
    fn unparseable_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[calibration\nkp = ").expect("write");
        assert!(matches!(load_from(&path), Err(FieldError::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&FieldbotConfig::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).expect("dir metadata").permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = FieldbotConfig::default();
        apply_overrides(
            &mut cfg,
            lookup(&[
                ("FIELDBOT_LISTEN_ADDR", "127.0.0.1:7000"),
                ("FIELDBOT_DISTANCE_THRESHOLD_MM", "750"),
                ("FIELDBOT_TELEMETRY_INTERVAL_SECS", "3"),
                ("FIELDBOT_KP", "0.05"),
            ]),
        );
        assert_eq!(cfg.channel.listen_addr, "127.0.0.1:7000");
        assert_eq!(cfg.monitor.threshold_mm, 750.0);
        assert_eq!(cfg.channel.telemetry_interval_secs, 3);
        assert_eq!(cfg.calibration.kp, 0.05);
    }

    #[test]
    fn invalid_env_overrides_are_ignored() {
        let mut cfg = FieldbotConfig::default();
        apply_overrides(
            &mut cfg,
            lookup(&[
                ("FIELDBOT_LISTEN_ADDR", "  "),
                ("FIELDBOT_DISTANCE_THRESHOLD_MM", "near"),
                ("FIELDBOT_TELEMETRY_INTERVAL_SECS", "0"),
                ("FIELDBOT_KP", "-1"),
            ]),
        );
        assert_eq!(cfg, FieldbotConfig::default());
    }

    #[test]
    fn validate_rejects_bad_sections() {
        let mut cfg = FieldbotConfig::default();
        cfg.monitor.backoff_max_ms = 10;
        assert!(cfg.validate().is_err());

        let mut cfg = FieldbotConfig::default();
        cfg.channel.telemetry_interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = FieldbotConfig::default();
        cfg.calibration.drive_duty = 1.5;
        assert!(matches!(cfg.validate(), Err(FieldError::Config(_))));
    }
}

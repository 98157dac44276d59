use crate::errors::Error;
use crate::store::repo;
use chrono::offset::Utc;
use chrono::DateTime;
use core::time::Duration;
use serde::{
    Deserialize,
    Serialize,
};
use std::sync::{
    Arc,
    Mutex,
};

/// Default holdtime: do not revisit a successfully backed-up device before
/// this much time has elapsed.
pub const DEFAULT_HOLDTIME: Duration = Duration::from_secs(12 * 60 * 60);

/// Default interval between device-table scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default limit on concurrent fetch workers.
pub const DEFAULT_MAX_CONCURRENCY: usize = 20;

/// Default limit on retained generations per device.
pub const DEFAULT_MAX_CONFIG_FILES: usize = 120;

/// Default limit for loading a configuration file into memory -- 10 MB.
pub const DEFAULT_MAX_CONFIG_LOAD_SIZE: u64 = 10_000_000;

/// Default number of lines kept in a device's error history.
pub const DEFAULT_ERRLOG_HIST_SIZE: usize = 60;

/// Audit record describing the last change to a configuration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Change {
    /// When the change happened.
    pub when: Option<DateTime<Utc>>,
    /// Who made the change.
    pub by: String,
    /// Where the change came from (remote address, "cli", ...).
    pub from: String,
}

/// `AppConfig` is the persistent process-wide configuration record. Updates
/// replace the whole record atomically through [`Options`], so readers always
/// observe a complete snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Limit on retained generations per device.
    pub max_config_files: usize,
    /// Minimum elapsed time after a successful fetch before the same device is
    /// revisited.
    pub holdtime: Duration,
    /// Interval between device-table scans.
    pub scan_interval: Duration,
    /// Limit on concurrent fetch workers.
    pub max_concurrency: usize,
    /// Limit for loading a configuration file into memory.
    pub max_config_load_size: u64,
    /// Last-change audit fields.
    pub last_change: Change,
    /// Free user-defined field.
    pub comment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_config_files: DEFAULT_MAX_CONFIG_FILES,
            holdtime: DEFAULT_HOLDTIME,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_config_load_size: DEFAULT_MAX_CONFIG_LOAD_SIZE,
            last_change: Change::default(),
            comment: String::new(),
        }
    }
}

impl AppConfig {
    /// Creates an `AppConfig` from its YAML serialization.
    pub fn from_yaml(s: &str) -> Result<Self, Error> {
        serde_yaml::from_str(s)
            .map_err(|err| Error::Config(format!("parsing global options: {err}")))
    }

    /// Exports the record as YAML.
    pub fn dump(&self) -> Result<String, Error> {
        serde_yaml::to_string(self)
            .map_err(|err| Error::Config(format!("serializing global options: {err}")))
    }
}

/// `DevAttributes` is the per-model set of default attributes for a device --
/// the closed set of knobs parameterizing the dialogue. Per-device overrides
/// are expressed by storing a modified copy on the device record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevAttributes {
    /// Device requires the login chat (username/password prompts).
    pub need_login_chat: bool,
    /// Device requires entering enabled (privileged) mode.
    pub need_enabled_mode: bool,
    /// Device requires disabling output pagination.
    pub need_paging_off: bool,
    /// Command that enters enabled mode, e.g. "enable".
    pub enable_command: String,
    /// Pattern announcing the username prompt, e.g. "Username:".
    pub username_prompt_pattern: String,
    /// Pattern announcing the password prompt.
    pub password_prompt_pattern: String,
    /// Pattern announcing the enable-password prompt.
    pub enable_password_prompt_pattern: String,
    /// Pattern of the disabled (unprivileged) prompt, e.g. ">".
    pub disabled_prompt_pattern: String,
    /// Pattern of the enabled prompt, e.g. "#". Empty means "read the command
    /// output until the peer closes the stream".
    pub enabled_prompt_pattern: String,
    /// Commands whose output forms the capture, e.g. "show running-config".
    pub command_list: Vec<String>,
    /// Command disabling pagination, e.g. "term len 0".
    pub disable_pager_command: String,
    /// Number of extra enabled prompts consumed after the pager command.
    pub disable_pager_extra_prompt_count: usize,
    /// Do not append an automatic LF to sent lines.
    pub supress_auto_lf: bool,
    /// Format for echoing sent commands into the capture; "%s" is replaced by
    /// the command. Empty omits the echo markers.
    pub quote_sent_commands_format: String,
    /// Keep control characters (backspace, carriage return) in the capture.
    pub keep_control_chars: bool,
    /// Name of the line filter applied to the capture before saving.
    pub line_filter: String,
    /// Save a new generation only when it differs from the previous one.
    pub changes_only: bool,
    /// Content-type hint for object-store writes: "" omits the header,
    /// "detect" sniffs the payload, anything else is used literally.
    pub content_type: String,
    /// Non-empty replaces the dialogue with an external program whose standard
    /// output becomes the capture: program path followed by its arguments.
    pub run_prog: Vec<String>,
    /// Time allowed for the external program to complete.
    pub run_timeout: Duration,
    /// Number of lines kept in the device's error history.
    pub errlog_hist_size: usize,
    /// Pattern of a post-login nuisance prompt, e.g. `Please press "Enter"`.
    pub post_login_prompt_pattern: String,
    /// Response sent when the post-login prompt is seen.
    pub post_login_prompt_response: String,
    /// Vendor suffix appended to the username, e.g. "+cte".
    pub username_append: String,
    /// Per-read timeout for the login phase (protection against inactivity).
    pub read_timeout: Duration,
    /// Total match timeout for the login phase (protection against a slow
    /// sender -- think one byte per second).
    pub match_timeout: Duration,
    /// Write timeout for sent lines.
    pub send_timeout: Duration,
    /// Per-read timeout for the command phase (slow "show running").
    pub command_read_timeout: Duration,
    /// Total match timeout for the command phase.
    pub command_match_timeout: Duration,
}

impl Default for DevAttributes {
    fn default() -> Self {
        Self {
            need_login_chat: false,
            need_enabled_mode: false,
            need_paging_off: false,
            enable_command: String::new(),
            username_prompt_pattern: String::new(),
            password_prompt_pattern: String::new(),
            enable_password_prompt_pattern: String::new(),
            disabled_prompt_pattern: String::new(),
            enabled_prompt_pattern: String::new(),
            command_list: vec![],
            disable_pager_command: String::new(),
            disable_pager_extra_prompt_count: 0,
            supress_auto_lf: false,
            quote_sent_commands_format: String::new(),
            keep_control_chars: false,
            line_filter: String::new(),
            changes_only: false,
            content_type: String::new(),
            run_prog: vec![],
            run_timeout: Duration::from_secs(60),
            errlog_hist_size: DEFAULT_ERRLOG_HIST_SIZE,
            post_login_prompt_pattern: String::new(),
            post_login_prompt_response: String::new(),
            username_append: String::new(),
            read_timeout: Duration::from_secs(10),
            match_timeout: Duration::from_secs(60),
            send_timeout: Duration::from_secs(5),
            command_read_timeout: Duration::from_secs(20),
            command_match_timeout: Duration::from_secs(120),
        }
    }
}

/// `DevConfig` is the full persistent set of device properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    /// Enable per-device debug logging.
    pub debug: bool,
    /// Deletion tombstone: the record survives but the scanner skips it.
    pub deleted: bool,
    /// Model name, e.g. "cisco-ios".
    pub model: String,
    /// Unique device id.
    pub id: String,
    /// Endpoint as "host:port" ("host" uses the transport's default port).
    pub host_port: String,
    /// Acceptable transports in priority order, comma separated: "ssh,telnet".
    pub transports: String,
    /// Login username.
    pub login_user: String,
    /// Login password.
    pub login_password: String,
    /// Enable-mode password.
    pub enable_password: String,
    /// Free user-defined field.
    pub comment: String,
    /// Last-change audit fields.
    pub last_change: Change,
    /// Model attributes, possibly overridden for this device.
    pub attr: DevAttributes,
}

impl DevConfig {
    /// Creates a device record from its YAML serialization.
    pub fn from_yaml(s: &str) -> Result<Self, Error> {
        serde_yaml::from_str(s)
            .map_err(|err| Error::Config(format!("parsing device record: {err}")))
    }

    /// Exports the record as YAML.
    pub fn dump(&self) -> Result<String, Error> {
        serde_yaml::to_string(self)
            .map_err(|err| Error::Config(format!("serializing device record: {err}")))
    }
}

/// `Config` is the full persistent application configuration: the global
/// options plus every device record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Global options.
    pub options: AppConfig,
    /// Device records.
    pub devices: Vec<DevConfig>,
}

impl Config {
    /// Loads a `Config` from a repository path (local or object store),
    /// refusing files larger than `max_size`.
    pub fn load(
        path: &str,
        max_size: u64,
    ) -> Result<Self, Error> {
        let b = repo::file_read(path, max_size)?;
        let s = String::from_utf8(b)
            .map_err(|err| Error::Config(format!("configuration is not utf-8: {err}")))?;
        serde_yaml::from_str(&s)
            .map_err(|err| Error::Config(format!("parsing configuration: {err}")))
    }

    /// Exports the full configuration as YAML.
    pub fn dump(&self) -> Result<String, Error> {
        serde_yaml::to_string(self)
            .map_err(|err| Error::Config(format!("serializing configuration: {err}")))
    }
}

/// `Options` is the process-wide runtime options cell. Writers publish a fresh
/// [`AppConfig`] atomically; readers receive a complete immutable snapshot and
/// hold it for the duration of a single operation.
pub struct Options {
    current: Mutex<Arc<AppConfig>>,
}

impl Default for Options {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}

impl Options {
    /// Returns a new cell holding `initial`.
    #[must_use]
    pub fn new(initial: AppConfig) -> Self {
        Self {
            current: Mutex::new(Arc::new(initial)),
        }
    }

    /// Returns the current snapshot.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn get(&self) -> Arc<AppConfig> {
        Arc::clone(&self.current.lock().expect("options lock poisoned"))
    }

    /// Atomically replaces the current snapshot.
    #[allow(clippy::expect_used)]
    pub fn set(
        &self,
        config: AppConfig,
    ) {
        *self.current.lock().expect("options lock poisoned") = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AppConfig,
        DevConfig,
        Options,
    };
    use core::time::Duration;

    #[test]
    fn app_config_round_trip() {
        let config = AppConfig {
            max_concurrency: 3,
            max_config_files: 10,
            comment: String::from("lab fleet"),
            ..AppConfig::default()
        };

        let yaml = config.dump().unwrap();
        let back = AppConfig::from_yaml(&yaml).unwrap();

        assert_eq!(back.max_concurrency, 3);
        assert_eq!(back.max_config_files, 10);
        assert_eq!(back.holdtime, config.holdtime);
        assert_eq!(back.comment, "lab fleet");
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let config = AppConfig::from_yaml("max_concurrency: 7\n").unwrap();

        assert_eq!(config.max_concurrency, 7);
        assert_eq!(config.max_config_files, super::DEFAULT_MAX_CONFIG_FILES);
        assert_eq!(config.scan_interval, super::DEFAULT_SCAN_INTERVAL);
    }

    #[test]
    fn dev_config_round_trip() {
        let dev = DevConfig {
            id: String::from("lab1"),
            model: String::from("cisco-ios"),
            host_port: String::from("10.0.0.1:23"),
            transports: String::from("telnet,ssh"),
            attr: super::DevAttributes {
                command_list: vec![String::from("show running-config")],
                read_timeout: Duration::from_secs(5),
                ..super::DevAttributes::default()
            },
            ..DevConfig::default()
        };

        let yaml = dev.dump().unwrap();
        let back = DevConfig::from_yaml(&yaml).unwrap();

        assert_eq!(back.id, "lab1");
        assert_eq!(back.transports, "telnet,ssh");
        assert_eq!(back.attr.command_list, dev.attr.command_list);
        assert_eq!(back.attr.read_timeout, Duration::from_secs(5));
    }

    #[test]
    fn options_swap_is_complete() {
        let options = Options::default();
        let before = options.get();

        options.set(AppConfig {
            max_concurrency: 99,
            ..AppConfig::default()
        });

        let after = options.get();
        assert_eq!(after.max_concurrency, 99);
        // the old snapshot is unaffected by the swap
        assert_eq!(before.max_concurrency, super::DEFAULT_MAX_CONCURRENCY);
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the `sitesnap.toml` configuration file, and resolve
//! it into one immutable [`SyncConfig`] value. Values read from the file can be
//! overridden by `SITESNAP_*` environment variables. The resolved
//! configuration is validated before any workflow is allowed to mutate
//! anything.

use serde::Deserialize;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Default exclusion rules for configuration trees.
///
/// Uses gitignore syntax relative to the root of each mirrored tree.
pub const DEFAULT_CONFIG_EXCLUDES: &[&str] = &[
    "node_modules/",
    "vendor/",
    "/cache/",
    "/files/",
    "/config/doctrine/proxies/",
    "/config/generated_overrides/",
    ".git/",
    ".DS_Store",
];

/// Default exclusion rules for the uploaded-files tree.
pub const DEFAULT_FILES_EXCLUDES: &[&str] = &[
    "/cache/",
    "/tmp/",
    "*.sql",
    "*.sql.gz",
    ".git/",
    ".DS_Store",
];

/// Resolved configuration for a single invocation.
///
/// Constructed once at startup and passed by reference to every component.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Snapshot repository to push to and pull from.
    pub remote: RemoteSettings,

    /// Local site whose state gets snapshotted.
    pub site: SiteSettings,

    /// Database connection of local site.
    pub database: DatabaseSettings,

    /// Payload categories that are optional per run.
    pub sync: SyncSettings,

    /// Snapshot layout and working clone settings.
    pub snapshot: SnapshotSettings,

    /// External commands to run after a pull or during a fix.
    pub hooks: HookSettings,
}

impl SyncConfig {
    /// Load configuration file, apply environment overrides, and validate.
    ///
    /// A missing configuration file is not an error by itself, because every
    /// required value can be supplied through the environment instead.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ReadFile`] if existing file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file is not valid.
    /// - Return [`ConfigError::Missing`] if a required value was never set.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.is_file() {
            read_to_string(path)
                .map_err(|err| ConfigError::ReadFile {
                    source: err,
                    path: path.to_path_buf(),
                })?
                .parse::<SyncConfig>()?
        } else {
            tracing::debug!("no configuration file at {:?}", path.display());
            SyncConfig::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Override file values with `SITESNAP_*` environment variables.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::InvalidValue`] if a variable cannot be parsed.
    /// - Return [`ConfigError::ShellExpansion`] if site root expansion fails.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(url) = env_var("SITESNAP_REPO") {
            self.remote.url = url;
        }
        if let Some(branch) = env_var("SITESNAP_BRANCH") {
            self.remote.branch = branch;
        }
        if let Some(root) = env_var("SITESNAP_SITE_ROOT") {
            self.site.root = expand_path(root)?;
        }
        if let Some(host) = env_var("SITESNAP_DB_HOST") {
            self.database.host = host;
        }
        if let Some(port) = env_var("SITESNAP_DB_PORT") {
            self.database.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "SITESNAP_DB_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(name) = env_var("SITESNAP_DB_NAME") {
            self.database.name = name;
        }
        if let Some(user) = env_var("SITESNAP_DB_USER") {
            self.database.user = user;
        }
        if let Some(password) = env_var("SITESNAP_DB_PASSWORD") {
            self.database.password = password;
        }
        if let Some(mode) = env_var("SITESNAP_SYNC_FILES") {
            self.sync.files = mode.parse().map_err(|_| ConfigError::InvalidValue {
                key: "SITESNAP_SYNC_FILES",
                value: mode.clone(),
            })?;
        }
        if let Some(mode) = env_var("SITESNAP_SYNC_DATABASE") {
            self.sync.database = mode.parse().map_err(|_| ConfigError::InvalidValue {
                key: "SITESNAP_SYNC_DATABASE",
                value: mode.clone(),
            })?;
        }

        Ok(())
    }

    /// Check that every value needed by a push or pull has been set.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Missing`] naming the key and environment
    ///   variable to set.
    /// - Return [`ConfigError::InvalidValue`] for a zero page size.
    pub fn validate(&self) -> Result<()> {
        if self.remote.url.trim().is_empty() {
            return Err(ConfigError::missing("remote.url", "SITESNAP_REPO"));
        }
        if self.remote.branch.trim().is_empty() {
            return Err(ConfigError::missing("remote.branch", "SITESNAP_BRANCH"));
        }
        if self.site.root.as_os_str().is_empty() {
            return Err(ConfigError::missing("site.root", "SITESNAP_SITE_ROOT"));
        }

        // INVARIANT: Database credentials only matter when database sync can happen.
        if self.sync.database != SyncMode::Skip {
            if self.database.name.trim().is_empty() {
                return Err(ConfigError::missing("database.name", "SITESNAP_DB_NAME"));
            }
            if self.database.user.trim().is_empty() {
                return Err(ConfigError::missing("database.user", "SITESNAP_DB_USER"));
            }
        }

        if self.snapshot.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "snapshot.page_size",
                value: "0".into(),
            });
        }

        Ok(())
    }
}

impl FromStr for SyncConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: SyncConfig = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        config.site.root = expand_path(config.site.root.to_string_lossy())?;
        if let Some(work_dir) = config.snapshot.work_dir.take() {
            config.snapshot.work_dir = Some(expand_path(work_dir.to_string_lossy())?);
        }

        Ok(config)
    }
}

/// Snapshot repository settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteSettings {
    /// URL of snapshot repository.
    pub url: String,

    /// Branch whose head is the latest snapshot.
    pub branch: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            branch: "main".into(),
        }
    }
}

/// Local site layout.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteSettings {
    /// Absolute path to site root.
    pub root: PathBuf,

    /// Configuration trees relative to site root.
    ///
    /// Each tree is staged under its final path component, e.g.,
    /// "application" is staged as `application/` in the snapshot.
    pub config_dirs: Vec<String>,

    /// Uploaded media tree relative to site root. Staged as `files/`.
    pub files_dir: String,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            config_dirs: vec!["application".into(), "packages".into()],
            files_dir: "application/files".into(),
        }
    }
}

/// Database connection settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,

    /// Tables left out of every export.
    pub exclude_tables: Vec<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 3306,
            name: String::new(),
            user: String::new(),
            password: String::new(),
            exclude_tables: Vec::new(),
        }
    }
}

/// Per category sync toggles.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Uploaded-files tree.
    pub files: SyncMode,

    /// Database dump.
    pub database: SyncMode,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            files: SyncMode::Ask,
            database: SyncMode::Auto,
        }
    }
}

/// Whether a payload category syncs always, after asking, or never.
#[derive(Default, Debug, Copy, PartialEq, Eq, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Auto,
    Ask,
    Skip,
}

impl FromStr for SyncMode {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "ask" => Ok(Self::Ask),
            "skip" => Ok(Self::Skip),
            _ => Err(ConfigError::InvalidValue {
                key: "sync mode",
                value: data.into(),
            }),
        }
    }
}

impl Display for SyncMode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Auto => fmt.write_str("auto"),
            Self::Ask => fmt.write_str("ask"),
            Self::Skip => fmt.write_str("skip"),
        }
    }
}

/// Snapshot layout and working clone settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotSettings {
    /// Type prefix of tags created on push.
    pub tag_type: String,

    /// Number of tags shown per page when selecting a snapshot.
    pub page_size: usize,

    /// Location of working clone. Defaults to user cache directory.
    pub work_dir: Option<PathBuf>,

    /// Keep timestamped dump next to `latest` alias.
    pub keep_timestamped_dump: bool,

    /// Keep working clone on disk after a successful run.
    pub retain_working_clone: bool,

    /// Exclusion rules for configuration trees.
    pub config_excludes: Vec<String>,

    /// Exclusion rules for uploaded-files tree.
    pub files_excludes: Vec<String>,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            tag_type: "snapshot".into(),
            page_size: 10,
            work_dir: None,
            keep_timestamped_dump: true,
            retain_working_clone: false,
            config_excludes: DEFAULT_CONFIG_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            files_excludes: DEFAULT_FILES_EXCLUDES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// External commands run in the site root.
///
/// Each hook is a program followed by its arguments.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HookSettings {
    /// Dependency installer.
    pub install: Option<Vec<String>>,

    /// Cache clearing command.
    pub clear_cache: Option<Vec<String>>,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn expand_path(path: impl AsRef<str>) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration file at {:?}", path.display())]
    ReadFile {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Required value was never set.
    #[error("{key} is not set: set {key} in sitesnap.toml or export {env}")]
    Missing { key: &'static str, env: &'static str },

    /// Value cannot be interpreted.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

impl ConfigError {
    fn missing(key: &'static str, env: &'static str) -> Self {
        Self::Missing { key, env }
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

//! Pipeline configuration.
//!
//! Resolution order: built-in defaults, then an optional `tagship.toml`,
//! then `TAGSHIP_*` environment variables. The CLI applies its flags last.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "tagship.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("invalid tag pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Accept `v1.2.3-rc.1` style tags
    pub allow_prerelease_tags: bool,
    /// Mark releases from suffixed tags as pre-releases
    pub classify_prereleases: bool,
    /// Optional extra regex a matching tag must also satisfy
    pub tag_pattern: Option<String>,
}

impl TriggerConfig {
    /// Compiled custom tag pattern, if configured.
    pub fn tag_regex(&self) -> Result<Option<Regex>, ConfigError> {
        self.tag_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(ConfigError::from)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Interpreter command
    pub runtime: String,
    /// Requested runtime version prefix (e.g. "3.11"); any version when unset
    pub runtime_version: Option<String>,
    /// Probe for an already installed dependency manager
    pub tool_check_command: Option<String>,
    /// Installs the dependency manager from its trusted installer
    pub installer_command: String,
    /// Resolves and installs the manifest's dependencies
    pub resolve_command: String,
    pub manifest: PathBuf,
    pub lockfile: PathBuf,
    /// Fail provisioning when no lockfile exists
    pub require_lockfile: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            runtime: "python3".to_string(),
            runtime_version: None,
            tool_check_command: Some("poetry --version".to_string()),
            installer_command: "curl -sSL https://install.python-poetry.org | python3 -"
                .to_string(),
            resolve_command: "poetry install --no-interaction".to_string(),
            manifest: PathBuf::from("pyproject.toml"),
            lockfile: PathBuf::from("poetry.lock"),
            require_lockfile: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    pub command: String,
    /// Treat a suite with zero collected tests as passing
    pub allow_empty: bool,
    /// Runner exit code meaning "no tests collected" (pytest uses 5)
    pub no_tests_exit_code: Option<i32>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            command: "poetry run pytest".to_string(),
            allow_empty: false,
            no_tests_exit_code: Some(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub command: String,
    pub output_dir: PathBuf,
    /// Remove stale files from the output directory before building
    pub clean_output: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: "poetry build".to_string(),
            output_dir: PathBuf::from("dist"),
            clean_output: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishBackend {
    Github,
    Filesystem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub backend: PublishBackend,
    /// `owner/repo`
    pub repository: Option<String>,
    /// Never written back out
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub api_url: String,
    pub uploads_url: String,
    /// Root directory for the filesystem backend
    pub fs_root: Option<PathBuf>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            backend: PublishBackend::Github,
            repository: None,
            token: None,
            api_url: "https://api.github.com".to_string(),
            uploads_url: "https://uploads.github.com".to_string(),
            fs_root: None,
        }
    }
}

/// Per-stage time limits, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub provisioning_secs: u64,
    pub testing_secs: u64,
    pub building_secs: u64,
    pub publishing_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            provisioning_secs: 15 * 60,
            testing_secs: 30 * 60,
            building_secs: 15 * 60,
            publishing_secs: 10 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub trigger: TriggerConfig,
    pub environment: EnvironmentConfig,
    pub test: TestConfig,
    pub build: BuildConfig,
    pub publish: PublishConfig,
    pub timeouts: TimeoutConfig,
    /// Directory of the JSON run ledger, relative to the working directory
    pub ledger_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            trigger: TriggerConfig::default(),
            environment: EnvironmentConfig::default(),
            test: TestConfig::default(),
            build: BuildConfig::default(),
            publish: PublishConfig::default(),
            timeouts: TimeoutConfig::default(),
            ledger_dir: PathBuf::from(".tagship/runs"),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded pipeline config");
        Self::from_toml(&content)
    }

    /// Load `path` when it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Apply `TAGSHIP_*` overrides (plus `GITHUB_TOKEN` / `GITHUB_REPOSITORY`
    /// as fallbacks) read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TAGSHIP_RUNTIME") {
            self.environment.runtime = v;
        }
        if let Some(v) = lookup("TAGSHIP_RUNTIME_VERSION") {
            self.environment.runtime_version = Some(v);
        }
        if let Some(v) = lookup("TAGSHIP_RESOLVE_COMMAND") {
            self.environment.resolve_command = v;
        }
        if let Some(v) = lookup("TAGSHIP_TEST_COMMAND") {
            self.test.command = v;
        }
        if let Some(v) = lookup("TAGSHIP_ALLOW_EMPTY_TESTS") {
            self.test.allow_empty = parse_bool("TAGSHIP_ALLOW_EMPTY_TESTS", &v)?;
        }
        if let Some(v) = lookup("TAGSHIP_BUILD_COMMAND") {
            self.build.command = v;
        }
        if let Some(v) = lookup("TAGSHIP_OUTPUT_DIR") {
            self.build.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TAGSHIP_ALLOW_PRERELEASE_TAGS") {
            self.trigger.allow_prerelease_tags = parse_bool("TAGSHIP_ALLOW_PRERELEASE_TAGS", &v)?;
        }
        if let Some(v) = lookup("TAGSHIP_LEDGER_DIR") {
            self.ledger_dir = PathBuf::from(v);
        }

        if let Some(v) = lookup("TAGSHIP_GITHUB_TOKEN").or_else(|| lookup("GITHUB_TOKEN")) {
            self.publish.token = Some(v);
        }
        if let Some(v) =
            lookup("TAGSHIP_GITHUB_REPOSITORY").or_else(|| lookup("GITHUB_REPOSITORY"))
        {
            self.publish.repository = Some(v);
        }
        Ok(())
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let commands = [
            ("environment.runtime", &self.environment.runtime),
            ("environment.installer_command", &self.environment.installer_command),
            ("environment.resolve_command", &self.environment.resolve_command),
            ("test.command", &self.test.command),
            ("build.command", &self.build.command),
        ];
        for (key, value) in commands {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{key} must not be empty")));
            }
        }

        let timeouts = [
            ("timeouts.provisioning_secs", self.timeouts.provisioning_secs),
            ("timeouts.testing_secs", self.timeouts.testing_secs),
            ("timeouts.building_secs", self.timeouts.building_secs),
            ("timeouts.publishing_secs", self.timeouts.publishing_secs),
        ];
        for (key, secs) in timeouts {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be positive")));
            }
        }

        self.trigger.tag_regex()?;

        if let Some(repo) = &self.publish.repository {
            if !is_owner_repo(repo) {
                return Err(ConfigError::InvalidValue {
                    key: "publish.repository".to_string(),
                    value: repo.clone(),
                });
            }
        }

        if self.publish.backend == PublishBackend::Filesystem && self.publish.fs_root.is_none() {
            return Err(ConfigError::Invalid(
                "publish.fs_root is required for the filesystem backend".to_string(),
            ));
        }
        Ok(())
    }

    /// SHA-256 over the serialized config, recorded with each run.
    /// The publish token is not part of the serialized form.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn is_owner_repo(repo: &str) -> bool {
    match repo.split_once('/') {
        Some((owner, name)) => !owner.is_empty() && !name.is_empty() && !name.contains('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_describe_poetry_project() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config.environment.runtime, "python3");
        assert_eq!(config.test.command, "poetry run pytest");
        assert_eq!(config.build.command, "poetry build");
        assert_eq!(config.build.output_dir, PathBuf::from("dist"));
        assert_eq!(config.ledger_dir, PathBuf::from(".tagship/runs"));
        assert_eq!(config.timeouts.testing_secs, 1800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_values_override_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [test]
            command = "pytest -q"
            allow_empty = true

            [timeouts]
            building_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.test.command, "pytest -q");
        assert!(config.test.allow_empty);
        assert_eq!(config.timeouts.building_secs, 60);
        assert_eq!(config.timeouts.publishing_secs, 600);
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("TAGSHIP_TEST_COMMAND", "make test"),
            ("TAGSHIP_ALLOW_EMPTY_TESTS", "yes"),
            ("GITHUB_TOKEN", "ghs_x"),
            ("GITHUB_REPOSITORY", "acme/widget"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config
            .apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.test.command, "make test");
        assert!(config.test.allow_empty);
        assert_eq!(config.publish.token.as_deref(), Some("ghs_x"));
        assert_eq!(config.publish.repository.as_deref(), Some("acme/widget"));
    }

    #[test]
    fn bad_bool_is_rejected() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == "TAGSHIP_ALLOW_EMPTY_TESTS").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = PipelineConfig::default();
        config.timeouts.testing_secs = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.trigger.tag_pattern = Some("(".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Pattern(_))));

        let mut config = PipelineConfig::default();
        config.publish.repository = Some("no-slash".to_string());
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.publish.backend = PublishBackend::Filesystem;
        assert!(config.validate().is_err());
    }

    #[test]
    fn digest_ignores_token() {
        let a = PipelineConfig::default();
        let mut b = PipelineConfig::default();
        b.publish.token = Some("secret".to_string());
        assert_eq!(a.digest(), b.digest());

        b.test.allow_empty = true;
        assert_ne!(a.digest(), b.digest());
    }
}

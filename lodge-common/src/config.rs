// lodge-common/src/config.rs
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LodgeError, Result};
use crate::model::{FetchRequest, FetchStrategy, SourceDescriptor};

const DEFAULT_CONFIG_FILENAME: &str = "lodge.toml";
const STATE_DIRNAME: &str = ".lodge";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub install_root: PathBuf,
    pub app_folder: String,
    pub entry_point: PathBuf,
    pub temp_archive_name: String,
    pub source: SourceDescriptor,
    pub strategies: Vec<FetchStrategy>,
    /// Attempts per strategy.
    pub max_retries: u32,
    /// Per-strategy attempt budgets, keyed by strategy name.
    pub strategy_retries: BTreeMap<String, u32>,
    #[serde(with = "duration_str")]
    pub backoff: Duration,
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
    #[serde(with = "duration_str")]
    pub connect_timeout: Duration,
    pub runner: RunnerConfig,
    pub dependencies: DependencyConfig,
}

pub const ENTRY_PLACEHOLDER: &str = "{entry}";
pub const FUNCTION_PLACEHOLDER: &str = "{function}";

/// Imports the entry point as a module and calls the named function.
pub const PYTHON_ENTRY_LOADER: &str = "\
import importlib.util, os, sys
path, function = sys.argv[1], sys.argv[2]
sys.path.insert(0, os.path.dirname(os.path.abspath(path)))
name = os.path.splitext(os.path.basename(path))[0]
spec = importlib.util.spec_from_file_location(name, path)
module = importlib.util.module_from_spec(spec)
sys.argv = [path]
spec.loader.exec_module(module)
getattr(module, function)()
";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub interpreter: String,
    /// Interpreter arguments. `{entry}` and `{function}` are replaced with the
    /// entry point and entry function; without `{entry}` the entry point is
    /// appended.
    pub args: Vec<String>,
    pub entry_function: String,
    /// Error text the host emits when its surface was configured twice.
    pub already_running_marker: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            args: vec![
                "-c".to_string(),
                PYTHON_ENTRY_LOADER.to_string(),
                ENTRY_PLACEHOLDER.to_string(),
                FUNCTION_PLACEHOLDER.to_string(),
            ],
            entry_function: "main".to_string(),
            already_running_marker: "set_page_config".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    pub command: Vec<String>,
    pub packages: Vec<String>,
    pub requirements_file: Option<PathBuf>,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
            ],
            packages: Vec::new(),
            requirements_file: Some(PathBuf::from("requirements.txt")),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            install_root: PathBuf::from("."),
            app_folder: "lifecheck".to_string(),
            entry_point: PathBuf::from("main.py"),
            temp_archive_name: "archive.zip".to_string(),
            source: SourceDescriptor::default(),
            strategies: FetchStrategy::ALL.to_vec(),
            max_retries: 3,
            strategy_retries: BTreeMap::new(),
            backoff: Duration::from_secs(2),
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            runner: RunnerConfig::default(),
            dependencies: DependencyConfig::default(),
        }
    }
}

impl Config {
    /// Loads `LODGE_CONFIG` or `./lodge.toml` when present, then applies
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = env::var("LODGE_CONFIG")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        debug!("Loading lodge configuration");
        let explicit = path.is_some();
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));

        let mut config = if path.is_file() {
            debug!("Reading configuration file {}", path.display());
            let text = fs::read_to_string(&path).map_err(|e| {
                LodgeError::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            Self::from_toml_str(&text)?
        } else if explicit {
            return Err(LodgeError::Config(format!(
                "Configuration file {} does not exist",
                path.display()
            )));
        } else {
            debug!("No {} found, using defaults", path.display());
            Self::default()
        };

        config.apply_env_overrides(|key| env::var(key).ok())?;
        debug!("Configuration loaded successfully.");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Overrides fields from `LODGE_*` variables. `lookup` is injectable so
    /// tests do not touch the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(root) = get("LODGE_ROOT") {
            self.install_root = PathBuf::from(root);
        }
        if let Some(source) = get("LODGE_SOURCE") {
            self.source.id = source;
        }
        if let Some(list) = get("LODGE_STRATEGIES") {
            self.strategies = list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(str::parse)
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(retries) = get("LODGE_MAX_RETRIES") {
            self.max_retries = retries.trim().parse().map_err(|e| {
                LodgeError::Config(format!("Invalid LODGE_MAX_RETRIES '{retries}': {e}"))
            })?;
        }
        if let Some(backoff) = get("LODGE_BACKOFF") {
            self.backoff = humantime::parse_duration(backoff.trim()).map_err(|e| {
                LodgeError::Config(format!("Invalid LODGE_BACKOFF '{backoff}': {e}"))
            })?;
        }
        Ok(())
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// The canonical root the application must live under.
    pub fn app_root(&self) -> PathBuf {
        self.install_root.join(&self.app_folder)
    }

    pub fn entry_point_path(&self) -> PathBuf {
        self.app_root().join(&self.entry_point)
    }

    pub fn temp_archive_path(&self) -> PathBuf {
        self.install_root.join(&self.temp_archive_name)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.install_root.join(STATE_DIRNAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }

    pub fn fetch_request(&self) -> Result<FetchRequest> {
        let mut request = FetchRequest::new(
            self.source.clone(),
            self.strategies.clone(),
            self.max_retries,
            self.backoff,
            self.temp_archive_path(),
        )?;
        for (name, attempts) in &self.strategy_retries {
            request = request.with_attempts_for(name.parse()?, *attempts);
        }
        Ok(request)
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

use crate::record::CheckRecord;
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

pub const DEPLOY_BINS: &str = "DEPLOY_BINS";
pub const DEPLOY_PATH: &str = "DEPLOY_PATH";
pub const DEPLOY_PATHS: &str = "DEPLOY_PATHS";
pub const DEPLOY_MAX_FILES: &str = "DEPLOY_MAX_FILES";

pub const DEFAULT_INSPECTOR: &str = "ldd";
pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Names or paths of individual entry points, in declaration order.
    pub deploy_bins: Vec<String>,
    /// Directories whose executable files are entry points.
    pub deploy_dirs: Vec<PathBuf>,
    /// Per-directory cap on files checked; `None` means unlimited.
    pub max_files_per_dir: Option<usize>,
    /// Directories searched for bare names, in order.
    pub search_path: Vec<PathBuf>,
    /// Program that lists the shared libraries of a native image.
    pub inspector: PathBuf,
    /// Run each clean top-level entry once and capture its output.
    pub capture_output: bool,
    pub launch_timeout: Duration,
    /// Records produced while reading the inputs themselves.
    pub input_records: Vec<CheckRecord>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            deploy_bins: Vec::new(),
            deploy_dirs: Vec::new(),
            max_files_per_dir: None,
            search_path: Vec::new(),
            inspector: PathBuf::from(DEFAULT_INSPECTOR),
            capture_output: false,
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
            input_records: Vec::new(),
        }
    }
}

impl ValidatorConfig {
    /// Builds a configuration from the process environment.
    ///
    /// Never fails: an absent or unreadable variable contributes no entries
    /// and leaves a skipped `input:<VAR>` record behind.
    pub fn from_env() -> Self {
        Self::from_source(&InputSource::from_env())
    }

    pub fn from_source(source: &InputSource) -> Self {
        let mut config = ValidatorConfig {
            search_path: source.search_path.clone(),
            ..Default::default()
        };

        config.deploy_bins = source.deploy_bins.as_deref().map(split_list).unwrap_or_default();
        if config.deploy_bins.is_empty() {
            config.input_records.push(absent(DEPLOY_BINS, "binaries"));
        }

        config.deploy_dirs = source
            .deploy_path
            .as_deref()
            .map(split_list)
            .unwrap_or_default()
            .into_iter()
            .map(PathBuf::from)
            .collect();
        if config.deploy_dirs.is_empty() {
            config.input_records.push(absent(DEPLOY_PATH, "directories"));
        }

        config.max_files_per_dir = source.max_files.as_deref().and_then(parse_cap);
        config
    }
}

fn absent(var: &str, what: &str) -> CheckRecord {
    CheckRecord::new(
        format!("input:{var}"),
        crate::Status::Skipped,
        format!("{var} not set or empty; no deploy {what} declared"),
    )
}

/// Raw, unparsed inputs. `None` marks a variable that is absent or not UTF-8.
#[derive(Debug, Clone, Default)]
pub struct InputSource {
    pub deploy_bins: Option<String>,
    pub deploy_path: Option<String>,
    pub max_files: Option<String>,
    pub search_path: Vec<PathBuf>,
}

impl InputSource {
    pub fn from_env() -> Self {
        let read = |var: &str| match env::var(var) {
            Ok(value) => Some(value),
            Err(env::VarError::NotPresent) => None,
            Err(env::VarError::NotUnicode(_)) => {
                log::warn!("{var} is not valid UTF-8; ignoring it");
                None
            }
        };

        Self {
            deploy_bins: read(DEPLOY_BINS),
            deploy_path: read(DEPLOY_PATH).or_else(|| read(DEPLOY_PATHS)),
            max_files: read(DEPLOY_MAX_FILES),
            search_path: search_path_from(env::var_os("PATH")),
        }
    }
}

/// Splits a colon-separated list, dropping empty segments.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `0` and unparsable values both mean "no cap".
pub fn parse_cap(raw: &str) -> Option<usize> {
    match raw.trim().parse::<usize>() {
        Ok(0) => None,
        Ok(n) => Some(n),
        Err(_) if raw.trim().is_empty() => None,
        Err(e) => {
            log::warn!("ignoring {DEPLOY_MAX_FILES}={raw:?}: {e}");
            None
        }
    }
}

pub fn search_path_from(raw: Option<OsString>) -> Vec<PathBuf> {
    raw.map(|p| env::split_paths(&p).filter(|d| !d.as_os_str().is_empty()).collect())
        .unwrap_or_default()
}

//! Configuration for a lectern run.
//!
//! Values are layered, later layers winning:
//!
//! 1. built-in defaults;
//! 2. a configuration file, either given explicitly or found as
//!    `lectern.{toml,yaml,yml,json}` in the platform configuration directory;
//! 3. environment variables prefixed with `LECTERN_`, nested with `__`
//!    (`LECTERN_DOWNLOAD__MAX_WORKERS=4`).
//!
//! Durations are written as whole milliseconds.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::{ProjectDirs, UserDirs};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use lectern_checksum::Sampling;
use lectern_download::SchedulerSettings;
use lectern_model::CourseFilter;
use lectern_throttle::ThrottleSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const ENV_PREFIX: &str = "LECTERN_";
const FILE_STEM: &str = "lectern";
const EXTENSIONS: [&str; 4] = ["toml", "yaml", "yml", "json"];

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", FILE_STEM)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    /// Download root. Every course gets a directory underneath.
    pub root: PathBuf,
    /// SQLite cache file.
    pub cache: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        let root = UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(FILE_STEM);
        let cache = project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cache.sqlite");
        Self { root, cache }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: Paths,
    pub download: SchedulerSettings,
    pub throttle: ThrottleSettings,
    pub checksum: Sampling,
    pub courses: CourseFilter,
    /// Split course directories by location or media kind.
    pub subdivide: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: Paths::default(),
            download: SchedulerSettings::default(),
            throttle: ThrottleSettings::default(),
            checksum: Sampling::default(),
            courses: CourseFilter::default(),
            subdivide: true,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let download = &self.download;
        if download.max_workers == 0 {
            exn::bail!(ErrorKind::Invalid("download.max_workers must be at least 1"));
        }
        if download.chunk_size == 0 {
            exn::bail!(ErrorKind::Invalid("download.chunk_size must be at least 1"));
        }
        if download.retry.connect_attempts == 0 || download.retry.read_attempts == 0 {
            exn::bail!(ErrorKind::Invalid("download.retry attempts must be at least 1"));
        }
        if !(download.retry.multiplier >= 1.0) {
            exn::bail!(ErrorKind::Invalid("download.retry.multiplier must be at least 1"));
        }

        let throttle = &self.throttle;
        if throttle.window.is_zero() {
            exn::bail!(ErrorKind::Invalid("throttle.window must be positive"));
        }
        if throttle.rate == Some(0) || throttle.stream_rate == Some(0) {
            exn::bail!(ErrorKind::Invalid("throttle rates must be positive, leave them unset for no limit"));
        }
        if !(throttle.search.alpha > 0.0 && throttle.search.alpha <= 1.0) {
            exn::bail!(ErrorKind::Invalid("throttle.alpha must be in (0, 1]"));
        }
        if !(throttle.search.unsampled_bonus >= 0.0 && throttle.search.hold_weight >= 0.0) {
            exn::bail!(ErrorKind::Invalid("throttle weights must not be negative"));
        }

        if self.checksum.base < 2 {
            exn::bail!(ErrorKind::Invalid("checksum.base must be at least 2"));
        }
        if self.checksum.default_window == 0 || self.checksum.windows.values().any(|w| *w == 0) {
            exn::bail!(ErrorKind::Invalid("checksum windows must be at least 1 byte"));
        }
        Ok(())
    }
}

/// Configuration file in the platform configuration directory, if any.
pub fn default_file() -> Option<PathBuf> {
    let dirs = project_dirs()?;
    EXTENSIONS.iter().map(|ext| dirs.config_dir().join(format!("{FILE_STEM}.{ext}"))).find(|path| path.is_file())
}

/// Load from defaults, the default configuration file and the environment.
pub fn load() -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    if let Some(file) = default_file() {
        figment = figment.merge(file_provider(&file)?);
    }
    extract(figment)
}

/// Load from defaults, `path` and the environment. The file must exist.
pub fn load_from(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.is_file() {
        exn::bail!(ErrorKind::Missing(path.to_path_buf()));
    }
    extract(Figment::from(Serialized::defaults(Config::default())).merge(file_provider(path)?))
}

fn file_provider(path: &Path) -> Result<Figment> {
    debug!(target: "config", path = %path.display(), "reading configuration file");
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => Figment::from(Toml::file(path)),
        Some("yaml" | "yml") => Figment::from(Yaml::file(path)),
        Some("json") => Figment::from(Json::file(path)),
        _ => exn::bail!(ErrorKind::Format(path.to_path_buf())),
    })
}

fn extract(figment: Figment) -> Result<Config> {
    let config: Config = figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract().or_raise(|| ErrorKind::Load)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use lectern_model::{CourseId, MediaKind};
    use rstest::rstest;
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.download.max_workers, 6);
        assert_eq!(config.download.chunk_size, 64 * 1024);
        assert_eq!(config.download.trusted_kinds, vec![MediaKind::Video]);
        assert_eq!(config.throttle.window, Duration::from_secs(3));
        assert_eq!(config.throttle.rate, None);
        assert!(config.subdivide);
        assert!(config.paths.root.ends_with("lectern"));
    }

    #[test]
    fn test_toml_file_and_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "lectern.toml",
                r#"
                subdivide = false

                [paths]
                root = "/srv/lectern"

                [download]
                max_workers = 3
                trusted_kinds = ["video", "extern"]

                [download.retry]
                static_sleep = 250

                [throttle]
                rate = 1048576
                window = 5000

                [checksum.windows]
                mp4 = 65536

                [courses]
                deny = [7]
                "#,
            )?;
            jail.set_env("LECTERN_DOWNLOAD__MAX_WORKERS", "4");
            jail.set_env("LECTERN_THROTTLE__ALPHA", "0.5");

            let config = load_from("lectern.toml").unwrap();
            assert!(!config.subdivide);
            assert_eq!(config.paths.root, PathBuf::from("/srv/lectern"));
            assert_eq!(config.download.max_workers, 4, "environment wins over the file");
            assert_eq!(config.download.trusted_kinds, vec![MediaKind::Video, MediaKind::Extern]);
            assert_eq!(config.download.retry.static_sleep, Duration::from_millis(250));
            assert_eq!(config.download.retry.connect_attempts, 4);
            assert_eq!(config.throttle.rate, Some(1_048_576));
            assert_eq!(config.throttle.window, Duration::from_secs(5));
            assert_eq!(config.throttle.search.alpha, 0.5);
            assert_eq!(config.checksum.windows.get("mp4"), Some(&65536));
            assert!(!config.courses.includes(CourseId(7)));
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file("lectern.yaml", "download:\n  chunk_size: 1024\ncourses:\n  allow: [1, 2]\n")?;
            let config = load_from("lectern.yaml").unwrap();
            assert_eq!(config.download.chunk_size, 1024);
            assert!(config.courses.includes(CourseId(2)));
            assert!(!config.courses.includes(CourseId(3)));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file() {
        let err = load_from("/definitely/not/here/lectern.toml").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Missing(_)));
    }

    #[test]
    fn test_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lectern.ini");
        std::fs::write(&path, "max_workers=1").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Format(_)));
    }

    #[test]
    fn test_malformed_value() {
        Jail::expect_with(|jail| {
            jail.create_file("lectern.json", r#"{"download": {"max_workers": "many"}}"#)?;
            let err = load_from("lectern.json").unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load));
            Ok(())
        });
    }

    #[rstest]
    #[case::no_workers(|c: &mut Config| c.download.max_workers = 0)]
    #[case::no_chunk(|c: &mut Config| c.download.chunk_size = 0)]
    #[case::no_attempts(|c: &mut Config| c.download.retry.connect_attempts = 0)]
    #[case::shrinking_timeout(|c: &mut Config| c.download.retry.multiplier = 0.5)]
    #[case::zero_window(|c: &mut Config| c.throttle.window = Duration::ZERO)]
    #[case::zero_rate(|c: &mut Config| c.throttle.rate = Some(0))]
    #[case::alpha_zero(|c: &mut Config| c.throttle.search.alpha = 0.0)]
    #[case::alpha_above_one(|c: &mut Config| c.throttle.search.alpha = 1.5)]
    #[case::base_one(|c: &mut Config| c.checksum.base = 1)]
    #[case::zero_sample_window(|c: &mut Config| { c.checksum.windows.insert("pdf".to_string(), 0); })]
    fn test_rejects(#[case] tweak: fn(&mut Config)) {
        let mut config = Config::default();
        tweak(&mut config);
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }
}

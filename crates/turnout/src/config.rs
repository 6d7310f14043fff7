use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use turnout_core::{FaceMatcher, MatchPolicy, DEFAULT_TOLERANCE};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("the postgres store needs database_url (TURNOUT_DATABASE_URL)")]
    MissingDatabaseUrl,
}

/// Which persistence backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Embedded SQLite database file.
    Sqlite,
    /// Remote PostgreSQL server.
    Postgres,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("expected sqlite or postgres, got {other}")),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        })
    }
}

/// Optional TOML config file. Every key may be overridden by a `TURNOUT_*` variable.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    model_dir: Option<PathBuf>,
    store: Option<StoreBackend>,
    db_path: Option<PathBuf>,
    database_url: Option<String>,
    tolerance: Option<f32>,
    match_policy: Option<MatchPolicy>,
    tick_ms: Option<u64>,
    recognition_interval_ms: Option<u64>,
    frame_width: Option<u32>,
    frame_height: Option<u32>,
    mirror: Option<bool>,
    directory_refresh_secs: Option<u64>,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub store: StoreBackend,
    /// SQLite database file (sqlite backend).
    pub db_path: PathBuf,
    /// Connection string (postgres backend).
    pub database_url: Option<String>,
    /// Maximum embedding distance for a match.
    pub tolerance: f32,
    pub match_policy: MatchPolicy,
    /// Display refresh period.
    pub tick_ms: u64,
    /// Minimum time between two recognition passes.
    pub recognition_interval_ms: u64,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Mirror frames horizontally for display and recognition.
    pub mirror: bool,
    /// Reload the user directory this often during a session (0 = never).
    pub directory_refresh_secs: u64,
}

impl Config {
    /// Load from the process environment and the optional config file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` for environment variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file = match config_file_path(&lookup) {
            Some(path) => read_file_config(&path)?,
            None => FileConfig::default(),
        };

        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("turnout");

        let config = Self {
            camera_device: lookup("TURNOUT_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            model_dir: lookup("TURNOUT_MODEL_DIR")
                .map(PathBuf::from)
                .or(file.model_dir)
                .unwrap_or_else(|| data_dir.join("models")),
            store: pick(&lookup, "TURNOUT_STORE", file.store, StoreBackend::Sqlite)?,
            db_path: lookup("TURNOUT_DB_PATH")
                .map(PathBuf::from)
                .or(file.db_path)
                .unwrap_or_else(|| data_dir.join("attendance.db")),
            database_url: lookup("TURNOUT_DATABASE_URL").or(file.database_url),
            tolerance: pick(&lookup, "TURNOUT_TOLERANCE", file.tolerance, DEFAULT_TOLERANCE)?,
            match_policy: pick(
                &lookup,
                "TURNOUT_MATCH_POLICY",
                file.match_policy,
                MatchPolicy::default(),
            )?,
            tick_ms: pick(&lookup, "TURNOUT_TICK_MS", file.tick_ms, 16)?,
            recognition_interval_ms: pick(
                &lookup,
                "TURNOUT_RECOGNITION_INTERVAL_MS",
                file.recognition_interval_ms,
                100,
            )?,
            frame_width: pick(&lookup, "TURNOUT_FRAME_WIDTH", file.frame_width, 640)?,
            frame_height: pick(&lookup, "TURNOUT_FRAME_HEIGHT", file.frame_height, 480)?,
            mirror: match lookup("TURNOUT_MIRROR") {
                Some(v) => v != "0" && !v.eq_ignore_ascii_case("false"),
                None => file.mirror.unwrap_or(true),
            },
            directory_refresh_secs: pick(
                &lookup,
                "TURNOUT_DIRECTORY_REFRESH_SECS",
                file.directory_refresh_secs,
                0,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(invalid("tolerance", self.tolerance, "must be a positive number"));
        }
        if self.tick_ms == 0 {
            return Err(invalid("tick_ms", self.tick_ms, "must be at least 1"));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(invalid(
                "frame_width/frame_height",
                format!("{}x{}", self.frame_width, self.frame_height),
                "must be non-zero",
            ));
        }
        if self.store == StoreBackend::Postgres && self.database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn recognition_interval(&self) -> Duration {
        Duration::from_millis(self.recognition_interval_ms)
    }

    pub fn directory_refresh(&self) -> Option<Duration> {
        (self.directory_refresh_secs > 0).then(|| Duration::from_secs(self.directory_refresh_secs))
    }

    pub fn matcher(&self) -> FaceMatcher {
        FaceMatcher::new(self.tolerance, self.match_policy)
    }
}

/// `TURNOUT_CONFIG`, else `$XDG_CONFIG_HOME/turnout/config.toml` when it exists.
fn config_file_path(lookup: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(explicit) = lookup("TURNOUT_CONFIG") {
        return Some(PathBuf::from(explicit));
    }
    let config_home = lookup("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| lookup("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    let path = config_home.join("turnout").join("config.toml");
    path.exists().then_some(path)
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Environment value if set, else file value, else default.
fn pick<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    from_file: Option<T>,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(from_file.unwrap_or(default)),
    }
}

fn invalid(key: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn scratch_file(tag: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "turnout-config-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[("HOME", "/home/ana")])).unwrap();

        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.store, StoreBackend::Sqlite);
        assert_eq!(
            config.db_path,
            PathBuf::from("/home/ana/.local/share/turnout/attendance.db")
        );
        assert_eq!(
            config.model_dir,
            PathBuf::from("/home/ana/.local/share/turnout/models")
        );
        assert_eq!(config.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(config.match_policy, MatchPolicy::Nearest);
        assert_eq!(config.tick(), Duration::from_millis(16));
        assert_eq!(config.recognition_interval(), Duration::from_millis(100));
        assert!(config.mirror);
        assert_eq!(config.directory_refresh(), None);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("HOME", "/home/ana"),
            ("TURNOUT_CAMERA_DEVICE", "/dev/video4"),
            ("TURNOUT_TOLERANCE", "0.45"),
            ("TURNOUT_MATCH_POLICY", "first"),
            ("TURNOUT_MIRROR", "0"),
            ("TURNOUT_DIRECTORY_REFRESH_SECS", "30"),
        ]))
        .unwrap();

        assert_eq!(config.camera_device, "/dev/video4");
        assert!((config.tolerance - 0.45).abs() < 1e-6);
        assert_eq!(config.match_policy, MatchPolicy::FirstWithinTolerance);
        assert!(!config.mirror);
        assert_eq!(config.directory_refresh(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = Config::from_lookup(lookup_from(&[("TURNOUT_TICK_MS", "fast")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TURNOUT_TICK_MS", .. }));

        let err = Config::from_lookup(lookup_from(&[("TURNOUT_TOLERANCE", "-1")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "tolerance", .. }));
    }

    #[test]
    fn test_postgres_requires_url() {
        let err = Config::from_lookup(lookup_from(&[("TURNOUT_STORE", "postgres")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDatabaseUrl));

        let config = Config::from_lookup(lookup_from(&[
            ("TURNOUT_STORE", "postgres"),
            ("TURNOUT_DATABASE_URL", "postgres://turnout@db/turnout"),
        ]))
        .unwrap();
        assert_eq!(config.store, StoreBackend::Postgres);
    }

    #[test]
    fn test_file_values_under_env() {
        let path = scratch_file(
            "file",
            r#"
                camera_device = "/dev/video7"
                store = "sqlite"
                tolerance = 0.5
                match_policy = "first_within_tolerance"
                recognition_interval_ms = 250
            "#,
        );
        let path_str = path.to_string_lossy().into_owned();
        let config = Config::from_lookup(lookup_from(&[
            ("TURNOUT_CONFIG", &path_str),
            ("TURNOUT_TOLERANCE", "0.55"),
        ]))
        .unwrap();

        assert_eq!(config.camera_device, "/dev/video7");
        assert_eq!(config.match_policy, MatchPolicy::FirstWithinTolerance);
        assert_eq!(config.recognition_interval(), Duration::from_millis(250));
        // Environment wins over the file
        assert!((config.tolerance - 0.55).abs() < 1e-6);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let path = scratch_file("unknown", "colour = \"blue\"\n");
        let path_str = path.to_string_lossy().into_owned();
        let err = Config::from_lookup(lookup_from(&[("TURNOUT_CONFIG", &path_str)])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}

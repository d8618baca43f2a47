//! Config file plumbing shared by the sender and receiver binaries.
//!
//! Both binaries keep their settings in a TOML file under one platform
//! directory:
//! - Windows:  `%APPDATA%\CastScreen\`
//! - Linux:    `$XDG_CONFIG_HOME/castscreen/` (or `~/.config/castscreen/`)
//! - macOS:    `~/Library/Application Support/CastScreen/`
//!
//! An environment variable may point at a different file.  Each binary owns
//! its schema; this module only locates, reads and validates.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// An address field does not hold an IP address.
    #[error("invalid {field} {value:?}: expected an IP address")]
    InvalidAddress { field: &'static str, value: String },
}

/// Parses `value` as an IP address, naming `field` in the error.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidAddress`] for anything but a literal IPv4 or
/// IPv6 address.  Host names are not resolved.
pub fn parse_ip(field: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidAddress {
            field,
            value: value.to_string(),
        })
}

/// Resolves a config file path: the file named by `env_var` if set, else
/// `file_name` inside [`platform_config_dir`].
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if neither is available.
pub fn config_file_path(env_var: &str, file_name: &str) -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(env_var) {
        return Ok(PathBuf::from(path));
    }
    platform_config_dir()
        .map(|dir| dir.join(file_name))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Reads and parses the TOML file at `path`, returning `T::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_toml_or_default<T>(path: &Path) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Resolves the platform config directory for CastScreen.
pub fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("CastScreen"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("castscreen"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("CastScreen")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use uuid::Uuid;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default = "default_port")]
        port: u16,
    }

    fn default_port() -> u16 {
        7
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                port: default_port(),
            }
        }
    }

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cast_core_config_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parse_ip_accepts_v4_and_v6() {
        assert_eq!(parse_ip("addr", " 10.0.0.7 ").unwrap().to_string(), "10.0.0.7");
        assert!(parse_ip("addr", "::1").unwrap().is_ipv6());
    }

    #[test]
    fn test_parse_ip_names_field_on_failure() {
        let err = parse_ip("broadcast_address", "phone.local").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidAddress { field: "broadcast_address", ref value } if value == "phone.local"
        ));
    }

    #[test]
    fn test_config_file_path_prefers_environment_variable() {
        // Arrange: a variable name no other test touches.
        let var = "CAST_CORE_TEST_CONFIG_PATH";
        std::env::set_var(var, "/tmp/elsewhere.toml");

        // Act
        let path = config_file_path(var, "ignored.toml");
        std::env::remove_var(var);

        // Assert
        assert_eq!(path.unwrap(), PathBuf::from("/tmp/elsewhere.toml"));
    }

    #[test]
    fn test_config_file_path_joins_file_name_to_platform_dir() {
        let var = "CAST_CORE_TEST_CONFIG_UNSET";
        std::env::remove_var(var);
        if let Some(dir) = platform_config_dir() {
            assert_eq!(config_file_path(var, "sender.toml").unwrap(), dir.join("sender.toml"));
        }
    }

    #[test]
    fn test_load_toml_or_default_reads_file() {
        // Arrange
        let dir = scratch_dir();
        let path = dir.join("sample.toml");
        std::fs::write(&path, "port = 9000\n").unwrap();

        // Act
        let sample: Sample = load_toml_or_default(&path).unwrap();

        // Assert
        assert_eq!(sample.port, 9000);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_toml_or_default_missing_file_returns_default() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/sample.toml");
        let sample: Sample = load_toml_or_default(&path).unwrap();
        assert_eq!(sample, Sample::default());
    }

    #[test]
    fn test_load_toml_or_default_reports_parse_error() {
        let dir = scratch_dir();
        let path = dir.join("sample.toml");
        std::fs::write(&path, "port = ").unwrap();

        let result: Result<Sample, _> = load_toml_or_default(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_toml_or_default_reports_directory_as_io_error() {
        let dir = scratch_dir();
        let result: Result<Sample, _> = load_toml_or_default(&dir);
        assert!(matches!(result, Err(ConfigError::Io { .. })));
        std::fs::remove_dir_all(&dir).ok();
    }
}

//! CLI configuration management.
//!
//! Reads/writes TOML at `~/.config/peerdrop/config.toml`. A missing file is
//! created with defaults on first load.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use peerdrop_protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_HIGH_WATER_MARK, DEFAULT_LOW_WATER_MARK};
use peerdrop_transfer::SenderConfig;
use peerdrop_webrtc::{DEFAULT_STUN_SERVER, WebRtcConfig};

const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8787";

/// On-disk config format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    relay_url: String,
    #[serde(default)]
    download_dir: String,
    #[serde(default)]
    chunk_size: usize,
    #[serde(default)]
    high_water_mark: usize,
    #[serde(default)]
    low_water_mark: usize,
    #[serde(default)]
    ice_servers: Option<Vec<String>>,
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub relay_url: String,
    pub download_dir: PathBuf,
    pub chunk_size: usize,
    pub high_water_mark: usize,
    pub low_water_mark: usize,
    /// STUN/TURN URLs. Empty means host candidates only.
    pub ice_servers: Vec<String>,
    file_path: PathBuf,
}

fn default_download_dir() -> PathBuf {
    home_dir().join("Downloads")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.into(),
            download_dir: default_download_dir(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            low_water_mark: DEFAULT_LOW_WATER_MARK,
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            file_path: config_file_path(),
        }
    }
}

impl Config {
    /// Loads configuration from the default location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(config_file_path())
    }

    /// Loads configuration from `file_path`, writing defaults if it is missing.
    pub fn load_from(file_path: PathBuf) -> anyhow::Result<Self> {
        let mut config = Config {
            file_path: file_path.clone(),
            ..Default::default()
        };

        if !file_path.exists() {
            config.save()?;
            tracing::info!(path = %file_path.display(), "wrote default config");
            return Ok(config);
        }

        let content = std::fs::read_to_string(&file_path)?;
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => config.apply(file),
            Err(e) => {
                tracing::warn!(
                    path = %file_path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
            }
        }

        Ok(config)
    }

    fn apply(&mut self, file: ConfigFile) {
        if !file.relay_url.trim().is_empty() {
            self.relay_url = file.relay_url;
        }
        if !file.download_dir.trim().is_empty() {
            self.download_dir = expand_home(&file.download_dir);
        }
        if file.chunk_size > 0 {
            self.chunk_size = file.chunk_size;
        }
        if file.high_water_mark > 0 {
            self.high_water_mark = file.high_water_mark;
        }
        if file.low_water_mark > 0 {
            self.low_water_mark = file.low_water_mark;
        }
        if let Some(servers) = file.ice_servers {
            self.ice_servers = servers;
        }
    }

    /// Saves configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = ConfigFile {
            relay_url: self.relay_url.clone(),
            download_dir: self.download_dir.display().to_string(),
            chunk_size: self.chunk_size,
            high_water_mark: self.high_water_mark,
            low_water_mark: self.low_water_mark,
            ice_servers: Some(self.ice_servers.clone()),
        };

        let text = toml::to_string_pretty(&file)?;
        std::fs::write(&self.file_path, text)?;
        set_permissions_0600(&self.file_path);

        tracing::debug!(path = %self.file_path.display(), "configuration saved");
        Ok(())
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            chunk_size: self.chunk_size,
            high_water_mark: self.high_water_mark,
            low_water_mark: self.low_water_mark,
        }
    }

    pub fn webrtc_config(&self) -> WebRtcConfig {
        WebRtcConfig {
            ice_servers: self.ice_servers.clone(),
            low_water_mark: self.low_water_mark,
        }
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None if path == "~" => home_dir(),
        None => PathBuf::from(path),
    }
}

fn home_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let var = "USERPROFILE";
    #[cfg(not(target_os = "windows"))]
    let var = "HOME";
    std::env::var_os(var)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

fn config_file_path() -> PathBuf {
    config_base_dir().join("peerdrop").join("config.toml")
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(home_dir)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .filter(|p| p.is_absolute())
            .unwrap_or_else(|| home_dir().join(".config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("peerdrop").join("config.toml");

        let config = Config::load_from(path.clone()).unwrap();
        assert!(path.exists());
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.ice_servers, vec![DEFAULT_STUN_SERVER.to_string()]);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "relay_url = \"wss://relay.example.org\"\nchunk_size = 4096\n",
        )
        .unwrap();

        let config = Config::load_from(path).unwrap();
        assert_eq!(config.relay_url, "wss://relay.example.org");
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.high_water_mark, DEFAULT_HIGH_WATER_MARK);
        assert_eq!(config.low_water_mark, DEFAULT_LOW_WATER_MARK);
    }

    #[test]
    fn empty_ice_servers_are_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "ice_servers = []\n").unwrap();

        let config = Config::load_from(path).unwrap();
        assert!(config.ice_servers.is_empty());
        assert!(config.webrtc_config().ice_servers.is_empty());
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "chunk_size = \"lots\"").unwrap();

        let config = Config::load_from(path.clone()).unwrap();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "chunk_size = \"lots\"");
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::load_from(path.clone()).unwrap();
        config.download_dir = dir.path().join("inbox");
        config.low_water_mark = 1024;
        config.save().unwrap();

        let loaded = Config::load_from(path).unwrap();
        assert_eq!(loaded.download_dir, dir.path().join("inbox"));
        assert_eq!(loaded.sender_config().low_water_mark, 1024);
        assert_eq!(loaded.webrtc_config().low_water_mark, 1024);
    }

    #[test]
    fn tilde_paths_expand() {
        assert_eq!(expand_home("~/Downloads"), home_dir().join("Downloads"));
        assert_eq!(expand_home("/srv/in"), PathBuf::from("/srv/in"));
    }
}

//! Application settings, loaded from an optional JSON file

use log::info;
use queue_dl::QueueConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// UPnP friendly name of the recorder to look for
    pub device_name: String,
    /// Fixed recorder address; skips waiting for discovery before FTP
    pub host: Option<String>,
    /// Fixed device description URL; skips the SSDP search
    pub location: Option<String>,
    pub ftp_port: u16,
    pub ftp_user: String,
    pub ftp_password: String,
    pub ftp_root: String,
    pub root_container: String,
    pub page_size: u32,
    pub search_seconds: u64,
    pub media_ext: String,
    pub sidecar_ext: String,
    pub rename_marker: String,
    pub download_dir: PathBuf,
    pub move_dir: Option<PathBuf>,
    pub progress_interval_ms: u64,
    pub rate_samples: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_name: "HUMAX HDR-FOX T2".to_string(),
            host: None,
            location: None,
            ftp_port: 21,
            ftp_user: "humaxftp".to_string(),
            ftp_password: "0000".to_string(),
            ftp_root: "/My Video".to_string(),
            root_container: "0".to_string(),
            page_size: 50,
            search_seconds: 5,
            media_ext: ".ts".to_string(),
            sidecar_ext: ".hmt".to_string(),
            rename_marker: "_".to_string(),
            download_dir: PathBuf::from("recordings"),
            move_dir: None,
            progress_interval_ms: 500,
            rate_samples: 10,
        }
    }
}

impl AppConfig {
    /// Read settings from `path`; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        let config: AppConfig = serde_json::from_str(&text)
            .map_err(|e| format!("Failed to parse config {}: {}", path.display(), e))?;
        info!("config: loaded {}", path.display());
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self, String> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        let mut config = QueueConfig::new(self.download_dir.clone());
        config.move_dir = self.move_dir.clone();
        config.progress_interval = Duration::from_millis(self.progress_interval_ms);
        config.rate_samples = self.rate_samples;
        config
    }

    pub fn search_window(&self) -> Duration {
        Duration::from_secs(self.search_seconds.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "host": "192.168.1.20", "page_size": 10 }}"#).unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.host.as_deref(), Some("192.168.1.20"));
        assert_eq!(config.page_size, 10);
        assert_eq!(config.ftp_user, "humaxftp");
        assert_eq!(config.ftp_root, "/My Video");
        assert_eq!(config.media_ext, ".ts");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(err.starts_with("Failed to parse config"));
        assert!(AppConfig::load(Path::new("/nonexistent/recsync.json")).is_err());
    }

    #[test]
    fn queue_config_follows_settings() {
        let config = AppConfig {
            move_dir: Some(PathBuf::from("/archive")),
            progress_interval_ms: 250,
            ..AppConfig::default()
        };
        let queue = config.queue_config();
        assert_eq!(queue.download_dir, PathBuf::from("recordings"));
        assert_eq!(queue.move_dir, Some(PathBuf::from("/archive")));
        assert_eq!(queue.progress_interval, Duration::from_millis(250));
        assert_eq!(queue.rate_samples, 10);
    }
}

use serde::{Deserialize, Serialize};
use std::path::Path;

use healfs_heal::scheduler::HealConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MgmtConfig {
    pub poll_interval_ms: u64,
    pub monitor_timeout_ms: u64,
    pub heal_workers: usize,
    pub lease_ttl_ms: u64,
    pub queue_depth: usize,
}

impl Default for MgmtConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            monitor_timeout_ms: 1_200_000,
            heal_workers: 4,
            lease_ttl_ms: 30_000,
            queue_depth: 256,
        }
    }
}

impl MgmtConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: MgmtConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: MgmtConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    pub fn heal_config(&self) -> HealConfig {
        HealConfig {
            workers: self.heal_workers,
            lease_ttl_ms: self.lease_ttl_ms,
            queue_depth: self.queue_depth,
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    pub fn monitor_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.monitor_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = MgmtConfig::default();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.monitor_timeout_ms, 1_200_000);
        assert_eq!(config.heal_workers, 4);
        assert_eq!(config.lease_ttl_ms, 30_000);
    }

    #[test]
    fn test_heal_config_mapping() {
        let config = MgmtConfig {
            heal_workers: 8,
            lease_ttl_ms: 5_000,
            queue_depth: 32,
            ..MgmtConfig::default()
        };
        let heal = config.heal_config();
        assert_eq!(heal.workers, 8);
        assert_eq!(heal.lease_ttl_ms, 5_000);
        assert_eq!(heal.queue_depth, 32);
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "poll_interval_ms = 100\nmonitor_timeout_ms = 60000\nheal_workers = 2\nlease_ttl_ms = 1000\nqueue_depth = 16"
        )
        .unwrap();

        let config = MgmtConfig::from_file(file.path()).unwrap();
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.heal_workers, 2);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{
                "poll_interval_ms": 50,
                "monitor_timeout_ms": 30000,
                "heal_workers": 1,
                "lease_ttl_ms": 2000,
                "queue_depth": 8
            }}"#
        )
        .unwrap();

        let config = MgmtConfig::from_file(file.path()).unwrap();
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.queue_depth, 8);
    }

    #[test]
    fn test_from_file_rejects_unknown_extension() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "poll_interval_ms: 1").unwrap();
        assert!(MgmtConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = MgmtConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let decoded: MgmtConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.poll_interval_ms, config.poll_interval_ms);
        assert_eq!(decoded.monitor_timeout_ms, config.monitor_timeout_ms);
    }
}

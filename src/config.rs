use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("guardian count must be at least 1")]
    NoGuardians,
    #[error("quorum too small: {0} < 1")]
    QuorumTooSmall(u32),
    #[error("quorum {0} exceeds guardian count {1}")]
    QuorumExceedsGuardians(u32, u32),
    #[error("worker count must be at least 1")]
    NoWorkers,
}

/// Guardian count `n`, quorum `k` and the worker-pool size used by the
/// ceremony, tally and decryption runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionConfig {
    pub guardians: u32,
    pub quorum: u32,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl ElectionConfig {
    pub fn new(guardians: u32, quorum: u32) -> Result<Self, ConfigError> {
        let config = ElectionConfig {
            guardians,
            quorum,
            workers: default_workers(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_workers(mut self, workers: usize) -> Result<Self, ConfigError> {
        self.workers = workers;
        self.validate()?;
        Ok(self)
    }

    /// Must be called on any config obtained through deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.guardians < 1 {
            return Err(ConfigError::NoGuardians);
        }
        if self.quorum < 1 {
            return Err(ConfigError::QuorumTooSmall(self.quorum));
        }
        if self.quorum > self.guardians {
            return Err(ConfigError::QuorumExceedsGuardians(self.quorum, self.guardians));
        }
        if self.workers < 1 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates() {
        assert!(ElectionConfig::new(5, 3).is_ok());
        assert!(ElectionConfig::new(1, 1).is_ok());
        assert_eq!(ElectionConfig::new(0, 0), Err(ConfigError::NoGuardians));
        assert_eq!(ElectionConfig::new(3, 0), Err(ConfigError::QuorumTooSmall(0)));
        assert_eq!(
            ElectionConfig::new(3, 4),
            Err(ConfigError::QuorumExceedsGuardians(4, 3))
        );
    }

    #[test]
    fn test_with_workers() {
        let config = ElectionConfig::new(3, 2).unwrap();
        assert_eq!(config.clone().with_workers(4).unwrap().workers, 4);
        assert_eq!(config.with_workers(0), Err(ConfigError::NoWorkers));
    }

    #[test]
    fn test_deserialize_defaults_workers() {
        let config: ElectionConfig =
            serde_json::from_str(r#"{"guardians": 6, "quorum": 3}"#).unwrap();
        assert_eq!(config.guardians, 6);
        assert_eq!(config.quorum, 3);
        assert!(config.workers >= 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_deserialized_config_still_validated() {
        let config: ElectionConfig =
            serde_json::from_str(r#"{"guardians": 2, "quorum": 5, "workers": 1}"#).unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigError::QuorumExceedsGuardians(5, 2))
        );
    }
}

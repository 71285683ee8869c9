use std::path::Path;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Configuration file picked up from the working directory when no path is given.
pub const CONFIG_FILE: &str = "ouichefs.toml";

/// Prefix for environment overrides, e.g. `OUICHEFS__LRU__TIMESTAMP=access`.
pub const ENV_PREFIX: &str = "OUICHEFS__";

/// Inode timestamp the LRU policy compares.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampField {
    /// Last access time (atime).
    Access,
    /// Last content modification time (mtime).
    Modify,
    /// Last status change time (ctime).
    #[default]
    Change,
}

impl std::fmt::Display for TimestampField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimestampField::Access => write!(f, "access time"),
            TimestampField::Modify => write!(f, "modification time"),
            TimestampField::Change => write!(f, "change time"),
        }
    }
}

/// When the LRU policy replaces its current candidate with a newly visited leaf.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Replacement {
    /// Replace unless the leaf is strictly older than the candidate
    /// (ties and newer leaves win). This is the shipped behaviour.
    #[default]
    NotOlder,
    /// Replace only when the leaf is strictly older: a true global-oldest pick.
    StrictlyOlder,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Free-space percentage below which the filesystem asks for a clean.
    /// Evaluated by the volume itself, carried here so operators can see it.
    pub trigger_threshold: u32,
    /// Policy made active at startup once the built-in policies are registered.
    #[serde(default)]
    pub default_policy: Option<String>,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            trigger_threshold: 20,
            default_policy: None,
        }
    }
}

/// Settings of the LRU policy, fixed when the policy is constructed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LruConfig {
    #[serde(default)]
    pub timestamp: TimestampField,
    #[serde(default)]
    pub replacement: Replacement,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Policy-independent eviction settings
    pub eviction: EvictionConfig,
    /// LRU policy settings
    pub lru: LruConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::extract(Self::defaults().merge(Toml::file(CONFIG_FILE)))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::extract(Self::defaults().merge(Toml::file(path)))
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
    }

    fn extract(figment: Figment) -> Result<Self, Box<figment::Error>> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)
    }

    /// Reject values that cannot mean anything.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.eviction.trigger_threshold > 100 {
            anyhow::bail!(
                "eviction.trigger_threshold is a percentage, got {}",
                self.eviction.trigger_threshold
            );
        }

        if let Some(name) = &self.eviction.default_policy {
            if name.is_empty() {
                anyhow::bail!("eviction.default_policy cannot be empty when set");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();

        assert_eq!(config.eviction.trigger_threshold, 20);
        assert!(config.eviction.default_policy.is_none());
        assert_eq!(config.lru.timestamp, TimestampField::Change);
        assert_eq!(config.lru.replacement, Replacement::NotOlder);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configless_operation() {
        Jail::expect_with(|_jail| {
            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.eviction.trigger_threshold, 20);
            assert_eq!(config.lru, LruConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                [eviction]
                trigger_threshold = 35
                default_policy = "size"

                [lru]
                timestamp = "access"
                "#,
            )?;

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.eviction.trigger_threshold, 35);
            assert_eq!(config.eviction.default_policy.as_deref(), Some("size"));
            assert_eq!(config.lru.timestamp, TimestampField::Access);
            assert_eq!(config.lru.replacement, Replacement::NotOlder);
            Ok(())
        });
    }

    #[test]
    fn test_env_var_override() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[lru]\ntimestamp = \"modify\"\n")?;
            jail.set_env("OUICHEFS__LRU__REPLACEMENT", "strictly_older");
            jail.set_env("OUICHEFS__EVICTION__TRIGGER_THRESHOLD", "5");

            let config =
                Configuration::load_from_path(Path::new("custom.toml")).map_err(|e| *e)?;
            assert_eq!(config.lru.timestamp, TimestampField::Modify);
            assert_eq!(config.lru.replacement, Replacement::StrictlyOlder);
            assert_eq!(config.eviction.trigger_threshold, 5);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_timestamp_field() {
        Jail::expect_with(|jail| {
            jail.set_env("OUICHEFS__LRU__TIMESTAMP", "birth");
            assert!(Configuration::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn test_threshold_above_hundred_is_invalid() {
        let config = Configuration {
            eviction: EvictionConfig {
                trigger_threshold: 101,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::warn;
use std::fs::File;
use std::io::prelude::*;

use crate::exception::Exception;
use crate::param::{CLIENT_NAME, REQUEST_CACHE_DB_NAME};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default = "default_cache_db")]
    cache_db: String,
    /// 缺省时不限条数
    #[serde(default)]
    max_cache_records: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default)]
    cache_control: Option<String>,
    #[serde(default = "default_user_agent")]
    user_agent: String,
}

fn default_cache_db() -> String {
    REQUEST_CACHE_DB_NAME.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("{}/{}", CLIENT_NAME, env!("CARGO_PKG_VERSION"))
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            base_url: None,
            cache_db: default_cache_db(),
            max_cache_records: None,
            timeout_secs: default_timeout_secs(),
            worker_threads: num_cpus::get(),
            cache_control: None,
            user_agent: default_user_agent(),
        }
    }

    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let mut file = File::open(filename)
            .map_err(|e| Exception::ConfigUnreadable(format!("{}: {}", filename, e)))?;
        let mut str_val = String::new();
        file.read_to_string(&mut str_val)
            .map_err(|e| Exception::ConfigUnreadable(format!("{}: {}", filename, e)))?;
        Self::from_toml_str(&str_val)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, Exception> {
        let mut raw_config: Config =
            toml::from_str(content).map_err(|e| Exception::ConfigInvalid(e.to_string()))?;
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if raw_config.max_cache_records == Some(0) {
            warn!("max_cache_records被设置为0，但目前尚不支持禁用响应缓存，因此将不限制缓存条数。");
            raw_config.max_cache_records = None;
        }
        if raw_config.timeout_secs == 0 {
            warn!("timeout_secs被设置为0，该值将被改为{}。", default_timeout_secs());
            raw_config.timeout_secs = default_timeout_secs();
        }
        if raw_config.base_url.as_deref() == Some("") {
            raw_config.base_url = None;
        }
        Ok(raw_config)
    }
}

impl Config {
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn cache_db(&self) -> &str {
        &self.cache_db
    }

    pub fn max_cache_records(&self) -> Option<usize> {
        self.max_cache_records
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn cache_control(&self) -> Option<&str> {
        self.cache_control.as_deref()
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// 缺省的字段使用默认值
    #[test]
    fn test_defaults_applied() {
        let config = Config::from_toml_str("base_url = \"https://api.test\"").unwrap();
        assert_eq!(config.base_url(), Some("https://api.test"));
        assert_eq!(config.cache_db(), "httprequest.db");
        assert_eq!(config.max_cache_records(), None);
        assert_eq!(config.timeout_secs(), 30);
        assert!(config.worker_threads() > 0);
        assert!(config.cache_control().is_none());
    }

    #[test]
    fn test_zero_values_fall_back() {
        let config = Config::from_toml_str("max_cache_records = 0\ntimeout_secs = 0\nworker_threads = 0").unwrap();
        assert_eq!(config.max_cache_records(), None);
        assert_eq!(config.timeout_secs(), 30);
        assert_eq!(config.worker_threads(), num_cpus::get());
    }

    /// 上限只在显式配置时生效
    #[test]
    fn test_cache_bound_is_opt_in() {
        let config = Config::from_toml_str("max_cache_records = 200").unwrap();
        assert_eq!(config.max_cache_records(), Some(200));
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml_str("timeout_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, Exception::ConfigInvalid(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "cache_db = \"cache.json\"\ncache_control = \"no-cache\"").unwrap();
        let config = Config::from_toml(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.cache_db(), "cache.json");
        assert_eq!(config.max_cache_records(), None);
        assert_eq!(config.cache_control(), Some("no-cache"));

        let err = Config::from_toml("/nonexistent/httprequest.toml").unwrap_err();
        assert!(matches!(err, Exception::ConfigUnreadable(_)));
    }
}

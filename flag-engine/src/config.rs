use envconfig::Envconfig;
use once_cell::sync::Lazy;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    // without the far tier every instance caches in-process only and peers
    // converge on TTL expiry alone
    #[envconfig(default = "true")]
    pub far_cache_enabled: FlexBool,

    #[envconfig(default = "10")]
    pub near_cache_ttl_seconds: u64,

    #[envconfig(default = "60")]
    pub far_cache_ttl_seconds: u64,

    #[envconfig(default = "10000")]
    pub near_cache_max_entries: u64,

    #[envconfig(default = "50")]
    pub far_cache_timeout_ms: u64,

    #[envconfig(default = "1000")]
    pub repository_timeout_ms: u64,

    #[envconfig(default = "30")]
    pub sweep_interval_seconds: u64,

    #[envconfig(default = "1024")]
    pub invalidation_listener_capacity: usize,

    #[envconfig(default = "flag_engine:")]
    pub cache_key_prefix: String,
}

pub static DEFAULT_TEST_CONFIG: Lazy<Config> = Lazy::new(|| Config {
    redis_url: "redis://localhost:6379/".to_string(),
    far_cache_enabled: FlexBool(true),
    near_cache_ttl_seconds: 10,
    far_cache_ttl_seconds: 60,
    near_cache_max_entries: 10_000,
    far_cache_timeout_ms: 50,
    repository_timeout_ms: 1000,
    sweep_interval_seconds: 30,
    invalidation_listener_capacity: 1024,
    cache_key_prefix: "flag_engine:".to_string(),
});

impl Config {
    pub fn default_test_config() -> Self {
        DEFAULT_TEST_CONFIG.clone()
    }

    pub fn near_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.near_cache_ttl_seconds)
    }

    pub fn far_cache_timeout(&self) -> Duration {
        Duration::from_millis(self.far_cache_timeout_ms)
    }

    pub fn repository_timeout(&self) -> Duration {
        Duration::from_millis(self.repository_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

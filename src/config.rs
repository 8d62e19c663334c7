use std::error::Error;
use std::time::Duration;

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::fs;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:443";
const DEFAULT_DIAL_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub listen: Option<String>,
    pub dial_timeout_ms: Option<u64>,
    pub log_config_file: Option<String>,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(with = "serde_regex", default)]
    pub patterns: Vec<Regex>,
    pub backend: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: None,
            dial_timeout_ms: None,
            log_config_file: None,
            routes: Vec::new(),
        }
    }
}

impl Config {
    pub async fn load_file(filename: &str) -> Result<Config, Box<dyn Error + Send + Sync>> {
        let content = fs::read_to_string(filename).await?;
        Self::load_string(&content)
    }

    pub fn load_string(content: &str) -> Result<Config, Box<dyn Error + Send + Sync>> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> &str {
        self.listen.as_deref().unwrap_or(DEFAULT_LISTEN)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms.unwrap_or(DEFAULT_DIAL_TIMEOUT_MS))
    }

    /// Look up the backend for a hostname. Empty and unmatched hostnames both
    /// yield None. Exact names compare ASCII-case-insensitively, patterns run
    /// against the name as sent; the first matching route wins.
    pub fn match_host(&self, host: &str) -> Option<String> {
        if host.is_empty() {
            return None;
        }
        for route in &self.routes {
            if route.matches(host) {
                return Some(route.backend.clone());
            }
        }
        None
    }

    pub fn init_logging(&self) {
        match &self.log_config_file {
            Some(file) if !file.is_empty() => {
                let result = log4rs::init_file(file, Default::default());
                match result {
                    Err(cause) => {
                        println!("failed to initialize logging from `{file}`: {cause}");
                    }
                    Ok(_) => {
                        println!("initialized logging from `{file}`");
                    }
                }
            }
            _ => {
                init_console_logging();
            }
        }
    }
}

impl Route {
    fn matches(&self, host: &str) -> bool {
        for name in &self.hostnames {
            if host.eq_ignore_ascii_case(name) {
                return true;
            }
        }
        for pattern in &self.patterns {
            if pattern.is_match(host) {
                return true;
            }
        }
        false
    }
}

fn init_console_logging() {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%dT%H:%M:%S%.3f)} {h({l:>5})} - {m}{n}",
        )))
        .build();
    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match config {
        Ok(config) => {
            let _ = log4rs::init_config(config);
        }
        Err(cause) => {
            println!("failed to build console logging config: {cause}");
        }
    }
}

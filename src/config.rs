use std::env;
use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credentials: set LIBRARY_USERNAME and LIBRARY_PASSWORD (environment or .env)")]
    MissingCredentials,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub username: String,
    pub password: String,
    /// Set HEADLESS=0 locally to watch the browser.
    pub headless: bool,
    /// CHROME_BIN, respected in CI where the browser lives off the PATH.
    pub chrome_binary: Option<PathBuf>,
    pub webdriver_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let username = non_empty_var("LIBRARY_USERNAME");
        let password = non_empty_var("LIBRARY_PASSWORD");
        let (Some(username), Some(password)) = (username, password) else {
            return Err(ConfigError::MissingCredentials);
        };

        Ok(Config {
            username,
            password,
            headless: env::var("HEADLESS").map(|v| v != "0").unwrap_or(true),
            chrome_binary: non_empty_var("CHROME_BIN").map(PathBuf::from),
            webdriver_url: non_empty_var("WEBDRIVER_URL")
                .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string()),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

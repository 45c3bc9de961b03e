use std::env;

use thiserror::Error;

const DEFAULT_EMAIL_FROM: &str = "Desert Paddleboards <info@desertpaddleboards.com>";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Secret used to verify `stripe-signature` headers
    pub stripe_webhook_secret: String,
    /// Shared secret the asset-delivery worker presents in `x-caller-secret`
    pub download_worker_secret: String,
    /// Where browsers are redirected to stream a purchase (None = downloads unavailable)
    pub download_worker_url: Option<String>,
    /// Public base URL used for links in confirmation emails
    pub public_base_url: String,
    pub resend_api_key: Option<String>,
    pub email_from: String,
    pub dev_mode: bool,
}

/// Read a required, non-empty environment variable.
fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("FULFILLMENT_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let public_base_url = optional("PUBLIC_API_BASE_URL")
            .unwrap_or_else(|| format!("http://{}:{}", host, port));

        Ok(Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "fulfillment.db".to_string()),
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            download_worker_secret: required("DOWNLOAD_WORKER_SECRET")?,
            download_worker_url: optional("DOWNLOAD_WORKER_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            resend_api_key: optional("RESEND_API_KEY"),
            email_from: optional("EMAIL_FROM").unwrap_or_else(|| DEFAULT_EMAIL_FROM.to_string()),
            dev_mode,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

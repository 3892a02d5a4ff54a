use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub drive: Option<DriveConfig>,
    pub email: Option<EmailConfig>,
    pub cache: CacheConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

/// S3-compatible object storage used for generated quotation PDFs.
#[derive(Clone, Debug)]
pub struct DriveConfig {
    pub server: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = std::env::var("SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        let base_url = std::env::var("SERVER_BASE_URL")
            .unwrap_or_else(|_| format!("http://{host}:{port}"));

        let drive = match std::env::var("DRIVE_SERVER") {
            Ok(server) => Some(DriveConfig {
                server,
                access_key: std::env::var("DRIVE_ACCESS_KEY")
                    .context("DRIVE_ACCESS_KEY is required when DRIVE_SERVER is set")?,
                secret_key: std::env::var("DRIVE_SECRET_KEY")
                    .context("DRIVE_SECRET_KEY is required when DRIVE_SERVER is set")?,
                bucket: std::env::var("DRIVE_BUCKET").unwrap_or_else(|_| "tripserver".to_string()),
            }),
            Err(_) => None,
        };

        let email = match std::env::var("SMTP_SERVER") {
            Ok(smtp_server) => Some(EmailConfig {
                smtp_server,
                smtp_port: std::env::var("SMTP_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(587),
                username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
                password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
                from: std::env::var("EMAIL_FROM")
                    .context("EMAIL_FROM is required when SMTP_SERVER is set")?,
            }),
            Err(_) => None,
        };

        let cache = CacheConfig {
            enabled: std::env::var("CACHE_ENABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            default_ttl_secs: std::env::var("CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        };

        Ok(Self {
            server: ServerConfig {
                host,
                port,
                base_url,
            },
            drive,
            email,
            cache,
        })
    }
}

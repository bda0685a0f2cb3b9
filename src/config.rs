use std::{env, str::FromStr};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone, Copy)]
pub enum AppEnv {
    Development,
    Staging,
    Production,
}

impl FromStr for AppEnv {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(AppEnv::Development),
            "staging" | "stage" => Ok(AppEnv::Staging),
            "production" | "prod" => Ok(AppEnv::Production),
            _ => Ok(AppEnv::Development), // default if unknown
        }
    }
}

/// SMTP transport settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
    /// Sender address; falls back to the username when unset.
    pub from_email: Option<String>,
}

impl SmtpConfig {
    pub fn from_address(&self) -> &str {
        self.from_email.as_deref().unwrap_or(&self.username)
    }
}

/// Ollama text-generation settings.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub model: String,
    pub host: Option<String>,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub env: AppEnv,
    /// Unset is tolerated at load time; the server refuses to start without
    /// it, while the bulk-send CLI never opens a database.
    pub database_url: Option<String>,
    pub http_port: u16,

    pub smtp: SmtpConfig,
    pub ollama: OllamaConfig,
}

/// Entry point to load configuration
pub fn load() -> Result<Config> {
    load_dotenv()?;
    Config::from_env()
}

/// Like [`load`], but reads `env_file` first instead of the default `.env`.
/// Used by the bulk-send CLI's `--env-file` flag.
pub fn load_from(env_file: &str) -> Result<Config> {
    let _ = dotenvy::from_filename(env_file);
    Config::from_env()
}

/// Load .env base, then .env.{APP_ENV}
fn load_dotenv() -> Result<()> {
    // 1. Load base .env (if it exists)
    let _ = dotenvy::dotenv();

    // 2. Read APP_ENV from env (may come from .env)
    let env_name = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

    // 3. Try to load .env.{APP_ENV}, e.g. .env.development
    let filename = format!(".env.{}", env_name);
    let _ = dotenvy::from_filename(&filename);

    Ok(())
}

impl Config {
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| "DATABASE_URL env var is required".into())
    }

    pub fn from_env() -> Result<Self> {
        let env_str = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let env = AppEnv::from_str(&env_str).unwrap_or(AppEnv::Development);

        let database_url = env::var("DATABASE_URL").ok();

        let http_port: u16 = env::var("HTTP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| "HTTP_PORT must be a valid u16")?;

        let smtp = SmtpConfig {
            host: env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),
            port: env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .map_err(|_| "SMTP_PORT must be a valid u16")?,
            username: env::var("SMTP_USERNAME").unwrap_or_default(),
            password: env::var("SMTP_PASSWORD").unwrap_or_default(),
            use_tls: env::var("SMTP_USE_TLS")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(true),
            from_email: env::var("SMTP_FROM_EMAIL").ok(),
        };

        let ollama = OllamaConfig {
            model: env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama2".to_string()),
            host: env::var("OLLAMA_HOST").ok(),
            temperature: env::var("OLLAMA_TEMPERATURE")
                .unwrap_or_else(|_| "0.7".to_string())
                .parse()
                .map_err(|_| "OLLAMA_TEMPERATURE must be a valid float")?,
        };

        Ok(Self {
            env,
            database_url,
            http_port,
            smtp,
            ollama,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(database_url: Option<String>) -> Config {
        Config {
            env: AppEnv::Development,
            database_url,
            http_port: 3000,
            smtp: SmtpConfig {
                host: "smtp.example.com".to_string(),
                port: 587,
                username: String::new(),
                password: String::new(),
                use_tls: true,
                from_email: None,
            },
            ollama: OllamaConfig {
                model: "llama2".to_string(),
                host: None,
                temperature: 0.7,
            },
        }
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = config(None)
            .require_database_url()
            .expect_err("unset DATABASE_URL must be rejected");
        assert_eq!(err.to_string(), "DATABASE_URL env var is required");
    }

    #[test]
    fn database_url_passes_through() {
        let cfg = config(Some("postgres://db.example.com/courier".to_string()));
        assert_eq!(
            cfg.require_database_url().ok(),
            Some("postgres://db.example.com/courier")
        );
    }
}

use anyhow::Result;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub llm: LLMConfig,
    pub search: SearchConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Empty means "no database": projects and researches live in memory.
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub enabled: bool,
    pub status_ttl_secs: u64,
}

/// Provider selection and credentials for the LLM handles a flow receives.
///
/// Passed explicitly into the flow task instead of being read from process
/// state, so tests can build one by hand.
#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub google_api_key: String,
    pub openai_api_key: String,
    pub openrouter_api_key: String,
}

impl LLMConfig {
    pub fn api_key_for(&self, provider: &str) -> Option<&str> {
        let key = match provider {
            "google" | "gemini" => &self.google_api_key,
            "openai" => &self.openai_api_key,
            "openrouter" => &self.openrouter_api_key,
            _ => return None,
        };
        Some(key.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub serpapi_key: String,
    pub max_results: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub queue_capacity: usize,
    pub status_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            server: ServerConfig {
                port: env::var("PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()?,
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                cors_allowed_origins: env::var("ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_default(),
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
                min_connections: env::var("DB_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()?,
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                enabled: env::var("USE_REDIS_STATUS")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()?,
                status_ttl_secs: env::var("STATUS_TTL_SECS")
                    .unwrap_or_else(|_| "86400".to_string())
                    .parse()?,
            },
            llm: LLMConfig {
                provider: env::var("LLM_PROVIDER").unwrap_or_else(|_| "google".to_string()),
                model: env::var("LLM_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string()),
                temperature: env::var("LLM_TEMPERATURE")
                    .unwrap_or_else(|_| "0.7".to_string())
                    .parse()?,
                google_api_key: env::var("GOOGLE_API_KEY")
                    .or_else(|_| env::var("GEMINI_API_KEY"))
                    .unwrap_or_default(),
                openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                openrouter_api_key: env::var("OPENROUTER_API_KEY").unwrap_or_default(),
            },
            search: SearchConfig {
                serpapi_key: env::var("SERPAPI_API_KEY").unwrap_or_default(),
                max_results: env::var("SEARCH_MAX_RESULTS")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()?,
            },
            worker: WorkerConfig {
                concurrency: env::var("WORKER_CONCURRENCY")
                    .unwrap_or_else(|_| "4".to_string())
                    .parse()?,
                queue_capacity: env::var("QUEUE_CAPACITY")
                    .unwrap_or_else(|_| "256".to_string())
                    .parse()?,
                status_poll_interval_ms: env::var("STATUS_POLL_INTERVAL_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()?,
            },
            logging: LoggingConfig {
                log_dir: env::var("LOG_DIR").ok().filter(|d| !d.is_empty()),
            },
        })
    }
}

#[cfg(test)]
impl Config {
    /// In-memory everything, no credentials.
    pub fn for_tests() -> Self {
        Self {
            server: ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                cors_allowed_origins: vec!["http://localhost:5173".to_string()],
            },
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 1,
                min_connections: 1,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                enabled: false,
                status_ttl_secs: 60,
            },
            llm: LLMConfig {
                provider: "google".to_string(),
                model: "gemini-1.5-flash".to_string(),
                temperature: 0.7,
                google_api_key: String::new(),
                openai_api_key: String::new(),
                openrouter_api_key: String::new(),
            },
            search: SearchConfig {
                serpapi_key: String::new(),
                max_results: 3,
            },
            worker: WorkerConfig {
                concurrency: 1,
                queue_capacity: 8,
                status_poll_interval_ms: 1000,
            },
            logging: LoggingConfig { log_dir: None },
        }
    }
}

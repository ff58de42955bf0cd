use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub workspace: WorkspaceConfig,
    pub warehouse: WarehouseSettings,
    pub lakebase: LakebaseSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding the built frontend served on non-API routes.
    pub static_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    pub host: String,
    pub token: String,
    /// Authenticate each request with the caller's forwarded OAuth token
    /// instead of the service credential.
    pub per_request_auth: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseSettings {
    pub id: String,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LakebaseSettings {
    pub instance: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub sslmode: String,
    pub refresh_margin_secs: i64,
    pub background_refresh_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("server.static_dir", "static")?
            .set_default("workspace.host", "")?
            .set_default("workspace.token", "")?
            .set_default("workspace.per_request_auth", false)?
            .set_default("warehouse.id", "")?
            .set_default("warehouse.timeout_secs", 600)?
            .set_default("warehouse.poll_interval_ms", 500)?
            .set_default("lakebase.instance", "")?
            .set_default("lakebase.host", "")?
            .set_default("lakebase.port", 5432)?
            .set_default("lakebase.database", "postgres")?
            .set_default("lakebase.user", "token")?
            .set_default("lakebase.sslmode", "prefer")?
            .set_default("lakebase.refresh_margin_secs", 300)?
            .set_default("lakebase.background_refresh_secs", 3000)?
            .set_default("logging.level", "info")?;

        // Load from environment variables
        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(8000))?;
        }
        if let Ok(static_dir) = env::var("STATIC_DIR") {
            builder = builder.set_override("server.static_dir", static_dir)?;
        }
        if let Ok(host) = env::var("WORKSPACE_HOST") {
            builder = builder.set_override("workspace.host", host)?;
        }
        if let Ok(token) = env::var("WORKSPACE_TOKEN") {
            builder = builder.set_override("workspace.token", token)?;
        }
        if let Ok(flag) = env::var("PER_REQUEST_AUTH") {
            builder = builder
                .set_override("workspace.per_request_auth", flag.parse::<bool>().unwrap_or(false))?;
        }
        if let Ok(id) = env::var("WAREHOUSE_ID") {
            builder = builder.set_override("warehouse.id", id)?;
        }
        if let Ok(secs) = env::var("STATEMENT_TIMEOUT_SECS") {
            builder = builder
                .set_override("warehouse.timeout_secs", secs.parse::<u64>().unwrap_or(600))?;
        }
        if let Ok(ms) = env::var("POLL_INTERVAL_MS") {
            builder = builder
                .set_override("warehouse.poll_interval_ms", ms.parse::<u64>().unwrap_or(500))?;
        }
        if let Ok(instance) = env::var("LAKEBASE_INSTANCE") {
            builder = builder.set_override("lakebase.instance", instance)?;
        }
        if let Ok(host) = env::var("LAKEBASE_HOST") {
            builder = builder.set_override("lakebase.host", host)?;
        }
        if let Ok(port) = env::var("LAKEBASE_PORT") {
            builder = builder.set_override("lakebase.port", port.parse::<u16>().unwrap_or(5432))?;
        }
        if let Ok(database) = env::var("LAKEBASE_DATABASE") {
            builder = builder.set_override("lakebase.database", database)?;
        }
        if let Ok(user) = env::var("LAKEBASE_USER") {
            builder = builder.set_override("lakebase.user", user)?;
        }
        if let Ok(sslmode) = env::var("PGSSLMODE") {
            builder = builder.set_override("lakebase.sslmode", sslmode)?;
        }
        if let Ok(secs) = env::var("TOKEN_REFRESH_MARGIN_SECS") {
            builder = builder
                .set_override("lakebase.refresh_margin_secs", secs.parse::<i64>().unwrap_or(300))?;
        }
        if let Ok(secs) = env::var("TOKEN_REFRESH_INTERVAL_SECS") {
            builder = builder.set_override(
                "lakebase.background_refresh_secs",
                secs.parse::<u64>().unwrap_or(3000),
            )?;
        }
        if let Ok(level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", level)?;
        }

        // Try to load from .env file
        let _ = dotenv::dotenv();

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                static_dir: "static".to_string(),
            },
            workspace: WorkspaceConfig {
                host: String::new(),
                token: String::new(),
                per_request_auth: false,
            },
            warehouse: WarehouseSettings {
                id: String::new(),
                timeout_secs: 600,
                poll_interval_ms: 500,
            },
            lakebase: LakebaseSettings {
                instance: String::new(),
                host: String::new(),
                port: 5432,
                database: "postgres".to_string(),
                user: "token".to_string(),
                sslmode: "prefer".to_string(),
                refresh_margin_secs: 300,
                background_refresh_secs: 3000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

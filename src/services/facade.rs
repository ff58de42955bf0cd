// Service registry: one lazily constructed instance of each client/backend
// per process, owned by the axum state rather than ambient globals so tests
// can build isolated registries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::services::platform::PlatformClient;
use crate::services::sql::{
    LakebaseBackend, LakebaseConfig, PerRequestCredential, ServiceCredentials,
    StatementExecutionBackend, WarehouseConfig,
};

pub struct Services {
    config: Arc<Config>,
    platform: OnceCell<Arc<PlatformClient>>,
    warehouse: OnceCell<Arc<StatementExecutionBackend>>,
    lakebase: OnceCell<Arc<LakebaseBackend>>,
}

impl Services {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            platform: OnceCell::new(),
            warehouse: OnceCell::new(),
            lakebase: OnceCell::new(),
        }
    }

    /// Direct access to the workspace API client (service credentials).
    pub async fn platform(&self) -> Result<Arc<PlatformClient>, AppError> {
        self.platform
            .get_or_try_init(|| async {
                let ws = &self.config.workspace;
                Ok(Arc::new(PlatformClient::new(&ws.host, &ws.token)?))
            })
            .await
            .cloned()
    }

    pub async fn warehouse(&self) -> Result<Arc<StatementExecutionBackend>, AppError> {
        self.warehouse
            .get_or_try_init(|| async {
                let platform = self.platform().await?;
                Ok(Arc::new(self.build_warehouse(platform)?))
            })
            .await
            .cloned()
    }

    /// Warehouse backend bound to a caller's forwarded token. Built per
    /// request; the underlying HTTP client is shared.
    pub async fn warehouse_for_token(
        &self,
        token: &str,
    ) -> Result<StatementExecutionBackend, AppError> {
        let platform = self.platform().await?;
        self.build_warehouse(Arc::new(platform.with_token(token)))
    }

    fn build_warehouse(
        &self,
        platform: Arc<PlatformClient>,
    ) -> Result<StatementExecutionBackend, AppError> {
        let settings = &self.config.warehouse;
        if settings.id.is_empty() {
            return Err(AppError::Configuration(
                "WAREHOUSE_ID is not configured".to_string(),
            ));
        }
        let mut wh_config = WarehouseConfig::new(settings.id.clone());
        wh_config.timeout = Duration::from_secs(settings.timeout_secs);
        wh_config.poll_interval = Duration::from_millis(settings.poll_interval_ms);
        Ok(StatementExecutionBackend::new(platform, wh_config))
    }

    pub async fn lakebase(&self) -> Result<Arc<LakebaseBackend>, AppError> {
        self.lakebase
            .get_or_try_init(|| async {
                let platform = self.platform().await?;
                let pg_config = self.resolve_lakebase_config(&platform).await?;
                let instance = self.config.lakebase.instance.clone();
                let credentials = Arc::new(ServiceCredentials::new(
                    platform,
                    (!instance.is_empty()).then_some(instance),
                    Some(self.config.workspace.token.clone()),
                ));
                Ok(Arc::new(LakebaseBackend::new(pg_config, credentials)))
            })
            .await
            .cloned()
    }

    /// Lakebase backend authenticated as the caller. A fresh connection per
    /// request; no credential refresh.
    pub async fn lakebase_for_token(&self, token: &str) -> Result<LakebaseBackend, AppError> {
        let platform = self.platform().await?;
        let pg_config = self.resolve_lakebase_config(&platform).await?;
        Ok(LakebaseBackend::new(
            pg_config,
            Arc::new(PerRequestCredential::new(token)),
        ))
    }

    /// Connection details come either from explicit configuration or from
    /// the instance record the workspace API holds.
    async fn resolve_lakebase_config(
        &self,
        platform: &PlatformClient,
    ) -> Result<LakebaseConfig, AppError> {
        let settings = &self.config.lakebase;

        let (host, port) = if !settings.host.is_empty() {
            (settings.host.clone(), settings.port)
        } else if !settings.instance.is_empty() {
            let instance = platform.get_database_instance(&settings.instance).await?;
            (instance.read_write_dns, instance.port.unwrap_or(settings.port))
        } else {
            return Err(AppError::Configuration(
                "neither LAKEBASE_HOST nor LAKEBASE_INSTANCE is configured".to_string(),
            ));
        };

        Ok(LakebaseConfig {
            host,
            port,
            database: settings.database.clone(),
            user: settings.user.clone(),
            sslmode: settings.sslmode.clone(),
            refresh_margin_secs: settings.refresh_margin_secs,
        })
    }

    /// Spawn the periodic credential refresh for the shared lakebase
    /// backend. Only meaningful in service-auth mode.
    pub async fn start_background_refresh(&self) -> Result<(), AppError> {
        let backend = self.lakebase().await?;
        let interval = Duration::from_secs(self.config.lakebase.background_refresh_secs);
        backend.spawn_background_refresh(interval);
        tracing::info!(
            "background credential refresh started (every {}s)",
            interval.as_secs()
        );
        Ok(())
    }
}

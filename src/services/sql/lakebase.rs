// Lakebase (managed PostgreSQL) backend.
//
// The database is reachable only with a short-lived OAuth-derived credential
// used as the connection password. The backend keeps one lazily opened
// connection and re-mints the credential before it expires; all credential
// and connection mutation happens under a single async mutex so concurrent
// requests cannot race a refresh or observe a half-reconnected handle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use crate::api::middleware::AppError;
use crate::models::{Row, SqlParam};
use crate::services::platform::PlatformClient;
use crate::services::sql::convert::convert_pg_rows;
use crate::services::sql::escape::{escape_pg_full_name, escape_pg_name};
use crate::services::sql::{normalize_sql, BackendKind, SqlBackend, TableColumn};

/// An access token and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// True when the token has expired or will within `margin` seconds.
    pub fn expires_within(&self, margin_secs: i64) -> bool {
        self.expires_at - Utc::now() <= ChronoDuration::seconds(margin_secs)
    }
}

/// Where the backend gets its credential from. Selected once at
/// configuration time; the backend never mixes sources.
#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    async fn acquire(&self) -> Result<Credential, AppError>;
}

/// Service-auth mode: mints a scoped database credential through the
/// workspace API, falling back to the configured workspace token when no
/// instance name is known.
pub struct ServiceCredentials {
    platform: Arc<PlatformClient>,
    instance_name: Option<String>,
    fallback_token: Option<String>,
}

impl ServiceCredentials {
    pub fn new(
        platform: Arc<PlatformClient>,
        instance_name: Option<String>,
        fallback_token: Option<String>,
    ) -> Self {
        Self {
            platform,
            instance_name,
            fallback_token,
        }
    }
}

#[async_trait::async_trait]
impl CredentialSource for ServiceCredentials {
    async fn acquire(&self) -> Result<Credential, AppError> {
        if let Some(instance) = &self.instance_name {
            return self.platform.generate_database_credential(instance).await;
        }
        match &self.fallback_token {
            Some(token) if !token.is_empty() => Ok(Credential {
                token: token.clone(),
                expires_at: Utc::now() + ChronoDuration::hours(1),
            }),
            _ => Err(AppError::Auth(
                "no lakebase instance configured and no workspace token to fall back to"
                    .to_string(),
            )),
        }
    }
}

/// Per-request auth mode: the caller's own forwarded OAuth token is the
/// password. Never refreshed; the token lives as long as the request.
pub struct PerRequestCredential {
    token: String,
}

impl PerRequestCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait::async_trait]
impl CredentialSource for PerRequestCredential {
    async fn acquire(&self) -> Result<Credential, AppError> {
        Ok(Credential {
            token: self.token.clone(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LakebaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub sslmode: String,
    /// Refresh the credential when it expires within this many seconds.
    pub refresh_margin_secs: i64,
}

impl LakebaseConfig {
    fn ssl_mode(&self) -> SslMode {
        match self.sslmode.as_str() {
            "disable" => SslMode::Disable,
            "require" => SslMode::Require,
            _ => SslMode::Prefer,
        }
    }
}

/// Mutable connection state. Only ever touched while holding the mutex.
#[derive(Default)]
struct ConnState {
    credential: Option<Credential>,
    client: Option<Arc<tokio_postgres::Client>>,
    /// Bumped on every reconnect so a failed caller can tell whether the
    /// handle it used has already been replaced by someone else.
    generation: u64,
    refreshes: u64,
}

pub struct LakebaseBackend {
    config: LakebaseConfig,
    credentials: Arc<dyn CredentialSource>,
    state: Mutex<ConnState>,
}

impl LakebaseBackend {
    pub fn new(config: LakebaseConfig, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            config,
            credentials,
            state: Mutex::new(ConnState::default()),
        }
    }

    /// Number of credential refreshes performed so far.
    pub async fn refresh_count(&self) -> u64 {
        self.state.lock().await.refreshes
    }

    async fn ensure_credential_locked(
        &self,
        state: &mut ConnState,
    ) -> Result<Credential, AppError> {
        if let Some(cred) = &state.credential {
            if !cred.expires_within(self.config.refresh_margin_secs) {
                return Ok(cred.clone());
            }
            tracing::info!(
                "lakebase credential expires at {}, refreshing",
                cred.expires_at
            );
        }
        let cred = self.credentials.acquire().await?;
        state.refreshes += 1;
        state.credential = Some(cred.clone());
        // New password, so the old handle must not be reused.
        state.client = None;
        Ok(cred)
    }

    async fn open_connection(&self, token: &str) -> Result<tokio_postgres::Client, AppError> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&self.config.host)
            .port(self.config.port)
            .dbname(&self.config.database)
            .user(&self.config.user)
            .password(token)
            .ssl_mode(self.config.ssl_mode())
            .connect_timeout(Duration::from_secs(10));

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            AppError::Connection(format!(
                "failed to connect to {}:{}: {}",
                self.config.host, self.config.port, e
            ))
        })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!("lakebase connection terminated: {}", e);
            }
        });

        tracing::info!(
            "connected to lakebase {}:{}/{}",
            self.config.host,
            self.config.port,
            self.config.database
        );
        Ok(client)
    }

    /// Hand out a live connection plus its generation. Refresh and reconnect
    /// happen here, serialized by the state mutex; queries run outside it.
    async fn checkout(&self) -> Result<(Arc<tokio_postgres::Client>, u64), AppError> {
        let mut state = self.state.lock().await;
        let cred = self.ensure_credential_locked(&mut state).await?;
        if let Some(client) = &state.client {
            return Ok((client.clone(), state.generation));
        }
        let client = Arc::new(self.open_connection(&cred.token).await?);
        state.client = Some(client.clone());
        state.generation = state.generation.wrapping_add(1);
        Ok((client, state.generation))
    }

    /// Drop the handle (and credential) that produced a connection failure.
    /// A stale generation means another caller already reconnected.
    async fn invalidate(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation == generation {
            state.client = None;
            state.credential = None;
        }
    }

    /// Force a refresh regardless of expiry; used by the background task.
    pub async fn force_refresh(&self) -> Result<(), AppError> {
        let cred = self.credentials.acquire().await?;
        let mut state = self.state.lock().await;
        state.refreshes += 1;
        state.credential = Some(cred);
        state.client = None;
        Ok(())
    }

    /// Periodically re-mint the credential so queries rarely pay for a
    /// refresh inline. The task runs until the backend is dropped.
    pub fn spawn_background_refresh(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let backend = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match backend.force_refresh().await {
                    Ok(()) => tracing::debug!("background credential refresh complete"),
                    Err(e) => tracing::error!("background credential refresh failed: {}", e),
                }
            }
        })
    }

    fn bind_params(params: &[SqlParam]) -> Vec<Box<dyn ToSql + Sync + Send>> {
        params
            .iter()
            .map(|p| -> Box<dyn ToSql + Sync + Send> {
                match p {
                    SqlParam::Null => Box::new(Option::<String>::None),
                    SqlParam::Bool(v) => Box::new(*v),
                    SqlParam::Int(v) => Box::new(*v),
                    SqlParam::Float(v) => Box::new(*v),
                    SqlParam::Str(v) => Box::new(v.clone()),
                }
            })
            .collect()
    }

    fn is_connection_error(e: &tokio_postgres::Error) -> bool {
        e.is_closed() || e.as_db_error().is_none()
    }

    fn query_error(e: tokio_postgres::Error) -> AppError {
        match e.as_db_error() {
            Some(db) => AppError::Query(db.message().to_string()),
            None => AppError::Connection(e.to_string()),
        }
    }

    async fn run_fetch(
        &self,
        client: &tokio_postgres::Client,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<Row>, tokio_postgres::Error> {
        let owned = Self::bind_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> =
            owned.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();
        let pg_rows = client.query(sql, &refs).await?;
        Ok(convert_pg_rows(&pg_rows))
    }

    async fn run_execute(
        &self,
        client: &tokio_postgres::Client,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<u64, tokio_postgres::Error> {
        let owned = Self::bind_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> =
            owned.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();
        client.execute(sql, &refs).await
    }
}

#[async_trait::async_trait]
impl SqlBackend for LakebaseBackend {
    async fn fetch(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, AppError> {
        tracing::debug!("fetching: {:.200}", normalize_sql(sql));
        let (client, generation) = self.checkout().await?;
        match self.run_fetch(&client, sql, params).await {
            Ok(rows) => Ok(rows),
            Err(e) if Self::is_connection_error(&e) => {
                tracing::warn!("lakebase connection failed, reconnecting and retrying once: {}", e);
                self.invalidate(generation).await;
                let (client, _) = self.checkout().await?;
                self.run_fetch(&client, sql, params)
                    .await
                    .map_err(Self::query_error)
            }
            Err(e) => Err(Self::query_error(e)),
        }
    }

    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64, AppError> {
        tracing::debug!("executing: {:.200}", normalize_sql(sql));
        let (client, generation) = self.checkout().await?;
        match self.run_execute(&client, sql, params).await {
            Ok(count) => Ok(count),
            Err(e) if Self::is_connection_error(&e) => {
                tracing::warn!("lakebase connection failed, reconnecting and retrying once: {}", e);
                self.invalidate(generation).await;
                let (client, _) = self.checkout().await?;
                self.run_execute(&client, sql, params)
                    .await
                    .map_err(Self::query_error)
            }
            Err(e) => Err(Self::query_error(e)),
        }
    }

    async fn create_table(
        &self,
        full_name: &str,
        columns: &[TableColumn],
    ) -> Result<(), AppError> {
        let escaped_table = escape_pg_full_name(full_name)?;
        let col_defs: Result<Vec<String>, AppError> = columns
            .iter()
            .map(|c| Ok(format!("{} {}", escape_pg_name(&c.name)?, c.column_type.pg_type())))
            .collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            escaped_table,
            col_defs?.join(", ")
        );
        self.execute(&sql, &[]).await?;
        Ok(())
    }

    async fn insert_rows(
        &self,
        full_name: &str,
        columns: &[&str],
        rows: &[Vec<SqlParam>],
    ) -> Result<u64, AppError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let escaped_table = escape_pg_full_name(full_name)?;
        let escaped_cols: Result<Vec<String>, AppError> =
            columns.iter().map(|c| escape_pg_name(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            escaped_table,
            escaped_cols?.join(", "),
            placeholders.join(", ")
        );

        let mut inserted = 0u64;
        for row in rows {
            if row.len() != columns.len() {
                return Err(AppError::Validation(format!(
                    "insert row has {} values for {} columns",
                    row.len(),
                    columns.len()
                )));
            }
            inserted += self.execute(&sql, row).await?;
        }
        Ok(inserted)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Lakebase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingSource {
        acquired: AtomicU64,
        ttl_secs: i64,
    }

    impl CountingSource {
        fn new(ttl_secs: i64) -> Self {
            Self {
                acquired: AtomicU64::new(0),
                ttl_secs,
            }
        }
    }

    #[async_trait::async_trait]
    impl CredentialSource for CountingSource {
        async fn acquire(&self) -> Result<Credential, AppError> {
            // Simulate identity-service latency so concurrent callers overlap.
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Credential {
                token: "fresh-token".to_string(),
                expires_at: Utc::now() + ChronoDuration::seconds(self.ttl_secs),
            })
        }
    }

    fn test_config() -> LakebaseConfig {
        LakebaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            database: "app".to_string(),
            user: "token".to_string(),
            sslmode: "prefer".to_string(),
            refresh_margin_secs: 300,
        }
    }

    #[test]
    fn test_credential_expiry_margin() {
        let soon = Credential {
            token: "t".to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(60),
        };
        assert!(soon.expires_within(300));
        assert!(!soon.expires_within(10));

        let expired = Credential {
            token: "t".to_string(),
            expires_at: Utc::now() - ChronoDuration::seconds(1),
        };
        assert!(expired.expires_within(0));
    }

    #[tokio::test]
    async fn test_concurrent_callers_trigger_one_refresh() {
        let source = Arc::new(CountingSource::new(3600));
        let backend = Arc::new(LakebaseBackend::new(test_config(), source.clone()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let backend = backend.clone();
            tasks.push(tokio::spawn(async move {
                let mut state = backend.state.lock().await;
                backend.ensure_credential_locked(&mut state).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(source.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(backend.refresh_count().await, 1);
    }

    #[tokio::test]
    async fn test_short_ttl_credential_refreshes_again() {
        // TTL inside the refresh margin: every ensure re-acquires.
        let source = Arc::new(CountingSource::new(10));
        let backend = LakebaseBackend::new(test_config(), source.clone());

        for _ in 0..2 {
            let mut state = backend.state.lock().await;
            backend
                .ensure_credential_locked(&mut state)
                .await
                .unwrap();
        }
        assert_eq!(source.acquired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fresh_credential_is_reused() {
        let source = Arc::new(CountingSource::new(3600));
        let backend = LakebaseBackend::new(test_config(), source.clone());

        for _ in 0..3 {
            let mut state = backend.state.lock().await;
            let cred = backend
                .ensure_credential_locked(&mut state)
                .await
                .unwrap();
            assert_eq!(cred.token, "fresh-token");
        }
        assert_eq!(source.acquired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_invalidates_connection_handle() {
        let source = Arc::new(CountingSource::new(10));
        let backend = LakebaseBackend::new(test_config(), source);

        {
            let mut state = backend.state.lock().await;
            backend
                .ensure_credential_locked(&mut state)
                .await
                .unwrap();
            // A refresh must never leave a handle opened with the old password.
            assert!(state.client.is_none());
        }
    }

    #[tokio::test]
    async fn test_per_request_credential_returns_forwarded_token() {
        let source = PerRequestCredential::new("caller-token");
        let cred = source.acquire().await.unwrap();
        assert_eq!(cred.token, "caller-token");
        assert!(!cred.expires_within(0));
    }

    #[tokio::test]
    async fn test_service_credentials_fallback_token() {
        let platform = Arc::new(PlatformClient::new("example.cloud.net", "svc").unwrap());
        let source = ServiceCredentials::new(platform.clone(), None, Some("svc".to_string()));
        let cred = source.acquire().await.unwrap();
        assert_eq!(cred.token, "svc");

        let empty = ServiceCredentials::new(platform, None, None);
        assert!(matches!(empty.acquire().await, Err(AppError::Auth(_))));
    }

    #[test]
    fn test_ssl_mode_mapping() {
        let mut config = test_config();
        assert!(matches!(config.ssl_mode(), SslMode::Prefer));
        config.sslmode = "disable".to_string();
        assert!(matches!(config.ssl_mode(), SslMode::Disable));
        config.sslmode = "require".to_string();
        assert!(matches!(config.ssl_mode(), SslMode::Require));
    }
}

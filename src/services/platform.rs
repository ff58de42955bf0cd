// Workspace REST API client.
//
// Thin reqwest wrapper used for everything outside the SQL fetch contract:
// current-user identity, database-instance lookup, and minting short-lived
// Lakebase credentials. Also carries the statement-execution HTTP calls for
// the warehouse backend.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::middleware::AppError;
use crate::models::UserInfo;
use crate::services::sql::Credential;
use crate::utils::{retry_async, RetryConfig};

/// Assumed lifetime when the credential API omits an expiry.
const DEFAULT_CREDENTIAL_TTL_SECS: i64 = 3600;

/// A Lakebase database instance as reported by the workspace API.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseInstance {
    pub name: String,
    pub read_write_dns: String,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Serialize)]
struct CredentialRequest<'a> {
    request_id: String,
    instance_names: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct CredentialResponse {
    #[serde(alias = "access_token")]
    token: String,
    #[serde(default)]
    expiration_time: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    retry: RetryConfig,
}

impl PlatformClient {
    pub fn new(host: &str, token: &str) -> Result<Self, AppError> {
        if host.is_empty() {
            return Err(AppError::Configuration(
                "workspace host is not configured".to_string(),
            ));
        }
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", host.trim_end_matches('/'))
        };

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            token: token.to_string(),
            retry: RetryConfig::default(),
        })
    }

    /// Same workspace, different bearer token (per-request auth mode).
    pub fn with_token(&self, token: &str) -> Self {
        let mut client = self.clone();
        client.token = token.to_string();
        client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn handle<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AppError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| AppError::Internal(format!("failed to parse response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(AppError::Auth(format!("HTTP {}: {}", status, body))),
            404 => Err(AppError::NotFound(format!("HTTP {}: {}", status, body))),
            400 => Err(AppError::Query(body)),
            _ => Err(AppError::Connection(format!("HTTP {}: {}", status, body))),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("request failed: {}", e)))?;
        Self::handle(response).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AppError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("request failed: {}", e)))?;
        Self::handle(response).await
    }

    /// POST without caring about the response body (best-effort calls).
    pub async fn post_no_content(&self, path: &str) -> Result<(), AppError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("request failed: {}", e)))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(AppError::Connection(format!("HTTP {}: {}", status, body)))
        }
    }

    /// Identity of the token's user. Transient transport failures retried.
    pub async fn current_user(&self) -> Result<UserInfo, AppError> {
        retry_async(
            &self.retry,
            |e| matches!(e, AppError::Connection(_)),
            || self.get_json::<UserInfo>("/api/2.0/preview/scim/v2/Me"),
        )
        .await
    }

    /// Resolve a Lakebase instance (host DNS, port) by name.
    pub async fn get_database_instance(&self, name: &str) -> Result<DatabaseInstance, AppError> {
        let path = format!("/api/2.0/database/instances/{}", name);
        retry_async(
            &self.retry,
            |e| matches!(e, AppError::Connection(_)),
            || self.get_json::<DatabaseInstance>(&path),
        )
        .await
    }

    /// Mint a short-lived database credential scoped to one instance.
    ///
    /// Deliberately not retried: a failing token exchange surfaces
    /// immediately rather than hammering the identity service.
    pub async fn generate_database_credential(
        &self,
        instance_name: &str,
    ) -> Result<Credential, AppError> {
        let request = CredentialRequest {
            request_id: Uuid::new_v4().to_string(),
            instance_names: [instance_name],
        };
        let response: CredentialResponse = self
            .post_json("/api/2.0/database/credentials", &request)
            .await
            .map_err(|e| match e {
                AppError::Auth(msg) => AppError::Auth(msg),
                other => AppError::Auth(format!("credential exchange failed: {}", other)),
            })?;

        let expires_at = response
            .expiration_time
            .unwrap_or_else(|| Utc::now() + ChronoDuration::seconds(DEFAULT_CREDENTIAL_TTL_SECS));

        tracing::debug!(
            "minted database credential for {} (expires {})",
            instance_name,
            expires_at
        );

        Ok(Credential {
            token: response.token,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalization() {
        let client = PlatformClient::new("example.cloud.net", "t").unwrap();
        assert_eq!(client.base_url(), "https://example.cloud.net");

        let client = PlatformClient::new("http://localhost:8080/", "t").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_empty_host_is_configuration_error() {
        assert!(matches!(
            PlatformClient::new("", "t"),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_with_token_keeps_base_url() {
        let client = PlatformClient::new("example.cloud.net", "service-token").unwrap();
        let scoped = client.with_token("user-token");
        assert_eq!(scoped.base_url(), client.base_url());
        assert_eq!(scoped.token, "user-token");
    }

    #[test]
    fn test_credential_response_aliases() {
        let parsed: CredentialResponse =
            serde_json::from_str(r#"{"access_token": "abc"}"#).unwrap();
        assert_eq!(parsed.token, "abc");
        assert!(parsed.expiration_time.is_none());

        let parsed: CredentialResponse = serde_json::from_str(
            r#"{"token": "xyz", "expiration_time": "2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(parsed.token, "xyz");
        assert!(parsed.expiration_time.is_some());
    }
}

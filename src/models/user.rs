use serde::{Deserialize, Serialize};

/// Identity of the authenticated workspace user (SCIM `/Me`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub active: bool,
}

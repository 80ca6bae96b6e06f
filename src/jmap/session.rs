//! The JMAP session resource (RFC 8620 §2).

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct JmapSession {
    /// Capability URI → server-wide capability object.
    #[serde(default)]
    pub capabilities: HashMap<String, Value>,

    #[serde(default)]
    pub accounts: HashMap<String, Account>,

    /// Capability URI → account id.
    #[serde(rename = "primaryAccounts")]
    #[serde(default)]
    pub primary_accounts: HashMap<String, String>,

    #[serde(default)]
    pub username: String,

    #[serde(rename = "apiUrl")]
    pub api_url: String,

    #[serde(rename = "downloadUrl")]
    #[serde(default)]
    pub download_url: Option<String>,

    #[serde(rename = "uploadUrl")]
    #[serde(default)]
    pub upload_url: Option<String>,

    #[serde(rename = "eventSourceUrl")]
    #[serde(default)]
    pub event_source_url: Option<String>,

    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "isPersonal")]
    #[serde(default)]
    pub is_personal: bool,

    #[serde(rename = "isReadOnly")]
    #[serde(default)]
    pub is_read_only: bool,

    #[serde(rename = "accountCapabilities")]
    #[serde(default)]
    pub account_capabilities: HashMap<String, Value>,
}

impl JmapSession {
    /// Primary account for `capability`, if the server names one.
    pub fn primary_account_id(&self, capability: &str) -> Option<&str> {
        self.primary_accounts.get(capability).map(String::as_str)
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.contains_key(capability)
    }

    /// API endpoint, resolved against the session URL when relative.
    pub fn api_url(&self, base: &Url) -> Result<Url> {
        base.join(&self.api_url)
            .map_err(|e| Error::malformed(format!("invalid apiUrl '{}': {e}", self.api_url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jmap::capability;
    use serde_json::json;

    fn session() -> JmapSession {
        serde_json::from_value(json!({
            "capabilities": {
                "urn:ietf:params:jmap:core": {"maxCallsInRequest": 16},
                "urn:ietf:params:jmap:mail": {}
            },
            "accounts": {
                "A1": {
                    "name": "ada@example.com",
                    "isPersonal": true,
                    "isReadOnly": false,
                    "accountCapabilities": {"urn:ietf:params:jmap:mail": {}}
                }
            },
            "primaryAccounts": {"urn:ietf:params:jmap:mail": "A1"},
            "username": "ada@example.com",
            "apiUrl": "/jmap/api/",
            "downloadUrl": "/jmap/download/{accountId}/{blobId}/{name}?accept={type}",
            "state": "s1"
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_session_resource() {
        let s = session();
        assert_eq!(s.primary_account_id(capability::MAIL), Some("A1"));
        assert_eq!(s.primary_account_id(capability::CONTACTS), None);
        assert!(s.supports(capability::CORE));
        assert!(!s.supports(capability::CALENDARS));
        assert!(s.accounts["A1"].is_personal);
        assert!(s.upload_url.is_none());
    }

    #[test]
    fn test_relative_api_url_resolves_against_session_url() {
        let base = Url::parse("https://mail.example.com/.well-known/jmap").unwrap();
        assert_eq!(
            session().api_url(&base).unwrap().as_str(),
            "https://mail.example.com/jmap/api/"
        );

        let mut absolute = session();
        absolute.api_url = "https://api.example.com/jmap".into();
        assert_eq!(absolute.api_url(&base).unwrap().as_str(), "https://api.example.com/jmap");
    }
}

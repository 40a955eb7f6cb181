//! Query API configuration
//!
//! Constants for the QuickBooks Online style API plus the per-run [`ApiConfig`]
//! that knows how to phrase window queries and snapshot requests.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Fixed defaults for one API environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiDefaults {
    /// Base URL (e.g., <https://sandbox-quickbooks.api.intuit.com>)
    pub base_url: &'static str,
    /// OAuth token endpoint
    pub token_url: &'static str,
    /// `minorversion` query parameter
    pub minor_version: u32,
    /// Records requested per page
    pub page_size: u32,
    /// Entity queried by default
    pub entity: &'static str,
}

/// Sandbox environment
pub const SANDBOX_CONFIG: ApiDefaults = ApiDefaults {
    base_url: "https://sandbox-quickbooks.api.intuit.com",
    token_url: "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer",
    minor_version: 75,
    page_size: 100,
    entity: "Customer",
};

/// Production environment
pub const PRODUCTION_CONFIG: ApiDefaults = ApiDefaults {
    base_url: "https://quickbooks.api.intuit.com",
    ..SANDBOX_CONFIG
};

/// Largest page the API accepts
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Timestamp layout used inside query predicates
const QUERY_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Per-run API configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Base URL without trailing slash
    pub base_url: String,
    /// Company (realm) identifier
    pub realm_id: String,
    /// `minorversion` query parameter
    pub minor_version: u32,
    /// Entity to query (e.g., "Customer")
    pub entity: String,
    /// Records requested per page
    pub page_size: u32,
}

impl ApiConfig {
    /// Build a configuration from environment defaults
    pub fn from_defaults(defaults: &ApiDefaults, realm_id: impl Into<String>) -> Self {
        Self {
            base_url: defaults.base_url.to_string(),
            realm_id: realm_id.into(),
            minor_version: defaults.minor_version,
            entity: defaults.entity.to_string(),
            page_size: defaults.page_size,
        }
    }

    /// Sandbox configuration for a realm
    pub fn sandbox(realm_id: impl Into<String>) -> Self {
        Self::from_defaults(&SANDBOX_CONFIG, realm_id)
    }

    /// Override the base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the entity
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = entity.into();
        self
    }

    /// Override the page size
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Override the minor version
    pub fn with_minor_version(mut self, minor_version: u32) -> Self {
        self.minor_version = minor_version;
        self
    }

    /// Validate configuration before any request is made
    pub fn validate(&self) -> Result<(), String> {
        if self.realm_id.trim().is_empty() {
            return Err("Realm id cannot be empty".to_string());
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(format!("Base URL must be http(s): {}", self.base_url));
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(format!(
                "Page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            ));
        }

        if self.entity.is_empty() || !self.entity.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(format!("Invalid entity name: '{}'", self.entity));
        }

        Ok(())
    }

    /// Query endpoint URL
    pub fn query_url(&self) -> String {
        format!("{}/v3/company/{}/query", self.base_url, self.realm_id)
    }

    /// Query selecting every entity updated inside `[start, end]`
    pub fn window_query(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "select * from {} where MetaData.LastUpdatedTime >= '{}' and MetaData.LastUpdatedTime <= '{}'",
            self.entity,
            start.format(QUERY_TIMESTAMP_FORMAT),
            end.format(QUERY_TIMESTAMP_FORMAT)
        )
    }

    /// Masked snapshot of the request that fetches `paginated` (derived from `original`)
    pub fn request_snapshot(&self, original: &str, paginated: &str) -> Value {
        json!({
            "full_api_url": format!(
                "{}?query={}&minorversion={}",
                self.query_url(),
                paginated,
                self.minor_version
            ),
            "method": "GET",
            "headers": {
                "Authorization": "Bearer [HIDDEN]",
                "Accept": "application/json",
                "Content-Type": "text/plain",
            },
            "query_parameters": {
                "query": paginated,
                "minorversion": self.minor_version,
            },
            "base_url": self.base_url,
            "realm_id": self.realm_id,
            "original_query": original,
        })
    }
}

/// Append the offset cursor to a query
pub fn paginated_query(query: &str, start_position: u32, max_results: u32) -> String {
    format!("{query} STARTPOSITION {start_position} MAXRESULTS {max_results}")
}

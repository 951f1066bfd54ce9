//! Site profiles: everything site-specific about a collection run.
//!
//! A profile is a YAML file naming the start URL, how items are located,
//! which fields to extract, how to page forward, and the collector and fetch
//! defaults for that site. Sample profiles live in `profiles/`.
//!
//! ```yaml
//! name: ebay_search
//! kind: html
//! start_url: "https://www.ebay.com/sch/i.html?_nkw={query}"
//! item_selector: "li.s-item"
//! pagination:
//!   type: next_link
//!   selector: "a.pagination__next"
//! fields:
//!   - name: url
//!     selector: "a.s-item__link"
//!     attr: href
//!     required: true
//! fingerprint_field: url
//! collector:
//!   target_count: 200
//! ```
//!
//! `{query}` in `start_url` or in `query_params` values is replaced with the
//! URL-encoded search query of the run.

use crate::collector::CollectorSettings;
use crate::error::ProfileError;
use crate::extract::{FieldSpec, FingerprintKey, HtmlMapper, JsonMapper};
use crate::fetch::FetchSettings;
use crate::sources::Pagination;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, instrument};
use url::Url;

/// What kind of content a profile scrapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Html,
    Json,
}

/// Where the API key of a JSON profile comes from and where it goes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiKeySpec {
    /// Environment variable holding the key.
    pub env: String,
    /// Send as this query parameter...
    #[serde(default)]
    pub query_param: Option<String>,
    /// ...or as this request header.
    #[serde(default)]
    pub header: Option<String>,
}

/// One site's scraping recipe.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteProfile {
    pub name: String,
    pub kind: SourceKind,
    pub start_url: String,
    /// Extra query parameters appended to the start URL.
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    /// CSS selector of one item (HTML profiles).
    #[serde(default)]
    pub item_selector: Option<String>,
    /// JSON pointer of the item array (JSON profiles).
    #[serde(default)]
    pub items_pointer: Option<String>,
    #[serde(default)]
    pub pagination: Pagination,
    pub fields: Vec<FieldSpec>,
    /// Field the fingerprint is computed from; the whole item when absent.
    #[serde(default)]
    pub fingerprint_field: Option<String>,
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub api_key: Option<ApiKeySpec>,
}

impl SiteProfile {
    /// Read and validate a profile file.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self, ProfileError> {
        let yaml = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ProfileError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let profile = Self::from_yaml(&yaml)?;
        debug!(name = %profile.name, kind = ?profile.kind, "Loaded site profile");
        Ok(profile)
    }

    /// Parse and validate a profile from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, ProfileError> {
        let profile: SiteProfile = serde_yaml::from_str(yaml)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Check everything that can be checked without network access.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.name.trim().is_empty() {
            return Err(ProfileError::Invalid("name must not be empty".to_string()));
        }
        if self.fields.is_empty() {
            return Err(ProfileError::Invalid("at least one field is required".to_string()));
        }
        self.collector
            .validate()
            .map_err(|e| ProfileError::Invalid(e.to_string()))?;
        self.start_url_for(Some("probe"))?;

        match self.kind {
            SourceKind::Html => {
                if self.item_selector.is_none() {
                    return Err(ProfileError::Invalid(
                        "html profiles need an item_selector".to_string(),
                    ));
                }
                self.html_mapper()?;
            }
            SourceKind::Json => {
                if self.items_pointer.is_none() {
                    return Err(ProfileError::Invalid(
                        "json profiles need an items_pointer".to_string(),
                    ));
                }
                if matches!(self.pagination, Pagination::NextLink { .. }) {
                    return Err(ProfileError::Invalid(
                        "json profiles page with `single` or `page_param`".to_string(),
                    ));
                }
                self.json_mapper()?;
            }
        }

        if let Some(key) = &self.api_key {
            if key.query_param.is_none() == key.header.is_none() {
                return Err(ProfileError::Invalid(
                    "api_key needs exactly one of query_param or header".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn fingerprint_key(&self) -> FingerprintKey {
        FingerprintKey::from_field(self.fingerprint_field.as_deref())
    }

    pub fn html_mapper(&self) -> Result<HtmlMapper, ProfileError> {
        HtmlMapper::new(&self.fields, self.fingerprint_key())
    }

    pub fn json_mapper(&self) -> Result<JsonMapper, ProfileError> {
        JsonMapper::new(&self.fields, self.fingerprint_key())
    }

    /// The first URL of a run, with `{query}` substituted and the profile's
    /// query parameters appended.
    pub fn start_url_for(&self, query: Option<&str>) -> Result<Url, ProfileError> {
        let encoded = urlencoding::encode(query.unwrap_or_default()).into_owned();
        let raw = self.start_url.replace("{query}", &encoded);
        let mut url = Url::parse(&raw).map_err(|e| ProfileError::InvalidStartUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        if !self.query_params.is_empty() {
            let query = query.unwrap_or_default();
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query_params {
                pairs.append_pair(key, &value.replace("{query}", query));
            }
        }
        Ok(url)
    }

    /// Resolve the API key from the environment and place it in `url` or
    /// `fetch.headers`.
    pub fn apply_api_key(
        &self,
        url: &mut Url,
        fetch: &mut FetchSettings,
    ) -> Result<(), ProfileError> {
        let Some(spec) = &self.api_key else {
            return Ok(());
        };
        let key = std::env::var(&spec.env)
            .map_err(|_| ProfileError::MissingApiKey(spec.env.clone()))?;
        if let Some(param) = &spec.query_param {
            url.query_pairs_mut().append_pair(param, &key);
        }
        if let Some(header) = &spec.header {
            fetch.headers.insert(header.clone(), key);
        }
        Ok(())
    }
}

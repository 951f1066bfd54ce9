//! Paged JSON search API source.
//!
//! Covers search APIs such as serpstack and serper: every page is a GET with
//! a page or offset parameter, and the results live in one array of the
//! response (`/news_results`, `/organic`). An empty or missing array ends the
//! run.

use crate::collector::ContentSource;
use crate::error::{ProfileError, SourceError};
use crate::fetch::{Pacing, PageFetcher};
use crate::models::JsonCandidate;
use crate::sources::{Pagination, page_value, with_query_param};
use crate::utils::truncate_for_log;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

struct LoadedPage {
    url: Url,
    items: Vec<Value>,
}

/// [`ContentSource`] over a paged JSON API.
pub struct JsonApiSource<F> {
    fetcher: F,
    base_url: Url,
    items_pointer: String,
    page_param: Option<(String, u64, u64)>,
    pacing: Pacing,
    page: Option<LoadedPage>,
    page_index: usize,
}

impl<F> JsonApiSource<F>
where
    F: PageFetcher,
{
    pub fn new(
        fetcher: F,
        base_url: Url,
        items_pointer: &str,
        pagination: &Pagination,
        pacing: Pacing,
    ) -> Result<Self, ProfileError> {
        if !items_pointer.is_empty() && !items_pointer.starts_with('/') {
            return Err(ProfileError::Invalid(format!(
                "items_pointer `{items_pointer}` must start with '/'"
            )));
        }
        let page_param = match pagination {
            Pagination::Single => None,
            Pagination::PageParam { param, start, step } => Some((param.clone(), *start, *step)),
            Pagination::NextLink { .. } => {
                return Err(ProfileError::Invalid(
                    "JSON sources page with `single` or `page_param`".to_string(),
                ));
            }
        };
        Ok(Self {
            fetcher,
            base_url,
            items_pointer: items_pointer.to_string(),
            page_param,
            pacing,
            page: None,
            page_index: 0,
        })
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    fn url_for(&self, page_index: usize) -> Url {
        match &self.page_param {
            Some((param, start, step)) => {
                with_query_param(&self.base_url, param, page_value(*start, *step, page_index))
            }
            None => self.base_url.clone(),
        }
    }

    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch_page(&self, url: Url) -> Result<LoadedPage, SourceError> {
        let body = self.fetcher.fetch(&url).await?;
        let document: Value = serde_json::from_str(&body).map_err(|e| SourceError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let items = match document.pointer(&self.items_pointer) {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                warn!(
                    pointer = %self.items_pointer,
                    found = %truncate_for_log(&other.to_string(), 200),
                    "Items pointer does not address an array"
                );
                Vec::new()
            }
            None => {
                warn!(pointer = %self.items_pointer, "Items pointer missing from response");
                Vec::new()
            }
        };
        info!(items = items.len(), "Loaded API page");
        Ok(LoadedPage { url, items })
    }
}

impl<F> ContentSource for JsonApiSource<F>
where
    F: PageFetcher,
{
    type Item = JsonCandidate;

    async fn candidates(&mut self) -> Result<Vec<JsonCandidate>, SourceError> {
        let page = match self.page.take() {
            Some(page) => page,
            None => self.fetch_page(self.url_for(0)).await?,
        };
        let candidates = page
            .items
            .iter()
            .enumerate()
            .map(|(index, value)| JsonCandidate {
                value: value.clone(),
                page_url: page.url.clone(),
                page: self.page_index,
                index,
            })
            .collect();
        self.page = Some(page);
        Ok(candidates)
    }

    async fn advance(&mut self) -> Result<bool, SourceError> {
        if self.page_param.is_none() {
            debug!("Single-page API; nothing to advance");
            return Ok(false);
        }

        self.pacing.wait().await;
        let next = self.fetch_page(self.url_for(self.page_index + 1)).await?;
        self.page_index += 1;
        let empty = next.items.is_empty();
        self.page = Some(next);

        if empty {
            info!(page = self.page_index, "API returned no items; source exhausted");
            return Ok(false);
        }
        Ok(true)
    }
}

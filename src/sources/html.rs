//! HTML page source.
//!
//! Fetches result pages (search listings, review pages, news indexes), cuts
//! out every element matching the profile's item selector, and pages forward
//! by following a "next" control or by bumping a query parameter. This is
//! the shape of the eBay (`a.pagination__next`), Amazon (`li.a-last a`) and
//! BBC (`&page=N`) scrapers.

use crate::collector::ContentSource;
use crate::error::{ProfileError, SourceError};
use crate::extract::compile_selector;
use crate::fetch::{Pacing, PageFetcher};
use crate::models::HtmlCandidate;
use crate::sources::{Pagination, page_value, with_query_param};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

enum Paging {
    Single,
    NextLink {
        selector: Selector,
        disabled_class: Option<String>,
    },
    PageParam {
        param: String,
        start: u64,
        step: u64,
    },
}

struct LoadedPage {
    url: Url,
    items: Vec<String>,
    next: Option<Url>,
}

/// [`ContentSource`] over server-rendered HTML result pages.
pub struct HtmlPageSource<F> {
    fetcher: F,
    start_url: Url,
    item_selector: Selector,
    paging: Paging,
    pacing: Pacing,
    page: Option<LoadedPage>,
    page_index: usize,
}

impl<F> HtmlPageSource<F>
where
    F: PageFetcher,
{
    pub fn new(
        fetcher: F,
        start_url: Url,
        item_selector: &str,
        pagination: &Pagination,
        pacing: Pacing,
    ) -> Result<Self, ProfileError> {
        let item_selector = compile_selector("item_selector", item_selector)?;
        let paging = match pagination {
            Pagination::Single => Paging::Single,
            Pagination::NextLink {
                selector,
                disabled_class,
            } => Paging::NextLink {
                selector: compile_selector("pagination", selector)?,
                disabled_class: disabled_class.clone(),
            },
            Pagination::PageParam { param, start, step } => Paging::PageParam {
                param: param.clone(),
                start: *start,
                step: *step,
            },
        };
        Ok(Self {
            fetcher,
            start_url,
            item_selector,
            paging,
            pacing,
            page: None,
            page_index: 0,
        })
    }

    /// Zero-based index of the page currently loaded.
    pub fn page_index(&self) -> usize {
        self.page_index
    }

    fn url_for(&self, page_index: usize) -> Url {
        match &self.paging {
            Paging::PageParam { param, start, step } => {
                with_query_param(&self.start_url, param, page_value(*start, *step, page_index))
            }
            _ => self.start_url.clone(),
        }
    }

    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch_page(&self, url: Url) -> Result<LoadedPage, SourceError> {
        let body = self.fetcher.fetch(&url).await?;
        let page = self.parse(url, &body);
        info!(
            items = page.items.len(),
            has_next = page.next.is_some(),
            "Loaded HTML page"
        );
        Ok(page)
    }

    fn parse(&self, url: Url, body: &str) -> LoadedPage {
        let document = Html::parse_document(body);
        let items = document
            .select(&self.item_selector)
            .map(|element| element.html())
            .collect();
        let next = match &self.paging {
            Paging::NextLink {
                selector,
                disabled_class,
            } => next_link(&document, selector, disabled_class.as_deref(), &url),
            _ => None,
        };
        LoadedPage { url, items, next }
    }
}

/// Resolve the "next" control, unless it is absent or disabled.
fn next_link(
    document: &Html,
    selector: &Selector,
    disabled_class: Option<&str>,
    page_url: &Url,
) -> Option<Url> {
    let element = document.select(selector).next()?;
    let disabled = |el: &ElementRef<'_>| {
        el.value().attr("aria-disabled") == Some("true")
            || disabled_class.is_some_and(|class| el.value().classes().any(|c| c == class))
    };
    let parent_disabled = element
        .parent()
        .and_then(ElementRef::wrap)
        .is_some_and(|p| disabled(&p));
    if disabled(&element) || parent_disabled {
        debug!("Next control is disabled");
        return None;
    }
    let href = element.value().attr("href")?;
    page_url.join(href.trim()).ok()
}

impl<F> ContentSource for HtmlPageSource<F>
where
    F: PageFetcher,
{
    type Item = HtmlCandidate;

    async fn candidates(&mut self) -> Result<Vec<HtmlCandidate>, SourceError> {
        let page = match self.page.take() {
            Some(page) => page,
            None => self.fetch_page(self.url_for(0)).await?,
        };
        let candidates = page
            .items
            .iter()
            .enumerate()
            .map(|(index, html)| HtmlCandidate {
                html: html.clone(),
                page_url: page.url.clone(),
                page: self.page_index,
                index,
            })
            .collect();
        self.page = Some(page);
        Ok(candidates)
    }

    async fn advance(&mut self) -> Result<bool, SourceError> {
        let current = match self.page.take() {
            Some(page) => page,
            None => self.fetch_page(self.url_for(0)).await?,
        };

        let next_url = match &self.paging {
            Paging::Single => None,
            Paging::NextLink { .. } => current.next.clone(),
            Paging::PageParam { .. } => Some(self.url_for(self.page_index + 1)),
        };
        let Some(next_url) = next_url.filter(|url| *url != current.url) else {
            debug!(page = self.page_index, "No further page");
            self.page = Some(current);
            return Ok(false);
        };

        self.pacing.wait().await;
        let next = match self.fetch_page(next_url).await {
            Ok(page) => page,
            Err(e) => {
                self.page = Some(current);
                return Err(e);
            }
        };
        self.page_index += 1;
        let empty = next.items.is_empty();
        self.page = Some(next);

        if empty && matches!(self.paging, Paging::PageParam { .. }) {
            info!(page = self.page_index, "Page has no items; source exhausted");
            return Ok(false);
        }
        Ok(true)
    }
}

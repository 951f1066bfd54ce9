//! Content sources that the collector can drive.
//!
//! Each source implements [`ContentSource`](crate::collector::ContentSource)
//! over one way of reaching more content:
//!
//! | Source | Module | Candidates | Advance |
//! |--------|--------|------------|---------|
//! | HTML pages | [`html`] | elements matching `item_selector` | next link or page parameter |
//! | JSON search APIs | [`json`] | array at `items_pointer` | page or offset parameter |
//!
//! # Pagination
//!
//! Site profiles pick one [`Pagination`] strategy:
//!
//! - `single`: one page, never advances
//! - `next_link`: follow the `href` of the first element matching `selector`;
//!   stop when it is missing or carries `disabled_class`
//! - `page_param`: set `param` to `start`, `start + step`, ... on the start
//!   URL; stop on the first page without items
//!
//! Both sources pause (see [`Pacing`](crate::fetch::Pacing)) before every
//! advance and report exhaustion rather than looping when a next URL is the
//! page they are already on.

pub mod html;
pub mod json;

use serde::Deserialize;
use url::Url;

/// How a source reaches its next page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pagination {
    #[default]
    Single,
    NextLink {
        selector: String,
        #[serde(default)]
        disabled_class: Option<String>,
    },
    PageParam {
        param: String,
        #[serde(default = "default_start")]
        start: u64,
        #[serde(default = "default_step")]
        step: u64,
    },
}

fn default_start() -> u64 {
    1
}

fn default_step() -> u64 {
    1
}

/// `base` with `param` set to `value`, replacing any existing occurrence.
pub(crate) fn with_query_param(base: &Url, param: &str, value: u64) -> Url {
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut url = base.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(param, &value.to_string());
    url
}

/// Value of the page parameter for the zero-based `page_index`.
pub(crate) fn page_value(start: u64, step: u64, page_index: usize) -> u64 {
    start.saturating_add(step.saturating_mul(page_index as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_query_param_replaces_existing() {
        let base = Url::parse("https://www.bbc.com/search?q=generative+ai&page=3").unwrap();
        let url = with_query_param(&base, "page", 4);
        assert_eq!(url.as_str(), "https://www.bbc.com/search?q=generative+ai&page=4");
    }

    #[test]
    fn test_with_query_param_appends() {
        let base = Url::parse("https://api.serpstack.com/search").unwrap();
        let url = with_query_param(&base, "offset", 0);
        assert_eq!(url.as_str(), "https://api.serpstack.com/search?offset=0");
    }

    #[test]
    fn test_page_value_steps() {
        assert_eq!(page_value(1, 1, 0), 1);
        assert_eq!(page_value(1, 1, 3), 4);
        assert_eq!(page_value(0, 100, 2), 200);
    }

    #[test]
    fn test_pagination_from_yaml() {
        let next: Pagination = serde_yaml::from_str(
            "type: next_link\nselector: \"li.a-last a\"\ndisabled_class: a-disabled",
        )
        .unwrap();
        assert_eq!(
            next,
            Pagination::NextLink {
                selector: "li.a-last a".to_string(),
                disabled_class: Some("a-disabled".to_string()),
            }
        );

        let param: Pagination =
            serde_yaml::from_str("type: page_param\nparam: offset\nstart: 0\nstep: 100").unwrap();
        assert_eq!(
            param,
            Pagination::PageParam {
                param: "offset".to_string(),
                start: 0,
                step: 100,
            }
        );

        let single: Pagination = serde_yaml::from_str("type: single").unwrap();
        assert_eq!(single, Pagination::Single);
    }
}

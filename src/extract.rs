//! Field mapping from raw candidates to [`ScrapedRecord`]s.
//!
//! A site profile lists the fields to pull out of every item. HTML profiles
//! address fields with CSS selectors relative to the item element; JSON
//! profiles address them with JSON pointers relative to the item object.
//!
//! ```yaml
//! fields:
//!   - name: url
//!     selector: "a.s-item__link"
//!     attr: href
//!     absolute_url: true
//!     required: true
//!   - name: title
//!     selector: ".s-item__title"
//! fingerprint_field: url
//! ```
//!
//! A missing required field fails the item; a missing optional field is
//! written as an empty string so every record carries the same keys.

use crate::collector::ItemMapper;
use crate::error::{ExtractionError, ProfileError};
use crate::fingerprint::Fingerprint;
use crate::models::{HtmlCandidate, JsonCandidate, ScrapedRecord};
use crate::utils::normalize_whitespace;
use itertools::Itertools;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Declaration of one output field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    /// CSS selector inside the item (HTML). Absent means the item element itself.
    #[serde(default)]
    pub selector: Option<String>,
    /// JSON pointer inside the item (JSON), e.g. `/link`.
    #[serde(default)]
    pub pointer: Option<String>,
    /// Read this attribute instead of the element text (HTML only).
    #[serde(default)]
    pub attr: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Resolve the value against the page URL.
    #[serde(default)]
    pub absolute_url: bool,
}

impl FieldSpec {
    fn is_url(&self) -> bool {
        self.absolute_url || matches!(self.attr.as_deref(), Some("href") | Some("src"))
    }
}

/// What a candidate's fingerprint is computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintKey {
    /// The value of one declared field; URL fields are canonicalised as URLs.
    Field(String),
    /// The item's whole normalised text (HTML) or serialized value (JSON).
    Content,
}

impl FingerprintKey {
    pub fn from_field(field: Option<&str>) -> Self {
        match field {
            Some(name) => FingerprintKey::Field(name.to_string()),
            None => FingerprintKey::Content,
        }
    }
}

pub(crate) fn compile_selector(context: &str, selector: &str) -> Result<Selector, ProfileError> {
    Selector::parse(selector).map_err(|e| ProfileError::InvalidSelector {
        context: context.to_string(),
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Keys every record already carries next to its fields.
pub const RESERVED_FIELDS: [&str; 2] = ["source", "page"];

/// Reject reserved field names and locate the fingerprint field.
fn key_field_index(
    fields: &[FieldSpec],
    key: &FingerprintKey,
) -> Result<Option<usize>, ProfileError> {
    if let Some(field) = fields
        .iter()
        .find(|f| RESERVED_FIELDS.contains(&f.name.as_str()))
    {
        return Err(ProfileError::Invalid(format!(
            "field name `{}` is reserved for record provenance",
            field.name
        )));
    }
    match key {
        FingerprintKey::Content => Ok(None),
        FingerprintKey::Field(name) => fields
            .iter()
            .position(|f| &f.name == name)
            .map(Some)
            .ok_or_else(|| {
                ProfileError::Invalid(format!("fingerprint field `{name}` is not declared"))
            }),
    }
}

fn resolve(page_url: &Url, raw: &str) -> Result<String, ExtractionError> {
    page_url
        .join(raw)
        .map(|u| u.to_string())
        .map_err(|e| ExtractionError::InvalidUrl {
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn fingerprint_value(
    spec: &FieldSpec,
    value: &str,
    page_url: &Url,
) -> Result<Fingerprint, ExtractionError> {
    if spec.is_url() {
        Fingerprint::of_url(value, Some(page_url))
    } else {
        Fingerprint::of_text(value)
    }
}

/// Build the field map, failing on the first missing required field.
fn assemble<'a, I, F>(
    specs: I,
    mut extract: F,
) -> Result<BTreeMap<String, String>, ExtractionError>
where
    I: IntoIterator<Item = &'a FieldSpec>,
    F: FnMut(usize) -> Result<Option<String>, ExtractionError>,
{
    let mut fields = BTreeMap::new();
    for (i, spec) in specs.into_iter().enumerate() {
        match extract(i)? {
            Some(value) => {
                fields.insert(spec.name.clone(), value);
            }
            None if spec.required => {
                return Err(ExtractionError::MissingField {
                    field: spec.name.clone(),
                });
            }
            None => {
                fields.insert(spec.name.clone(), String::new());
            }
        }
    }
    Ok(fields)
}

struct CompiledField {
    spec: FieldSpec,
    selector: Option<Selector>,
}

/// Maps [`HtmlCandidate`]s with CSS selectors.
pub struct HtmlMapper {
    fields: Vec<CompiledField>,
    key: FingerprintKey,
    key_field: Option<usize>,
}

impl HtmlMapper {
    pub fn new(specs: &[FieldSpec], key: FingerprintKey) -> Result<Self, ProfileError> {
        let key_field = key_field_index(specs, &key)?;
        let fields = specs
            .iter()
            .map(|spec| {
                let selector = spec
                    .selector
                    .as_deref()
                    .map(|s| compile_selector(&format!("field `{}`", spec.name), s))
                    .transpose()?;
                Ok(CompiledField {
                    spec: spec.clone(),
                    selector,
                })
            })
            .collect::<Result<Vec<_>, ProfileError>>()?;
        Ok(Self {
            fields,
            key,
            key_field,
        })
    }

    fn extract(
        &self,
        fragment: &ItemFragment,
        field: &CompiledField,
        page_url: &Url,
    ) -> Result<Option<String>, ExtractionError> {
        let element = match &field.selector {
            Some(selector) => fragment.html.select(selector).next(),
            None => fragment.item_element(),
        };
        let Some(element) = element else {
            return Ok(None);
        };

        let raw = match &field.spec.attr {
            Some(attr) => element.value().attr(attr).map(normalize_whitespace),
            None => Some(normalize_whitespace(&element.text().join(" "))),
        };
        match raw.filter(|v| !v.is_empty()) {
            Some(value) if field.spec.absolute_url => resolve(page_url, &value).map(Some),
            other => Ok(other),
        }
    }
}

/// Parsed item markup plus the tag name of the element it was cut from.
struct ItemFragment {
    html: Html,
    tag: String,
}

impl ItemFragment {
    /// Table parts are dropped by the fragment parser outside a table, so
    /// rows and cells are re-wrapped in the context they came from.
    fn parse(markup: &str) -> Self {
        let tag: String = markup
            .trim_start()
            .trim_start_matches('<')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        let html = match tag.as_str() {
            "tr" => Html::parse_fragment(&format!("<table><tbody>{markup}</tbody></table>")),
            "td" | "th" => Html::parse_fragment(&format!(
                "<table><tbody><tr>{markup}</tr></tbody></table>"
            )),
            "tbody" | "thead" | "tfoot" | "caption" | "colgroup" => {
                Html::parse_fragment(&format!("<table>{markup}</table>"))
            }
            _ => Html::parse_fragment(markup),
        };
        Self { html, tag }
    }

    /// The item element itself, below any wrapping added by [`Self::parse`].
    fn item_element(&self) -> Option<ElementRef<'_>> {
        self.html
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == self.tag)
    }

    fn text(&self) -> String {
        match self.item_element() {
            Some(element) => element.text().join(" "),
            None => self.html.root_element().text().join(" "),
        }
    }
}

impl ItemMapper<HtmlCandidate> for HtmlMapper {
    type Record = ScrapedRecord;

    fn fingerprint(&self, item: &HtmlCandidate) -> Result<Fingerprint, ExtractionError> {
        let fragment = ItemFragment::parse(&item.html);
        match (&self.key, self.key_field) {
            (FingerprintKey::Field(_), Some(i)) => {
                let field = &self.fields[i];
                let value = self
                    .extract(&fragment, field, &item.page_url)?
                    .ok_or(ExtractionError::EmptyKey)?;
                fingerprint_value(&field.spec, &value, &item.page_url)
            }
            _ => Fingerprint::of_text(&fragment.text()),
        }
    }

    fn map(&self, item: &HtmlCandidate) -> Result<ScrapedRecord, ExtractionError> {
        let fragment = ItemFragment::parse(&item.html);
        let fields = assemble(self.fields.iter().map(|f| &f.spec), |i| {
            self.extract(&fragment, &self.fields[i], &item.page_url)
        })?;
        Ok(ScrapedRecord {
            source: item.page_url.to_string(),
            page: item.page,
            fields,
        })
    }
}

/// Maps [`JsonCandidate`]s with JSON pointers.
pub struct JsonMapper {
    fields: Vec<FieldSpec>,
    key: FingerprintKey,
    key_field: Option<usize>,
}

impl JsonMapper {
    pub fn new(specs: &[FieldSpec], key: FingerprintKey) -> Result<Self, ProfileError> {
        let key_field = key_field_index(specs, &key)?;
        for spec in specs {
            match spec.pointer.as_deref() {
                Some(p) if p.is_empty() || p.starts_with('/') => {}
                Some(p) => {
                    return Err(ProfileError::Invalid(format!(
                        "field `{}` pointer `{p}` must start with '/'",
                        spec.name
                    )));
                }
                None => {
                    return Err(ProfileError::Invalid(format!(
                        "field `{}` needs a pointer",
                        spec.name
                    )));
                }
            }
        }
        Ok(Self {
            fields: specs.to_vec(),
            key,
            key_field,
        })
    }

    fn extract(
        &self,
        spec: &FieldSpec,
        item: &JsonCandidate,
    ) -> Result<Option<String>, ExtractionError> {
        let pointer = spec.pointer.as_deref().unwrap_or_default();
        let raw = match item.value.pointer(pointer) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(normalize_whitespace(s)),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            Some(other) => Some(other.to_string()),
        };
        match raw.filter(|v| !v.is_empty()) {
            Some(value) if spec.absolute_url => resolve(&item.page_url, &value).map(Some),
            other => Ok(other),
        }
    }
}

impl ItemMapper<JsonCandidate> for JsonMapper {
    type Record = ScrapedRecord;

    fn fingerprint(&self, item: &JsonCandidate) -> Result<Fingerprint, ExtractionError> {
        match (&self.key, self.key_field) {
            (FingerprintKey::Field(_), Some(i)) => {
                let spec = &self.fields[i];
                let value = self.extract(spec, item)?.ok_or(ExtractionError::EmptyKey)?;
                fingerprint_value(spec, &value, &item.page_url)
            }
            _ => Fingerprint::of_text(&item.value.to_string()),
        }
    }

    fn map(&self, item: &JsonCandidate) -> Result<ScrapedRecord, ExtractionError> {
        let fields = assemble(&self.fields, |i| self.extract(&self.fields[i], item))?;
        Ok(ScrapedRecord {
            source: item.page_url.to_string(),
            page: item.page,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const LISTING: &str = r#"<div class="s-item">
        <a class="s-item__link" href="/itm/123?_trkparms=x#reviews">
          <span class="s-item__title">ThinkPad   X1
            Carbon</span>
        </a>
        <span class="s-item__price">$420.00</span>
      </div>"#;

    fn page() -> Url {
        Url::parse("https://www.ebay.com/sch/i.html?_nkw=laptop").unwrap()
    }

    fn html(markup: &str) -> HtmlCandidate {
        HtmlCandidate {
            html: markup.to_string(),
            page_url: page(),
            page: 0,
            index: 0,
        }
    }

    fn field(name: &str, selector: Option<&str>) -> FieldSpec {
        FieldSpec {
            name: name.to_string(),
            selector: selector.map(str::to_string),
            pointer: None,
            attr: None,
            required: false,
            absolute_url: false,
        }
    }

    fn listing_fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec {
                attr: Some("href".to_string()),
                absolute_url: true,
                required: true,
                ..field("url", Some("a.s-item__link"))
            },
            FieldSpec {
                required: true,
                ..field("title", Some(".s-item__title"))
            },
            field("price", Some(".s-item__price")),
            field("shipping", Some(".s-item__shipping")),
        ]
    }

    #[test]
    fn test_html_mapper_extracts_fields() {
        let mapper =
            HtmlMapper::new(&listing_fields(), FingerprintKey::Field("url".to_string())).unwrap();
        let record = mapper.map(&html(LISTING)).unwrap();

        assert_eq!(
            record.get("url"),
            Some("https://www.ebay.com/itm/123?_trkparms=x#reviews")
        );
        assert_eq!(record.get("title"), Some("ThinkPad X1 Carbon"));
        assert_eq!(record.get("price"), Some("$420.00"));
        assert_eq!(record.get("shipping"), Some(""));
        assert_eq!(record.source, page().to_string());
    }

    #[test]
    fn test_html_missing_required_field_fails_item() {
        let mapper = HtmlMapper::new(&listing_fields(), FingerprintKey::Content).unwrap();
        let err = mapper
            .map(&html(r#"<div class="s-item"><a class="s-item__link" href="/itm/9">x</a></div>"#))
            .unwrap_err();
        assert_eq!(
            err,
            ExtractionError::MissingField {
                field: "title".to_string()
            }
        );
    }

    #[test]
    fn test_html_url_fingerprint_ignores_fragment() {
        let mapper =
            HtmlMapper::new(&listing_fields(), FingerprintKey::Field("url".to_string())).unwrap();
        let again = LISTING.replace("#reviews", "");
        assert_eq!(
            mapper.fingerprint(&html(LISTING)).unwrap(),
            mapper.fingerprint(&html(&again)).unwrap()
        );
    }

    #[test]
    fn test_html_content_fingerprint_ignores_markup_spacing() {
        let mapper = HtmlMapper::new(&[field("text", None)], FingerprintKey::Content).unwrap();
        let a = mapper.fingerprint(&html("<p>Rates <b>rise</b></p>")).unwrap();
        let b = mapper.fingerprint(&html("<p>Rates\n   <b>rise</b>  </p>")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_html_self_field_and_empty_key() {
        let mapper = HtmlMapper::new(
            &[FieldSpec {
                attr: Some("data-id".to_string()),
                ..field("id", None)
            }],
            FingerprintKey::Field("id".to_string()),
        )
        .unwrap();
        let record = mapper.map(&html(r#"<article data-id="42">hi</article>"#)).unwrap();
        assert_eq!(record.get("id"), Some("42"));

        let err = mapper.fingerprint(&html("<article>hi</article>")).unwrap_err();
        assert_eq!(err, ExtractionError::EmptyKey);
    }

    const STORY_ROW: &str =
        r#"<tr class="athing" id="7"><td class="title"><a href="/x">Story</a></td></tr>"#;

    #[test]
    fn test_html_table_row_keeps_its_cells() {
        let fields = vec![
            FieldSpec {
                attr: Some("href".to_string()),
                absolute_url: true,
                required: true,
                ..field("url", Some("td.title a"))
            },
            FieldSpec {
                required: true,
                ..field("title", Some("td.title a"))
            },
            FieldSpec {
                attr: Some("class".to_string()),
                ..field("kind", None)
            },
        ];
        let mapper = HtmlMapper::new(&fields, FingerprintKey::Field("url".to_string())).unwrap();

        let record = mapper.map(&html(STORY_ROW)).unwrap();
        assert_eq!(record.get("title"), Some("Story"));
        assert_eq!(record.get("url"), Some("https://www.ebay.com/x"));
        assert_eq!(record.get("kind"), Some("athing"));

        let other = STORY_ROW.replace("/x", "/y");
        assert_ne!(
            mapper.fingerprint(&html(STORY_ROW)).unwrap(),
            mapper.fingerprint(&html(&other)).unwrap()
        );
    }

    #[test]
    fn test_html_table_cell_content_fingerprint() {
        let mapper = HtmlMapper::new(&[field("text", None)], FingerprintKey::Content).unwrap();
        let cell = mapper.map(&html(r#"<td class="title">Story</td>"#)).unwrap();
        assert_eq!(cell.get("text"), Some("Story"));

        let a = mapper.fingerprint(&html("<td>Story one</td>")).unwrap();
        let b = mapper.fingerprint(&html("<td>Story two</td>")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unknown_fingerprint_field_is_rejected() {
        let err = HtmlMapper::new(&listing_fields(), FingerprintKey::Field("sku".to_string()));
        assert!(matches!(err, Err(ProfileError::Invalid(_))));
    }

    #[test]
    fn test_bad_selector_is_rejected() {
        let err = HtmlMapper::new(&[field("x", Some("a[[["))], FingerprintKey::Content);
        assert!(matches!(err, Err(ProfileError::InvalidSelector { .. })));
    }

    fn json_field(name: &str, pointer: &str) -> FieldSpec {
        FieldSpec {
            pointer: Some(pointer.to_string()),
            ..field(name, None)
        }
    }

    fn news(value: serde_json::Value) -> JsonCandidate {
        JsonCandidate {
            value,
            page_url: Url::parse("https://api.serpstack.com/search?query=ai&offset=0").unwrap(),
            page: 0,
            index: 0,
        }
    }

    #[test]
    fn test_json_mapper_stringifies_values() {
        let mapper = JsonMapper::new(
            &[
                json_field("title", "/title"),
                json_field("url", "/url"),
                json_field("position", "/position"),
                json_field("outlet", "/source/name"),
                json_field("thumbnail", "/thumbnail"),
            ],
            FingerprintKey::Field("url".to_string()),
        )
        .unwrap();
        let item = news(json!({
            "title": "AI  rules  passed",
            "url": "https://example.com/ai",
            "position": 3,
            "source": {"name": "Reuters"},
            "thumbnail": null
        }));

        let record = mapper.map(&item).unwrap();
        assert_eq!(record.get("title"), Some("AI rules passed"));
        assert_eq!(record.get("position"), Some("3"));
        assert_eq!(record.get("outlet"), Some("Reuters"));
        assert_eq!(record.get("thumbnail"), Some(""));
    }

    #[test]
    fn test_json_content_fingerprint_tracks_value() {
        let mapper =
            JsonMapper::new(&[json_field("title", "/title")], FingerprintKey::Content).unwrap();
        let a = news(json!({"title": "x", "url": "u"}));
        let b = news(json!({"title": "y", "url": "u"}));
        assert_eq!(mapper.fingerprint(&a).unwrap(), mapper.fingerprint(&a.clone()).unwrap());
        assert_ne!(mapper.fingerprint(&a).unwrap(), mapper.fingerprint(&b).unwrap());
    }

    #[test]
    fn test_reserved_field_names_are_rejected() {
        let html = HtmlMapper::new(&[field("page", Some("span"))], FingerprintKey::Content);
        assert!(matches!(html, Err(ProfileError::Invalid(_))));

        let json = JsonMapper::new(&[json_field("source", "/source")], FingerprintKey::Content);
        assert!(matches!(json, Err(ProfileError::Invalid(_))));
    }

    #[test]
    fn test_json_fields_need_pointers() {
        assert!(JsonMapper::new(&[field("title", None)], FingerprintKey::Content).is_err());
        assert!(
            JsonMapper::new(&[json_field("title", "title")], FingerprintKey::Content).is_err()
        );
    }
}

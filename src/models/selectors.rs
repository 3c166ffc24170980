// src/models/selectors.rs

//! CSS selectors for scraping listing and report pages.

use serde::{Deserialize, Serialize};

/// CSS selectors used by the HTTP fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSelectors {
    /// Selector for each card on a listing page
    #[serde(default = "defaults::listing_item")]
    pub listing_item: String,

    /// Selector for the detail link within a card
    #[serde(default = "defaults::listing_link")]
    pub listing_link: String,

    /// Selector for the status badge within a card
    #[serde(default = "defaults::status")]
    pub listing_status: String,

    /// Selector for the report date within a card, if the listing shows one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_date: Option<String>,

    /// Selector for pagination links
    #[serde(default = "defaults::next_page")]
    pub next_page: String,

    /// Text identifying the "next page" pagination link
    #[serde(default = "defaults::next_page_text")]
    pub next_page_text: String,

    /// HTML attribute name for extracting links (usually "href")
    #[serde(default = "defaults::attr_name")]
    pub attr_name: String,

    /// Selector for the report date on a detail page
    #[serde(default = "defaults::detail_date")]
    pub detail_date: String,

    /// Selector for the status badge on a detail page
    #[serde(default = "defaults::status")]
    pub detail_status: String,

    /// Selector for each entry of the activity log
    #[serde(default = "defaults::activity_item")]
    pub activity_item: String,

    /// Selector for the message text within an activity entry
    #[serde(default = "defaults::activity_message")]
    pub activity_message: String,

    /// Selector for the timestamp within an activity entry
    #[serde(default = "defaults::activity_time")]
    pub activity_time: String,

    /// Regex matching the activity message that closes a report as resolved
    #[serde(default = "defaults::resolution_pattern")]
    pub resolution_pattern: String,

    /// Descriptive fields copied verbatim into the record payload
    #[serde(default = "defaults::fields")]
    pub fields: Vec<FieldSelector>,
}

/// A payload field extracted from a detail page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSelector {
    /// Payload key
    pub name: String,

    /// CSS selector of the element
    pub selector: String,

    /// Read this attribute instead of the element text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
}

impl FieldSelector {
    fn text(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            attr: None,
        }
    }
}

impl Default for PageSelectors {
    fn default() -> Self {
        Self {
            listing_item: defaults::listing_item(),
            listing_link: defaults::listing_link(),
            listing_status: defaults::status(),
            listing_date: None,
            next_page: defaults::next_page(),
            next_page_text: defaults::next_page_text(),
            attr_name: defaults::attr_name(),
            detail_date: defaults::detail_date(),
            detail_status: defaults::status(),
            activity_item: defaults::activity_item(),
            activity_message: defaults::activity_message(),
            activity_time: defaults::activity_time(),
            resolution_pattern: defaults::resolution_pattern(),
            fields: defaults::fields(),
        }
    }
}

mod defaults {
    use super::FieldSelector;

    pub fn listing_item() -> String {
        "article.card".into()
    }
    pub fn listing_link() -> String {
        "a.card__media__bg".into()
    }
    pub fn status() -> String {
        "span.badge:not(.badge--comment)".into()
    }
    pub fn next_page() -> String {
        "a.pagination__link".into()
    }
    pub fn next_page_text() -> String {
        "Következő".into()
    }
    pub fn attr_name() -> String {
        "href".into()
    }
    pub fn detail_date() -> String {
        "time.report__date".into()
    }
    pub fn activity_item() -> String {
        "div.comment__body".into()
    }
    pub fn activity_message() -> String {
        "p.comment__message".into()
    }
    pub fn activity_time() -> String {
        "time".into()
    }
    pub fn resolution_pattern() -> String {
        r"(?is)lezárta a bejelentést.*Megoldott.*eredménnyel".into()
    }
    pub fn fields() -> Vec<FieldSelector> {
        vec![
            FieldSelector::text("title", "h1.report__title"),
            FieldSelector::text("author", "div.report__reporter div.report__author"),
            FieldSelector::text("category", "div.report__category a"),
            FieldSelector::text("institution", "div.report__institution a"),
            FieldSelector::text("supporter", "span.report__partner__about"),
            FieldSelector::text("description", "p.report__description"),
            FieldSelector::text("address", "address.report__location__address"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let selectors: PageSelectors = toml::from_str(
            r#"
            listing_item = "li.report"
            listing_date = "time.card__date"
            "#,
        )
        .unwrap();

        assert_eq!(selectors.listing_item, "li.report");
        assert_eq!(selectors.listing_date.as_deref(), Some("time.card__date"));
        assert_eq!(selectors.attr_name, "href");
        assert_eq!(selectors.fields.len(), 7);
    }
}

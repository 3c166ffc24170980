// src/services/http.rs

//! HTTP record fetcher.
//!
//! Fetches listing and report pages and extracts data using the configured
//! CSS selectors.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

use crate::error::{AppError, FetchError, Result};
use crate::models::{Config, ListingEntry, ListingPage, PageSelectors, Record, UpdateConfig};
use crate::services::{DateParser, FetchResult, RecordFetcher, with_retry};
use crate::utils::{http::create_client, resolve_url};

/// A payload field with its compiled selector.
struct FieldRule {
    name: String,
    selector: Selector,
    attr: Option<String>,
}

/// Selectors compiled once per fetcher.
struct CompiledSelectors {
    listing_item: Selector,
    listing_link: Selector,
    listing_status: Selector,
    listing_date: Option<Selector>,
    next_page: Selector,
    next_page_text: String,
    attr_name: String,
    detail_date: Selector,
    detail_status: Selector,
    activity_item: Selector,
    activity_message: Selector,
    activity_time: Selector,
    resolution: Regex,
    fields: Vec<FieldRule>,
}

impl CompiledSelectors {
    fn compile(s: &PageSelectors) -> Result<Self> {
        let fields = s
            .fields
            .iter()
            .map(|f| {
                Ok(FieldRule {
                    name: f.name.clone(),
                    selector: parse_selector(&f.selector)?,
                    attr: f.attr.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let resolution = Regex::new(&s.resolution_pattern).map_err(|e| {
            AppError::config(format!("invalid resolution_pattern: {e}"))
        })?;

        Ok(Self {
            listing_item: parse_selector(&s.listing_item)?,
            listing_link: parse_selector(&s.listing_link)?,
            listing_status: parse_selector(&s.listing_status)?,
            listing_date: s.listing_date.as_deref().map(parse_selector).transpose()?,
            next_page: parse_selector(&s.next_page)?,
            next_page_text: s.next_page_text.trim().to_lowercase(),
            attr_name: s.attr_name.clone(),
            detail_date: parse_selector(&s.detail_date)?,
            detail_status: parse_selector(&s.detail_status)?,
            activity_item: parse_selector(&s.activity_item)?,
            activity_message: parse_selector(&s.activity_message)?,
            activity_time: parse_selector(&s.activity_time)?,
            resolution,
            fields,
        })
    }
}

/// Fetcher for the live report site.
pub struct HttpFetcher {
    client: Client,
    selectors: CompiledSelectors,
    dates: DateParser,
    update: UpdateConfig,
    max_retries: u32,
    backoff: Duration,
    delay: Duration,
}

impl HttpFetcher {
    /// Create a fetcher from the full configuration.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: create_client(&config.crawler)?,
            selectors: CompiledSelectors::compile(&config.selectors)?,
            dates: DateParser::new(&config.dates),
            update: config.update.clone(),
            max_retries: config.crawler.max_retries,
            backoff: Duration::from_millis(config.crawler.retry_backoff_ms),
            delay: config.crawler.request_delay(),
        })
    }

    /// GET a page body, retrying transient failures.
    async fn get_text(&self, url: &str) -> FetchResult<String> {
        let client = &self.client;
        let text = with_retry(self.max_retries, self.backoff, move || async move {
            let response = client
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| FetchError::from_reqwest(url, &e))?;
            response
                .text()
                .await
                .map_err(|e| FetchError::from_reqwest(url, &e))
        })
        .await?;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(text)
    }

    fn parse_listing(&self, html: &str, page_url: &str) -> FetchResult<ListingPage> {
        let base = Url::parse(page_url).map_err(|e| FetchError::parse(page_url, e))?;
        let document = Html::parse_document(html);
        let sel = &self.selectors;

        let mut entries = Vec::new();
        for card in document.select(&sel.listing_item) {
            let Some(href) = card
                .select(&sel.listing_link)
                .next()
                .and_then(|a| a.value().attr(&sel.attr_name))
            else {
                continue;
            };

            let mut entry = ListingEntry::new(resolve_url(&base, href));
            entry.status = card.select(&sel.listing_status).next().map(element_text);
            if entry.status.is_none() {
                log::warn!("No status badge on listing card {}", entry.url);
            }
            entry.date = sel
                .listing_date
                .as_ref()
                .and_then(|s| card.select(s).next())
                .and_then(|e| self.dates.parse(&element_text(e)));
            entries.push(entry);
        }

        let next_page_url = document
            .select(&sel.next_page)
            .find(|a| {
                sel.next_page_text.is_empty()
                    || element_text(*a).to_lowercase().contains(&sel.next_page_text)
            })
            .and_then(|a| a.value().attr(&sel.attr_name))
            .map(|href| resolve_url(&base, href));

        Ok(ListingPage {
            entries,
            next_page_url,
        })
    }

    fn parse_detail(&self, html: &str, url: &str) -> FetchResult<Record> {
        let document = Html::parse_document(html);
        let sel = &self.selectors;

        let raw_date = document
            .select(&sel.detail_date)
            .next()
            .map(element_text)
            .ok_or_else(|| FetchError::parse(url, "report date not found"))?;
        let report_date = self
            .dates
            .parse(&raw_date)
            .ok_or_else(|| FetchError::parse(url, format!("unparsable report date '{raw_date}'")))?;

        let mut record = Record::new(url, report_date);
        record.status = document.select(&sel.detail_status).next().map(element_text);
        if record.status.is_none() {
            log::warn!("No status badge on report {}", url);
        }

        for rule in &sel.fields {
            let value = document
                .select(&rule.selector)
                .next()
                .and_then(|e| match &rule.attr {
                    Some(attr) => e.value().attr(attr).map(str::to_string),
                    None => Some(element_text(e)),
                })
                .filter(|v| !v.is_empty())
                .map_or(Value::Null, Value::String);
            record.payload.insert(rule.name.clone(), value);
        }

        if self.update.is_resolved(record.status.as_deref()) {
            record.resolution_date = self.find_resolution_date(&document);
        }
        Ok(record)
    }

    /// Date of the first activity entry that closed the report as resolved.
    fn find_resolution_date(&self, document: &Html) -> Option<chrono::NaiveDate> {
        let sel = &self.selectors;
        document
            .select(&sel.activity_item)
            .filter(|item| {
                item.select(&sel.activity_message)
                    .any(|msg| sel.resolution.is_match(&msg.html()))
            })
            .find_map(|item| {
                item.select(&sel.activity_time)
                    .find_map(|t| self.dates.parse(&element_text(t)))
            })
    }
}

#[async_trait]
impl RecordFetcher for HttpFetcher {
    async fn fetch_listing_page(&self, url: &str) -> FetchResult<ListingPage> {
        let html = self.get_text(url).await?;
        self.parse_listing(&html, url)
    }

    async fn fetch_detail_record(&self, url: &str) -> FetchResult<Record> {
        let html = self.get_text(url).await?;
        self.parse_detail(&html, url)
    }
}

/// Element text with whitespace runs collapsed.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const LISTING: &str = r#"
        <html><body>
          <article class="card">
            <a class="card__media__bg" href="/bejelentesek/budapest/101"></a>
            <span class="badge badge--comment">3</span>
            <span class="badge">Megoldott</span>
          </article>
          <article class="card">
            <a class="card__media__bg" href="https://jarokelo.hu/bejelentesek/budapest/100"></a>
            <span class="badge">Várakozás</span>
          </article>
          <article class="card"><p>no link</p></article>
          <nav>
            <a class="pagination__link" href="?page=1">Előző</a>
            <a class="pagination__link" href="?page=3">Következő</a>
          </nav>
        </body></html>"#;

    const DETAIL: &str = r#"
        <html><body>
          <h1 class="report__title">  Kátyú a   Fő utcán </h1>
          <div class="report__reporter"><div class="report__author">Anonim</div></div>
          <time class="report__date">2025. szeptember 15.</time>
          <div class="report__category"><a>Úthiba</a></div>
          <span class="badge">Megoldott</span>
          <div class="comment__body">
            <p class="comment__message">Új hozzászólás</p>
            <time>2025. szeptember 20. 10:00</time>
          </div>
          <div class="comment__body">
            <p class="comment__message">Az intézmény lezárta a bejelentést <b>Megoldott</b> eredménnyel.</p>
            <time>2025. október 2. 14:05</time>
          </div>
        </body></html>"#;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&Config::default()).unwrap()
    }

    #[test]
    fn test_parse_selector_valid() {
        assert!(parse_selector("div.class").is_ok());
        assert!(parse_selector("span.badge:not(.badge--comment)").is_ok());
    }

    #[test]
    fn test_parse_selector_invalid() {
        assert!(parse_selector("[[invalid").is_err());
    }

    #[test]
    fn test_parse_listing() {
        let page = fetcher()
            .parse_listing(LISTING, "https://jarokelo.hu/bejelentesek?page=2")
            .unwrap();

        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].url, "https://jarokelo.hu/bejelentesek/budapest/101");
        assert_eq!(page.entries[0].status.as_deref(), Some("Megoldott"));
        assert_eq!(page.entries[1].status.as_deref(), Some("Várakozás"));
        assert_eq!(
            page.next_page_url.as_deref(),
            Some("https://jarokelo.hu/bejelentesek?page=3")
        );
    }

    #[test]
    fn test_last_listing_page_has_no_next() {
        let html = r#"<article class="card"><a class="card__media__bg" href="/r/1"></a></article>
                      <a class="pagination__link" href="?page=1">Előző</a>"#;
        let page = fetcher().parse_listing(html, "https://jarokelo.hu/b").unwrap();
        assert_eq!(page.entries.len(), 1);
        assert!(page.entries[0].status.is_none());
        assert!(page.next_page_url.is_none());
    }

    #[test]
    fn test_parse_detail() {
        let url = "https://jarokelo.hu/bejelentesek/budapest/101";
        let record = fetcher().parse_detail(DETAIL, url).unwrap();

        assert_eq!(record.identity, url);
        assert_eq!(record.report_date, NaiveDate::from_ymd_opt(2025, 9, 15).unwrap());
        assert_eq!(record.status.as_deref(), Some("Megoldott"));
        assert_eq!(
            record.resolution_date,
            Some(NaiveDate::from_ymd_opt(2025, 10, 2).unwrap())
        );
        assert_eq!(record.payload["title"], "Kátyú a Fő utcán");
        assert_eq!(record.payload["category"], "Úthiba");
        assert_eq!(record.payload["institution"], Value::Null);
    }

    #[test]
    fn test_unresolved_report_has_no_resolution_date() {
        let html = DETAIL.replace(
            r#"<span class="badge">Megoldott</span>"#,
            r#"<span class="badge">Várakozás</span>"#,
        );
        let record = fetcher().parse_detail(&html, "https://x/1").unwrap();
        assert!(record.resolution_date.is_none());
    }

    #[test]
    fn test_missing_report_date_is_parse_error() {
        let err = fetcher()
            .parse_detail("<h1 class=\"report__title\">x</h1>", "https://x/1")
            .unwrap_err();
        assert!(matches!(err, FetchError::Parse { .. }));
    }
}

//! Parsing of dates as printed on report pages.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::models::DateConfig;

/// Parses ISO-like dates and the long form `2025. szeptember 15.`.
#[derive(Debug, Clone)]
pub struct DateParser {
    months: BTreeMap<String, u32>,
    formats: Vec<String>,
}

impl DateParser {
    pub fn new(config: &DateConfig) -> Self {
        Self {
            months: config
                .month_names
                .iter()
                .map(|(name, month)| (name.to_lowercase(), *month))
                .collect(),
            formats: config.formats.clone(),
        }
    }

    /// Parse a date, ignoring anything after the day (such as a time).
    pub fn parse(&self, text: &str) -> Option<NaiveDate> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        self.formats
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
            .or_else(|| self.parse_long_form(text))
    }

    fn parse_long_form(&self, text: &str) -> Option<NaiveDate> {
        let mut parts = text.split_whitespace();
        let year = parts.next()?.trim_end_matches('.').parse().ok()?;
        let month = *self.months.get(&parts.next()?.trim_end_matches('.').to_lowercase())?;
        let day = parts.next()?.trim_end_matches('.').parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

impl Default for DateParser {
    fn default() -> Self {
        Self::new(&DateConfig::default())
    }
}

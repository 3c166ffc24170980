//! Utility functions and helpers.

pub mod http;
pub mod log;

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use url::Url;

use crate::error::Result;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Read a URL list file: one URL per line, blank lines ignored, duplicates
/// dropped while keeping first-seen order.
pub fn read_url_list(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    let mut seen = BTreeSet::new();
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect())
}

/// Write URLs one per line, replacing the file.
pub fn write_url_list<'a>(path: &Path, urls: impl IntoIterator<Item = &'a String>) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut count = 0;
    let mut content = String::new();
    for url in urls {
        content.push_str(url);
        content.push('\n');
        count += 1;
    }
    fs::write(path, content)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://example.com/path/").unwrap();
        assert_eq!(
            resolve_url(&base, "page.html"),
            "https://example.com/path/page.html"
        );
        assert_eq!(
            resolve_url(&base, "/root.html"),
            "https://example.com/root.html"
        );
        assert_eq!(
            resolve_url(&base, "https://other.com/x"),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_url_list_roundtrip_dedupes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out/urls.txt");
        let urls = vec!["u2".to_string(), "u1".to_string()];
        assert_eq!(write_url_list(&path, &urls).unwrap(), 2);

        std::fs::write(&path, "u2\n\n  u1 \nu2\n").unwrap();
        assert_eq!(read_url_list(&path).unwrap(), vec!["u2", "u1"]);
    }
}

//! Publisher adapters that turn a date scope into raw articles.
//!
//! Each adapter talks to one regulator's public listing (API, HTML page or
//! RSS feed) and hands back
//! [`RawArticle`]s with their bodies already reduced to plain text. The
//! [`SourceRegistry`] maps a [`Source`] to the adapter that serves it.

pub mod hkex;
pub mod hkma;
pub mod sec;
pub mod sfc;

pub use hkex::HkexAdapter;
pub use hkma::HkmaAdapter;
pub use sec::SecAdapter;
pub use sfc::SfcAdapter;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};

use crate::error::FetchError;
use crate::models::{hk_offset, hk_start_of_day, DateScope, RawArticle, Source};

/// Capability that lists a publisher's articles for a date scope
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    async fn fetch(&self, scope: DateScope) -> Result<Vec<RawArticle>, FetchError>;
}

/// Adapters keyed by the publisher they serve
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: HashMap<Source, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for the same source
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.source(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, source: Source) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&source).cloned()
    }

    /// Registered sources in stable order
    pub fn sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self.adapters.keys().copied().collect();
        sources.sort();
        sources
    }
}

/// HTTP client shared by the publisher adapters
pub fn http_client(user_agent: &str, timeout: Duration) -> Result<Client, FetchError> {
    Ok(Client::builder().user_agent(user_agent).timeout(timeout).build()?)
}

/// Parse a publisher timestamp.
///
/// Accepts RFC 3339, a naive date-time or a bare date; naive values are read
/// as Hong Kong local time.
pub fn parse_issue_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return naive
                .and_local_timezone(hk_offset())
                .single()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().map(hk_start_of_day)
}

/// Plain text of an HTML document.
///
/// Uses the first element matching one of `selectors`, or the whole document
/// when none match. Script and style contents are dropped.
pub fn html_to_text(html: &str, selectors: &[&str]) -> String {
    let doc = Html::parse_document(html);

    for sel_str in selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return element_text(el);
            }
        }
    }

    element_text(doc.root_element())
}

fn element_text(el: ElementRef<'_>) -> String {
    let mut lines = Vec::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript" | "head" | "title"));
        if hidden {
            continue;
        }
        let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::hk_day;

    struct Fixed(Source);

    #[async_trait]
    impl SourceAdapter for Fixed {
        fn source(&self) -> Source {
            self.0
        }

        async fn fetch(&self, _scope: DateScope) -> Result<Vec<RawArticle>, FetchError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = SourceRegistry::new()
            .with(Arc::new(Fixed(Source::Sfc)))
            .with(Arc::new(Fixed(Source::Hkma)));

        assert_eq!(registry.sources(), vec![Source::Hkma, Source::Sfc]);
        assert!(registry.get(Source::Sfc).is_some());
        assert!(registry.get(Source::Sec).is_none());
    }

    #[test]
    fn test_parse_issue_date_formats() {
        let day = NaiveDate::from_ymd_opt(2024, 12, 15).unwrap();

        let rfc = parse_issue_date("2024-12-15T18:30:00+08:00").unwrap();
        assert_eq!(hk_day(&rfc), day);

        let zulu = parse_issue_date("2024-12-14T17:00:00Z").unwrap();
        assert_eq!(hk_day(&zulu), day);

        let naive = parse_issue_date("2024-12-15T00:30:00.000").unwrap();
        assert_eq!(hk_day(&naive), day);

        let bare = parse_issue_date("2024-12-15").unwrap();
        assert_eq!(bare, hk_start_of_day(day));

        assert_eq!(parse_issue_date(""), None);
        assert_eq!(parse_issue_date("15/12/2024"), None);
    }

    #[test]
    fn test_html_to_text_prefers_selector() {
        let html = r#"<html><head><title>HKMA</title><style>p { color: red }</style></head>
            <body><nav>Menu</nav>
            <div class="content-wrapper"><p>First   paragraph</p><p>Second</p></div>
            <script>track()</script></body></html>"#;

        assert_eq!(html_to_text(html, &["div.content-wrapper"]), "First paragraph\nSecond");
        assert_eq!(html_to_text(html, &["article"]), "Menu\nFirst paragraph\nSecond");
    }
}

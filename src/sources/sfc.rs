//! Securities and Futures Commission news adapter.

use async_trait::async_trait;
use chrono::Datelike;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{html_to_text, parse_issue_date, SourceAdapter};
use crate::error::FetchError;
use crate::models::{hk_day, DateScope, RawArticle, Source};

pub const DEFAULT_BASE_URL: &str = "https://apps.sfc.hk/edistributionWeb/api/news";
const GATEWAY_BASE: &str = "https://apps.sfc.hk/edistributionWeb/gateway";

pub struct SfcAdapter {
    client: Client,
    base_url: String,
    lang: String,
    page_size: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    lang: &'a str,
    category: &'a str,
    year: String,
    month: String,
    page_no: u32,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Option<Vec<SearchItem>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    news_ref_no: Option<String>,
    issue_date: Option<String>,
    title: Option<String>,
    lang: Option<String>,
}

impl SfcAdapter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            lang: "TC".to_string(),
            page_size: 100,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_lang(mut self, lang: &str) -> Self {
        self.lang = lang.to_uppercase();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn search_month(&self, year: i32, month: u32) -> Result<Vec<SearchItem>, FetchError> {
        let url = format!("{}/search", self.base_url);
        let request = SearchRequest {
            lang: &self.lang,
            category: "all",
            year: year.to_string(),
            month: format!("{month:02}"),
            page_no: 0,
            page_size: self.page_size,
        };

        debug!(year, month, "Searching SFC news");

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::Parse(format!("SFC search response: {e}")))?;

        Ok(parsed.items.unwrap_or_default())
    }

    /// Body text behind an API content URL; empty on any failure
    async fn fetch_body(&self, api_url: &str) -> String {
        let response = match self.client.get(api_url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(url = %api_url, status = r.status().as_u16(), "SFC content fetch failed");
                return String::new();
            }
            Err(e) => {
                warn!(url = %api_url, error = %e, "SFC content fetch failed");
                return String::new();
            }
        };

        match response.text().await {
            Ok(raw) => content_text(&raw),
            Err(e) => {
                warn!(url = %api_url, error = %e, "SFC content body unreadable");
                String::new()
            }
        }
    }

    fn content_api_url(&self, ref_no: &str, lang: &str) -> String {
        format!("{}/content?refNo={ref_no}&lang={lang}", self.base_url)
    }
}

#[async_trait]
impl SourceAdapter for SfcAdapter {
    fn source(&self) -> Source {
        Source::Sfc
    }

    #[instrument(skip(self), fields(source = "SFC", scope = %scope))]
    async fn fetch(&self, scope: DateScope) -> Result<Vec<RawArticle>, FetchError> {
        let mut articles = Vec::new();

        for (year, month) in months_in(&scope) {
            let items = self.search_month(year, month).await?;
            debug!(year, month, count = items.len(), "SFC search page received");

            for item in items {
                let issue_date = item.issue_date.as_deref().and_then(parse_issue_date);
                let in_scope = issue_date.as_ref().is_some_and(|d| scope.contains(hk_day(d)));
                if !in_scope {
                    continue;
                }

                let (url, body) = match item.news_ref_no.as_deref().filter(|r| !r.is_empty()) {
                    Some(ref_no) => {
                        let lang = item.lang.as_deref().unwrap_or(&self.lang);
                        let api_url = self.content_api_url(ref_no, lang);
                        let body = self.fetch_body(&api_url).await;
                        (Some(canonical_news_url(&api_url)), body)
                    }
                    None => (None, String::new()),
                };

                articles.push(RawArticle {
                    title: item.title.unwrap_or_default(),
                    body,
                    url,
                    issue_date,
                });
            }
        }

        info!(count = articles.len(), "Fetched SFC news");
        Ok(articles)
    }
}

/// Calendar months touched by a scope, oldest first
fn months_in(scope: &DateScope) -> Vec<(i32, u32)> {
    let last = (scope.last_day().year(), scope.last_day().month());
    let mut current = (scope.first_day().year(), scope.first_day().month());
    let mut months = vec![current];

    while current < last {
        current = if current.1 == 12 {
            (current.0 + 1, 1)
        } else {
            (current.0, current.1 + 1)
        };
        months.push(current);
    }
    months
}

/// Map an API content URL to the public gateway page for the same release.
/// URLs without `refNo` and `lang` are returned unchanged.
pub fn canonical_news_url(api_url: &str) -> String {
    let Ok(url) = Url::parse(api_url) else {
        return api_url.to_string();
    };

    let mut ref_no = None;
    let mut lang = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "refNo" if !value.is_empty() => ref_no = Some(value.into_owned()),
            "lang" if !value.is_empty() => lang = Some(value.to_uppercase()),
            _ => {}
        }
    }

    match (ref_no, lang) {
        (Some(ref_no), Some(lang)) => {
            format!("{GATEWAY_BASE}/{lang}/news-and-announcements/news/doc?refNo={ref_no}")
        }
        _ => api_url.to_string(),
    }
}

/// Text of a content response: JSON carrying HTML, or HTML directly
fn content_text(raw: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        for field in ["html", "content"] {
            if let Some(html) = value.get(field).and_then(|v| v.as_str()) {
                return html_to_text(html, &[]);
            }
        }
        return String::new();
    }
    html_to_text(raw, &["main", "article"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn adapter(server: &MockServer) -> SfcAdapter {
        SfcAdapter::new(Client::new()).with_base_url(&format!("{}/api/news", server.uri()))
    }

    #[test]
    fn test_months_in_scope() {
        assert_eq!(months_in(&DateScope::day(date(2024, 12, 15))), vec![(2024, 12)]);
        assert_eq!(
            months_in(&DateScope::range(date(2024, 11, 28), date(2025, 1, 2))),
            vec![(2024, 11), (2024, 12), (2025, 1)]
        );
    }

    #[test]
    fn test_canonical_news_url() {
        assert_eq!(
            canonical_news_url("https://apps.sfc.hk/edistributionWeb/api/news/content?refNo=24PR210&lang=tc"),
            "https://apps.sfc.hk/edistributionWeb/gateway/TC/news-and-announcements/news/doc?refNo=24PR210"
        );
        assert_eq!(
            canonical_news_url("https://www.sfc.hk/en/News-and-announcements"),
            "https://www.sfc.hk/en/News-and-announcements"
        );
        assert_eq!(canonical_news_url("not a url"), "not a url");
    }

    #[test]
    fn test_content_text_accepts_json_or_html() {
        assert_eq!(content_text(r#"{"html":"<p>Hello</p><p>world</p>"}"#), "Hello\nworld");
        assert_eq!(content_text("<html><body><main><p>Body</p></main></body></html>"), "Body");
        assert_eq!(content_text(r#"{"unexpected":1}"#), "");
    }

    #[tokio::test]
    async fn test_fetch_filters_to_scope_and_loads_bodies() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/news/search"))
            .and(body_partial_json(json!({
                "lang": "TC", "category": "all", "year": "2024", "month": "12", "pageNo": 0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    { "newsRefNo": "24PR210", "issueDate": "2024-12-15T18:00:00+08:00",
                      "title": "Update on Digital Assets", "lang": "TC" },
                    { "newsRefNo": "24PR209", "issueDate": "2024-12-14T10:00:00+08:00",
                      "title": "Earlier news", "lang": "TC" },
                    { "newsRefNo": "24PR211", "issueDate": "2024-12-15T09:00:00+08:00",
                      "title": "Broken body", "lang": "TC" }
                ],
                "total": 3
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/news/content"))
            .and(query_param("refNo", "24PR210"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "html": "<p>The SFC reminds...</p>" })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/news/content"))
            .and(query_param("refNo", "24PR211"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let articles = adapter(&server).fetch(DateScope::day(date(2024, 12, 15))).await.unwrap();

        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "Update on Digital Assets");
        assert_eq!(articles[0].body, "The SFC reminds...");
        assert_eq!(
            articles[0].url.as_deref(),
            Some("https://apps.sfc.hk/edistributionWeb/gateway/TC/news-and-announcements/news/doc?refNo=24PR210")
        );
        assert_eq!(hk_day(&articles[0].issue_date.unwrap()), date(2024, 12, 15));

        assert_eq!(articles[1].title, "Broken body");
        assert_eq!(articles[1].body, "");
    }

    #[tokio::test]
    async fn test_search_failure_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/news/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = adapter(&server).fetch(DateScope::day(date(2024, 12, 15))).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_unparseable_listing_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/news/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let err = adapter(&server).fetch(DateScope::day(date(2024, 12, 15))).await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[tokio::test]
    async fn test_empty_listing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/news/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": null, "total": 0 })))
            .mount(&server)
            .await;

        let articles = adapter(&server).fetch(DateScope::day(date(2024, 12, 15))).await.unwrap();
        assert!(articles.is_empty());
    }
}

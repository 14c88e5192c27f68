//! U.S. Securities and Exchange Commission press release adapter (RSS).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use super::{html_to_text, SourceAdapter};
use crate::error::FetchError;
use crate::models::{hk_day, DateScope, RawArticle, Source};

pub const DEFAULT_FEED_URL: &str = "https://www.sec.gov/news/pressreleases.rss";

const CONTENT_SELECTORS: &[&str] = &["div.main-content__main.page-layout-type--layout-details", "main"];

pub struct SecAdapter {
    client: Client,
    feed_url: String,
}

/// Feed entry reduced to the fields an article needs
#[derive(Debug)]
struct FeedItem {
    title: String,
    link: Option<String>,
    description: String,
    published: Option<DateTime<Utc>>,
}

impl SecAdapter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            feed_url: DEFAULT_FEED_URL.to_string(),
        }
    }

    pub fn with_feed_url(mut self, feed_url: &str) -> Self {
        self.feed_url = feed_url.to_string();
        self
    }

    /// Page text, or `None` when the page is unavailable or has no text
    async fn fetch_body(&self, link: &str) -> Option<String> {
        let result = async {
            let response = self.client.get(link).send().await?.error_for_status()?;
            response.text().await
        }
        .await;

        match result {
            Ok(html) => Some(html_to_text(&html, CONTENT_SELECTORS)).filter(|text| !text.is_empty()),
            Err(e) => {
                warn!(url = %link, error = %e, "SEC press release fetch failed");
                None
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for SecAdapter {
    fn source(&self) -> Source {
        Source::Sec
    }

    #[instrument(skip(self), fields(source = "SEC", scope = %scope))]
    async fn fetch(&self, scope: DateScope) -> Result<Vec<RawArticle>, FetchError> {
        let response = self.client.get(&self.feed_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: self.feed_url.clone(),
            });
        }

        let content = response.text().await?;
        let items = parse_feed(&content)?;
        debug!(count = items.len(), "SEC feed entries parsed");

        let mut articles = Vec::new();
        for item in items {
            // Undated entries are kept; the scope only filters what it can place
            if item.published.is_some_and(|d| !scope.contains(hk_day(&d))) {
                continue;
            }

            let body = match &item.link {
                Some(link) => self.fetch_body(link).await.unwrap_or(item.description),
                None => item.description,
            };

            articles.push(RawArticle {
                title: item.title,
                body,
                url: item.link,
                issue_date: item.published,
            });
        }

        info!(count = articles.len(), "Fetched SEC press releases");
        Ok(articles)
    }
}

fn parse_feed(content: &str) -> Result<Vec<FeedItem>, FetchError> {
    let feed = parser::parse(content.as_bytes()).map_err(|e| FetchError::Parse(format!("SEC feed: {e}")))?;

    Ok(feed
        .entries
        .into_iter()
        .map(|entry| FeedItem {
            title: entry.title.map(|t| t.content.trim().to_string()).unwrap_or_default(),
            link: entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .filter(|href| !href.is_empty()),
            description: entry
                .summary
                .map(|s| html_to_text(&s.content, &[]))
                .unwrap_or_default(),
            published: entry.published.or(entry.updated),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn feed(base: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>SEC Press Releases</title>
    <link>https://www.sec.gov/news/pressreleases</link>
    <description>Press releases</description>
    <item>
      <title>SEC Charges Investment Adviser</title>
      <link>{base}/newsroom/press-releases/2025-90</link>
      <description>Short teaser</description>
      <pubDate>Thu, 03 Jul 2025 11:00:00 -0400</pubDate>
      <guid>{base}/newsroom/press-releases/2025-90</guid>
    </item>
    <item>
      <title>Earlier Release</title>
      <link>{base}/newsroom/press-releases/2025-89</link>
      <description>Not in scope</description>
      <pubDate>Wed, 02 Jul 2025 09:00:00 -0400</pubDate>
    </item>
    <item>
      <title>Statement on Market Structure</title>
      <link>{base}/gone</link>
      <description>Fallback text</description>
      <pubDate>Thu, 03 Jul 2025 08:00:00 -0400</pubDate>
    </item>
  </channel>
</rss>"#
        )
    }

    #[test]
    fn test_parse_feed_reads_entries() {
        let items = parse_feed(&feed("https://www.sec.gov")).unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].title, "SEC Charges Investment Adviser");
        assert_eq!(
            items[0].link.as_deref(),
            Some("https://www.sec.gov/newsroom/press-releases/2025-90")
        );
        assert_eq!(items[0].description, "Short teaser");
        // 11:00 EDT is 23:00 in Hong Kong the same day
        assert_eq!(hk_day(&items[0].published.unwrap()), date(2025, 7, 3));
    }

    #[test]
    fn test_unparseable_feed_is_parse_error() {
        assert!(matches!(parse_feed("not a feed"), Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_fetch_filters_by_hk_day_and_falls_back_to_description() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/news/pressreleases.rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed(&server.uri())))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/newsroom/press-releases/2025-90"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body><nav>Skip</nav>
                <div class="main-content__main page-layout-type--layout-details">
                  <h1>SEC Charges Investment Adviser</h1><p>Washington D.C., July 3, 2025</p>
                </div></body></html>"#,
            ))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let adapter = SecAdapter::new(Client::new()).with_feed_url(&format!("{}/news/pressreleases.rss", server.uri()));
        let articles = adapter.fetch(DateScope::day(date(2025, 7, 3))).await.unwrap();

        let titles: Vec<&str> = articles.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["SEC Charges Investment Adviser", "Statement on Market Structure"]);
        assert_eq!(articles[0].body, "SEC Charges Investment Adviser\nWashington D.C., July 3, 2025");
        assert_eq!(articles[1].body, "Fallback text");
        assert!(articles.iter().all(|a| a.issue_date.is_some()));
    }

    #[tokio::test]
    async fn test_feed_failure_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let adapter = SecAdapter::new(Client::new()).with_feed_url(&format!("{}/rss", server.uri()));
        let err = adapter.fetch(DateScope::day(date(2025, 7, 3))).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 403, .. }));
    }
}

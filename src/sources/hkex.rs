//! Hong Kong Exchanges and Clearing regulatory announcements adapter.
//!
//! HKEX has no listing API. The announcements page is a single HTML listing
//! of recent rows, so the scope is applied client-side by row date.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{html_to_text, SourceAdapter};
use crate::error::FetchError;
use crate::models::{hk_start_of_day, DateScope, RawArticle, Source};

pub const DEFAULT_LISTING_URL: &str = "https://www.hkex.com.hk/News/Regulatory-Announcements?sc_lang=en";

const CONTENT_SELECTORS: &[&str] = &["main"];

pub struct HkexAdapter {
    client: Client,
    listing_url: String,
}

/// One row of the announcements listing
#[derive(Debug, Clone, PartialEq)]
struct ListingRow {
    day: NaiveDate,
    title: String,
    url: Option<String>,
}

impl HkexAdapter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            listing_url: DEFAULT_LISTING_URL.to_string(),
        }
    }

    pub fn with_listing_url(mut self, listing_url: &str) -> Self {
        self.listing_url = listing_url.to_string();
        self
    }

    async fn fetch_body(&self, link: &str) -> String {
        let result = async {
            let response = self.client.get(link).send().await?.error_for_status()?;
            response.text().await
        }
        .await;

        match result {
            Ok(html) => html_to_text(&html, CONTENT_SELECTORS),
            Err(e) => {
                warn!(url = %link, error = %e, "HKEX announcement fetch failed");
                String::new()
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for HkexAdapter {
    fn source(&self) -> Source {
        Source::Hkex
    }

    #[instrument(skip(self), fields(source = "HKEX", scope = %scope))]
    async fn fetch(&self, scope: DateScope) -> Result<Vec<RawArticle>, FetchError> {
        let base = Url::parse(&self.listing_url)
            .map_err(|e| FetchError::Parse(format!("HKEX listing url {}: {e}", self.listing_url)))?;

        let response = self.client.get(base.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: self.listing_url.clone(),
            });
        }

        let html = response.text().await?;
        let rows = parse_listing(&html, &base)?;
        debug!(count = rows.len(), "HKEX listing rows parsed");

        let mut articles = Vec::new();
        for row in rows.into_iter().filter(|r| scope.contains(r.day)) {
            let body = match &row.url {
                Some(link) => self.fetch_body(link).await,
                None => String::new(),
            };

            articles.push(RawArticle {
                title: row.title,
                body,
                url: row.url,
                issue_date: Some(hk_start_of_day(row.day)),
            });
        }

        info!(count = articles.len(), "Fetched HKEX announcements");
        Ok(articles)
    }
}

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Parse(format!("selector {css}: {e}")))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// Rows with a readable date and a linked title; anything else is skipped
fn parse_listing(html: &str, base: &Url) -> Result<Vec<ListingRow>, FetchError> {
    let row_sel = selector("div.whats_on_tdy_row")?;
    let ball_sel = selector("div.whats_on_tdy_ball")?;
    let day_sel = selector("div.whats_on_tdy_ball_number > div")?;
    let link_sel = selector("div.whats_on_tdy_right div.whats_on_tdy_text_2 a")?;

    let doc = Html::parse_document(html);
    let mut rows = Vec::new();

    for row in doc.select(&row_sel) {
        let Some(ball) = row.select(&ball_sel).next() else {
            continue;
        };
        let Some(day) = ball.select(&day_sel).next().map(text_of) else {
            continue;
        };
        // Second direct child holds "Jul 2025"
        let Some(month_year) = ball.children().filter_map(ElementRef::wrap).nth(1).map(text_of) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(&format!("{day} {month_year}"), "%d %b %Y") else {
            debug!(day = %day, month_year = %month_year, "Skipping HKEX row with unreadable date");
            continue;
        };

        let Some(link) = row.select(&link_sel).next() else {
            continue;
        };
        let url = link
            .value()
            .attr("href")
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .map(|href| base.join(href).map_or_else(|_| href.to_string(), |u| u.to_string()));

        rows.push(ListingRow {
            day: date,
            title: text_of(link),
            url,
        });
    }

    Ok(rows)
}

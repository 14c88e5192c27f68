//! Hong Kong Monetary Authority press release adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{html_to_text, parse_issue_date, SourceAdapter};
use crate::error::FetchError;
use crate::models::{DateScope, RawArticle, Source};

pub const DEFAULT_BASE_URL: &str = "https://api.hkma.gov.hk/public/press-releases";

/// Press release pages keep the announcement body here
const CONTENT_SELECTORS: &[&str] = &[
    "div.content-with-right-content div.content-wrapper",
    "div.content-wrapper",
];

pub struct HkmaAdapter {
    client: Client,
    base_url: String,
    lang: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    header: ApiHeader,
    #[serde(default)]
    result: Option<ApiResult>,
}

#[derive(Debug, Deserialize)]
struct ApiHeader {
    #[serde(default)]
    success: bool,
    err_code: Option<String>,
    err_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    #[serde(default)]
    records: Vec<PressRelease>,
}

#[derive(Debug, Deserialize)]
struct PressRelease {
    title: Option<String>,
    link: Option<String>,
    date: Option<String>,
}

impl HkmaAdapter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            lang: "en".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_lang(mut self, lang: &str) -> Self {
        self.lang = lang.to_lowercase();
        self
    }

    /// Text of a press release page; empty when the page cannot be read
    async fn fetch_body(&self, link: &str) -> String {
        let result = async {
            let response = self.client.get(link).send().await?.error_for_status()?;
            response.text().await
        }
        .await;

        match result {
            Ok(html) => html_to_text(&html, CONTENT_SELECTORS),
            Err(e) => {
                warn!(url = %link, error = %e, "HKMA press release fetch failed");
                String::new()
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for HkmaAdapter {
    fn source(&self) -> Source {
        Source::Hkma
    }

    #[instrument(skip(self), fields(source = "HKMA", scope = %scope))]
    async fn fetch(&self, scope: DateScope) -> Result<Vec<RawArticle>, FetchError> {
        let from = scope.first_day().format("%Y-%m-%d").to_string();
        let to = scope.last_day().format("%Y-%m-%d").to_string();

        debug!(%from, %to, "Fetching HKMA press releases");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("offset", "0"),
                ("lang", self.lang.as_str()),
                ("choose", "date"),
                ("from", from.as_str()),
                ("to", to.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: self.base_url.clone(),
            });
        }

        let body = response.text().await?;
        let parsed: ApiResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::Parse(format!("HKMA response: {e}")))?;

        if !parsed.header.success {
            return Err(FetchError::Api(format!(
                "{}: {}",
                parsed.header.err_code.as_deref().unwrap_or("unknown"),
                parsed.header.err_msg.as_deref().unwrap_or("unknown error"),
            )));
        }

        let records = parsed.result.map(|r| r.records).unwrap_or_default();
        debug!(count = records.len(), "HKMA records received");

        let mut articles = Vec::with_capacity(records.len());
        for record in records {
            let link = record.link.filter(|l| !l.trim().is_empty());
            let body = match &link {
                Some(link) => self.fetch_body(link).await,
                None => String::new(),
            };

            articles.push(RawArticle {
                title: record.title.unwrap_or_default(),
                body,
                url: link,
                issue_date: record.date.as_deref().and_then(parse_issue_date),
            });
        }

        info!(count = articles.len(), "Fetched HKMA press releases");
        Ok(articles)
    }
}

//! Article identity resolution.
//!
//! A raw article is identified by its normalized URL when it has one, and by
//! its normalized title plus issue day otherwise. The fallback is coarse: two
//! distinct same-day articles with identical titles from one publisher
//! collapse into one record. That is a known limitation.

use std::fmt;

use chrono::NaiveDate;
use url::Url;

use crate::models::{hk_day, RawArticle, Source};

/// Query parameters that only carry tracking state
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "msclkid", "mc_cid", "mc_eid", "_ga", "_gl"];

/// Deduplication key for one logical article
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Url {
        source: Source,
        url: String,
    },
    TitleDay {
        source: Source,
        title: String,
        day: Option<NaiveDate>,
    },
}

impl IdentityKey {
    pub fn source(&self) -> Source {
        match self {
            IdentityKey::Url { source, .. } | IdentityKey::TitleDay { source, .. } => *source,
        }
    }

    /// Stable string form, unique per source; stored beside each record
    pub fn fingerprint(&self) -> String {
        match self {
            IdentityKey::Url { url, .. } => format!("url:{url}"),
            IdentityKey::TitleDay { title, day, .. } => {
                let day = day.map(|d| d.to_string()).unwrap_or_else(|| "none".to_string());
                format!("title:{day}:{title}")
            }
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source(), self.fingerprint())
    }
}

/// Derive the identity key of a raw article
pub fn resolve(article: &RawArticle, source: Source) -> IdentityKey {
    if let Some(url) = article.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        return IdentityKey::Url {
            source,
            url: normalize_url(url),
        };
    }

    IdentityKey::TitleDay {
        source,
        title: normalize_title(&article.title),
        day: article.issue_date.as_ref().map(hk_day),
    }
}

/// Canonical form of a content URL for deduplication
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => return normalize_unparsed(raw),
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let trimmed = url.path().trim_end_matches('/').to_string();
    url.set_path(&trimmed);

    let mut out = url.to_string();
    // Url re-adds "/" for an empty path on special schemes
    if trimmed.is_empty() && url.query().is_none() {
        out = out.trim_end_matches('/').to_string();
    }
    out
}

/// Relative or malformed URLs get the same rules applied textually
fn normalize_unparsed(raw: &str) -> String {
    let raw = raw.split_once('#').map_or(raw, |(head, _)| head);
    let (path, query) = match raw.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (raw, None),
    };

    let kept: Vec<&str> = query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .filter(|pair| {
            let key = pair.split_once('=').map_or(*pair, |(k, _)| k);
            !pair.is_empty() && !is_tracking_param(key)
        })
        .collect();

    let path = path.trim_end_matches('/');
    if kept.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", kept.join("&"))
    }
}

/// Trim, lowercase and collapse inner whitespace
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

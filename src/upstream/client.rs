//! Card search client: one-attempt transport ([CardSource]) plus the retrying,
//! paginating wrapper ([UpstreamClient]) the pipeline stages talk to.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde_json::Value;

use crate::config::{RetryPolicy, UpstreamConfig};
use crate::error::UpstreamError;
use crate::upstream::backoff::fetch_with_retry;
use crate::upstream::envelope::{parse_upstream_envelope, Envelope, RawRecord};
use crate::upstream::query::CardQuery;

const API_KEY_HEADER: &str = "X-Api-Key";
const ORDER_BY: &str = "set.releaseDate,number";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpstreamPage {
    pub records: Vec<RawRecord>,
    pub total_count: Option<u64>,
}

/// A single attempt against the search endpoint. Implementations classify
/// failures; retrying is the caller's business.
pub trait CardSource: Send + Sync {
    fn query<'a>(
        &'a self,
        query: &'a CardQuery,
        page: u32,
        page_size: u32,
    ) -> BoxFuture<'a, Result<UpstreamPage, UpstreamError>>;
}

impl<S: CardSource + ?Sized> CardSource for Arc<S> {
    fn query<'a>(
        &'a self,
        query: &'a CardQuery,
        page: u32,
        page_size: u32,
    ) -> BoxFuture<'a, Result<UpstreamPage, UpstreamError>> {
        (**self).query(query, page, page_size)
    }
}

/// Rate limiting, server errors, timeouts and 404 (returned by the upstream
/// under load) are worth retrying; every other failure status is final.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 404 | 408 | 429 | 500..=599)
}

pub fn classify_status(status: u16) -> UpstreamError {
    let message = format!("API {status}");
    if is_transient_status(status) {
        UpstreamError::transient(Some(status), message)
    } else {
        UpstreamError::permanent(Some(status), message)
    }
}

#[derive(Debug, Clone)]
pub struct HttpCardSource {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCardSource {
    pub fn new(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = config.api_key.as_deref() {
            match HeaderValue::from_str(key) {
                Ok(value) => {
                    headers.insert(API_KEY_HEADER, value);
                }
                Err(_) => tracing::warn!("api key contains invalid header characters, ignoring it"),
            }
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
        })
    }

    async fn send(
        &self,
        query: &CardQuery,
        page: u32,
        page_size: u32,
    ) -> Result<UpstreamPage, UpstreamError> {
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("q", query.expression()),
                ("page", page.to_string()),
                ("pageSize", page_size.to_string()),
                ("orderBy", ORDER_BY.to_string()),
            ])
            .send()
            .await
            .map_err(|err| {
                UpstreamError::transient(err.status().map(|s| s.as_u16()), err.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16()));
        }

        // A truncated body under load looks like a decode failure; retry it.
        let body: Value = response.json().await.map_err(|err| {
            UpstreamError::transient(Some(status.as_u16()), format!("undecodable body: {err}"))
        })?;

        match parse_upstream_envelope(body) {
            Envelope::Invalid => Err(UpstreamError::permanent(
                Some(status.as_u16()),
                "response is neither an array nor a wrapped record list",
            )),
            envelope => Ok(UpstreamPage {
                total_count: envelope.total_count(),
                records: envelope.into_records(),
            }),
        }
    }
}

impl CardSource for HttpCardSource {
    fn query<'a>(
        &'a self,
        query: &'a CardQuery,
        page: u32,
        page_size: u32,
    ) -> BoxFuture<'a, Result<UpstreamPage, UpstreamError>> {
        self.send(query, page, page_size).boxed()
    }
}

/// Retrying, paginating client over any [CardSource].
#[derive(Debug, Clone)]
pub struct UpstreamClient<S> {
    source: S,
    page_size: u32,
    max_pages: u32,
    page_pause: Duration,
    retry: RetryPolicy,
}

impl<S: CardSource> UpstreamClient<S> {
    pub fn new(source: S, config: &UpstreamConfig) -> Self {
        Self {
            source,
            page_size: config.page_size.clamp(1, crate::config::MAX_PAGE_SIZE),
            max_pages: config.max_pages.max(1),
            page_pause: config.page_pause(),
            retry: config.retry.clone(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn query(
        &self,
        query: &CardQuery,
        page: u32,
        page_size: u32,
    ) -> Result<UpstreamPage, UpstreamError> {
        let label = query.expression();
        fetch_with_retry(&self.retry, &label, || self.source.query(query, page, page_size)).await
    }

    /// Collects every page of `query`. Stops on a short page, once `totalCount`
    /// records are in hand, or at the page ceiling.
    pub async fn fetch_all(&self, query: &CardQuery) -> Result<Vec<RawRecord>, UpstreamError> {
        let mut all: Vec<RawRecord> = Vec::new();
        let mut page = 1_u32;
        loop {
            let batch = self.query(query, page, self.page_size).await?;
            let received = batch.records.len();
            let total = batch.total_count;
            all.extend(batch.records);

            if received < self.page_size as usize {
                break;
            }
            if total.is_some_and(|total| all.len() as u64 >= total) {
                break;
            }
            if page >= self.max_pages {
                tracing::warn!(
                    query = %query,
                    pages = page,
                    collected = all.len(),
                    total = ?total,
                    "page ceiling reached before upstream total"
                );
                break;
            }
            page += 1;
            if !self.page_pause.is_zero() {
                tokio::time::sleep(self.page_pause).await;
            }
        }
        Ok(all)
    }

    /// Count-only query; a response without `totalCount` counts as zero.
    pub async fn total_count(&self, query: &CardQuery) -> Result<u64, UpstreamError> {
        let page = self.query(query, 1, 1).await?;
        Ok(page.total_count.unwrap_or(0))
    }
}

//! Socrata SODA API record source.
//!
//! Handles paginated fetching from a Socrata dataset using the `$limit`,
//! `$offset` and `$order` query parameters. Pages are produced by a
//! background task and streamed through a bounded [`tokio::sync::mpsc`]
//! channel; [`SocrataSource::fetch`] consolidates them and only returns a
//! batch once the fetch task has finished without error, so a partial
//! snapshot is never handed to the pipeline.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use police_log_incident_models::{RawBatch, RawRow};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::progress::ProgressCallback;
use crate::retry::{self, RetryPolicy};
use crate::source_def::SourceDefinition;
use crate::{FetchOptions, RecordSource, SourceError};

/// Channel buffer size. Allows the fetcher to stay one page ahead of
/// the consumer.
const PAGE_CHANNEL_BUFFER: usize = 2;

/// Header carrying the Socrata application token.
const APP_TOKEN_HEADER: &str = "X-App-Token";

/// User agent sent with every request.
const USER_AGENT: &str = "police-log/1.0";

/// Credentials for the Socrata API, resolved by the caller.
#[derive(Debug, Clone, Default)]
pub struct SocrataCredentials {
    /// Application token. Unauthenticated requests are throttled more
    /// aggressively but still work.
    pub app_token: Option<String>,
}

/// A [`RecordSource`] backed by a Socrata dataset.
pub struct SocrataSource {
    definition: SourceDefinition,
    client: reqwest::Client,
    credentials: SocrataCredentials,
    options: FetchOptions,
    progress: Arc<dyn ProgressCallback>,
}

impl SocrataSource {
    /// Creates a source for `definition`. The HTTP client is built with the
    /// definition's per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if the HTTP client cannot be built.
    pub fn new(
        definition: SourceDefinition,
        credentials: SocrataCredentials,
        options: FetchOptions,
        progress: Arc<dyn ProgressCallback>,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(definition.fetcher.timeout())
            .build()?;

        Ok(Self {
            definition,
            client,
            credentials,
            options,
            progress,
        })
    }

    /// Returns the source definition.
    #[must_use]
    pub const fn definition(&self) -> &SourceDefinition {
        &self.definition
    }

    /// Starts fetching pages in a background task and returns a receiver
    /// that yields one page of raw records at a time.
    ///
    /// A fetch error (if any) is returned via the [`JoinHandle`], which
    /// resolves to the total number of records sent.
    #[must_use]
    pub fn fetch_pages(
        &self,
    ) -> (
        mpsc::Receiver<Vec<RawRow>>,
        JoinHandle<Result<u64, SourceError>>,
    ) {
        let (tx, rx) = mpsc::channel(PAGE_CHANNEL_BUFFER);

        let request = PageRequest {
            client: self.client.clone(),
            api_url: self.definition.fetcher.api_url(),
            order_column: self.definition.fetcher.order_column().to_string(),
            app_token: self.credentials.app_token.clone(),
            retry: self.definition.retry,
        };
        let page_size = self.definition.fetcher.page_size();
        let limit = self.options.limit;
        let label = self.definition.name.clone();
        let progress = self.progress.clone();

        let handle = tokio::spawn(async move {
            let request = &request;
            paginate(page_size, limit, &tx, progress.as_ref(), move |offset, page_limit| {
                log::info!("Fetching {label} data: offset={offset}, limit={page_limit}");
                request.fetch(offset, page_limit)
            })
            .await
        });

        (rx, handle)
    }
}

#[async_trait]
impl RecordSource for SocrataSource {
    fn id(&self) -> &str {
        self.definition.id()
    }

    fn name(&self) -> &str {
        self.definition.name()
    }

    async fn fetch(&self) -> Result<RawBatch, SourceError> {
        let (rx, handle) = self.fetch_pages();
        let batch = consolidate(rx, handle).await?;

        log::info!(
            "Downloaded {} {} records total",
            batch.len(),
            self.definition.name
        );
        self.progress
            .finish(format!("{}: {} records", self.definition.name, batch.len()));

        Ok(batch)
    }
}

/// Everything a background task needs to request one page.
struct PageRequest {
    client: reqwest::Client,
    api_url: String,
    order_column: String,
    app_token: Option<String>,
    retry: RetryPolicy,
}

impl PageRequest {
    async fn fetch(&self, offset: u64, limit: u64) -> Result<Vec<RawRow>, SourceError> {
        let params = [
            ("$limit", limit.to_string()),
            ("$offset", offset.to_string()),
            ("$order", self.order_column.clone()),
        ];

        let body = retry::send_json(&self.retry, || {
            let mut request = self.client.get(&self.api_url).query(&params);
            if let Some(token) = &self.app_token {
                request = request.header(APP_TOKEN_HEADER, token);
            }
            request
        })
        .await?;

        rows_from_json(body)
    }
}

/// Converts a Socrata JSON response (a bare array of objects) into rows.
fn rows_from_json(body: serde_json::Value) -> Result<Vec<RawRow>, SourceError> {
    let serde_json::Value::Array(items) = body else {
        return Err(SourceError::Shape {
            message: "expected a JSON array of records".to_string(),
        });
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            serde_json::Value::Object(row) => Ok(row),
            other => Err(SourceError::Shape {
                message: format!("record {i} is not an object: {other}"),
            }),
        })
        .collect()
}

/// Requests pages until a short or empty page arrives (or `limit` records
/// have been sent), forwarding each page to `tx`.
///
/// Returns the total number of records sent.
async fn paginate<F, Fut>(
    page_size: u64,
    limit: Option<u64>,
    tx: &mpsc::Sender<Vec<RawRow>>,
    progress: &dyn ProgressCallback,
    mut fetch_page: F,
) -> Result<u64, SourceError>
where
    F: FnMut(u64, u64) -> Fut,
    Fut: Future<Output = Result<Vec<RawRow>, SourceError>>,
{
    let fetch_limit = limit.unwrap_or(u64::MAX);
    let page_size = page_size.max(1);
    let mut offset: u64 = 0;

    if let Some(limit) = limit {
        progress.set_total(limit);
    }

    loop {
        let remaining = fetch_limit.saturating_sub(offset);
        if remaining == 0 {
            break;
        }
        let page_limit = remaining.min(page_size);

        let mut page = fetch_page(offset, page_limit).await?;
        page.truncate(usize::try_from(page_limit).unwrap_or(usize::MAX));

        let count = page.len() as u64;
        if count == 0 {
            break;
        }

        offset += count;
        progress.inc(count);
        progress.set_message(format!("{offset} records"));

        if tx.send(page).await.is_err() {
            log::warn!("Page receiver dropped; stopping fetch at offset {offset}");
            break;
        }

        if count < page_limit {
            break;
        }
    }

    Ok(offset)
}

/// Drains every page from `rx`, then waits for the fetch task. Collected
/// rows are discarded if the task failed.
async fn consolidate(
    mut rx: mpsc::Receiver<Vec<RawRow>>,
    handle: JoinHandle<Result<u64, SourceError>>,
) -> Result<RawBatch, SourceError> {
    let mut rows = Vec::new();
    while let Some(page) = rx.recv().await {
        rows.extend(page);
    }

    let sent = handle.await??;
    debug_assert_eq!(sent, rows.len() as u64);

    Ok(RawBatch::from_rows(rows))
}

//! Generic pagination over a remote list endpoint
//!
//! The fetch loop is written against the [`ListSource`] seam (one page of
//! raw records in, `Vec<Record>` out) so it can be driven by the reqwest
//! client in production and by an in-memory source in tests. Every record
//! coming back from a page is flattened before it joins the result set.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::record::{flatten_record, Record};

/// Errors surfaced by a fetch. The fetcher never retries; retry policy
/// belongs to the caller.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("API error: {status} - {body}")]
    Http { status: u16, body: String },

    /// A page body failed to parse or had an unexpected shape. The whole
    /// fetch is aborted; there is no partial-page salvage.
    #[error("failed to decode page: {0}")]
    Decode(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Cursor mode was configured with a field the remote records do not
    /// carry. Failing hard here distinguishes a misconfigured cursor from
    /// genuine end-of-data.
    #[error("cursor field '{field}' missing from last record of page {page}")]
    CursorFieldMissing { field: String, page: u32 },
}

/// One page of a remote list resource.
#[async_trait]
pub trait ListSource: Send + Sync {
    /// Fetches a single page of `path` with the given query parameters.
    async fn fetch_page(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<Vec<Record>, FetchError>;
}

/// How subsequent pages are addressed.
#[derive(Debug, Clone)]
pub enum PaginationMode {
    /// `offset_param` starts at 0 and grows by the page size after every
    /// non-empty page.
    Offset,
    /// The next page's cursor is read from `cursor_field` of the last
    /// record of the previous page. An empty cursor value means end of
    /// data.
    Cursor { cursor_field: String },
}

/// A complete description of one paginated fetch.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub path: String,
    pub params: Vec<(String, String)>,
    pub page_size: u32,
    pub mode: PaginationMode,
    pub limit_param: String,
    pub offset_param: String,
    pub cursor_param: String,
}

impl FetchPlan {
    /// Offset-mode plan with the remote's conventional parameter names.
    pub fn offset(path: impl Into<String>, page_size: u32) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
            page_size,
            mode: PaginationMode::Offset,
            limit_param: "sysparm_limit".to_string(),
            offset_param: "sysparm_offset".to_string(),
            cursor_param: "startingAfter".to_string(),
        }
    }

    /// Cursor-mode plan. The cursor field is mandatory: a plan that cannot
    /// derive the next cursor is unrepresentable.
    pub fn cursor(path: impl Into<String>, page_size: u32, cursor_field: impl Into<String>) -> Self {
        Self {
            mode: PaginationMode::Cursor {
                cursor_field: cursor_field.into(),
            },
            limit_param: "perPage".to_string(),
            ..Self::offset(path, page_size)
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}

/// Drives a [`FetchPlan`] against a [`ListSource`] until the remote signals
/// end of data, flattening every record on the way through.
pub struct PaginatedFetcher<'a, S: ListSource> {
    source: &'a S,
}

impl<'a, S: ListSource> PaginatedFetcher<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Fetches the complete result set for `plan`.
    ///
    /// Termination: the first empty page always stops the loop. In cursor
    /// mode an empty cursor value in the last record also stops it, while a
    /// record missing the cursor field entirely is an error. The caller is
    /// responsible for bounding offset-mode queries (e.g. by date filter);
    /// there is no page-count cap here.
    pub async fn fetch(&self, plan: &FetchPlan) -> Result<Vec<Record>, FetchError> {
        assert!(plan.page_size > 0, "page_size must be positive");

        match &plan.mode {
            PaginationMode::Offset => self.fetch_offset(plan).await,
            PaginationMode::Cursor { cursor_field } => {
                self.fetch_cursor(plan, cursor_field).await
            }
        }
    }

    async fn fetch_offset(&self, plan: &FetchPlan) -> Result<Vec<Record>, FetchError> {
        let mut results = Vec::new();
        let mut offset: u64 = 0;
        let mut page_no: u32 = 0;

        loop {
            let mut params = plan.params.clone();
            params.push((plan.limit_param.clone(), plan.page_size.to_string()));
            params.push((plan.offset_param.clone(), offset.to_string()));

            let page = self.source.fetch_page(&plan.path, &params).await?;
            page_no += 1;
            debug!(path = %plan.path, page = page_no, offset, records = page.len(), "fetched page");
            if page.is_empty() {
                break;
            }

            results.extend(page.into_iter().map(flatten_record));
            offset += u64::from(plan.page_size);
        }

        Ok(results)
    }

    async fn fetch_cursor(
        &self,
        plan: &FetchPlan,
        cursor_field: &str,
    ) -> Result<Vec<Record>, FetchError> {
        let mut results = Vec::new();
        let mut cursor: Option<String> = None;
        let mut page_no: u32 = 0;

        loop {
            let mut params = plan.params.clone();
            params.push((plan.limit_param.clone(), plan.page_size.to_string()));
            if let Some(c) = &cursor {
                params.push((plan.cursor_param.clone(), c.clone()));
            }

            let page = self.source.fetch_page(&plan.path, &params).await?;
            page_no += 1;
            debug!(path = %plan.path, page = page_no, records = page.len(), "fetched page");
            if page.is_empty() {
                break;
            }

            let next = match page.last().and_then(|rec| rec.get(cursor_field)) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Null) | Some(_) => String::new(),
                None => {
                    return Err(FetchError::CursorFieldMissing {
                        field: cursor_field.to_string(),
                        page: page_no,
                    })
                }
            };

            results.extend(page.into_iter().map(flatten_record));

            if next.is_empty() {
                break;
            }
            cursor = Some(next);
        }

        Ok(results)
    }
}

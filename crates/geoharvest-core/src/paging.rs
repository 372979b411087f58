//! Pagination and resource-level concurrency.
//!
//! Resources of one job are crawled in parallel up to a concurrency limit;
//! the pages of a single resource are always fetched one after the other.

use std::future::Future;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// Position of the next page request for one resource.
///
/// `start_position` is zero-based; protocol clients translate it to their own
/// convention (CSW counts from 1, WFS and CKAN from 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingCursor {
    pub resource_name: String,
    pub start_position: usize,
    pub page_size: usize,
}

impl PagingCursor {
    pub fn new(resource_name: impl Into<String>, page_size: usize) -> Self {
        Self {
            resource_name: resource_name.into(),
            start_position: 0,
            page_size: page_size.max(1),
        }
    }

    fn advance(&mut self) {
        self.start_position += self.page_size;
    }
}

/// What a page callback reports back to the paging loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageStats {
    /// Records contained in the page.
    pub records: usize,
    /// Match count reported by the source for this page, if any.
    pub number_matched: Option<usize>,
}

/// Result of crawling all pages of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceOutcome {
    pub pages: usize,
    pub records: usize,
    /// True when the crawl stopped early on cancellation.
    pub cancelled: bool,
}

/// Fetches pages of one resource in order until the source is exhausted.
///
/// The loop stops after a page when the resource does not support paging, or
/// when the last known match count is at most the next start position. A
/// source that never reports a match count is treated as having zero
/// matches, so exactly one page is fetched.
///
/// Cancellation is checked before each request; an in-flight page completes.
///
/// # Errors
///
/// The first page error aborts the resource and is returned as is.
pub async fn for_each_page<F, Fut>(
    mut cursor: PagingCursor,
    supports_paging: bool,
    cancel: &CancellationToken,
    mut fetch_page: F,
) -> Result<ResourceOutcome, AppError>
where
    F: FnMut(PagingCursor) -> Fut,
    Fut: Future<Output = Result<PageStats, AppError>>,
{
    let mut outcome = ResourceOutcome::default();
    let mut matched = 0usize;

    loop {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }

        let page = fetch_page(cursor.clone()).await?;
        outcome.pages += 1;
        outcome.records += page.records;
        matched = page.number_matched.unwrap_or(matched);

        cursor.advance();
        if !supports_paging || matched <= cursor.start_position {
            break;
        }
    }

    Ok(outcome)
}

/// Runs `worker` for every resource with at most `concurrency_limit` in flight.
///
/// Every resource gets an outcome: a failing worker never cancels its
/// siblings. Outcomes come back in completion order.
pub async fn for_each_resource<'a, T, O, W, Fut>(
    resources: &'a [T],
    concurrency_limit: usize,
    worker: W,
) -> Vec<(&'a T, Result<O, AppError>)>
where
    W: Fn(&'a T) -> Fut,
    Fut: Future<Output = Result<O, AppError>>,
{
    let worker = &worker;
    stream::iter(resources)
        .map(|resource| async move { (resource, worker(resource).await) })
        .buffer_unordered(concurrency_limit.max(1))
        .collect()
        .await
}

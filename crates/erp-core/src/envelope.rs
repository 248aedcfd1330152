//! Response envelopes for presentation layers.
//!
//! Services return [`Result`](crate::Result). UI bindings that expect the
//! `{ data, error }` shape convert with `From`.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A page of records plus the total matching count.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Records on this page.
    pub data: Vec<T>,
    /// Total records matching the query, ignoring pagination.
    pub count: usize,
}

impl<T> Page<T> {
    /// Number of pages of `limit` records needed to cover `count`.
    #[must_use]
    pub const fn total_pages(&self, limit: u32) -> usize {
        if limit == 0 {
            return 0;
        }
        self.count.div_ceil(limit as usize)
    }
}

/// `{ data, error }` envelope; exactly one side is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Payload on success.
    pub data: Option<T>,
    /// Message on failure.
    pub error: Option<String>,
}

impl<T> From<Result<T>> for ApiResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self {
                data: Some(data),
                error: None,
            },
            Err(e) => Self {
                data: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// `{ data, count, error }` envelope for paginated lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    /// Records on the page (empty on failure).
    pub data: Vec<T>,
    /// Total matching records (zero on failure).
    pub count: usize,
    /// Message on failure.
    pub error: Option<String>,
}

impl<T> From<Result<Page<T>>> for PaginatedResponse<T> {
    fn from(result: Result<Page<T>>) -> Self {
        match result {
            Ok(page) => Self {
                data: page.data,
                count: page.count,
                error: None,
            },
            Err(e) => Self {
                data: Vec::new(),
                count: 0,
                error: Some(e.to_string()),
            },
        }
    }
}

use std::collections::HashSet;
use std::future::Future;

use anyhow::Result;
use reqwest::StatusCode;

use crate::{error::ServiceOverload, DEFAULT_OVERLOAD_STATUS_CODES};

/// Translates HTTP responses carrying overload-ish status codes into the
/// [`ServiceOverload`] sentinel.
///
/// An error chain containing a [`reqwest::Error`] whose status is in the
/// configured set (default `503` and `429`) is re-raised with the sentinel
/// attached; the original error stays in the chain. Everything else passes
/// through untouched. Plain `2xx`/`4xx` responses that were never turned into
/// errors are not this type's concern; pair it with
/// [`Response::error_for_status`](reqwest::Response::error_for_status).
///
/// # Example
///
/// ```rust,no_run
/// use surgeguard::classify::StatusClassifier;
/// use anyhow::Result;
///
/// # async fn example() -> Result<()> {
/// let classifier = StatusClassifier::new();
///
/// let body = classifier
///     .run(async {
///         let response = reqwest::get("http://localhost:8000/busy")
///             .await?
///             .error_for_status()?;
///         Ok(response.text().await?)
///     })
///     .await?;
/// # let _ = body;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StatusClassifier {
    /// status codes treated as the backend shedding load
    codes: HashSet<StatusCode>,
}

impl Default for StatusClassifier {
    fn default() -> Self {
        Self {
            codes: DEFAULT_OVERLOAD_STATUS_CODES.into_iter().collect(),
        }
    }
}

/// StatusClassifier implementation
impl StatusClassifier {
    /// classifier matching the default code set (503, 429)
    pub fn new() -> Self {
        Self::default()
    }

    /// classifier matching the given codes instead of the defaults
    pub fn with_codes<I>(codes: I) -> Self
    where
        I: IntoIterator<Item = StatusCode>,
    {
        Self {
            codes: codes.into_iter().collect(),
        }
    }

    /// whether the given status counts as overload for this classifier
    pub fn matches_status(&self, status: StatusCode) -> bool {
        self.codes.contains(&status)
    }

    /// One-shot translation of a failed operation's error.
    ///
    /// Attaches the [`ServiceOverload`] sentinel when the chain holds a
    /// [`reqwest::Error`] with a matching status; returns the error unchanged
    /// otherwise.
    pub fn classify(&self, err: anyhow::Error) -> anyhow::Error {
        let overloaded = err.chain().any(|cause| {
            cause
                .downcast_ref::<reqwest::Error>()
                .and_then(reqwest::Error::status)
                .is_some_and(|status| self.matches_status(status))
        });

        if overloaded {
            log::debug!("status classifier flagged overload: {:#}", err);
            err.context(ServiceOverload)
        } else {
            err
        }
    }

    /// Runs an operation and classifies its failure, if any.
    pub async fn run<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        operation.await.map_err(|err| self.classify(err))
    }
}

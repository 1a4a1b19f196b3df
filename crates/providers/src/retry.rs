//! The one retry policy shared by every LLM call path.

use ba_domain::error::{Error, Result};
use std::future::Future;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    /// One refresh followed by one retry.
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

/// Run `call`; when it fails with an error `is_retryable` accepts, run
/// `refresh` and try again, up to `policy.max_attempts` calls in total.
///
/// A failing refresh stops the loop immediately and is returned as-is, so
/// the caller can tell "refresh failed" from "retried call failed".
pub async fn with_refresh<T, C, CF, R, RF>(
    policy: RetryPolicy,
    is_retryable: impl Fn(&Error) -> bool,
    mut call: C,
    mut refresh: R,
) -> std::result::Result<T, RetryError>
where
    C: FnMut() -> CF,
    CF: Future<Output = Result<T>>,
    R: FnMut() -> RF,
    RF: Future<Output = Result<()>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
                tracing::debug!(attempt, error = %e, "retryable failure, refreshing");
                if let Err(refresh_err) = refresh().await {
                    return Err(RetryError::Refresh {
                        original: e,
                        refresh: refresh_err,
                    });
                }
                attempt += 1;
            }
            Err(e) => return Err(RetryError::Call { error: e, attempts: attempt }),
        }
    }
}

#[derive(Debug)]
pub enum RetryError {
    /// The call itself failed (after `attempts` tries).
    Call { error: Error, attempts: u32 },
    /// The refresh between attempts failed.
    Refresh { original: Error, refresh: Error },
}

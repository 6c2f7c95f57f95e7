//! Ordered "first success wins" fallback over a list of candidates.

use std::future::Future;
use tracing::debug;

use crate::types::ResolverError;

/// Every candidate failed (or there were none)
#[derive(Debug, Clone)]
pub struct Exhausted {
    pub attempts: usize,
    pub last_error: Option<ResolverError>,
}

impl Exhausted {
    pub fn boxed_last_error(self) -> Option<Box<ResolverError>> {
        self.last_error.map(Box::new)
    }
}

/// Try `attempt` on each candidate in order and return the first `Ok`.
///
/// Candidates are awaited one at a time; later candidates are never touched once
/// one succeeds.
pub async fn first_success<C, T, F, Fut>(
    candidates: impl IntoIterator<Item = C>,
    mut attempt: F,
) -> Result<T, Exhausted>
where
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Result<T, ResolverError>>,
{
    let mut attempts = 0;
    let mut last_error = None;

    for candidate in candidates {
        attempts += 1;
        match attempt(candidate).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!("Candidate {} failed: {}", attempts, e);
                last_error = Some(e);
            }
        }
    }

    Err(Exhausted { attempts, last_error })
}

//! Bounded per-node fan-out.
//!
//! One task per node, at most `limit` running at once. Every task is joined
//! before any result is handed back, and results keep the order of the
//! input addresses.

use crate::error::{OperatorError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Run `task` for every IP concurrently and collect `(ip, result)` pairs in
/// input order.
pub async fn fan_out<T, F, Fut>(ips: &[String], limit: usize, task: F) -> Vec<(String, Result<T>)>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let handles: Vec<_> = ips
        .iter()
        .map(|ip| {
            let semaphore = semaphore.clone();
            let work = task(ip.clone());
            tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| OperatorError::Internal(e.to_string()))?;
                work.await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (ip, handle) in ips.iter().zip(handles) {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(OperatorError::Internal(format!("task for {} failed: {}", ip, e))),
        };
        results.push((ip.clone(), result));
    }
    results
}

/// Unwrap a joined batch, surfacing the first error in input order.
pub fn first_error<T>(results: Vec<(String, Result<T>)>) -> Result<Vec<(String, T)>> {
    results
        .into_iter()
        .map(|(ip, result)| result.map(|value| (ip, value)))
        .collect()
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deadline enforcement for blocking calls.
//!
//! Work runs on a dedicated thread and the caller waits on a channel with
//! `recv_timeout`. When the deadline passes the caller gets
//! [`RagError::Timeout`] and the worker sees its cancel flag raised. The
//! worker owns everything it touches, so an abandoned call releases its locks
//! when the worker returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{RagError, Result};

/// Runs `work` on a worker thread and waits at most `timeout` for its result.
///
/// `work` receives a cancel flag; long-running work should check it between
/// steps and must not publish side effects once it is set.
pub fn run_with_timeout<T, F>(operation: &str, timeout: Duration, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&AtomicBool) -> Result<T> + Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let worker_cancel = Arc::clone(&cancel);
    let (tx, rx) = channel();

    thread::Builder::new()
        .name(format!("lexrag-{}", operation.replace(' ', "-")))
        .spawn(move || {
            let result = work(&worker_cancel);
            // Receiver is gone when the caller already timed out.
            let _ = tx.send(result);
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            cancel.store(true, Ordering::SeqCst);
            warn!(operation, timeout_ms = timeout.as_millis() as u64, "operation timed out");
            Err(RagError::timeout(operation, timeout))
        }
        Err(RecvTimeoutError::Disconnected) => {
            debug!(operation, "worker exited without a result");
            Err(RagError::Io(std::io::Error::other(format!(
                "{} worker terminated unexpectedly",
                operation
            ))))
        }
    }
}

/// Returns true once the caller has abandoned the call.
pub fn is_cancelled(cancel: &AtomicBool) -> bool {
    cancel.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn test_returns_result_within_deadline() {
        let value = run_with_timeout("sum", Duration::from_secs(5), |_| Ok(2 + 2)).unwrap();
        assert_eq!(value, 4);
    }

    #[test]
    fn test_propagates_worker_error() {
        let err = run_with_timeout::<(), _>("fail", Duration::from_secs(5), |_| {
            Err(RagError::Embedding("provider down".into()))
        })
        .unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }

    #[test]
    fn test_times_out_and_raises_cancel_flag() {
        let observed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&observed);
        let (done_tx, done_rx) = channel();

        let started = Instant::now();
        let err = run_with_timeout::<(), _>("slow", Duration::from_millis(20), move |cancel| {
            while !is_cancelled(cancel) {
                thread::sleep(Duration::from_millis(5));
            }
            seen.store(1, Ordering::SeqCst);
            let _ = done_tx.send(());
            Ok(())
        })
        .unwrap_err();

        assert!(matches!(err, RagError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }
}

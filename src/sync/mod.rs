//! Small concurrency helpers shared by the connection types.

pub mod wait_group;

pub use wait_group::{InFlight, WaitGroup};

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

/// Await `fut` for at most `timeout`; `None` waits forever.
///
/// An elapsed timeout is reported as `None`, never as an error.
pub async fn wait_for<F: Future>(timeout: Option<Duration>, fut: F) -> Option<F::Output> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Resolve once the shutdown flag is set (or its sender is gone).
pub async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_timeout_is_none() {
        let out = wait_for(
            Some(Duration::from_millis(10)),
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn shutdown_signal_resolves_after_send() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { shutdown_signalled(&mut rx).await });
        tx.send_replace(true);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn infinite_timeout_waits() {
        let out = wait_for(None, async { 7 }).await;
        assert_eq!(out, Some(7));
    }
}

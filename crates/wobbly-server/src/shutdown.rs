//! Graceful shutdown signal handling.
//!
//! A [`ShutdownSignal`] is shared by every listener and connection task. Once
//! triggered, listeners stop accepting, open connections finish their
//! in-flight request and close, and the process gets on with flushing
//! telemetry.
//!
//! # Example
//!
//! ```rust,ignore
//! use wobbly_server::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::with_os_signals();
//! app.run(shutdown).await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;

/// A signal that can be used to trigger and await graceful shutdown.
///
/// Clones share state: triggering any clone notifies all of them.
///
/// # Example
///
/// ```rust
/// use wobbly_server::ShutdownSignal;
///
/// let shutdown = ShutdownSignal::new();
/// let clone = shutdown.clone();
///
/// clone.trigger();
/// assert!(shutdown.is_shutdown());
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Creates a new, untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// Triggers shutdown. Idempotent.
    pub fn trigger(&self) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // No receivers is fine.
            let _ = self.sender.send(());
        }
    }

    /// Returns `true` if shutdown has been triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Returns a future that completes once shutdown is triggered, or
    /// immediately if it already was.
    pub fn recv(&self) -> ShutdownReceiver {
        let triggered = Arc::clone(&self.triggered);
        // Subscribe before reading the flag so a concurrent trigger is seen
        // by one or the other.
        let mut receiver = self.sender.subscribe();
        ShutdownReceiver {
            wait: Box::pin(async move {
                if triggered.load(Ordering::SeqCst) {
                    return;
                }
                // A closed channel means every signal is gone; treat it as shutdown.
                let _ = receiver.recv().await;
            }),
        }
    }

    /// Creates a signal triggered by SIGTERM or SIGINT (Ctrl+C elsewhere).
    ///
    /// Must be called inside a Tokio runtime. If the handlers cannot be
    /// registered the failure is logged and the signal can only be triggered
    /// programmatically.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            if wait_for_os_signal().await {
                trigger.trigger();
            }
        });

        signal
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes when the shutdown signal is triggered.
///
/// Created by [`ShutdownSignal::recv()`].
pub struct ShutdownReceiver {
    wait: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl Future for ShutdownReceiver {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.wait.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for ShutdownReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownReceiver").finish_non_exhaustive()
    }
}

/// Waits for SIGTERM or SIGINT. Returns `false` if no signal can ever arrive.
async fn wait_for_os_signal() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                    _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
                }
                true
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "could not register signal handlers");
                false
            }
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received Ctrl+C, shutting down");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "could not listen for Ctrl+C");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_trigger_is_idempotent() {
        let shutdown = ShutdownSignal::new();
        assert!(!shutdown.is_shutdown());

        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_shutdown());
    }

    #[tokio::test]
    async fn test_recv_completes_after_trigger() {
        let shutdown = ShutdownSignal::new();
        let receiver = shutdown.recv();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger();
        });

        tokio::time::timeout(Duration::from_secs(1), receiver)
            .await
            .unwrap();
    }

    #[test]
    fn test_receiver_pending_until_triggered() {
        let shutdown = ShutdownSignal::new();
        let mut receiver = tokio_test::task::spawn(shutdown.recv());

        tokio_test::assert_pending!(receiver.poll());
        shutdown.trigger();
        assert!(receiver.is_woken());
        tokio_test::assert_ready!(receiver.poll());
    }

    #[tokio::test]
    async fn test_recv_after_trigger_is_immediate() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        tokio::time::timeout(Duration::from_millis(50), shutdown.recv())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_every_receiver_is_notified() {
        let shutdown = ShutdownSignal::new();
        let first = shutdown.recv();
        let second = shutdown.clone().recv();

        shutdown.trigger();
        tokio::time::timeout(Duration::from_millis(50), async {
            first.await;
            second.await;
        })
        .await
        .unwrap();
    }
}

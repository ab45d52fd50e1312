//! Anti-entropy poller.
//!
//! The fast path loses notifications; the poller repairs them. It bridges a
//! local client (usually the router) and a remote peer, and at startup and
//! on every tick pushes the local store to the remote, pulls the remote
//! store into the local side, or both. Because `push_configs` is a
//! commutative merge, direction order is immaterial and a cycle that ran
//! against stale data is corrected by the next one.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{Client, ClientError};
use crate::reporter::{LogReporter, Reporter};

/// How often a poller reconciles by default.
pub const DEFAULT_POLL_RATE: Duration = Duration::from_secs(60 * 60);

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Periodically reconciles a local and a remote client.
pub struct Poller {
    local: Arc<dyn Client>,
    remote: Arc<dyn Client>,
    push: bool,
    pull: bool,
    rate: Duration,
    reporter: Arc<dyn Reporter>,
    running: Mutex<Option<Running>>,
}

impl Poller {
    /// Start building a poller.
    pub fn builder() -> PollerBuilder {
        PollerBuilder::new()
    }

    /// Start the background polling task. A second call while running is a
    /// no-op; after [`stop`](Self::stop), `start` spawns a fresh task.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            return;
        }

        let local = Arc::clone(&self.local);
        let remote = Arc::clone(&self.remote);
        let reporter = Arc::clone(&self.reporter);
        let (push, pull, rate) = (self.push, self.pull, self.rate);

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(rate);

            loop {
                tokio::select! {
                    // The first tick completes immediately, so a cycle runs
                    // at startup.
                    _ = ticker.tick() => {
                        poll(&local, &remote, push, pull, reporter.as_ref()).await;
                    }
                    _ = task_cancel.cancelled() => return,
                }
            }
        });

        *running = Some(Running { cancel, task });
    }

    /// Signal the background task and wait for it to exit. A no-op when
    /// the poller is not running.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap().take();
        if let Some(running) = running {
            running.cancel.cancel();
            let _ = running.task.await;
        }
    }
}

async fn poll(
    local: &Arc<dyn Client>,
    remote: &Arc<dyn Client>,
    push: bool,
    pull: bool,
    reporter: &dyn Reporter,
) {
    if push {
        if let Err(err) = push_between(local, remote).await {
            reporter.error("poller", &err, None);
        }
    }

    if pull {
        if let Err(err) = push_between(remote, local).await {
            reporter.error("poller", &err, None);
        }
    }
}

async fn push_between(from: &Arc<dyn Client>, to: &Arc<dyn Client>) -> Result<(), ClientError> {
    let store = from.pull_configs().await?;
    to.push_configs(store).await
}

/// Builder for [`Poller`].
#[derive(Default)]
pub struct PollerBuilder {
    local: Option<Arc<dyn Client>>,
    remote: Option<Arc<dyn Client>>,
    push: bool,
    pull: bool,
    rate: Option<Duration>,
    reporter: Option<Arc<dyn Reporter>>,
}

impl PollerBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The local side, typically the router.
    pub fn local(mut self, local: Arc<dyn Client>) -> Self {
        self.local = Some(local);
        self
    }

    /// The remote peer to reconcile against.
    pub fn remote(mut self, remote: Arc<dyn Client>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Push the local store to the remote each cycle.
    pub fn push(mut self, push: bool) -> Self {
        self.push = push;
        self
    }

    /// Pull the remote store into the local side each cycle.
    pub fn pull(mut self, pull: bool) -> Self {
        self.pull = pull;
        self
    }

    /// Poll period. Defaults to [`DEFAULT_POLL_RATE`].
    pub fn rate(mut self, rate: Duration) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Where cycle failures are reported. Defaults to [`LogReporter`].
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Build the poller.
    ///
    /// # Panics
    ///
    /// Panics if `local` or `remote` is missing, or if neither `push` nor
    /// `pull` was enabled. All three are programmer errors.
    pub fn build(self) -> Poller {
        let local = self.local.expect("local must be set in Poller");
        let remote = self.remote.expect("remote must be set in Poller");
        assert!(
            self.push || self.pull,
            "push and/or pull must be set in Poller"
        );

        Poller {
            local,
            remote,
            push: self.push,
            pull: self.pull,
            rate: self.rate.unwrap_or(DEFAULT_POLL_RATE),
            reporter: self.reporter.unwrap_or_else(|| Arc::new(LogReporter)),
            running: Mutex::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::NullClient;

    #[test]
    #[should_panic(expected = "push and/or pull must be set")]
    fn neither_direction_panics() {
        Poller::builder()
            .local(Arc::new(NullClient))
            .remote(Arc::new(NullClient))
            .build();
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_joins() {
        let poller = Poller::builder()
            .local(Arc::new(NullClient))
            .remote(Arc::new(NullClient))
            .pull(true)
            .rate(Duration::from_secs(3600))
            .build();

        poller.start();
        poller.start();
        poller.stop().await;

        // Stopping twice is harmless, and the poller can be restarted.
        poller.stop().await;
        poller.start();
        poller.stop().await;
    }
}

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::context::SyncContext;
use super::reconciler::ReconcileError;

/// How long a burst of remote-change notices is allowed to grow before it
/// collapses into a single pass.
pub const DEBOUNCE: Duration = Duration::from_millis(750);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Something changed remotely; debounced before acting.
    RemoteChange,
    /// The notice stream (re)connected; resync immediately.
    Reconnected,
}

pub type SyncPass =
    Arc<dyn Fn() -> BoxFuture<'static, Result<(), ReconcileError>> + Send + Sync>;

/// Serializes reconciliation passes behind a debounce window. Passes never
/// overlap; triggers that arrive while one is running are absorbed into
/// exactly one follow-up pass. The suppression flag is raised for the
/// duration of each pass so watcher handlers ignore the mirror writes.
pub struct ResyncCoordinator {
    tx: UnboundedSender<Trigger>,
    handle: JoinHandle<()>,
}

impl ResyncCoordinator {
    pub fn start(ctx: Arc<SyncContext>, pass: SyncPass) -> Self {
        Self::start_with(ctx, pass, DEBOUNCE)
    }

    pub fn start_with(ctx: Arc<SyncContext>, pass: SyncPass, debounce: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Trigger>();
        let handle = tokio::spawn(async move {
            while let Some(trigger) = rx.recv().await {
                let mut delay = delay_for(trigger, debounce);
                // Later triggers restart the window; a reconnect cancels it.
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => break,
                        next = rx.recv() => match next {
                            Some(next) => delay = delay_for(next, debounce),
                            None => break,
                        },
                    }
                }
                loop {
                    let guard = ctx.suppress();
                    debug!("starting sync pass");
                    if let Err(err) = (pass)().await {
                        warn!(error = %err, "sync pass failed");
                    }
                    drop(guard);
                    let mut rerun = false;
                    while rx.try_recv().is_ok() {
                        rerun = true;
                    }
                    if !rerun {
                        break;
                    }
                }
            }
        });
        Self { tx, handle }
    }

    pub fn trigger(&self, trigger: Trigger) {
        // Send fails only after stop(); nothing left to coordinate then.
        let _ = self.tx.send(trigger);
    }

    pub fn sender(&self) -> UnboundedSender<Trigger> {
        self.tx.clone()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

fn delay_for(trigger: Trigger, debounce: Duration) -> Duration {
    match trigger {
        Trigger::RemoteChange => debounce,
        Trigger::Reconnected => Duration::ZERO,
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::SessionEvent;

/// Whatever owns navigation in the front end.
pub trait Navigator: Send + Sync {
    fn redirect_to_login(&self);
}

/// Turns forced-logout notifications into at most one redirect per ended session.
pub struct LogoutRedirect {
    navigator: Arc<dyn Navigator>,
    /// Highest session generation already redirected for
    last_redirected: AtomicU64,
}

impl LogoutRedirect {
    pub fn new(navigator: Arc<dyn Navigator>) -> Self {
        Self {
            navigator,
            last_redirected: AtomicU64::new(0),
        }
    }

    /// Redirect if this is a forced logout not handled before. Returns whether
    /// navigation happened.
    pub fn handle(&self, event: &SessionEvent) -> bool {
        if !event.is_forced_logout() {
            return false;
        }

        let generation = event.generation();
        let previous = self.last_redirected.fetch_max(generation, Ordering::SeqCst);
        if previous >= generation {
            debug!(generation, "Forced logout already handled");
            return false;
        }

        info!(generation, "Session expired, redirecting to login");
        self.navigator.redirect_to_login();
        true
    }

    /// Listen on `events` in a background task until the returned handle is
    /// shut down or the channel closes.
    pub fn spawn(self: Arc<Self>, mut events: broadcast::Receiver<SessionEvent>) -> RedirectListener {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) => {
                            self.handle(&event);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Redirect listener fell behind session events");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = &mut stop_rx => {
                        // Events emitted before the stop request still count
                        loop {
                            match events.try_recv() {
                                Ok(event) => {
                                    self.handle(&event);
                                }
                                Err(TryRecvError::Lagged(_)) => continue,
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
            debug!("Redirect listener stopped");
        });

        RedirectListener {
            task: Some(task),
            stop: Some(stop_tx),
        }
    }
}

/// Subscription handle. `shutdown` unsubscribes after handling pending
/// events; dropping it unsubscribes immediately.
pub struct RedirectListener {
    task: Option<JoinHandle<()>>,
    stop: Option<oneshot::Sender<()>>,
}

impl RedirectListener {
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!(error = %e, "Redirect listener ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for RedirectListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

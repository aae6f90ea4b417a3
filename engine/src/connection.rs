//! Billing connection - the single shared link to the backend.
//!
//! # State machine
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected
//!      ^                        |                  |
//!      +----- retries spent ----+                  |
//!      +-------------- unsolicited loss -----------+
//! ```
//!
//! A connect request while `Connecting` joins the attempt in flight instead
//! of starting another one, and every joined caller receives the same
//! outcome. The attempt itself runs on a spawned task, so it completes even
//! if every caller stops waiting.

use crate::{backend::BillingBackend, error::Result, Error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Connection state as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Handler invoked on unsolicited connection loss with a fresh retry budget.
pub type DisconnectHandler = Arc<dyn Fn(u32) + Send + Sync>;

type Outcome = Option<Result<()>>;

enum Slot {
    Disconnected,
    Connecting(watch::Receiver<Outcome>),
    Connected,
}

enum Plan {
    Inline,
    Join(watch::Receiver<Outcome>),
    Start(watch::Sender<Outcome>, watch::Receiver<Outcome>),
}

impl Slot {
    fn state(&self) -> ConnectionState {
        match self {
            Slot::Disconnected => ConnectionState::Disconnected,
            Slot::Connecting(_) => ConnectionState::Connecting,
            Slot::Connected => ConnectionState::Connected,
        }
    }
}

/// Owns the connection state and the retry policy.
pub struct BillingConnection {
    backend: Arc<dyn BillingBackend>,
    slot: Mutex<Slot>,
    on_disconnect: Mutex<Option<DisconnectHandler>>,
}

impl BillingConnection {
    /// Create a disconnected connection over a backend.
    pub fn new(backend: Arc<dyn BillingBackend>) -> Self {
        Self {
            backend,
            slot: Mutex::new(Slot::Disconnected),
            on_disconnect: Mutex::new(None),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.slot.lock().state()
    }

    /// Register the handler for unsolicited connection loss.
    pub fn on_unsolicited_disconnect(&self, handler: DisconnectHandler) {
        *self.on_disconnect.lock() = Some(handler);
    }

    /// Request a connection.
    ///
    /// `on_link` receives the outcome of establishing the link and produces
    /// the outcome every caller observes. When already connected it runs
    /// immediately with `Ok(())`; when an attempt is in flight the call
    /// waits for that attempt and `on_link` is dropped unused.
    pub async fn connect<F, Fut>(self: &Arc<Self>, retry_budget: u32, on_link: F) -> Result<()>
    where
        F: FnOnce(Result<()>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let plan = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Connected => Plan::Inline,
                Slot::Connecting(rx) => {
                    tracing::debug!("Connect request joined attempt in flight");
                    Plan::Join(rx.clone())
                }
                Slot::Disconnected => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Slot::Connecting(rx.clone());
                    Plan::Start(tx, rx)
                }
            }
        };

        match plan {
            Plan::Inline => on_link(Ok(())).await,
            Plan::Join(rx) => Self::wait(rx).await,
            Plan::Start(tx, rx) => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let link = this.establish(retry_budget).await;
                    let outcome = on_link(link).await;
                    tx.send_replace(Some(outcome));
                });
                Self::wait(rx).await
            }
        }
    }

    /// Handle a connection loss reported by the backend.
    ///
    /// Only a live link is torn down; an attempt in flight settles the
    /// state itself.
    pub fn handle_unsolicited_disconnect(&self) {
        {
            let mut slot = self.slot.lock();
            if !matches!(*slot, Slot::Connected) {
                tracing::debug!(state = ?slot.state(), "Ignoring disconnect outside a live link");
                return;
            }
            *slot = Slot::Disconnected;
        }

        tracing::warn!("Billing service disconnected");
        let handler = self.on_disconnect.lock().clone();
        if let Some(handler) = handler {
            handler(0);
        }
    }

    /// Drop the link and forget any attempt in flight.
    pub async fn disconnect(&self) {
        *self.slot.lock() = Slot::Disconnected;
        self.backend.end_connection().await;
    }

    async fn establish(&self, retry_budget: u32) -> Result<()> {
        let mut remaining = retry_budget;
        loop {
            match self.backend.start_connection().await {
                Ok(()) => {
                    self.settle(Slot::Connected);
                    tracing::info!("Billing connection established");
                    return Ok(());
                }
                Err(code) if remaining > 0 => {
                    remaining -= 1;
                    tracing::warn!(code = %code, remaining, "Billing connection failed, retrying");
                }
                Err(code) => {
                    self.settle(Slot::Disconnected);
                    tracing::warn!(code = %code, "Billing connection failed, retries exhausted");
                    return Err(Error::Connection(code));
                }
            }
        }
    }

    fn settle(&self, next: Slot) {
        let mut slot = self.slot.lock();
        // A teardown while connecting wins over a late result.
        if matches!(*slot, Slot::Connecting(_)) {
            *slot = next;
        }
    }

    async fn wait(mut rx: watch::Receiver<Outcome>) -> Result<()> {
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Err(Error::Interrupted)),
            Err(_) => Err(Error::Interrupted),
        }
    }
}

//! Outward events and their delivery.
//!
//! Publishing never calls listeners directly. Events go into a queue with a
//! single consumer, the [`EventPump`], and the embedding application decides
//! where that pump runs. Listeners therefore only ever see one event at a
//! time, in publish order.

use crate::{ProductId, ResponseCode};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle and purchase outcome events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A connect request finished, with reconciliation on success.
    BillingReady { success: bool, code: ResponseCode },
    /// A purchase was granted (and acknowledged, where needed).
    PurchaseComplete { product_id: ProductId },
    /// A purchase is awaiting payment and grants nothing yet.
    PurchasePending { product_id: ProductId },
    /// A purchase-related call failed.
    PurchaseError { code: ResponseCode },
}

/// Receives events from the [`EventPump`].
pub trait StoreListener: Send + Sync {
    fn on_event(&self, event: &StoreEvent);
}

impl<F> StoreListener for F
where
    F: Fn(&StoreEvent) + Send + Sync,
{
    fn on_event(&self, event: &StoreEvent) {
        self(event)
    }
}

type ListenerList = Vec<Arc<dyn StoreListener>>;

fn same_listener(a: &Arc<dyn StoreListener>, b: &Arc<dyn StoreListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Fans events out to registered listeners through a single-consumer queue.
pub struct EventDispatcher {
    listeners: Arc<ArcSwap<ListenerList>>,
    sender: Mutex<Option<mpsc::UnboundedSender<StoreEvent>>>,
}

impl EventDispatcher {
    /// Create a dispatcher and the pump that delivers its events.
    pub fn new() -> (Self, EventPump) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listeners = Arc::new(ArcSwap::from_pointee(Vec::new()));
        let dispatcher = Self {
            listeners: Arc::clone(&listeners),
            sender: Mutex::new(Some(tx)),
        };
        (dispatcher, EventPump { rx, listeners })
    }

    /// Register a listener. Returns false if it was already registered.
    pub fn subscribe(&self, listener: Arc<dyn StoreListener>) -> bool {
        let mut added = false;
        self.listeners.rcu(|current| {
            if current.iter().any(|l| same_listener(l, &listener)) {
                added = false;
                Arc::clone(current)
            } else {
                added = true;
                let mut next = ListenerList::clone(current);
                next.push(Arc::clone(&listener));
                Arc::new(next)
            }
        });
        added
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, listener: &Arc<dyn StoreListener>) -> bool {
        let mut removed = false;
        self.listeners.rcu(|current| {
            let next: ListenerList = current
                .iter()
                .filter(|l| !same_listener(l, listener))
                .cloned()
                .collect();
            removed = next.len() != current.len();
            next
        });
        removed
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.load().len()
    }

    /// Queue an event for delivery. Returns false once the queue is closed.
    pub fn publish(&self, event: StoreEvent) -> bool {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            tracing::debug!(?event, "Event dropped (dispatcher closed)");
            return false;
        };
        match sender.send(event) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(event = ?e.0, "Event dropped (pump gone)");
                false
            }
        }
    }

    /// Close the queue. The pump finishes after delivering what is queued.
    pub fn close(&self) {
        self.sender.lock().take();
    }
}

/// The single consumer of an [`EventDispatcher`]'s queue.
pub struct EventPump {
    rx: mpsc::UnboundedReceiver<StoreEvent>,
    listeners: Arc<ArcSwap<ListenerList>>,
}

impl EventPump {
    /// Deliver events until the dispatcher is closed.
    pub async fn run(mut self) {
        while self.next().await.is_some() {}
        tracing::debug!("Event pump finished");
    }

    /// Wait for the next event, deliver it, and return it.
    pub async fn next(&mut self) -> Option<StoreEvent> {
        let event = self.rx.recv().await?;
        self.deliver(&event);
        Some(event)
    }

    /// Deliver every event already queued without waiting.
    pub fn dispatch_pending(&mut self) -> Vec<StoreEvent> {
        let mut delivered = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            self.deliver(&event);
            delivered.push(event);
        }
        delivered
    }

    fn deliver(&self, event: &StoreEvent) {
        // Iterate over a snapshot so listeners may (un)subscribe meanwhile.
        let listeners = self.listeners.load_full();
        for listener in listeners.iter() {
            listener.on_event(event);
        }
    }
}

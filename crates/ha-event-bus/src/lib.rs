//! Event bus with typed pub/sub
//!
//! The EventBus is the central message broker of the platform. It offers two
//! delivery styles:
//! - broadcast receivers (`subscribe`) for async consumers that poll events
//! - synchronous callbacks (`listen`) invoked inline while the event is fired,
//!   which is what components use to keep derived state consistent with the
//!   state machine (zone occupancy reacts to `state_changed` this way)

use dashmap::DashMap;
use ha_core::{Context, Event, EventData, EventType};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A unique identifier for an event listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback invoked synchronously for every matching event
pub type EventCallback = Arc<dyn Fn(&Event<serde_json::Value>) + Send + Sync>;

struct CallbackListener {
    event_type: EventType,
    callback: EventCallback,
}

/// The event bus for publishing and subscribing to events
pub struct EventBus {
    /// Map of event types to their broadcast senders
    senders: DashMap<EventType, broadcast::Sender<Event<serde_json::Value>>>,
    /// Special sender for MATCH_ALL subscribers
    match_all_sender: broadcast::Sender<Event<serde_json::Value>>,
    /// Callback listeners in registration order
    callbacks: RwLock<IndexMap<ListenerId, CallbackListener>>,
    /// Counter for generating unique listener IDs
    next_listener_id: AtomicU64,
    /// Channel capacity
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all_sender, _) = broadcast::channel(capacity);
        Self {
            senders: DashMap::new(),
            match_all_sender,
            callbacks: RwLock::new(IndexMap::new()),
            next_listener_id: AtomicU64::new(1),
            capacity,
        }
    }

    // ==================== Broadcast receivers ====================

    /// Subscribe to events of a specific type
    ///
    /// Returns a receiver that will receive all events of the given type.
    pub fn subscribe(
        &self,
        event_type: impl Into<EventType>,
    ) -> broadcast::Receiver<Event<serde_json::Value>> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        if event_type.is_match_all() {
            return self.match_all_sender.subscribe();
        }

        self.senders
            .entry(event_type.clone())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe()
    }

    /// Subscribe to events of a specific typed event
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        let rx = self.subscribe(T::event_type());
        TypedEventReceiver::new(rx)
    }

    // ==================== Callback listeners ====================

    /// Register a callback for events of `event_type` (or `*` for all events)
    ///
    /// The callback runs on the firing task before `fire` returns. It must not
    /// block; it may fire further events.
    pub fn listen<F>(&self, event_type: impl Into<EventType>, callback: F) -> ListenerId
    where
        F: Fn(&Event<serde_json::Value>) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let id = self.next_listener_id();
        debug!(event_type = %event_type, listener = id.0, "Registering event listener");

        match self.callbacks.write() {
            Ok(mut callbacks) => {
                callbacks.insert(
                    id,
                    CallbackListener {
                        event_type,
                        callback: Arc::new(callback),
                    },
                );
            }
            Err(_) => warn!(listener = id.0, "Listener table poisoned, listener dropped"),
        }
        id
    }

    /// Register a callback receiving decoded event data
    ///
    /// Events whose payload does not decode into `T` are skipped.
    pub fn listen_typed<T, F>(&self, callback: F) -> ListenerId
    where
        T: EventData + serde::de::DeserializeOwned,
        F: Fn(Event<T>) + Send + Sync + 'static,
    {
        self.listen(T::event_type(), move |event| {
            match event.to_typed::<T>() {
                Some(typed) => callback(typed),
                None => warn!(event_type = %event.event_type, "Dropping undecodable event"),
            }
        })
    }

    /// Remove a callback listener; returns false if it was not registered
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let removed = self
            .callbacks
            .write()
            .ok()
            .and_then(|mut callbacks| callbacks.shift_remove(&id))
            .is_some();
        debug!(listener = id.0, removed, "Removing event listener");
        removed
    }

    /// Number of registered callbacks for an event type
    pub fn callback_count(&self, event_type: impl Into<EventType>) -> usize {
        let event_type = event_type.into();
        self.callbacks
            .read()
            .map(|callbacks| {
                callbacks
                    .values()
                    .filter(|l| l.event_type == event_type)
                    .count()
            })
            .unwrap_or(0)
    }

    // ==================== Firing ====================

    /// Fire an event to all subscribers
    ///
    /// The event is delivered to:
    /// 1. Callback listeners of the event type and of MATCH_ALL, in registration order
    /// 2. Broadcast subscribers of the specific event type
    /// 3. Broadcast MATCH_ALL subscribers
    pub fn fire(&self, event: Event<serde_json::Value>) {
        debug!(event_type = %event.event_type, "Firing event");

        // Snapshot so callbacks can register listeners or fire events themselves
        let matching: Vec<EventCallback> = self
            .callbacks
            .read()
            .map(|callbacks| {
                callbacks
                    .values()
                    .filter(|l| l.event_type == event.event_type || l.event_type.is_match_all())
                    .map(|l| Arc::clone(&l.callback))
                    .collect()
            })
            .unwrap_or_default();

        for callback in matching {
            callback(&event);
        }

        if let Some(sender) = self.senders.get(&event.event_type) {
            // Ignore send errors - they just mean no active receivers
            let _ = sender.send(event.clone());
        }

        let _ = self.match_all_sender.send(event);
    }

    /// Fire an event built from typed data
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        match serde_json::to_value(&data) {
            Ok(json) => self.fire(Event::new(T::event_type(), json, context)),
            Err(e) => warn!(event_type = T::event_type(), "Unable to encode event data: {}", e),
        }
    }

    /// Generate a new unique listener ID
    pub fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A receiver for typed events
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<Event<serde_json::Value>>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    fn new(rx: broadcast::Receiver<Event<serde_json::Value>>) -> Self {
        Self {
            rx,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Receive the next typed event, skipping payloads that do not decode
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Some(typed) = event.to_typed::<T>() {
                return Ok(typed);
            }
        }
    }
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;

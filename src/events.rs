//! Call/response signalling between the server and the page.
//!
//! A tool call is a bubbling, cancellable "call" event dispatched on the tool
//! element. Page code answers by emitting a "response" on the same element,
//! through the [`Responder`] handed to every listener. The request payload is
//! shared and immutable; results travel only through the response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::dom::ElementId;

/// Where a call listener is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    /// The document root. Sees every call that is not stopped on the way up,
    /// and survives document replacement.
    Document,
    /// One element of one document generation.
    Element(ElementId),
}

/// Handle returned by listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Call listener. Runs synchronously during dispatch; long-running work
/// should clone the [`Responder`] and answer later.
pub type CallListener = Arc<dyn Fn(&mut CallEvent) + Send + Sync>;

/// Emits "response" signals on one element.
#[derive(Debug, Clone)]
pub struct Responder {
    bus: Weak<BusInner>,
    element: ElementId,
}

impl Responder {
    /// Emit a response. Returns `true` if a pending call observed it.
    pub fn respond(&self, detail: Value) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.emit_response(self.element, detail) > 0,
            None => false,
        }
    }

    /// Element this responder answers for.
    pub fn element(&self) -> ElementId {
        self.element
    }
}

/// The "call" event as seen by listeners.
#[derive(Debug)]
pub struct CallEvent {
    tool: String,
    target: ElementId,
    current_target: EventTarget,
    arguments: Arc<Value>,
    responder: Responder,
    propagation_stopped: bool,
    default_prevented: bool,
}

impl CallEvent {
    /// Name of the tool being called.
    pub fn tool_name(&self) -> &str {
        &self.tool
    }

    /// The tool element.
    pub fn target(&self) -> ElementId {
        self.target
    }

    /// Where the listener currently running is attached.
    pub fn current_target(&self) -> EventTarget {
        self.current_target
    }

    /// Call arguments.
    pub fn arguments(&self) -> &Value {
        &self.arguments
    }

    /// Shared handle to the arguments, for answering asynchronously.
    pub fn shared_arguments(&self) -> Arc<Value> {
        Arc::clone(&self.arguments)
    }

    /// Responder for the tool element.
    pub fn responder(&self) -> Responder {
        self.responder.clone()
    }

    /// Shorthand for `self.responder().respond(detail)`.
    pub fn respond(&self, detail: Value) -> bool {
        self.responder.respond(detail)
    }

    /// Stop the event from reaching further ancestors.
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    /// Mark the event as cancelled.
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    /// Whether a listener cancelled the event.
    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

/// Result of dispatching a call event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Number of listeners that ran.
    pub delivered: usize,
    /// Whether a listener called [`CallEvent::prevent_default`].
    pub default_prevented: bool,
}

struct CallRegistration {
    id: ListenerId,
    target: EventTarget,
    listener: CallListener,
}

type PendingResponses = HashMap<ElementId, Vec<(ListenerId, oneshot::Sender<Value>)>>;

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    call_listeners: Mutex<Vec<CallRegistration>>,
    response_listeners: Mutex<PendingResponses>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BusInner {
    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn emit_response(&self, element: ElementId, detail: Value) -> usize {
        let waiting = lock(&self.response_listeners)
            .remove(&element)
            .unwrap_or_default();
        waiting
            .into_iter()
            .filter(|(_, sender)| !sender.is_closed())
            .map(|(_, sender)| sender.send(detail.clone()))
            .filter(Result::is_ok)
            .count()
    }
}

/// Event bus of one page.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("call_listeners", &lock(&self.inner.call_listeners).len())
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a call listener.
    pub fn on_call<F>(&self, target: EventTarget, listener: F) -> ListenerId
    where
        F: Fn(&mut CallEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id();
        lock(&self.inner.call_listeners).push(CallRegistration {
            id,
            target,
            listener: Arc::new(listener),
        });
        id
    }

    /// Detach a call listener.
    pub fn remove_call_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.call_listeners);
        let before = listeners.len();
        listeners.retain(|registration| registration.id != id);
        listeners.len() != before
    }

    /// Register a one-shot "response" listener on an element.
    pub fn once_response(&self, element: ElementId) -> (ListenerId, oneshot::Receiver<Value>) {
        let id = self.inner.next_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.response_listeners)
            .entry(element)
            .or_default()
            .push((id, tx));
        (id, rx)
    }

    /// Remove a pending "response" listener.
    pub fn remove_response_listener(&self, element: ElementId, id: ListenerId) -> bool {
        let mut pending = lock(&self.inner.response_listeners);
        let Some(waiting) = pending.get_mut(&element) else {
            return false;
        };
        let before = waiting.len();
        waiting.retain(|(listener, _)| *listener != id);
        let removed = waiting.len() != before;
        if waiting.is_empty() {
            pending.remove(&element);
        }
        removed
    }

    /// Number of "response" listeners waiting on an element.
    pub fn pending_responses(&self, element: ElementId) -> usize {
        lock(&self.inner.response_listeners)
            .get(&element)
            .map_or(0, Vec::len)
    }

    /// Emit a "response" on an element. Returns how many calls observed it.
    pub fn emit_response(&self, element: ElementId, detail: Value) -> usize {
        self.inner.emit_response(element, detail)
    }

    /// Responder bound to an element.
    pub fn responder(&self, element: ElementId) -> Responder {
        Responder {
            bus: Arc::downgrade(&self.inner),
            element,
        }
    }

    /// Dispatch a "call" event along `path` (target first, then ancestors),
    /// finishing at the document.
    pub fn dispatch_call(
        &self,
        tool: &str,
        path: &[ElementId],
        arguments: Arc<Value>,
    ) -> DispatchOutcome {
        let Some(&target) = path.first() else {
            return DispatchOutcome {
                delivered: 0,
                default_prevented: false,
            };
        };

        let mut targets: Vec<EventTarget> =
            path.iter().copied().map(EventTarget::Element).collect();
        targets.push(EventTarget::Document);

        // Snapshot listeners so they may (de)register during dispatch.
        let plan: Vec<(EventTarget, Vec<CallListener>)> = {
            let registrations = lock(&self.inner.call_listeners);
            targets
                .into_iter()
                .map(|current| {
                    let listeners = registrations
                        .iter()
                        .filter(|registration| registration.target == current)
                        .map(|registration| Arc::clone(&registration.listener))
                        .collect();
                    (current, listeners)
                })
                .collect()
        };

        let mut event = CallEvent {
            tool: tool.to_string(),
            target,
            current_target: EventTarget::Element(target),
            arguments,
            responder: self.responder(target),
            propagation_stopped: false,
            default_prevented: false,
        };

        let mut delivered = 0;
        for (current, listeners) in plan {
            if listeners.is_empty() {
                continue;
            }
            event.current_target = current;
            for listener in listeners {
                listener(&mut event);
                delivered += 1;
            }
            if event.propagation_stopped {
                break;
            }
        }

        DispatchOutcome {
            delivered,
            default_prevented: event.default_prevented,
        }
    }

    /// Drop element listeners that belong to other document generations.
    ///
    /// Pending responses on dropped elements see their channel close.
    pub fn prune_stale(&self, generation: u64) {
        lock(&self.inner.call_listeners).retain(|registration| match registration.target {
            EventTarget::Document => true,
            EventTarget::Element(id) => id.generation() == generation,
        });
        lock(&self.inner.response_listeners)
            .retain(|element, _| element.generation() == generation);
    }
}

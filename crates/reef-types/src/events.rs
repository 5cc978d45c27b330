//! In-process notifications about plan progress.
//!
//! Every event belongs to a plan. The [`EventBus`] keeps one
//! `tokio::sync::broadcast` channel per event type, opened by the first
//! subscriber; until then emitting that type is a no-op. A receiver may be
//! scoped to a single plan and then skips everything else.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::{PlanId, PlanState, TaskState};

/// Something the plan engine reports about a plan.
pub trait Event: Any + Send + Sync + Clone + fmt::Debug {
    /// The plan the event belongs to.
    fn plan_id(&self) -> PlanId;
}

/// A plan moved to a new state.
#[derive(Clone, Debug)]
pub struct PlanStateChanged {
    /// The plan.
    pub plan_id: PlanId,
    /// State before the transition.
    pub from: PlanState,
    /// State after the transition.
    pub to: PlanState,
}

/// A task finished an attempt.
#[derive(Clone, Debug)]
pub struct TaskFinished {
    /// The owning plan.
    pub plan_id: PlanId,
    /// Index of the task within the plan.
    pub task: u32,
    /// State the task ended in.
    pub state: TaskState,
}

/// A plan's target topology became the live topology.
#[derive(Clone, Debug)]
pub struct TopologyCommitted {
    /// The plan that committed it.
    pub plan_id: PlanId,
    /// Sequence number of the new live topology.
    pub sequence: u64,
}

/// Parameters of a service were rewritten.
#[derive(Clone, Debug)]
pub struct ParametersChanged {
    /// The plan that wrote them.
    pub plan_id: PlanId,
    /// Display name of the service.
    pub service: String,
    /// Keys whose values changed.
    pub keys: Vec<String>,
}

macro_rules! plan_events {
    ($($ty:ty),* $(,)?) => {
        $(impl Event for $ty {
            fn plan_id(&self) -> PlanId {
                self.plan_id
            }
        })*
    };
}

plan_events!(PlanStateChanged, TaskFinished, TopologyCommitted, ParametersChanged);

/// Buffered events per type before slow receivers start lagging.
const CHANNEL_CAPACITY: usize = 256;

/// Broadcasts plan events to whoever subscribed to their type.
///
/// Cheap to clone; clones share channels.
#[derive(Clone, Default)]
pub struct EventBus {
    senders: Arc<Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>>,
}

impl EventBus {
    /// Create a bus with no open channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every current subscriber of its type.
    pub fn emit<E: Event>(&self, event: E) {
        let Some(tx) = self.sender::<E>(false) else {
            return;
        };
        if tx.send(event).is_err() {
            trace!(event_type = std::any::type_name::<E>(), "no live receivers");
        }
    }

    /// Receive every future event of type `E`.
    pub fn subscribe<E: Event>(&self) -> EventReceiver<E> {
        self.receiver(None)
    }

    /// Receive future events of type `E` that belong to `plan`.
    pub fn subscribe_plan<E: Event>(&self, plan: PlanId) -> EventReceiver<E> {
        self.receiver(Some(plan))
    }

    fn receiver<E: Event>(&self, plan: Option<PlanId>) -> EventReceiver<E> {
        let rx = match self.sender::<E>(true) {
            Some(tx) => tx.subscribe(),
            // Only reachable if two event types share a TypeId.
            None => broadcast::channel(1).1,
        };
        EventReceiver { rx, plan }
    }

    /// The channel for `E`, opened on demand when `open` is set. The map
    /// lock is released before anything is sent.
    fn sender<E: Event>(&self, open: bool) -> Option<broadcast::Sender<E>> {
        let mut senders = self.senders.lock().expect("event bus lock poisoned");
        let key = TypeId::of::<E>();
        if open && !senders.contains_key(&key) {
            let (tx, _) = broadcast::channel::<E>(CHANNEL_CAPACITY);
            senders.insert(key, Arc::new(tx));
        }
        senders
            .get(&key)
            .and_then(|any| any.downcast_ref::<broadcast::Sender<E>>())
            .cloned()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = self.senders.lock().expect("event bus lock poisoned").len();
        f.debug_struct("EventBus").field("open_channels", &open).finish()
    }
}

/// Receiving end of one event type, optionally scoped to one plan.
pub struct EventReceiver<E: Event> {
    rx: broadcast::Receiver<E>,
    plan: Option<PlanId>,
}

impl<E: Event> EventReceiver<E> {
    /// Wait for the next matching event. `None` once every bus clone is
    /// gone.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        skipped,
                        event_type = std::any::type_name::<E>(),
                        "event receiver fell behind"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The next matching event that has already arrived, if any.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }

    fn matches(&self, event: &E) -> bool {
        self.plan.is_none_or(|plan| event.plan_id() == plan)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::Serialize;

use crate::types::{AgentId, MutationReason, PurchaseLevel, SimMinute, TrendId};

/// Ordering tier for `SimEvent` (§4.2). Higher values are dispatched first
/// within the same timestamp; system events always precede agent actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Priority {
    Low = 0,
    AgentAction = 50,
    System = 100,
}

/// The payload dispatched when a `SimEvent` is popped (§3, §4.6–§4.8).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EventKind {
    PublishPost { agent: AgentId, topic: crate::types::Topic, parent: Option<TrendId> },
    Purchase { agent: AgentId, level: PurchaseLevel },
    SelfDev { agent: AgentId },
    /// Fans out to the entire eligible audience in one dispatch (§4.7); the
    /// reader list is computed inside the handler, not carried on the event.
    TrendInfluence { trend: TrendId },
    EnergyRecovery,
    DailyReset,
    SaveDailyTrend,
    Law,
    Weather,
}

impl EventKind {
    pub fn priority(&self) -> Priority {
        match self {
            EventKind::EnergyRecovery
            | EventKind::DailyReset
            | EventKind::SaveDailyTrend
            | EventKind::Law
            | EventKind::Weather => Priority::System,
            EventKind::PublishPost { .. }
            | EventKind::Purchase { .. }
            | EventKind::SelfDev { .. }
            | EventKind::TrendInfluence { .. } => Priority::AgentAction,
        }
    }

    pub fn mutation_reason(&self) -> Option<MutationReason> {
        match self {
            EventKind::PublishPost { .. } => Some(MutationReason::Post),
            EventKind::SelfDev { .. } => Some(MutationReason::SelfDev),
            EventKind::Purchase { level, .. } => Some(MutationReason::Purchase(*level)),
            EventKind::TrendInfluence { .. } => Some(MutationReason::TrendInfluence),
            EventKind::EnergyRecovery => Some(MutationReason::EnergyRecovery),
            EventKind::DailyReset => Some(MutationReason::DailyReset),
            EventKind::SaveDailyTrend | EventKind::Law | EventKind::Weather => None,
        }
    }
}

/// A scheduled occurrence (§4.2). Ordering is `(priority desc, timestamp
/// asc, insertion_seq asc)` — `insertion_seq` is the tie-break that makes
/// dispatch order deterministic for events sharing both priority and
/// timestamp, assigned by `EventQueue::push` in submission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimEvent {
    pub id: crate::types::EventId,
    pub timestamp: SimMinute,
    pub kind: EventKind,
    pub insertion_seq: u64,
}

impl SimEvent {
    fn priority(&self) -> Priority {
        self.kind.priority()
    }
}

impl Eq for SimEvent {}

impl Ord for SimEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority()
            .cmp(&other.priority())
            .then_with(|| other.timestamp.partial_cmp(&self.timestamp).unwrap_or(Ordering::Equal))
            .then_with(|| other.insertion_seq.cmp(&self.insertion_seq))
    }
}

impl PartialOrd for SimEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Bounded priority queue over `SimEvent` (§4.2). Wraps `BinaryHeap`
/// directly — `SimEvent::Ord` already encodes "pop highest priority,
/// earliest timestamp, earliest insertion first" as a max-heap order, so no
/// `Reverse` wrapper is needed (unlike a plain-timestamp queue).
pub struct EventQueue {
    heap: BinaryHeap<SimEvent>,
    next_seq: u64,
    max_size: usize,
}

impl EventQueue {
    pub fn new(max_size: usize) -> Self {
        EventQueue { heap: BinaryHeap::new(), next_seq: 0, max_size }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Admits `event` per §4.2's overflow policy: below capacity it is always
    /// enqueued; at capacity a system event is always admitted (evicting the
    /// current worst entry), and a non-system event is admitted only if it
    /// strictly outranks the current worst entry — in which case that worst
    /// entry is evicted to make room. Returns `false` when the event is
    /// refused outright.
    pub fn push(&mut self, id: crate::types::EventId, timestamp: SimMinute, kind: EventKind) -> bool {
        let is_system = kind.priority() == Priority::System;
        let seq = self.next_seq;
        let candidate = SimEvent { id, timestamp, kind, insertion_seq: seq };

        if self.heap.len() < self.max_size {
            self.next_seq += 1;
            self.heap.push(candidate);
            return true;
        }
        if is_system {
            self.evict_worst();
            self.next_seq += 1;
            self.heap.push(candidate);
            return true;
        }
        // `BinaryHeap` is a max-heap over `Ord`; the worst admitted event is
        // whichever one would be dispatched *last* — i.e. the min by the same
        // ordering `SimEvent::cmp` already encodes as "best dispatches first".
        let worst = match self.worst() {
            Some(w) => w,
            None => return false,
        };
        if candidate > *worst {
            self.evict_worst();
            self.next_seq += 1;
            self.heap.push(candidate);
            true
        } else {
            false
        }
    }

    fn worst(&self) -> Option<&SimEvent> {
        self.heap.iter().min()
    }

    fn evict_worst(&mut self) {
        if let Some(worst_idx) = self.heap.iter().enumerate().min_by(|(_, a), (_, b)| a.cmp(b)).map(|(i, _)| i) {
            let mut rebuilt: Vec<SimEvent> = self.heap.drain().collect();
            rebuilt.remove(worst_idx);
            self.heap = rebuilt.into_iter().collect();
        }
    }

    pub fn pop(&mut self) -> Option<SimEvent> {
        self.heap.pop()
    }

    pub fn peek_timestamp(&self) -> Option<SimMinute> {
        self.heap.peek().map(|e| e.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventId;

    fn push_system(q: &mut EventQueue, id: u64, ts: SimMinute) -> bool {
        q.push(EventId(id), ts, EventKind::DailyReset)
    }

    fn push_action(q: &mut EventQueue, id: u64, ts: SimMinute) -> bool {
        q.push(
            EventId(id),
            ts,
            EventKind::SelfDev { agent: AgentId(id) },
        )
    }

    #[test]
    fn earlier_timestamp_dispatches_first_at_equal_priority() {
        let mut q = EventQueue::new(10);
        push_action(&mut q, 1, 100.0);
        push_action(&mut q, 2, 50.0);
        let first = q.pop().unwrap();
        assert_eq!(first.timestamp, 50.0);
    }

    #[test]
    fn system_events_dispatch_before_agent_actions_at_same_timestamp() {
        let mut q = EventQueue::new(10);
        push_action(&mut q, 1, 10.0);
        push_system(&mut q, 2, 10.0);
        let first = q.pop().unwrap();
        assert_eq!(first.kind.priority(), Priority::System);
    }

    #[test]
    fn insertion_order_breaks_ties() {
        let mut q = EventQueue::new(10);
        push_action(&mut q, 1, 10.0);
        push_action(&mut q, 2, 10.0);
        let first = q.pop().unwrap();
        assert_eq!(first.id, EventId(1));
        let second = q.pop().unwrap();
        assert_eq!(second.id, EventId(2));
    }

    #[test]
    fn queue_refuses_agent_events_at_capacity() {
        let mut q = EventQueue::new(1);
        assert!(push_action(&mut q, 1, 1.0));
        assert!(!push_action(&mut q, 2, 2.0));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn system_events_are_never_refused() {
        let mut q = EventQueue::new(1);
        assert!(push_action(&mut q, 1, 1.0));
        // At capacity, the system event still gets admitted by evicting the
        // agent-action event already holding the only slot.
        assert!(push_system(&mut q, 2, 2.0));
        assert_eq!(q.len(), 1);
        let remaining = q.pop().unwrap();
        assert_eq!(remaining.id, EventId(2));
    }
}

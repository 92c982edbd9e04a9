//! Single-slot notification surface.
//!
//! Change events become notifications one at a time: a new notification
//! replaces the visible one, a newer change to the document already on
//! screen updates it in place, a repeat of the visible change is absorbed,
//! and an event whose identity was dismissed (explicitly or by replacement)
//! never comes back. Subscribers watch the current slot.

use crate::diff::ChangeEvent;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub message: String,
    pub rfq_id: String,
    #[serde(skip)]
    identity: String,
}

impl Notification {
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Nothing was visible; this is now shown.
    Shown,
    /// Replaced the notification for another document.
    Replaced { previous_rfq_id: String },
    /// Updated the visible notification with a newer change to its document.
    Updated,
    /// The visible notification already shows this change.
    Duplicate,
    /// This exact change was dismissed before.
    Suppressed,
}

pub struct NotificationEmitter {
    current: Option<Notification>,
    dismissed: HashSet<String>,
    dismissed_order: VecDeque<String>,
    capacity: usize,
    tx: watch::Sender<Option<Notification>>,
}

impl NotificationEmitter {
    pub fn new(dismissed_capacity: usize) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            current: None,
            dismissed: HashSet::new(),
            dismissed_order: VecDeque::new(),
            capacity: dismissed_capacity.max(1),
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Notification>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<&Notification> {
        self.current.as_ref()
    }

    fn remember_dismissed(&mut self, identity: String) {
        if !self.dismissed.insert(identity.clone()) {
            return;
        }
        self.dismissed_order.push_back(identity);
        while self.dismissed_order.len() > self.capacity {
            if let Some(oldest) = self.dismissed_order.pop_front() {
                self.dismissed.remove(&oldest);
            }
        }
    }

    fn publish(&self) {
        self.tx.send_replace(self.current.clone());
    }

    pub fn on_event(&mut self, event: &ChangeEvent) -> EmitOutcome {
        let identity = event.identity();

        if self.dismissed.contains(&identity) {
            debug!(rfq = %event.rfq_id, kind = %event.kind, "notification already dismissed");
            return EmitOutcome::Suppressed;
        }

        if let Some(current) = &mut self.current {
            if current.identity == identity {
                debug!(rfq = %event.rfq_id, kind = %event.kind, "notification already visible");
                return EmitOutcome::Duplicate;
            }
            if current.rfq_id == event.rfq_id {
                current.message = event.message();
                let previous = std::mem::replace(&mut current.identity, identity);
                info!(rfq = %current.rfq_id, message = %current.message, "notification updated");
                self.remember_dismissed(previous);
                self.publish();
                return EmitOutcome::Updated;
            }
        }

        let next = Notification {
            message: event.message(),
            rfq_id: event.rfq_id.clone(),
            identity,
        };
        info!(rfq = %next.rfq_id, message = %next.message, "notification");

        let outcome = match self.current.replace(next) {
            Some(previous) => {
                let previous_rfq_id = previous.rfq_id.clone();
                self.remember_dismissed(previous.identity);
                EmitOutcome::Replaced { previous_rfq_id }
            }
            None => EmitOutcome::Shown,
        };
        self.publish();
        outcome
    }

    pub fn on_events<'a>(&mut self, events: impl IntoIterator<Item = &'a ChangeEvent>) {
        for event in events {
            self.on_event(event);
        }
    }

    /// User closed the visible notification.
    pub fn dismiss(&mut self) -> Option<Notification> {
        let closed = self.current.take()?;
        self.remember_dismissed(closed.identity.clone());
        self.publish();
        Some(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ChangeKind;
    use crate::rfq::RfqStatus;

    fn step_event(id: &str, step: &str) -> ChangeEvent {
        ChangeEvent {
            rfq_id: id.to_string(),
            kind: ChangeKind::NewSettlementStep {
                steps: vec![step.to_string()],
            },
        }
    }

    fn new_rfq(id: &str) -> ChangeEvent {
        ChangeEvent {
            rfq_id: id.to_string(),
            kind: ChangeKind::StatusChanged {
                status: RfqStatus::Active,
            },
        }
    }

    #[test]
    fn test_newest_replaces_visible() {
        let mut emitter = NotificationEmitter::new(16);
        let rx = emitter.subscribe();

        assert_eq!(emitter.on_event(&new_rfq("r1")), EmitOutcome::Shown);
        assert_eq!(
            emitter.on_event(&step_event("r2", "exit_proposal")),
            EmitOutcome::Replaced {
                previous_rfq_id: "r1".into()
            }
        );
        let visible = rx.borrow().clone().unwrap();
        assert_eq!(visible.rfq_id, "r2");
        assert_eq!(visible.message, "New settlement step for RFQ r2: Exit proposal");
    }

    #[test]
    fn test_same_change_is_deduplicated() {
        let mut emitter = NotificationEmitter::new(16);
        let rx = emitter.subscribe();
        emitter.on_event(&step_event("r1", "exit_proposal"));
        assert_eq!(
            emitter.on_event(&step_event("r1", "exit_proposal")),
            EmitOutcome::Duplicate
        );
        assert!(!emitter.dismissed.contains(&step_event("r1", "exit_proposal").identity()));
        assert_eq!(
            rx.borrow().as_ref().unwrap().message,
            "New settlement step for RFQ r1: Exit proposal"
        );
    }

    #[test]
    fn test_newer_change_updates_visible_document() {
        let mut emitter = NotificationEmitter::new(16);
        let rx = emitter.subscribe();
        let created = new_rfq("r1");
        let exit = step_event("r1", "exit_proposal");

        assert_eq!(emitter.on_event(&created), EmitOutcome::Shown);
        assert_eq!(emitter.on_event(&exit), EmitOutcome::Updated);

        let visible = rx.borrow().clone().unwrap();
        assert_eq!(visible.rfq_id, "r1");
        assert_eq!(visible.message, "New settlement step for RFQ r1: Exit proposal");
        assert_eq!(visible.identity(), exit.identity());

        // The change it replaced does not come back.
        assert_eq!(emitter.on_event(&created), EmitOutcome::Suppressed);
        assert_eq!(emitter.on_event(&exit), EmitOutcome::Duplicate);
    }

    #[test]
    fn test_dismissed_event_not_reshown() {
        let mut emitter = NotificationEmitter::new(16);
        let ev = step_event("r1", "exit_proposal");
        emitter.on_event(&ev);
        let closed = emitter.dismiss().unwrap();
        assert_eq!(closed.rfq_id, "r1");
        assert!(emitter.current().is_none());

        assert_eq!(emitter.on_event(&ev), EmitOutcome::Suppressed);
        // A different change on the same document is still news
        assert_eq!(
            emitter.on_event(&step_event("r1", "escrow_released")),
            EmitOutcome::Shown
        );
    }

    #[test]
    fn test_replaced_event_counts_as_dismissed() {
        let mut emitter = NotificationEmitter::new(16);
        let first = new_rfq("r1");
        emitter.on_event(&first);
        emitter.on_event(&new_rfq("r2"));
        assert_eq!(emitter.on_event(&first), EmitOutcome::Suppressed);
    }

    #[test]
    fn test_dismissed_memory_is_bounded() {
        let mut emitter = NotificationEmitter::new(2);
        for id in ["a", "b", "c"] {
            emitter.on_event(&new_rfq(id));
            emitter.dismiss();
        }
        assert_eq!(emitter.dismissed.len(), 2);
        // "a" fell out of the window
        assert_eq!(emitter.on_event(&new_rfq("a")), EmitOutcome::Shown);
        assert_eq!(emitter.on_event(&new_rfq("c")), EmitOutcome::Suppressed);
    }

    #[test]
    fn test_dismiss_with_nothing_visible() {
        let mut emitter = NotificationEmitter::new(4);
        let rx = emitter.subscribe();
        assert!(emitter.dismiss().is_none());
        assert!(rx.borrow().is_none());
    }
}

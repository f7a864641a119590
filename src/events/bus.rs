//! Broadcast fan-out of pipeline events
//!
//! Emitting never blocks and never fails. A receiver that falls more than
//! `capacity` events behind loses the oldest ones and sees `Lagged`.

use super::CopyEvent;
use tokio::sync::broadcast;

/// Events buffered per receiver by [`EventBus::default`]
pub const DEFAULT_CAPACITY: usize = 1024;

/// Shared handle to the event channel; clones publish to the same receivers
///
/// ```rust,ignore
/// use varietal::events::{CopyEvent, EventBus};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.emit(CopyEvent::unit_started("urgent", "gemini", 3));
/// let event = rx.recv().await?;
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CopyEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: CopyEvent) {
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CopyEvent> {
        self.tx.subscribe()
    }

    /// Live receivers
    pub fn observers(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_publish_to_same_receivers() {
        let bus = EventBus::new(8);
        let copy = bus.clone();
        let _a = bus.subscribe();
        let _b = copy.subscribe();

        assert_eq!(bus.observers(), 2);
        assert_eq!(copy.observers(), 2);
    }

    #[test]
    fn test_emit_with_no_observers() {
        let bus = EventBus::default();
        bus.emit(CopyEvent::duplicate_dropped("gpt", 0.9));
        assert_eq!(bus.observers(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let bus = EventBus::new(0);
        let _rx = bus.subscribe();
        bus.emit(CopyEvent::duplicate_dropped("gpt", 0.9));
    }

    #[tokio::test]
    async fn test_every_observer_sees_every_event() {
        let bus = EventBus::new(16);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(CopyEvent::unit_started("direct", "gpt", 2));
        bus.emit(CopyEvent::unit_completed("direct", Some("gpt"), 2, 150, 0.0, 10));

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.recv().await.unwrap().event_type(), "UnitStarted");
            assert_eq!(rx.recv().await.unwrap().event_type(), "UnitCompleted");
        }
    }

    #[test]
    fn test_dropped_receivers_stop_counting() {
        let bus = EventBus::new(8);
        let rx = bus.subscribe();
        assert_eq!(bus.observers(), 1);
        drop(rx);
        assert_eq!(bus.observers(), 0);
    }

    #[tokio::test]
    async fn test_slow_observer_skips_to_recent_units() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        for i in 0..10 {
            bus.emit(CopyEvent::unit_started(&format!("u{}", i), "gpt", 1));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(6))
        ));
        match rx.recv().await.unwrap() {
            CopyEvent::UnitStarted { unit, .. } => assert_eq!(unit, "u6"),
            other => panic!("Wrong event: {:?}", other),
        }
    }
}

//! Decouples when backend events arrive from when a consumer attaches.
//!
//! An [`EventBridge`] queues events while nobody listens and flushes them, in
//! order and exactly once, to the next consumer that attaches. A
//! [`DeferredSignal`] is the one-shot variant used for "init complete".

use std::collections::VecDeque;

pub trait Consumer<E> {
    /// Hands the event back if this consumer can no longer accept it.
    fn deliver(&mut self, event: E) -> Result<(), E>;
}

impl<E, F> Consumer<E> for F
where
    F: FnMut(E),
{
    fn deliver(&mut self, event: E) -> Result<(), E> {
        self(event);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

type BoxedConsumer<E> = Box<dyn Consumer<E> + Send>;

pub struct EventBridge<E> {
    name: &'static str,
    consumer: Option<(ConsumerId, BoxedConsumer<E>)>,
    queue: VecDeque<E>,
    next_id: u64,
}

impl<E> EventBridge<E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            consumer: None,
            queue: VecDeque::new(),
            next_id: 0,
        }
    }

    pub fn dispatch(&mut self, event: E) {
        if !self.queue.is_empty() {
            self.queue.push_back(event);
            self.flush();
            return;
        }
        match self.consumer.as_mut() {
            Some((_, consumer)) => {
                if let Err(event) = consumer.deliver(event) {
                    log::warn!("{}: consumer refused event, detaching", self.name);
                    self.consumer = None;
                    self.queue.push_front(event);
                }
            }
            None => {
                log::debug!("{}: no consumer attached, queueing event", self.name);
                self.queue.push_back(event);
            }
        }
    }

    /// Replaces the active consumer and flushes anything queued to it.
    pub fn attach<C>(&mut self, consumer: C) -> ConsumerId
    where
        C: Consumer<E> + Send + 'static,
    {
        let id = ConsumerId(self.next_id);
        self.next_id += 1;
        self.consumer = Some((id, Box::new(consumer)));
        if !self.queue.is_empty() {
            log::debug!("{}: flushing {} queued event(s)", self.name, self.queue.len());
        }
        self.flush();
        id
    }

    /// Detaches only if `id` is still the active consumer.
    pub fn detach(&mut self, id: ConsumerId) -> bool {
        if self.consumer.as_ref().is_some_and(|(current, _)| *current == id) {
            self.consumer = None;
            true
        } else {
            false
        }
    }

    pub fn is_attached(&self) -> bool {
        self.consumer.is_some()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    fn flush(&mut self) {
        while let Some(event) = self.queue.pop_front() {
            let Some((_, consumer)) = self.consumer.as_mut() else {
                self.queue.push_front(event);
                return;
            };
            if let Err(event) = consumer.deliver(event) {
                log::warn!("{}: consumer refused queued event, detaching", self.name);
                self.consumer = None;
                self.queue.push_front(event);
                return;
            }
        }
    }
}

pub type Callback = Box<dyn FnOnce() + Send>;

/// Fires at most once. Late registrations run immediately.
///
/// Neither method runs callbacks itself: they are returned so the caller can
/// invoke them after releasing whatever lock guards the signal.
#[derive(Default)]
pub struct DeferredSignal {
    fired: bool,
    waiters: Vec<Callback>,
}

impl DeferredSignal {
    pub fn is_fired(&self) -> bool {
        self.fired
    }

    #[must_use]
    pub fn fire(&mut self) -> Vec<Callback> {
        if self.fired {
            return Vec::new();
        }
        self.fired = true;
        std::mem::take(&mut self.waiters)
    }

    #[must_use]
    pub fn on_fire(&mut self, cb: Callback) -> Option<Callback> {
        if self.fired {
            Some(cb)
        } else {
            self.waiters.push(cb);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl FnMut(u32) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |e: u32| sink.lock().unwrap().push(e))
    }

    #[test]
    fn queued_events_flush_in_order_then_go_live() {
        let mut bridge: EventBridge<u32> = EventBridge::new("test");
        for e in 1..=3 {
            bridge.dispatch(e);
        }
        assert_eq!(bridge.queued_len(), 3);

        let (seen, consumer) = recorder();
        bridge.attach(consumer);
        assert_eq!(bridge.queued_len(), 0);
        bridge.dispatch(4);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn reattach_does_not_redeliver() {
        let mut bridge: EventBridge<u32> = EventBridge::new("test");
        bridge.dispatch(1);
        let (first, consumer) = recorder();
        bridge.attach(consumer);

        let (second, consumer) = recorder();
        bridge.attach(consumer);
        bridge.dispatch(2);

        assert_eq!(*first.lock().unwrap(), vec![1]);
        assert_eq!(*second.lock().unwrap(), vec![2]);
    }

    struct Refuses {
        accept: usize,
        seen: Arc<Mutex<Vec<u32>>>,
    }

    impl Consumer<u32> for Refuses {
        fn deliver(&mut self, event: u32) -> Result<(), u32> {
            if self.accept == 0 {
                return Err(event);
            }
            self.accept -= 1;
            self.seen.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[test]
    fn refused_events_stay_queued_for_next_consumer() {
        let mut bridge: EventBridge<u32> = EventBridge::new("test");
        for e in 1..=4 {
            bridge.dispatch(e);
        }
        let partial = Arc::new(Mutex::new(Vec::new()));
        bridge.attach(Refuses {
            accept: 2,
            seen: Arc::clone(&partial),
        });
        assert!(!bridge.is_attached());
        bridge.dispatch(5);

        let (rest, consumer) = recorder();
        bridge.attach(consumer);
        assert_eq!(*partial.lock().unwrap(), vec![1, 2]);
        assert_eq!(*rest.lock().unwrap(), vec![3, 4, 5]);
    }

    #[test]
    fn stale_detach_keeps_new_consumer() {
        let mut bridge: EventBridge<u32> = EventBridge::new("test");
        let old = bridge.attach(|_: u32| {});
        let new = bridge.attach(|_: u32| {});
        assert!(!bridge.detach(old));
        assert!(bridge.is_attached());
        assert!(bridge.detach(new));
        assert!(!bridge.is_attached());
    }

    #[test]
    fn deferred_signal_runs_each_callback_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut signal = DeferredSignal::default();

        let h = Arc::clone(&hits);
        assert!(signal
            .on_fire(Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .is_none());

        for cb in signal.fire() {
            cb();
        }
        assert!(signal.fire().is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let h = Arc::clone(&hits);
        let late = signal.on_fire(Box::new(move || {
            h.fetch_add(10, Ordering::SeqCst);
        }));
        late.expect("already fired")();
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }
}

//! Typed callback registry and an explicit work queue for thread marshalling.
//!
//! [`Signal::emit`] runs every connected slot synchronously on the emitting thread. Slots
//! that must run on a particular thread (a UI thread, say) connect through
//! [`Signal::connect_queued`], which posts a clone of the payload to a [`MainQueue`] that the
//! target thread drains.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::ignore_poison::{IgnorePoison, IgnorePoisonRw};

/// Handle returned by [`Signal::connect`], used to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

type Slot<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A set of callbacks invoked with a `&T` on every emission.
pub struct Signal<T> {
    slots: RwLock<Vec<(SlotId, Slot<T>)>>,
    next_id: AtomicU64,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal").field("slots", &self.len()).finish()
    }
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Connects a slot. It runs on whichever thread calls [`emit`](Self::emit).
    pub fn connect<F>(&self, slot: F) -> SlotId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SlotId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots.write_ignore_poison().push((id, Arc::new(slot)));
        id
    }

    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut slots = self.slots.write_ignore_poison();
        let before = slots.len();
        slots.retain(|(slot_id, _)| *slot_id != id);
        slots.len() != before
    }

    pub fn disconnect_all(&self) {
        self.slots.write_ignore_poison().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.read_ignore_poison().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every slot in connection order. The slot list is snapshotted first, so slots
    /// may connect or disconnect from inside a callback.
    pub fn emit(&self, value: &T) {
        let slots: Vec<Slot<T>> = self
            .slots
            .read_ignore_poison()
            .iter()
            .map(|(_, slot)| Arc::clone(slot))
            .collect();
        for slot in slots {
            slot(value);
        }
    }
}

impl<T: Clone + Send + 'static> Signal<T> {
    /// Connects a slot that runs on the thread draining `queue` instead of the emitter's.
    pub fn connect_queued<F>(&self, queue: &MainQueue, slot: F) -> SlotId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let sender = queue.sender();
        let slot = Arc::new(slot);
        self.connect(move |value: &T| {
            let value = value.clone();
            let slot = Arc::clone(&slot);
            let _ = sender.send(Box::new(move || slot(value)));
        })
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// A FIFO of closures posted from any thread and run by whoever drains it.
pub struct MainQueue {
    sender: Sender<Job>,
    receiver: Mutex<Receiver<Job>>,
}

impl Default for MainQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MainQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainQueue").finish_non_exhaustive()
    }
}

impl MainQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    fn sender(&self) -> Sender<Job> {
        self.sender.clone()
    }

    /// Posts a closure to run on the draining thread.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.sender.send(Box::new(job));
    }

    /// Runs everything queued right now. Returns the number of jobs run.
    pub fn run_pending(&self) -> usize {
        let receiver = self.receiver.lock_ignore_poison();
        let mut count = 0;
        while let Ok(job) = receiver.try_recv() {
            job();
            count += 1;
        }
        count
    }

    /// Runs jobs as they arrive until `timeout` elapses. Returns the number of jobs run.
    pub fn run_for(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let receiver = self.receiver.lock_ignore_poison();
        let mut count = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok(job) => {
                    job();
                    count += 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return count,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_calls_all_slots_in_order() {
        let signal: Signal<u32> = Signal::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::clone(&seen);
        signal.connect(move |v| a.lock().unwrap().push(("a", *v)));
        let b = Arc::clone(&seen);
        signal.connect(move |v| b.lock().unwrap().push(("b", *v)));

        signal.emit(&7);
        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_disconnect() {
        let signal: Signal<()> = Signal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = signal.connect(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        signal.emit(&());
        assert!(signal.disconnect(id));
        assert!(!signal.disconnect(id));
        signal.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queued_slot_runs_on_draining_thread() {
        let signal: Arc<Signal<String>> = Arc::new(Signal::new());
        let queue = MainQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let drain_thread = std::thread::current().id();
        signal.connect_queued(&queue, move |value| {
            assert_eq!(std::thread::current().id(), drain_thread);
            s.lock().unwrap().push(value);
        });

        let emitter = Arc::clone(&signal);
        std::thread::spawn(move || emitter.emit(&"hello".to_string()))
            .join()
            .unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_run_for_returns_after_timeout() {
        let queue = MainQueue::new();
        queue.post(|| {});
        assert_eq!(queue.run_for(Duration::from_millis(20)), 1);
    }
}

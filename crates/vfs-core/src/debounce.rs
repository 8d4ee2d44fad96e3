//! One-shot coalescing timer.
//!
//! [`Debouncer::schedule`] arms the timer unless it is already armed; the callback runs once
//! on a short-lived timer thread no earlier than the requested delay. Requests made while
//! armed fold into the pending run, and a request with an earlier deadline pulls the pending
//! run forward. The armed flag is cleared right before the callback runs, so requests made
//! during the callback arm a fresh timer.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::ignore_poison::{CondvarIgnorePoison, IgnorePoison, join_unless_current};

#[derive(Default)]
struct TimerState {
    armed: bool,
    cancelled: bool,
    /// Bumped on every schedule so a timer thread can tell a flush request apart.
    generation: u64,
    deadline: Option<Instant>,
    fire_now: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

pub struct Debouncer {
    shared: Arc<Shared>,
    callback: Arc<dyn Fn() + Send + Sync>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer").field("armed", &self.is_armed()).finish()
    }
}

impl Debouncer {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TimerState::default()),
                cond: Condvar::new(),
            }),
            callback: Arc::new(callback),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Arms the timer to fire after `delay`. Returns false if it was already armed (the
    /// pending run will pick up whatever the caller staged) or the debouncer was cancelled.
    /// An armed timer whose deadline is later than `now + delay` is moved up.
    pub fn schedule(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let generation = {
            let mut state = self.shared.state.lock_ignore_poison();
            if state.cancelled {
                return false;
            }
            if state.armed {
                if state.deadline.is_some_and(|pending| deadline < pending) {
                    state.deadline = Some(deadline);
                    self.shared.cond.notify_all();
                }
                return false;
            }
            state.armed = true;
            state.fire_now = false;
            state.deadline = Some(deadline);
            state.generation += 1;
            state.generation
        };

        let shared = Arc::clone(&self.shared);
        let callback = Arc::clone(&self.callback);
        let spawned = std::thread::Builder::new()
            .name("vfs-debounce".into())
            .spawn(move || {
                let mut guard = shared.state.lock_ignore_poison();
                loop {
                    if guard.cancelled || guard.generation != generation {
                        return;
                    }
                    let Some(due) = guard.deadline else { break };
                    let now = Instant::now();
                    if guard.fire_now || now >= due {
                        break;
                    }
                    // Wakes early when the deadline moves, then re-reads it
                    guard = shared
                        .cond
                        .wait_timeout_while_ignore_poison(guard, due - now, |s| {
                            !s.cancelled && !s.fire_now && s.generation == generation && s.deadline == Some(due)
                        })
                        .0;
                }
                guard.armed = false;
                guard.fire_now = false;
                guard.deadline = None;
                drop(guard);
                callback();
            });

        match spawned {
            Ok(handle) => {
                let mut threads = self.threads.lock_ignore_poison();
                threads.retain(|t| !t.is_finished());
                threads.push(handle);
                true
            }
            Err(e) => {
                log::warn!("Debouncer: failed to spawn timer thread: {e}");
                let mut state = self.shared.state.lock_ignore_poison();
                state.armed = false;
                state.deadline = None;
                false
            }
        }
    }

    /// Makes a pending timer fire immediately instead of waiting out its delay.
    pub fn fire_now(&self) {
        let mut state = self.shared.state.lock_ignore_poison();
        if state.armed {
            state.fire_now = true;
            self.shared.cond.notify_all();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.shared.state.lock_ignore_poison().armed
    }

    /// Cancels any pending run and stops accepting new ones. Joins the timer threads.
    pub fn cancel(&self) {
        {
            let mut state = self.shared.state.lock_ignore_poison();
            state.cancelled = true;
            state.armed = false;
            self.shared.cond.notify_all();
        }
        let threads: Vec<JoinHandle<()>> = self.threads.lock_ignore_poison().drain(..).collect();
        for handle in threads {
            join_unless_current(handle);
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn counter() -> (Arc<AtomicUsize>, Debouncer) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let debouncer = Debouncer::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, debouncer)
    }

    fn wait_for(count: &AtomicUsize, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while count.load(Ordering::SeqCst) < expected && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_repeated_schedules_coalesce() {
        let (count, debouncer) = counter();
        assert!(debouncer.schedule(Duration::from_millis(50)));
        assert!(!debouncer.schedule(Duration::from_millis(50)));
        assert!(!debouncer.schedule(Duration::from_millis(50)));
        wait_for(&count, 1);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_armed());
    }

    #[test]
    fn test_rearm_after_fire() {
        let (count, debouncer) = counter();
        debouncer.schedule(Duration::from_millis(10));
        wait_for(&count, 1);
        assert!(debouncer.schedule(Duration::from_millis(10)));
        wait_for(&count, 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fire_now_skips_delay() {
        let (count, debouncer) = counter();
        let start = Instant::now();
        debouncer.schedule(Duration::from_secs(30));
        debouncer.fire_now();
        wait_for(&count, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_earlier_request_moves_pending_run_forward() {
        let (count, debouncer) = counter();
        let start = Instant::now();
        assert!(debouncer.schedule(Duration::from_secs(30)));
        assert!(!debouncer.schedule(Duration::from_millis(20)));
        wait_for(&count, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!debouncer.is_armed());
    }

    #[test]
    fn test_later_request_keeps_pending_deadline() {
        let (count, debouncer) = counter();
        let start = Instant::now();
        debouncer.schedule(Duration::from_millis(20));
        debouncer.schedule(Duration::from_secs(30));
        wait_for(&count, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancel_prevents_callback() {
        let (count, debouncer) = counter();
        debouncer.schedule(Duration::from_millis(30));
        debouncer.cancel();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!debouncer.schedule(Duration::from_millis(1)));
    }
}

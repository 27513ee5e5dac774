use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub type TimerId = u64;

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct TimerEntry {
    due: Instant,
    id: TimerId,
    callback: Callback,
}

// Min-heap on the due instant; BinaryHeap is a max-heap, so order is flipped.
impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.due.cmp(&self.due).then_with(|| other.id.cmp(&self.id))
    }
}

struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    cancelled: HashSet<TimerId>,
    next_id: TimerId,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cv: Condvar,
}

/// Monotonic one-shot timer used for RPC deadlines. Callbacks run on the
/// timer thread and must not block; in practice they enqueue an event on a
/// kernel queue.
pub struct KernelTimer {
    shared: Arc<TimerShared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl KernelTimer {
    pub fn spawn(name: &str) -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                cancelled: HashSet::new(),
                next_id: 1,
                shutdown: false,
            }),
            cv: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(format!("timer-{}", name))
            .spawn(move || Self::run(thread_shared))
            .expect("failed to spawn timer thread");

        KernelTimer { shared, worker: Some(worker) }
    }

    pub fn schedule(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> TimerId {
        let mut state = self.shared.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.heap.push(TimerEntry { due: Instant::now() + delay, id, callback: Box::new(callback) });
        self.shared.cv.notify_one();
        id
    }

    /// Cancels a pending timer. A timer whose callback already ran is gone;
    /// cancelling it is a no-op.
    pub fn cancel(&self, id: TimerId) {
        let mut state = self.shared.state.lock().unwrap();
        state.cancelled.insert(id);
        self.shared.cv.notify_one();
    }

    fn run(shared: Arc<TimerShared>) {
        let mut state = shared.state.lock().unwrap();
        loop {
            if state.shutdown {
                return;
            }

            let now = Instant::now();
            let mut ready: Vec<Callback> = Vec::new();
            while let Some(entry) = state.heap.peek() {
                if entry.due > now {
                    break;
                }
                let entry = state.heap.pop().unwrap();
                if !state.cancelled.remove(&entry.id) {
                    ready.push(entry.callback);
                }
            }

            if !ready.is_empty() {
                drop(state);
                for callback in ready {
                    callback();
                }
                state = shared.state.lock().unwrap();
                continue;
            }

            state = match state.heap.peek() {
                Some(entry) => {
                    let wait = entry.due.saturating_duration_since(now);
                    shared.cv.wait_timeout(state, wait).unwrap().0
                }
                None => shared.cv.wait(state).unwrap(),
            };
        }
    }
}

impl Drop for KernelTimer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
        }
        self.shared.cv.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_in_due_order() {
        let timer = KernelTimer::spawn("test");
        let (tx, rx) = mpsc::channel();

        let tx2 = tx.clone();
        timer.schedule(Duration::from_millis(40), move || tx2.send(2).unwrap());
        timer.schedule(Duration::from_millis(10), move || tx.send(1).unwrap());

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 2);
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let timer = KernelTimer::spawn("test");
        let (tx, rx) = mpsc::channel();

        let id = timer.schedule(Duration::from_millis(30), move || tx.send(()).unwrap());
        timer.cancel(id);

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}

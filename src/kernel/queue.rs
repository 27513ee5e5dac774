use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, Result};
use crate::kernel::event::KernelEvent;

struct QueueInner {
    events: VecDeque<KernelEvent>,
    closed: bool,
}

struct QueueShared {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

/// The per-actor work queue: one mutex, one condition variable, one
/// consumer. Producers are proxies, the RPC engine, the timer and the
/// management plane.
#[derive(Clone)]
pub struct QueueHandle {
    shared: Arc<QueueShared>,
}

impl QueueHandle {
    pub fn new() -> Self {
        QueueHandle {
            shared: Arc::new(QueueShared {
                inner: Mutex::new(QueueInner { events: VecDeque::new(), closed: false }),
                cv: Condvar::new(),
            }),
        }
    }

    /// Enqueues an event. Fails once the queue is closed by shutdown.
    pub fn post(&self, event: KernelEvent) -> Result<()> {
        let mut inner = self.shared.inner.lock().unwrap();
        if inner.closed {
            return Err(Error::TransportFailure("actor queue is closed".into()));
        }
        inner.events.push_back(event);
        self.shared.cv.notify_one();
        Ok(())
    }

    /// Blocks until an event is available. Returns `None` when the queue is
    /// closed and fully drained.
    pub fn wait_next(&self) -> Option<KernelEvent> {
        let mut inner = self.shared.inner.lock().unwrap();
        loop {
            if let Some(event) = inner.events.pop_front() {
                return Some(event);
            }
            if inner.closed {
                return None;
            }
            inner = self.shared.cv.wait(inner).unwrap();
        }
    }

    /// Non-blocking variant used by the kernel to drain between ticks.
    pub fn try_next(&self) -> Option<KernelEvent> {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.events.pop_front()
    }

    /// Closes the queue: pending events remain drainable, new posts fail.
    pub fn close(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.closed = true;
        self.shared.cv.notify_all();
    }

    pub fn len(&self) -> usize {
        self.shared.inner.lock().unwrap().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for QueueHandle {
    fn default() -> Self {
        QueueHandle::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order_is_preserved() {
        let queue = QueueHandle::new();
        queue.post(KernelEvent::Tick { cycle: 1 }).unwrap();
        queue.post(KernelEvent::Tick { cycle: 2 }).unwrap();

        match queue.wait_next().unwrap() {
            KernelEvent::Tick { cycle } => assert_eq!(cycle, 1),
            other => panic!("unexpected event {:?}", other),
        }
        match queue.wait_next().unwrap() {
            KernelEvent::Tick { cycle } => assert_eq!(cycle, 2),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn close_drains_then_ends() {
        let queue = QueueHandle::new();
        queue.post(KernelEvent::Tick { cycle: 1 }).unwrap();
        queue.close();

        assert!(queue.post(KernelEvent::Tick { cycle: 2 }).is_err());
        assert!(matches!(queue.wait_next(), Some(KernelEvent::Tick { cycle: 1 })));
        assert!(queue.wait_next().is_none());
    }

    #[test]
    fn wait_next_blocks_until_post() {
        let queue = QueueHandle::new();
        let producer = queue.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.post(KernelEvent::Tick { cycle: 9 }).unwrap();
        });
        assert!(matches!(queue.wait_next(), Some(KernelEvent::Tick { cycle: 9 })));
    }
}

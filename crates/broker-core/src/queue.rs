//! Assignment policy: how pending requests are matched to idle workers.
//!
//! Two interchangeable policies implement [`QueueManager`]: the default
//! [`PerWorkerQueueManager`] (each worker owns its own FIFO) and
//! [`SingleQueueManager`] (one global FIFO shared across all workers, with a
//! pluggable comparator and idle-worker selector).

use std::collections::VecDeque;
use std::rc::Rc;

use crate::worker::{Request, WorkerHandle};

/// Outcome of [`QueueManager::enqueue_request`].
pub struct EnqueueResult {
    /// Whether the request was accepted at all (`false` means no worker in
    /// the pool can ever satisfy its headers, and it was dropped).
    pub enqueued: bool,
    /// The worker that now owns the request, whether queued behind a busy
    /// one or dispatched immediately. `None` under [`SingleQueueManager`]
    /// when the request landed in the global queue with no owner yet.
    pub matched: Option<WorkerHandle>,
    /// Whether `matched` should be sent the job right now (it was idle).
    pub dispatch: bool,
}

/// Assignment policy shared by the broker handler.
pub trait QueueManager {
    /// Register a newly connected worker.
    fn add_worker(&mut self, worker: WorkerHandle);

    /// Accept a request, matching it against known workers. Returns which
    /// worker (if any) it was immediately handed to.
    fn enqueue_request(&mut self, request: Rc<Request>) -> EnqueueResult;

    /// Hand `request` directly to `worker` (used for worker-death
    /// reassignment, where the substitute has already been chosen by the
    /// caller). Returns whether it should be dispatched to the worker now.
    fn assign_to(&mut self, worker: &WorkerHandle, request: Rc<Request>) -> bool;

    /// A worker finished its current request; assign it the next one if any
    /// is available, and return it.
    fn worker_finished(&mut self, worker: &WorkerHandle) -> Option<Rc<Request>>;

    /// A worker is gone; drain and return every request it was holding.
    fn worker_terminated(&mut self, worker: &WorkerHandle) -> Vec<Rc<Request>>;

    /// Number of requests not yet assigned to any worker.
    fn queued_request_count(&self) -> usize;
}

/// Default policy: every worker owns its own FIFO. `enqueue_request` scans
/// workers in registry order (matching [`crate::registry::WorkerRegistry::find_worker`]),
/// assigns directly to an idle match, or queues behind a busy one.
#[derive(Default)]
pub struct PerWorkerQueueManager {
    ring: Vec<WorkerHandle>,
}

impl PerWorkerQueueManager {
    /// Construct an empty manager.
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueManager for PerWorkerQueueManager {
    fn add_worker(&mut self, worker: WorkerHandle) {
        self.ring.push(worker);
    }

    fn enqueue_request(&mut self, request: Rc<Request>) -> EnqueueResult {
        let pos = self
            .ring
            .iter()
            .position(|w| w.borrow().check_headers(&request.headers));

        let Some(pos) = pos else {
            return EnqueueResult {
                enqueued: false,
                matched: None,
                dispatch: false,
            };
        };

        let worker = self.ring.remove(pos);
        self.ring.push(worker.clone());

        let dispatch = {
            let mut w = worker.borrow_mut();
            w.enqueue(request);
            w.next_request()
        };

        EnqueueResult {
            enqueued: true,
            matched: Some(worker),
            dispatch,
        }
    }

    fn assign_to(&mut self, worker: &WorkerHandle, request: Rc<Request>) -> bool {
        if let Some(pos) = self.ring.iter().position(|w| Rc::ptr_eq(w, worker)) {
            let w = self.ring.remove(pos);
            self.ring.push(w);
        }
        let mut w = worker.borrow_mut();
        w.enqueue(request);
        w.next_request()
    }

    fn worker_finished(&mut self, worker: &WorkerHandle) -> Option<Rc<Request>> {
        let mut w = worker.borrow_mut();
        w.complete_request();
        if w.next_request() {
            w.current.clone()
        } else {
            None
        }
    }

    fn worker_terminated(&mut self, worker: &WorkerHandle) -> Vec<Rc<Request>> {
        self.ring.retain(|w| !Rc::ptr_eq(w, worker));
        worker.borrow_mut().terminate()
    }

    fn queued_request_count(&self) -> usize {
        self.ring.iter().map(|w| w.borrow().queue.len()).sum()
    }
}

/// Alternate policy: a single global FIFO across all workers, each holding at
/// most one in-flight request via `worker_jobs`. `select_idle` picks which
/// idle worker (if any) is handed the head of the global queue.
pub struct SingleQueueManager {
    global: VecDeque<Rc<Request>>,
    workers: Vec<WorkerHandle>,
}

impl Default for SingleQueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SingleQueueManager {
    /// Construct an empty manager with arrival-order FIFO semantics.
    pub fn new() -> Self {
        Self {
            global: VecDeque::new(),
            workers: Vec::new(),
        }
    }

    fn select_idle(&self, request: &Request) -> Option<WorkerHandle> {
        self.workers
            .iter()
            .find(|w| {
                let w = w.borrow();
                w.current.is_none() && w.check_headers(&request.headers)
            })
            .cloned()
    }

    fn any_capable(&self, request: &Request) -> bool {
        self.workers.iter().any(|w| w.borrow().check_headers(&request.headers))
    }

    /// Re-scan the global queue for the first entry an idle `worker` accepts,
    /// assign it, and return it.
    fn fill_from_global(&mut self, worker: &WorkerHandle) -> Option<Rc<Request>> {
        let pos = {
            let w = worker.borrow();
            self.global.iter().position(|r| w.check_headers(&r.headers))
        }?;
        let request = self.global.remove(pos)?;
        worker.borrow_mut().current = Some(request.clone());
        Some(request)
    }
}

impl QueueManager for SingleQueueManager {
    fn add_worker(&mut self, worker: WorkerHandle) {
        self.workers.push(worker);
    }

    fn enqueue_request(&mut self, request: Rc<Request>) -> EnqueueResult {
        if let Some(worker) = self.select_idle(&request) {
            worker.borrow_mut().current = Some(request);
            return EnqueueResult {
                enqueued: true,
                matched: Some(worker),
                dispatch: true,
            };
        }

        if !self.any_capable(&request) {
            return EnqueueResult {
                enqueued: false,
                matched: None,
                dispatch: false,
            };
        }

        self.global.push_back(request);
        EnqueueResult {
            enqueued: true,
            matched: None,
            dispatch: false,
        }
    }

    fn assign_to(&mut self, worker: &WorkerHandle, request: Rc<Request>) -> bool {
        if worker.borrow().current.is_some() {
            self.global.push_back(request);
            return false;
        }
        worker.borrow_mut().current = Some(request);
        true
    }

    fn worker_finished(&mut self, worker: &WorkerHandle) -> Option<Rc<Request>> {
        worker.borrow_mut().current = None;
        self.fill_from_global(worker)
    }

    fn worker_terminated(&mut self, worker: &WorkerHandle) -> Vec<Rc<Request>> {
        self.workers.retain(|w| !Rc::ptr_eq(w, worker));
        let mut out = Vec::new();
        if let Some(current) = worker.borrow_mut().current.take() {
            out.push(current);
        }
        out
    }

    fn queued_request_count(&self) -> usize {
        self.global.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Worker;
    use std::cell::RefCell;

    fn worker(id: u8) -> WorkerHandle {
        Rc::new(RefCell::new(Worker::new(vec![id], "g".into(), vec![], 4)))
    }

    fn req(job_id: &str) -> Rc<Request> {
        Rc::new(Request::new(vec![], job_id, vec![]))
    }

    #[test]
    fn per_worker_assigns_idle_worker_immediately() {
        let mut qm = PerWorkerQueueManager::new();
        let w = worker(1);
        qm.add_worker(w.clone());

        let result = qm.enqueue_request(req("j1"));
        assert!(result.enqueued);
        assert!(result.dispatch);
        assert!(Rc::ptr_eq(&result.matched.unwrap(), &w));
    }

    #[test]
    fn per_worker_queues_behind_busy_worker() {
        let mut qm = PerWorkerQueueManager::new();
        let w = worker(1);
        qm.add_worker(w.clone());

        qm.enqueue_request(req("j1"));
        let second = qm.enqueue_request(req("j2"));
        assert!(second.enqueued);
        assert!(!second.dispatch);
        assert!(second.matched.is_some());

        let next = qm.worker_finished(&w).unwrap();
        assert_eq!(next.job_id, "j2");
    }

    #[test]
    fn per_worker_rejects_when_no_worker_matches() {
        let mut qm = PerWorkerQueueManager::new();
        let result = qm.enqueue_request(req("j1"));
        assert!(!result.enqueued);
    }

    #[test]
    fn single_queue_assigns_idle_and_refills_from_global() {
        let mut qm = SingleQueueManager::new();
        let w = worker(1);
        qm.add_worker(w.clone());

        qm.enqueue_request(req("j1"));
        let second = qm.enqueue_request(req("j2"));
        assert!(!second.dispatch);
        assert!(second.matched.is_none());
        assert_eq!(qm.queued_request_count(), 1);

        let next = qm.worker_finished(&w).unwrap();
        assert_eq!(next.job_id, "j2");
        assert_eq!(qm.queued_request_count(), 0);
    }

    #[test]
    fn assign_to_dispatches_to_an_idle_worker_directly() {
        let mut qm = PerWorkerQueueManager::new();
        let w = worker(1);
        qm.add_worker(w.clone());

        assert!(qm.assign_to(&w, req("j1")));
        assert_eq!(w.borrow().current.as_ref().unwrap().job_id, "j1");
    }
}

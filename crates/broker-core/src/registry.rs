//! Ordered collection of connected workers. List order is scheduling
//! priority: the earliest capable worker wins, and accepting a job moves a
//! worker to the tail, giving round-robin fairness among equally capable
//! workers without any extra bookkeeping.

use std::rc::Rc;

use crate::worker::{Headers, Worker, WorkerHandle};

/// The live set of connected workers.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: Vec<WorkerHandle>,
}

impl WorkerRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, appended at the tail (lowest priority).
    pub fn add_worker(&mut self, worker: Worker) -> WorkerHandle {
        let handle: WorkerHandle = Rc::new(std::cell::RefCell::new(worker));
        self.workers.push(handle.clone());
        handle
    }

    /// Remove a worker by identity equality.
    pub fn remove_worker(&mut self, identity: &[u8]) -> Option<WorkerHandle> {
        let pos = self.workers.iter().position(|w| w.borrow().identity == identity)?;
        Some(self.workers.remove(pos))
    }

    /// The earliest-listed worker whose capabilities satisfy `headers`.
    pub fn find_worker(&self, headers: &Headers) -> Option<WorkerHandle> {
        self.workers.iter().find(|w| w.borrow().check_headers(headers)).cloned()
    }

    /// Lookup by transport identity.
    pub fn find_worker_by_identity(&self, identity: &[u8]) -> Option<WorkerHandle> {
        self.workers.iter().find(|w| w.borrow().identity == identity).cloned()
    }

    /// Move `worker` to the tail of the list, if present and not already
    /// there. A no-op if it is already at the tail.
    pub fn deprioritize_worker(&mut self, worker: &WorkerHandle) {
        let Some(pos) = self.workers.iter().position(|w| Rc::ptr_eq(w, worker)) else {
            return;
        };
        if pos == self.workers.len() - 1 {
            return;
        }
        let handle = self.workers.remove(pos);
        self.workers.push(handle);
    }

    /// All registered workers, in priority order.
    pub fn get_workers(&self) -> &[WorkerHandle] {
        &self.workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: u8, hwgroup: &str) -> Worker {
        Worker::new(vec![id], hwgroup.into(), vec![], 4)
    }

    #[test]
    fn find_worker_returns_earliest_capable() {
        let mut reg = WorkerRegistry::new();
        reg.add_worker(worker(1, "a"));
        reg.add_worker(worker(2, "a"));

        let headers = vec![("hwgroup".to_string(), "a".to_string())];
        let found = reg.find_worker(&headers).unwrap();
        assert_eq!(found.borrow().identity, vec![1]);
    }

    #[test]
    fn deprioritize_moves_to_tail() {
        let mut reg = WorkerRegistry::new();
        let w1 = reg.add_worker(worker(1, "a"));
        reg.add_worker(worker(2, "a"));

        reg.deprioritize_worker(&w1);
        let ids: Vec<_> = reg.get_workers().iter().map(|w| w.borrow().identity.clone()).collect();
        assert_eq!(ids, vec![vec![2], vec![1]]);

        // already at tail: no-op
        reg.deprioritize_worker(&w1);
        let ids: Vec<_> = reg.get_workers().iter().map(|w| w.borrow().identity.clone()).collect();
        assert_eq!(ids, vec![vec![2], vec![1]]);
    }

    #[test]
    fn remove_worker_erases_by_identity() {
        let mut reg = WorkerRegistry::new();
        reg.add_worker(worker(1, "a"));
        reg.add_worker(worker(2, "a"));
        assert!(reg.remove_worker(&[1]).is_some());
        assert_eq!(reg.get_workers().len(), 1);
        assert!(reg.remove_worker(&[9]).is_none());
    }
}

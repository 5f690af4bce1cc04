//! The protocol state machine: everything arriving on `workers`, `clients`,
//! and `timer` is dispatched here.

use std::collections::HashMap;
use std::rc::Rc;

use broker_transport::{Handler, Message};

use crate::notifier::{ReactorStatusNotifier, StatusNotifier};
use crate::queue::QueueManager;
use crate::registry::WorkerRegistry;
use crate::worker::{Request, Worker};

/// Socket key the worker-facing ROUTER socket is registered under.
pub const KEY_WORKERS: &str = "workers";
/// Socket key the client-facing ROUTER socket is registered under.
pub const KEY_CLIENTS: &str = "clients";
/// Socket key the monitor socket is registered under.
pub const KEY_MONITOR: &str = "monitor";
/// Hub key the status-notifier async handler is registered under.
pub const KEY_STATUS_NOTIFIER: &str = "status_notifier";

/// The broker's protocol state machine, attached to `workers`, `clients`, and
/// `timer`.
pub struct BrokerHandler {
    registry: WorkerRegistry,
    queue: Box<dyn QueueManager>,
    /// Per-worker accumulated elapsed milliseconds since the last liveness
    /// decay, keyed by transport identity.
    timers: HashMap<Vec<u8>, u64>,
    max_worker_liveness: i64,
    worker_ping_interval_ms: u64,
}

impl BrokerHandler {
    /// Construct a handler over `queue`, decaying liveness every
    /// `worker_ping_interval_ms` down from `max_worker_liveness`.
    pub fn new(queue: Box<dyn QueueManager>, max_worker_liveness: i64, worker_ping_interval_ms: u64) -> Self {
        Self {
            registry: WorkerRegistry::new(),
            queue,
            timers: HashMap::new(),
            max_worker_liveness,
            worker_ping_interval_ms,
        }
    }

    fn reset_liveness(&mut self, identity: &[u8]) {
        if let Some(worker) = self.registry.find_worker_by_identity(identity) {
            worker.borrow_mut().liveness = self.max_worker_liveness;
        }
        if let Some(acc) = self.timers.get_mut(identity) {
            *acc = 0;
        }
    }

    fn process_worker_init(&mut self, message: &Message, responses: &mut Vec<Message>) {
        let Some(hwgroup) = message.frame_str(1) else {
            tracing::warn!("init message missing hwgroup frame; dropped");
            return;
        };
        let headers = parse_headers(&message.data[2..]);

        if let Some(existing) = self.registry.find_worker_by_identity(&message.identity) {
            if existing.borrow().headers_equal(&headers) {
                return;
            }
            let desc = existing.borrow().description();
            let mut notifier = ReactorStatusNotifier::new(responses, KEY_STATUS_NOTIFIER);
            notifier.error(&format!(
                "Received two different INIT messages from the same worker {desc}"
            ));
            return;
        }

        let worker = Worker::new(
            message.identity.clone(),
            hwgroup.to_string(),
            headers,
            self.max_worker_liveness,
        );
        let handle = self.registry.add_worker(worker);
        self.queue.add_worker(handle);
        self.timers.insert(message.identity.clone(), 0);
    }

    fn process_worker_ping(&mut self, message: &Message, responses: &mut Vec<Message>) {
        if self.registry.find_worker_by_identity(&message.identity).is_none() {
            responses.push(Message::text(KEY_WORKERS, message.identity.clone(), &["intro"]));
            return;
        }
        responses.push(Message::text(KEY_WORKERS, message.identity.clone(), &["pong"]));
    }

    fn process_worker_progress(&mut self, message: &Message, responses: &mut Vec<Message>) {
        let rest = message.data[1..].to_vec();
        responses.push(Message::new(KEY_MONITOR, Vec::new(), rest));
    }

    fn process_worker_done(&mut self, message: &Message, responses: &mut Vec<Message>) {
        let Some(worker) = self.registry.find_worker_by_identity(&message.identity) else {
            tracing::warn!(identity = %hex::encode(&message.identity), "done from unknown worker; dropped");
            return;
        };
        let Some(job_id) = message.frame_str(1) else {
            tracing::warn!("done message missing job_id; dropped");
            return;
        };

        {
            let matches_current = worker
                .borrow()
                .current
                .as_ref()
                .is_some_and(|req| req.job_id == job_id);
            if !matches_current {
                tracing::warn!(job_id, "done job_id does not match worker's current request; dropped");
                return;
            }
        }

        if message.data.len() == 4 {
            let status = message.frame_str(2).unwrap_or("");
            let message_text = message.frame_str(3).unwrap_or("");
            if status != "OK" {
                let mut notifier = ReactorStatusNotifier::new(responses, KEY_STATUS_NOTIFIER);
                notifier.job_failed(job_id, message_text);
                return;
            }
        }

        {
            let mut notifier = ReactorStatusNotifier::new(responses, KEY_STATUS_NOTIFIER);
            notifier.job_done(job_id);
        }

        if let Some(next) = self.queue.worker_finished(&worker) {
            responses.push(Message::new(KEY_WORKERS, worker.borrow().identity.clone(), next.data.clone()));
        }
    }

    fn process_client_eval(&mut self, message: &Message, responses: &mut Vec<Message>) {
        responses.push(Message::text(KEY_CLIENTS, message.identity.clone(), &["ack"]));

        let Some(job_id) = message.frame_str(1) else {
            tracing::warn!("eval message missing job_id; dropped");
            return;
        };

        let mut idx = 2;
        let mut headers = Vec::new();
        loop {
            let Some(frame) = message.data.get(idx) else {
                tracing::warn!(job_id, "eval message ended before header delimiter; dropped");
                return;
            };
            if frame.is_empty() {
                idx += 1;
                break;
            }
            if let Some(pair) = parse_header_frame(frame) {
                headers.push(pair);
            }
            idx += 1;
        }
        let mut frames = vec![b"eval".to_vec(), job_id.as_bytes().to_vec()];
        frames.extend(message.data[idx..].iter().cloned());

        let request = Rc::new(Request::new(headers, job_id, frames));
        let result = self.queue.enqueue_request(request);

        if !result.enqueued {
            responses.push(Message::text(KEY_CLIENTS, message.identity.clone(), &["reject"]));
            return;
        }

        if let Some(worker) = &result.matched {
            if result.dispatch {
                let data = worker.borrow().current.as_ref().unwrap().data.clone();
                responses.push(Message::new(KEY_WORKERS, worker.borrow().identity.clone(), data));
            }
            responses.push(Message::text(KEY_CLIENTS, message.identity.clone(), &["accept"]));
            self.registry.deprioritize_worker(worker);
        } else {
            responses.push(Message::text(KEY_CLIENTS, message.identity.clone(), &["accept"]));
        }
    }

    fn process_timer(&mut self, message: &Message, responses: &mut Vec<Message>) {
        let Some(elapsed) = message.frame_str(0).and_then(|s| s.parse::<u64>().ok()) else {
            return;
        };

        let mut expired = Vec::new();
        for worker in self.registry.get_workers() {
            let identity = worker.borrow().identity.clone();
            let acc = self.timers.entry(identity.clone()).or_insert(0);
            *acc += elapsed;
            if *acc > self.worker_ping_interval_ms {
                *acc = 0;
                let mut w = worker.borrow_mut();
                w.liveness -= 1;
                if w.liveness <= 0 {
                    drop(w);
                    expired.push(identity);
                }
            }
        }

        for identity in expired {
            self.timers.remove(&identity);
            let Some(worker) = self.registry.remove_worker(&identity) else {
                continue;
            };
            let desc = worker.borrow().description();
            let pending = self.queue.worker_terminated(&worker);

            let mut unassigned = Vec::new();
            for request in pending {
                let substitute = self.registry.find_worker(&request.headers);
                match substitute {
                    Some(substitute) => {
                        let dispatch = self.queue.assign_to(&substitute, request);
                        if dispatch {
                            let data = substitute.borrow().current.as_ref().unwrap().data.clone();
                            responses.push(Message::new(
                                KEY_WORKERS,
                                substitute.borrow().identity.clone(),
                                data,
                            ));
                        }
                    }
                    None => unassigned.push(request),
                }
            }

            if !unassigned.is_empty() {
                let job_ids: Vec<&str> = unassigned.iter().map(|r| r.job_id.as_str()).collect();
                let mut notifier = ReactorStatusNotifier::new(responses, KEY_STATUS_NOTIFIER);
                notifier.rejected_jobs(&job_ids, &format!("Worker {desc} dieded"));
            }
        }
    }
}

fn parse_header_frame(frame: &[u8]) -> Option<(String, String)> {
    let text = std::str::from_utf8(frame).ok()?;
    let pos = text.find('=')?;
    Some((text[..pos].to_string(), text[pos + 1..].to_string()))
}

fn parse_headers(frames: &[Vec<u8>]) -> Vec<(String, String)> {
    frames.iter().filter_map(|f| parse_header_frame(f)).collect()
}

impl Handler for BrokerHandler {
    fn on_request(&mut self, message: &Message, responses: &mut Vec<Message>) {
        if message.key == KEY_WORKERS {
            self.reset_liveness(&message.identity);
        }

        match message.key.as_str() {
            broker_transport::KEY_TIMER => self.process_timer(message, responses),
            KEY_WORKERS => match message.command() {
                Some("init") => self.process_worker_init(message, responses),
                Some("ping") => self.process_worker_ping(message, responses),
                Some("progress") => self.process_worker_progress(message, responses),
                Some("done") => self.process_worker_done(message, responses),
                other => tracing::warn!(command = ?other, "unrecognized worker command"),
            },
            KEY_CLIENTS => match message.command() {
                Some("eval") => self.process_client_eval(message, responses),
                other => tracing::warn!(command = ?other, "unrecognized client command"),
            },
            other => tracing::trace!(key = other, "message for unhandled key"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::PerWorkerQueueManager;

    fn handler() -> BrokerHandler {
        BrokerHandler::new(Box::new(PerWorkerQueueManager::new()), 4, 1000)
    }

    fn init_msg(identity: &[u8], hwgroup: &str, headers: &[&str]) -> Message {
        let mut frames = vec![b"init".to_vec(), hwgroup.as_bytes().to_vec()];
        frames.extend(headers.iter().map(|h| h.as_bytes().to_vec()));
        Message::new(KEY_WORKERS, identity.to_vec(), frames)
    }

    #[test]
    fn init_then_eval_dispatches_to_worker() {
        let mut h = handler();
        let mut responses = Vec::new();
        h.on_request(&init_msg(b"w1", "cgroup", &["env=c"]), &mut responses);
        assert!(responses.is_empty());

        let eval = Message::new(
            KEY_CLIENTS,
            b"c1".to_vec(),
            vec![
                b"eval".to_vec(),
                b"J1".to_vec(),
                b"env=c".to_vec(),
                b"".to_vec(),
                b"payload".to_vec(),
            ],
        );
        let mut responses = Vec::new();
        h.on_request(&eval, &mut responses);

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].key, KEY_CLIENTS);
        assert_eq!(responses[0].command(), Some("ack"));
        assert_eq!(responses[1].key, KEY_WORKERS);
        assert_eq!(responses[1].command(), Some("eval"));
        assert_eq!(responses[2].command(), Some("accept"));
    }

    #[test]
    fn eval_with_no_capable_worker_is_rejected() {
        let mut h = handler();
        let eval = Message::new(
            KEY_CLIENTS,
            b"c1".to_vec(),
            vec![b"eval".to_vec(), b"J1".to_vec(), b"".to_vec(), b"payload".to_vec()],
        );
        let mut responses = Vec::new();
        h.on_request(&eval, &mut responses);
        assert_eq!(responses[0].command(), Some("ack"));
        assert_eq!(responses[1].command(), Some("reject"));
    }

    #[test]
    fn eval_without_delimiter_only_acks() {
        let mut h = handler();
        let eval = Message::new(KEY_CLIENTS, b"c1".to_vec(), vec![b"eval".to_vec(), b"J1".to_vec()]);
        let mut responses = Vec::new();
        h.on_request(&eval, &mut responses);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].command(), Some("ack"));
    }

    #[test]
    fn ping_from_unknown_worker_gets_intro() {
        let mut h = handler();
        let ping = Message::new(KEY_WORKERS, b"ghost".to_vec(), vec![b"ping".to_vec()]);
        let mut responses = Vec::new();
        h.on_request(&ping, &mut responses);
        assert_eq!(responses[0].command(), Some("intro"));
    }

    #[test]
    fn done_with_failed_status_leaves_current_occupied() {
        let mut h = handler();
        h.on_request(&init_msg(b"w1", "cgroup", &["env=c"]), &mut Vec::new());
        let eval = Message::new(
            KEY_CLIENTS,
            b"c1".to_vec(),
            vec![
                b"eval".to_vec(),
                b"J1".to_vec(),
                b"env=c".to_vec(),
                b"".to_vec(),
                b"payload".to_vec(),
            ],
        );
        h.on_request(&eval, &mut Vec::new());
        let worker = h.registry.find_worker_by_identity(b"w1").unwrap();

        let done = Message::new(
            KEY_WORKERS,
            b"w1".to_vec(),
            vec![b"done".to_vec(), b"J1".to_vec(), b"FAILED".to_vec(), b"boom".to_vec()],
        );
        let mut responses = Vec::new();
        h.on_request(&done, &mut responses);

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].key, KEY_STATUS_NOTIFIER);
        assert_eq!(worker.borrow().current.as_ref().unwrap().job_id, "J1");
    }

    #[test]
    fn done_with_non_ok_status_but_no_message_frame_counts_as_success() {
        let mut h = handler();
        h.on_request(&init_msg(b"w1", "cgroup", &["env=c"]), &mut Vec::new());
        let eval = Message::new(
            KEY_CLIENTS,
            b"c1".to_vec(),
            vec![
                b"eval".to_vec(),
                b"J1".to_vec(),
                b"env=c".to_vec(),
                b"".to_vec(),
                b"payload".to_vec(),
            ],
        );
        h.on_request(&eval, &mut Vec::new());
        let worker = h.registry.find_worker_by_identity(b"w1").unwrap();

        let done = Message::new(
            KEY_WORKERS,
            b"w1".to_vec(),
            vec![b"done".to_vec(), b"J1".to_vec(), b"BADSTATUS".to_vec()],
        );
        let mut responses = Vec::new();
        h.on_request(&done, &mut responses);

        assert_eq!(responses[0].key, KEY_STATUS_NOTIFIER);
        assert!(worker.borrow().current.is_none());
    }

    #[test]
    fn reinit_with_identical_headers_is_a_no_op() {
        let mut h = handler();
        h.on_request(&init_msg(b"w1", "cgroup", &["env=c"]), &mut Vec::new());
        let mut responses = Vec::new();
        h.on_request(&init_msg(b"w1", "cgroup", &["env=c"]), &mut responses);
        assert!(responses.is_empty());
    }

    #[test]
    fn reinit_with_different_headers_emits_error_and_keeps_existing() {
        let mut h = handler();
        h.on_request(&init_msg(b"w1", "cgroup", &["env=c"]), &mut Vec::new());
        let mut responses = Vec::new();
        h.on_request(&init_msg(b"w1", "cgroup", &["env=python"]), &mut responses);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].key, KEY_STATUS_NOTIFIER);
    }
}

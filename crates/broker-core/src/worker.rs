//! A connected worker and the capability matching it advertises.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// A (name, value) capability/requirement pair. Duplicate names are legal.
pub type Headers = Vec<(String, String)>;

/// Shared handle to a worker. Everything that touches workers (the registry,
/// the queue manager, the per-worker timer map) runs on the single dispatch
/// thread, so plain `Rc<RefCell<_>>` is enough — no atomics, no locks.
pub type WorkerHandle = Rc<RefCell<Worker>>;

/// One forwarded evaluation request.
#[derive(Debug)]
pub struct Request {
    /// Requirement headers the request was submitted with.
    pub headers: Headers,
    /// Frontend-assigned job identifier.
    pub job_id: String,
    /// Full outbound worker frames: `["eval", job_id, ...payload]`, ready to
    /// ship as-is when this request is dispatched.
    pub data: Vec<Vec<u8>>,
    /// Number of times this request has failed (informational; the broker
    /// does not currently retry failed requests).
    pub failure_count: u32,
}

impl Request {
    /// Construct a fresh request with a zero failure count.
    pub fn new(headers: Headers, job_id: impl Into<String>, data: Vec<Vec<u8>>) -> Self {
        Self {
            headers,
            job_id: job_id.into(),
            data,
            failure_count: 0,
        }
    }
}

/// A worker-side rule for accepting one required header value.
#[derive(Debug, Clone)]
pub enum HeaderMatcher {
    /// The required value must equal the advertised value exactly.
    Exact(String),
    /// The required value is a `|`-delimited alternation; matches if any
    /// alternative equals the advertised literal. Used for `hwgroup`.
    Multi(String),
    /// Both sides are parsed as integers; matches if required <= advertised.
    /// Used for `threads`.
    Count(u64),
}

impl HeaderMatcher {
    /// Whether `required` is accepted by this matcher.
    pub fn matches(&self, required: &str) -> bool {
        match self {
            HeaderMatcher::Exact(advertised) => advertised == required,
            HeaderMatcher::Multi(advertised) => required.split('|').any(|alt| alt == advertised),
            HeaderMatcher::Count(advertised) => required
                .parse::<u64>()
                .map(|req| req <= *advertised)
                .unwrap_or(false),
        }
    }
}

/// A connected worker: its capabilities, liveness, and job queue.
pub struct Worker {
    /// Opaque transport routing identity.
    pub identity: Vec<u8>,
    /// Hardware group the worker belongs to.
    pub hwgroup: String,
    /// Raw advertised headers, kept for re-`init` equality checks.
    pub headers_advertised: Headers,
    /// Derived matchers, keyed by header name.
    matchers: HashMap<String, Vec<HeaderMatcher>>,
    /// Remaining pings the worker may miss before it is considered dead.
    pub liveness: i64,
    /// Pending requests, oldest first.
    pub queue: VecDeque<Rc<Request>>,
    /// The request currently dispatched to this worker, if any.
    pub current: Option<Rc<Request>>,
}

impl Worker {
    /// Construct a worker from its `init` advertisement, deriving matchers:
    /// `hwgroup` always gets a multi-matcher over the worker's own hwgroup,
    /// every advertised header gets an exact matcher except `threads`, which
    /// gets a count matcher.
    pub fn new(identity: Vec<u8>, hwgroup: String, headers_advertised: Headers, max_liveness: i64) -> Self {
        let mut matchers: HashMap<String, Vec<HeaderMatcher>> = HashMap::new();
        matchers
            .entry("hwgroup".to_string())
            .or_default()
            .push(HeaderMatcher::Multi(hwgroup.clone()));

        for (name, value) in &headers_advertised {
            let matcher = if name == "threads" {
                HeaderMatcher::Count(value.parse().unwrap_or(0))
            } else {
                HeaderMatcher::Exact(value.clone())
            };
            matchers.entry(name.clone()).or_default().push(matcher);
        }

        Self {
            identity,
            hwgroup,
            headers_advertised,
            matchers,
            liveness: max_liveness,
            queue: VecDeque::new(),
            current: None,
        }
    }

    /// Whether any matcher under `name` accepts `required_value`.
    pub fn check_header(&self, name: &str, required_value: &str) -> bool {
        self.matchers
            .get(name)
            .map(|ms| ms.iter().any(|m| m.matches(required_value)))
            .unwrap_or(false)
    }

    /// Whether every `(name, value)` in `required` is accepted.
    pub fn check_headers(&self, required: &Headers) -> bool {
        required.iter().all(|(name, value)| self.check_header(name, value))
    }

    /// Whether `other` is exactly the multiset this worker was constructed
    /// with (used to detect a no-op re-`init`).
    pub fn headers_equal(&self, other: &Headers) -> bool {
        headers_equal(&self.headers_advertised, other)
    }

    /// Append a request to the tail of the queue.
    pub fn enqueue(&mut self, request: Rc<Request>) {
        self.queue.push_back(request);
    }

    /// If idle and the queue is non-empty, pop the head into `current`.
    /// Never disturbs an already-set `current`.
    pub fn next_request(&mut self) -> bool {
        if self.current.is_some() {
            return false;
        }
        if let Some(req) = self.queue.pop_front() {
            self.current = Some(req);
            return true;
        }
        false
    }

    /// Clear `current` (the request finished, successfully or not).
    pub fn complete_request(&mut self) {
        self.current = None;
    }

    /// Drain and return every request owned by this worker: current first,
    /// then the queue in order. Leaves the worker with no requests.
    pub fn terminate(&mut self) -> Vec<Rc<Request>> {
        let mut out = Vec::with_capacity(self.queue.len() + 1);
        if let Some(current) = self.current.take() {
            out.push(current);
        }
        out.extend(self.queue.drain(..));
        out
    }

    /// Hex-encoded identity, for logging and notifier messages.
    pub fn description(&self) -> String {
        hex::encode(&self.identity)
    }
}

/// Multiset equality between two header lists.
pub fn headers_equal(a: &Headers, b: &Headers) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    a.sort();
    b.sort();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect()
    }

    #[test]
    fn count_matcher_accepts_required_at_or_below_advertised() {
        let w = Worker::new(vec![1], "group1".into(), headers(&[("threads", "4")]), 4);
        assert!(w.check_header("threads", "2"));
        assert!(w.check_header("threads", "4"));
        assert!(!w.check_header("threads", "8"));
    }

    #[test]
    fn multi_matcher_accepts_any_alternative() {
        let w = Worker::new(vec![1], "gpu".into(), headers(&[]), 4);
        assert!(w.check_header("hwgroup", "cpu|gpu"));
        assert!(!w.check_header("hwgroup", "cpu|fpga"));
    }

    #[test]
    fn next_request_does_not_disturb_current() {
        let mut w = Worker::new(vec![1], "group1".into(), headers(&[]), 4);
        let r1 = Rc::new(Request::new(headers(&[]), "j1", vec![]));
        let r2 = Rc::new(Request::new(headers(&[]), "j2", vec![]));
        w.enqueue(r1.clone());
        assert!(w.next_request());
        assert_eq!(w.current.as_ref().unwrap().job_id, "j1");

        w.enqueue(r2);
        assert!(!w.next_request());
        assert_eq!(w.current.as_ref().unwrap().job_id, "j1");
    }

    #[test]
    fn terminate_drains_current_then_queue_in_order() {
        let mut w = Worker::new(vec![1], "group1".into(), headers(&[]), 4);
        w.enqueue(Rc::new(Request::new(headers(&[]), "j1", vec![])));
        w.next_request();
        w.enqueue(Rc::new(Request::new(headers(&[]), "j2", vec![])));
        w.enqueue(Rc::new(Request::new(headers(&[]), "j3", vec![])));

        let drained = w.terminate();
        let ids: Vec<_> = drained.iter().map(|r| r.job_id.as_str()).collect();
        assert_eq!(ids, vec!["j1", "j2", "j3"]);
        assert!(w.current.is_none());
        assert!(w.queue.is_empty());
    }

    #[test]
    fn headers_equal_ignores_order() {
        let a = headers(&[("env", "c"), ("threads", "4")]);
        let b = headers(&[("threads", "4"), ("env", "c")]);
        assert!(headers_equal(&a, &b));
    }
}

#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Domain logic for the job-dispatch broker: workers, the scheduling
//! registry, queueing policy, status reporting, and the protocol state
//! machine that ties them together.

pub mod handler;
pub mod notifier;
pub mod queue;
pub mod registry;
pub mod status_handler;
pub mod worker;

pub use handler::{BrokerHandler, KEY_CLIENTS, KEY_MONITOR, KEY_STATUS_NOTIFIER, KEY_WORKERS};
pub use notifier::{HttpStatusNotifier, ReactorStatusNotifier, StatusNotifier};
pub use queue::{EnqueueResult, PerWorkerQueueManager, QueueManager, SingleQueueManager};
pub use registry::WorkerRegistry;
pub use status_handler::run_status_notifier_handler;
pub use worker::{HeaderMatcher, Headers, Request, Worker, WorkerHandle};

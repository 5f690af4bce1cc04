//! The single-threaded dispatch loop.
//!
//! One [`Reactor`] owns every registered socket, every synchronous handler,
//! and the async [`Hub`]. Each iteration polls all sockets and the hub with a
//! bounded ceiling, dispatches whatever arrived, and then always emits one
//! synthetic timer message carrying the elapsed time — so liveness decay
//! keeps advancing even on a perfectly idle broker.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::future::{select_all, LocalBoxFuture};

use crate::hub::{Hub, HubEndpoint};
use crate::message::Message;
use crate::socket::RouterSocketWrapper;

/// Key under which the reactor delivers its synthetic timer ticks.
pub const KEY_TIMER: &str = "timer";

/// Ceiling on how long one poll iteration waits for an inbound message before
/// it gives up and emits a timer tick anyway.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// A synchronous handler invoked inline on the dispatch thread. Must not
/// block; anything that can take longer than a tick belongs behind
/// [`Reactor::spawn_async_handler`] instead.
///
/// Deliberately not `Send`: handlers own worker state via `Rc<RefCell<_>>`
/// (see `broker-core`), and the reactor never moves its handlers across
/// threads — `Reactor::run` is driven directly from `main`, never spawned.
pub trait Handler {
    /// Handle one inbound message, pushing zero or more outbound messages
    /// onto `responses` in the order they should be processed.
    fn on_request(&mut self, message: &Message, responses: &mut Vec<Message>);
}

/// The dispatch loop.
pub struct Reactor {
    sockets: HashMap<String, RouterSocketWrapper>,
    handlers: HashMap<String, Vec<usize>>,
    handler_objs: Vec<RefCell<Box<dyn Handler>>>,
    hub: Hub,
    terminate: Arc<AtomicBool>,
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor {
    /// Construct an empty reactor.
    pub fn new() -> Self {
        Self {
            sockets: HashMap::new(),
            handlers: HashMap::new(),
            handler_objs: Vec::new(),
            hub: Hub::new(),
            terminate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A shared flag this reactor checks once per iteration; used to request
    /// shutdown from outside the loop (e.g. a signal handler).
    pub fn termination_flag(&self) -> Arc<AtomicBool> {
        self.terminate.clone()
    }

    /// Register a socket. Its key becomes both a poll source and a valid
    /// send destination.
    pub fn add_socket(&mut self, socket: RouterSocketWrapper) {
        self.sockets.insert(socket.key().to_string(), socket);
    }

    /// Attach a synchronous handler to one or more keys.
    pub fn add_handler(&mut self, keys: &[&str], handler: Box<dyn Handler>) {
        let idx = self.handler_objs.len();
        self.handler_objs.push(RefCell::new(handler));
        for key in keys {
            self.handlers.entry((*key).to_string()).or_default().push(idx);
        }
    }

    /// Attach an asynchronous handler under `key`: spawns `factory` on its own
    /// task with a [`HubEndpoint`]; messages sent to `key` are forwarded
    /// through the hub instead of invoked inline.
    pub fn spawn_async_handler<F, Fut>(&mut self, key: &str, factory: F)
    where
        F: FnOnce(HubEndpoint) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let endpoint = self.hub.register(key);
        tokio::spawn(factory(endpoint));
    }

    /// Request termination; checked once per loop iteration. Also notifies
    /// every async handler to stop.
    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.hub.terminate_all();
    }

    /// Run until [`Reactor::terminate`] is called (or the termination flag is
    /// otherwise set).
    pub async fn run(&mut self) {
        let mut last_tick = Instant::now();
        while !self.terminate.load(Ordering::SeqCst) {
            tokio::select! {
                _ = tokio::time::sleep(POLL_TIMEOUT) => {}
                (key, result) = recv_any_socket(&mut self.sockets) => {
                    match result {
                        Ok(message) => self.dispatch(message).await,
                        Err(err) => tracing::warn!(socket = %key, error = %err, "socket receive failed"),
                    }
                }
                Some(message) = self.hub.recv() => {
                    self.dispatch(message).await;
                }
            }

            let elapsed = last_tick.elapsed();
            last_tick = Instant::now();
            let ticks = Message::text(
                KEY_TIMER,
                Vec::new(),
                &[&elapsed.as_millis().to_string()],
            );
            self.dispatch(ticks).await;
        }
    }

    async fn dispatch(&mut self, message: Message) {
        let mut queue = VecDeque::new();
        queue.push_back(message);
        while let Some(msg) = queue.pop_front() {
            self.send_message(msg, &mut queue).await;
        }
    }

    /// Route one message: out a socket if its key names one, into the hub if
    /// an async handler owns that key, or to in-process handlers otherwise.
    async fn send_message(&mut self, message: Message, queue: &mut VecDeque<Message>) {
        if let Some(socket) = self.sockets.get_mut(&message.key) {
            if let Err(err) = socket.send(&message.identity, &message.data).await {
                tracing::warn!(key = %message.key, error = %err, "failed to send outbound message");
            }
            return;
        }

        if self.hub.has_handler(&message.key) {
            if let Err(err) = self.hub.send(&message.key, message) {
                tracing::warn!(error = %err, "failed to forward message to async handler");
            }
            return;
        }

        self.process_message(message, queue);
    }

    fn process_message(&mut self, message: Message, queue: &mut VecDeque<Message>) {
        let Some(indices) = self.handlers.get(&message.key) else {
            tracing::trace!(key = %message.key, "no handler registered for this key");
            return;
        };
        for &idx in indices {
            let mut responses = Vec::new();
            self.handler_objs[idx].borrow_mut().on_request(&message, &mut responses);
            queue.extend(responses);
        }
    }
}

/// Race a receive across every registered socket. Never resolves if there are
/// no sockets, so the caller's surrounding `select!` falls through to the
/// timeout branch.
fn recv_any_socket(
    sockets: &mut HashMap<String, RouterSocketWrapper>,
) -> Pin<Box<dyn Future<Output = (String, anyhow::Result<Message>)> + '_>> {
    Box::pin(async move {
        if sockets.is_empty() {
            std::future::pending::<()>().await;
            unreachable!("pending future never resolves");
        }

        let futs: Vec<LocalBoxFuture<'_, (String, anyhow::Result<Message>)>> = sockets
            .iter_mut()
            .map(|(key, socket)| {
                let key = key.clone();
                Box::pin(async move {
                    let result = socket.recv().await;
                    (key, result)
                }) as LocalBoxFuture<'_, (String, anyhow::Result<Message>)>
            })
            .collect();

        let (item, _index, _rest) = select_all(futs).await;
        item
    })
}

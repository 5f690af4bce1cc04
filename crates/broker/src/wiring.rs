//! Constructs the reactor and wires every socket and handler to it.

use broker_config::BrokerConfig;
use broker_core::{
    BrokerHandler, KEY_CLIENTS, KEY_MONITOR, KEY_STATUS_NOTIFIER, KEY_WORKERS, PerWorkerQueueManager,
    run_status_notifier_handler,
};
use broker_transport::{Reactor, RouterSocketWrapper};

/// Fixed logical identity the monitor socket addresses its sends to, since it
/// connects rather than binds and so has no peer routing frame of its own.
const MONITOR_IDENTITY: &[u8] = b"recodex-monitor";

/// Build a fully wired [`Reactor`]: sockets bound/connected, the broker
/// handler attached to `workers`/`clients`/`timer`, and the status-notifier
/// handler spawned as an async hub handler under `status_notifier`.
pub async fn build_reactor(config: &BrokerConfig) -> anyhow::Result<Reactor> {
    let mut reactor = Reactor::new();

    let clients = RouterSocketWrapper::bind(
        KEY_CLIENTS,
        &format!("tcp://{}:{}", config.clients.address, config.clients.port),
    )
    .await?;
    let workers = RouterSocketWrapper::bind(
        KEY_WORKERS,
        &format!("tcp://{}:{}", config.workers.address, config.workers.port),
    )
    .await?;
    let monitor = RouterSocketWrapper::connect(
        KEY_MONITOR,
        &format!("tcp://{}:{}", config.monitor.address, config.monitor.port),
        MONITOR_IDENTITY.to_vec(),
    )
    .await?;

    reactor.add_socket(clients);
    reactor.add_socket(workers);
    reactor.add_socket(monitor);

    let handler = BrokerHandler::new(
        Box::new(PerWorkerQueueManager::new()),
        config.max_worker_liveness,
        config.worker_ping_interval_ms,
    );
    reactor.add_handler(&[KEY_WORKERS, KEY_CLIENTS, broker_transport::KEY_TIMER], Box::new(handler));

    let notifier_config = config.notifier.clone();
    reactor.spawn_async_handler(KEY_STATUS_NOTIFIER, move |endpoint| {
        run_status_notifier_handler(endpoint, notifier_config)
    });

    Ok(reactor)
}

//! Connection supervision: one worker task per server.
//!
//! # Worker lifecycle
//!
//! ```text
//!            ┌───────────── begin_connect ◄────────────┐
//!            ▼                                         │
//!       Connecting ── handshake ok ──► Connected       │
//!            │                             │           │
//!            │ handshake failed /          │ stream    │
//!            │ timed out                   │ ended /   │
//!            ▼                             ▼ write err │
//!       Reconnecting ◄─────────────────────┘           │
//!            │                                         │
//!            └──── sleep min(base·2ⁿ, cap) + jitter ───┘
//! ```
//!
//! The worker owns the socket and the [`ServerConnection`] record.  Callers
//! reach it only through a [`ClientHandle`]: commands arrive on an `mpsc`
//! channel and are acknowledged through a `oneshot`; state changes are
//! published on a `watch` channel.
//!
//! # One socket per server
//!
//! A worker being disconnected keeps its map entry as `Slot::Stopping` until
//! its socket is released; `connect` for that server waits for the entry to
//! clear before starting a new worker.
//!
//! # Cancellation
//!
//! Every `select!` in the worker also waits on the cancel signal, so
//! `disconnect` interrupts a handshake, a read, or a backoff sleep.  The
//! session halves are locals of the worker future: whether the worker returns
//! normally or is aborted, they are dropped and the socket is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use console_core::domain::unix_millis;
use console_core::{
    BackoffPolicy, ConnectionState, ConnectionStatus, InboundFrame, Region, ServerConnection,
    ServerId,
};

use super::protocol_client::{ClientHandle, Outbound, ProtocolClient};
use super::upstream::UpstreamConnector;
use crate::application::{InboundSink, SharedRateLimiter};
use crate::domain::{ConsoleConfig, ConsoleError};

/// Commands that may wait in a worker's queue.
const OUTBOUND_QUEUE: usize = 32;

/// Timing and credentials shared by every worker.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub token: Option<String>,
    pub backoff: BackoffPolicy,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    pub shutdown_grace: Duration,
}

impl From<&ConsoleConfig> for SupervisorSettings {
    fn from(config: &ConsoleConfig) -> Self {
        Self {
            token: config.token.clone(),
            backoff: config.backoff.clone(),
            connect_timeout: config.connect_timeout,
            ping_interval: config.ping_interval,
            shutdown_grace: config.shutdown_grace,
        }
    }
}

struct Worker {
    handle: ClientHandle,
    cancel: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

enum Slot {
    Running(Worker),
    /// Disconnect in progress; `stopped` flips to `true` once the worker has
    /// exited and the entry is gone.
    Stopping {
        status: watch::Receiver<ConnectionStatus>,
        stopped: watch::Receiver<bool>,
    },
}

impl Slot {
    fn status(&self) -> ConnectionStatus {
        match self {
            Slot::Running(worker) => worker.handle.status(),
            Slot::Stopping { status, .. } => status.borrow().clone(),
        }
    }
}

/// Marks the running worker of `server_id` as stopping and hands it out.
fn begin_stop(
    workers: &mut HashMap<ServerId, Slot>,
    server_id: ServerId,
) -> Option<(Worker, watch::Sender<bool>)> {
    match workers.remove(&server_id)? {
        Slot::Running(worker) => {
            let (stopped_tx, stopped_rx) = watch::channel(false);
            workers.insert(
                server_id,
                Slot::Stopping {
                    status: worker.handle.watch_status(),
                    stopped: stopped_rx,
                },
            );
            Some((worker, stopped_tx))
        }
        stopping => {
            workers.insert(server_id, stopping);
            None
        }
    }
}

/// Owns every connection worker of one relay.
pub struct ConnectionSupervisor {
    connector: Arc<dyn UpstreamConnector>,
    sink: Arc<dyn InboundSink>,
    limiter: Arc<SharedRateLimiter>,
    settings: SupervisorSettings,
    workers: Mutex<HashMap<ServerId, Slot>>,
}

impl ConnectionSupervisor {
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        sink: Arc<dyn InboundSink>,
        limiter: Arc<SharedRateLimiter>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            connector,
            sink,
            limiter,
            settings,
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ServerId, Slot>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a worker for `server_id` unless one already exists.
    ///
    /// A new worker is given up to `connect_timeout` to settle its first
    /// attempt; the returned snapshot is then either `Connected` or
    /// `Reconnecting` with the failure in `last_error`.  An existing worker's
    /// current status is returned as is.  While the server's previous worker
    /// is still being disconnected, the new one waits for its socket to be
    /// released.
    pub async fn connect(&self, server_id: ServerId, region: Region) -> ConnectionStatus {
        let mut status = loop {
            let mut stopped = {
                let mut workers = self.lock();
                let stopped = match workers.get(&server_id) {
                    Some(Slot::Running(existing)) => {
                        debug!(server_id, "connect: worker already running");
                        return existing.handle.status();
                    }
                    Some(Slot::Stopping { stopped, .. }) => Some(stopped.clone()),
                    None => None,
                };
                match stopped {
                    Some(stopped) => stopped,
                    None => break self.spawn_worker(&mut workers, server_id, region),
                }
            };
            debug!(server_id, "connect: previous worker still stopping; waiting");
            let _ = stopped.wait_for(|done| *done).await;
        };

        let settle = self.settings.connect_timeout + Duration::from_millis(100);
        let settled = timeout(
            settle,
            status.wait_for(|s| {
                matches!(
                    s.state,
                    ConnectionState::Connected | ConnectionState::Reconnecting
                )
            }),
        )
        .await
        .ok()
        .and_then(Result::ok)
        .map(|seen| ConnectionStatus::clone(&seen));
        settled.unwrap_or_else(|| status.borrow().clone())
    }

    fn spawn_worker(
        &self,
        workers: &mut HashMap<ServerId, Slot>,
        server_id: ServerId,
        region: Region,
    ) -> watch::Receiver<ConnectionStatus> {
        let connection = ServerConnection::new(server_id, region, unix_millis());
        let (status_tx, status_rx) = watch::channel(connection.status());
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let task = ConnectionTask {
            connection,
            connector: Arc::clone(&self.connector),
            sink: Arc::clone(&self.sink),
            settings: self.settings.clone(),
            status: status_tx,
            outbound: outbound_rx,
            cancel: cancel_rx,
        };
        let join = tokio::spawn(task.run());

        workers.insert(
            server_id,
            Slot::Running(Worker {
                handle: ClientHandle::new(
                    server_id,
                    outbound_tx,
                    status_rx.clone(),
                    Arc::clone(&self.limiter),
                ),
                cancel: cancel_tx,
                join,
            }),
        );
        info!(server_id, %region, "connection worker started");
        status_rx
    }

    /// Stops the worker of `server_id` and releases its socket.
    ///
    /// # Errors
    ///
    /// [`ConsoleError::NotConnected`] if no worker runs for the server,
    /// including one that is already being disconnected.
    pub async fn disconnect(&self, server_id: ServerId) -> Result<(), ConsoleError> {
        let (worker, stopped) = begin_stop(&mut self.lock(), server_id)
            .ok_or(ConsoleError::NotConnected(server_id))?;
        self.stop(server_id, worker).await;
        self.finish_stop(server_id, stopped);
        Ok(())
    }

    async fn stop(&self, server_id: ServerId, worker: Worker) {
        let Worker {
            cancel, mut join, ..
        } = worker;
        let _ = cancel.send(());

        match timeout(self.settings.shutdown_grace, &mut join).await {
            Ok(Ok(())) => info!(server_id, "connection worker stopped"),
            Ok(Err(e)) => error!(server_id, "connection worker failed: {e}"),
            Err(_) => {
                warn!(server_id, "connection worker did not stop in time; aborting");
                join.abort();
                let _ = join.await;
            }
        }
    }

    fn finish_stop(&self, server_id: ServerId, stopped: watch::Sender<bool>) {
        self.lock().remove(&server_id);
        stopped.send_replace(true);
    }

    /// Stops every worker.
    pub async fn shutdown(&self) {
        let stopping: Vec<_> = {
            let mut workers = self.lock();
            let ids: Vec<ServerId> = workers.keys().copied().collect();
            ids.into_iter()
                .filter_map(|id| begin_stop(&mut workers, id).map(|stop| (id, stop)))
                .collect()
        };
        for (server_id, (worker, stopped)) in stopping {
            self.stop(server_id, worker).await;
            self.finish_stop(server_id, stopped);
        }
    }

    /// Snapshots of one server or of every supervised server, by id.
    ///
    /// A server without a worker is reported `Disconnected`.
    pub fn status(&self, server_id: Option<ServerId>) -> Vec<ConnectionStatus> {
        let workers = self.lock();
        match server_id {
            Some(id) => vec![workers
                .get(&id)
                .map(Slot::status)
                .unwrap_or_else(|| ConnectionStatus::disconnected(id, None))],
            None => {
                let mut all: Vec<_> = workers.values().map(Slot::status).collect();
                all.sort_by_key(|s| s.server_id);
                all
            }
        }
    }

    /// Handle to the running worker of `server_id`, if there is one.
    pub fn handle(&self, server_id: ServerId) -> Option<ClientHandle> {
        match self.lock().get(&server_id) {
            Some(Slot::Running(worker)) => Some(worker.handle.clone()),
            _ => None,
        }
    }
}

// ── Worker task ──────────────────────────────────────────────────────────────

struct ConnectionTask {
    connection: ServerConnection,
    connector: Arc<dyn UpstreamConnector>,
    sink: Arc<dyn InboundSink>,
    settings: SupervisorSettings,
    status: watch::Sender<ConnectionStatus>,
    outbound: mpsc::Receiver<Outbound>,
    cancel: oneshot::Receiver<()>,
}

/// Why a live session ended.
enum SessionEnd {
    Cancelled,
    Failed(String),
}

impl ConnectionTask {
    async fn run(self) {
        let ConnectionTask {
            mut connection,
            connector,
            sink,
            settings,
            status,
            mut outbound,
            mut cancel,
        } = self;
        let server_id = connection.server_id();
        let region = connection.region();
        let publish = |c: &ServerConnection| {
            status.send_replace(c.status());
        };

        'supervise: loop {
            if let Err(e) = connection.begin_connect() {
                error!(server_id, "{e}");
                break;
            }
            publish(&connection);
            info!(
                server_id,
                %region,
                attempt = connection.reconnect_attempts() + 1,
                "connecting to upstream"
            );

            let opened = tokio::select! {
                _ = &mut cancel => break 'supervise,
                r = timeout(
                    settings.connect_timeout,
                    ProtocolClient::open(&*connector, server_id, region, settings.token.as_deref()),
                ) => r,
            };

            let failure = match opened {
                Ok(Ok(client)) => {
                    if let Err(e) = connection.mark_connected() {
                        error!(server_id, "{e}");
                        break;
                    }
                    publish(&connection);
                    info!(server_id, %region, "upstream session established");

                    match run_session(client, &mut cancel, &mut outbound, &*sink, settings.ping_interval)
                        .await
                    {
                        SessionEnd::Cancelled => break 'supervise,
                        SessionEnd::Failed(reason) => reason,
                    }
                }
                Ok(Err(e)) => format!("handshake failed: {e}"),
                Err(_) => format!("handshake timed out after {:?}", settings.connect_timeout),
            };

            let delay = match connection.mark_failed(failure.as_str(), &settings.backoff) {
                Ok(delay) => delay,
                Err(e) => {
                    error!(server_id, "{e}");
                    break;
                }
            };
            publish(&connection);
            warn!(
                server_id,
                attempts = connection.reconnect_attempts(),
                ?delay,
                error = %failure,
                "upstream connection lost; retrying"
            );

            let backoff = tokio::time::sleep(delay);
            tokio::pin!(backoff);
            let cancelled = loop {
                tokio::select! {
                    _ = &mut cancel => break true,
                    _ = &mut backoff => break false,
                    Some(out) = outbound.recv() => {
                        let _ = out.ack.send(Err(ConsoleError::NotConnected(server_id)));
                    }
                }
            };
            if cancelled {
                break;
            }
        }

        connection.mark_disconnected();
        publish(&connection);
        outbound.close();
        while let Ok(out) = outbound.try_recv() {
            let _ = out.ack.send(Err(ConsoleError::NotConnected(server_id)));
        }
        debug!(server_id, "connection worker exiting");
    }
}

/// Drives one established session until it fails or is cancelled.
async fn run_session(
    client: ProtocolClient,
    cancel: &mut oneshot::Receiver<()>,
    outbound: &mut mpsc::Receiver<Outbound>,
    sink: &dyn InboundSink,
    ping_interval: Duration,
) -> SessionEnd {
    let server_id = client.server_id();
    let (mut writer, mut reader) = client.split();

    let mut keepalive = interval(ping_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.tick().await;

    let end = loop {
        tokio::select! {
            _ = &mut *cancel => break SessionEnd::Cancelled,

            frame = reader.next_frame() => match frame {
                Some(Ok(InboundFrame::ConsoleLine(line))) => sink.deliver(server_id, line),
                Some(Ok(InboundFrame::Ack)) => debug!(server_id, "upstream acknowledged session"),
                Some(Ok(InboundFrame::KeepAlive)) => {}
                Some(Ok(InboundFrame::CommandAck { ok })) => {
                    if !ok {
                        warn!(server_id, "upstream rejected a console command");
                    }
                }
                Some(Ok(InboundFrame::UpstreamError(reason))) => {
                    warn!(server_id, "upstream error: {reason}");
                }
                Some(Ok(InboundFrame::Complete)) => {
                    break SessionEnd::Failed("upstream completed the subscription".to_string());
                }
                Some(Ok(InboundFrame::Ignored)) => {}
                Some(Err(e)) => break SessionEnd::Failed(format!("read failed: {e}")),
                None => break SessionEnd::Failed("upstream closed the connection".to_string()),
            },

            Some(out) = outbound.recv() => {
                let result = writer.transmit(&out.text).await;
                let broken = match &result {
                    Err(ConsoleError::Connection { reason, .. }) => Some(reason.clone()),
                    _ => None,
                };
                let _ = out.ack.send(result);
                if let Some(reason) = broken {
                    break SessionEnd::Failed(format!("write failed: {reason}"));
                }
            }

            _ = keepalive.tick() => {
                if let Err(e) = writer.ping().await {
                    break SessionEnd::Failed(format!("keepalive failed: {e}"));
                }
            }
        }
    };

    writer.close().await;
    end
}

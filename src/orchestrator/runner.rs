//! Startup/shutdown sequencing across the transport, the world server and the session

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::{AvatarEvent, EventBus, EventKind, EventSource};
use crate::mcp::{McpServer, ToolDispatcher};
use crate::session::{GatewayConnector, SessionClient, SessionError, WorldConnector};
use crate::supervisor::{ProcessState, ProcessSupervisor, SupervisorError};
use crate::{Config, SessionSettings};

/// Delay between the server reporting ready and the avatar connecting
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Orchestrator lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    StartingTransport,
    StartingProcess,
    AwaitingGrace,
    Connecting,
    Live,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("orchestrator already started (phase: {0:?})")]
    AlreadyStarted(Phase),

    #[error(transparent)]
    Process(#[from] SupervisorError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

type Reader = Box<dyn AsyncRead + Unpin + Send>;
type Writer = Box<dyn AsyncWrite + Unpin + Send>;

/// Owns the three components and drives them through [`Phase`]
pub struct Orchestrator {
    events: EventBus,
    supervisor: Arc<ProcessSupervisor>,
    session: Arc<SessionClient>,
    server: Arc<McpServer>,
    phase: watch::Sender<Phase>,
    transport: Mutex<Option<(Reader, Writer)>>,
    transport_task: tokio::sync::Mutex<Option<JoinHandle<anyhow::Result<()>>>>,
    event_logger: Mutex<Option<JoinHandle<()>>>,
    grace: Duration,
}

impl Orchestrator {
    /// Production wiring: gateway-backed session, protocol on stdio
    pub fn new(config: Config) -> Self {
        let events = EventBus::default();
        let supervisor = ProcessSupervisor::new(config.server, events.clone());
        Self::from_parts(
            supervisor,
            Arc::new(GatewayConnector::default()),
            config.session,
            events,
        )
    }

    pub fn from_parts(
        supervisor: ProcessSupervisor,
        connector: Arc<dyn WorldConnector>,
        settings: SessionSettings,
        events: EventBus,
    ) -> Self {
        let session = Arc::new(SessionClient::new(settings, connector, events.clone()));
        let dispatcher = Arc::new(ToolDispatcher::new(session.clone()));
        let (phase, _) = watch::channel(Phase::Idle);

        Self {
            events,
            supervisor: Arc::new(supervisor),
            session,
            server: Arc::new(McpServer::new(dispatcher)),
            phase,
            transport: Mutex::new(None),
            transport_task: tokio::sync::Mutex::new(None),
            event_logger: Mutex::new(None),
            grace: GRACE_PERIOD,
        }
    }

    /// Serve the protocol on `reader`/`writer` instead of stdio
    pub fn with_transport<R, W>(self, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        *lock(&self.transport) = Some((Box::new(reader), Box::new(writer)));
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn session(&self) -> &Arc<SessionClient> {
        &self.session
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Drive Idle to Live. Any failing step shuts everything down again.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        self.claim()?;
        let outcome = self.bring_up().await;
        self.settle_startup(outcome).await
    }

    fn claim(&self) -> Result<(), OrchestratorError> {
        let mut claimed = false;
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Idle {
                *phase = Phase::StartingTransport;
                claimed = true;
            }
            claimed
        });
        if !claimed {
            return Err(OrchestratorError::AlreadyStarted(self.phase()));
        }

        *lock(&self.event_logger) = Some(tokio::spawn(log_events(self.events.subscribe())));
        Ok(())
    }

    async fn settle_startup(
        &self,
        outcome: Result<(), OrchestratorError>,
    ) -> Result<(), OrchestratorError> {
        match outcome {
            Ok(()) => {
                info!("World avatar is live");
                Ok(())
            }
            Err(e) => {
                error!("Startup failed: {}", e);
                self.shutdown().await;
                Err(e)
            }
        }
    }

    async fn bring_up(&self) -> Result<(), OrchestratorError> {
        let transport = lock(&self.transport).take();
        let (reader, writer): (Reader, Writer) = match transport {
            Some(pair) => pair,
            None => (Box::new(tokio::io::stdin()), Box::new(tokio::io::stdout())),
        };
        let server = self.server.clone();
        *self.transport_task.lock().await = Some(tokio::spawn(server.serve(reader, writer)));

        self.enter(Phase::StartingProcess);
        self.supervisor.start().await?;

        self.enter(Phase::AwaitingGrace);
        debug!(grace_ms = self.grace.as_millis() as u64, "Waiting for the world to settle");
        tokio::time::sleep(self.grace).await;

        self.enter(Phase::Connecting);
        self.session.connect().await?;

        self.enter(Phase::Live);
        Ok(())
    }

    /// Close the transport, disconnect the session, stop the process.
    ///
    /// Every step runs even if an earlier one failed. Calling this again
    /// (or concurrently) waits for the first call to finish.
    pub async fn shutdown(&self) {
        let mut claimed = false;
        self.phase.send_if_modified(|phase| {
            if matches!(phase, Phase::ShuttingDown | Phase::Stopped) {
                return false;
            }
            *phase = Phase::ShuttingDown;
            claimed = true;
            true
        });
        if !claimed {
            let mut rx = self.phase.subscribe();
            let _ = rx.wait_for(|phase| *phase == Phase::Stopped).await;
            return;
        }

        info!("Shutting down");

        self.server.shutdown_token().cancel();
        if let Some(task) = self.transport_task.lock().await.take() {
            match task.await {
                Ok(Ok(())) => debug!("Transport closed"),
                Ok(Err(e)) => warn!("Transport ended with an error: {}", e),
                Err(e) => warn!("Transport task failed: {}", e),
            }
        }

        if let Err(e) = self.session.disconnect().await {
            warn!(kind = e.kind(), "Session disconnect failed: {}", e);
        }

        self.supervisor.stop().await;

        if let Some(logger) = lock(&self.event_logger).take() {
            logger.abort();
        }
        self.enter(Phase::Stopped);
        info!("Shutdown complete");
    }

    /// Start, wait for ctrl-c/SIGTERM or another termination trigger, shut
    /// down once. See [`Orchestrator::run_until`].
    pub async fn run(&self) -> i32 {
        self.run_until(shutdown_signal()).await
    }

    /// Like [`Orchestrator::run`], with `stop` as the shutdown request.
    ///
    /// `stop` is honored from the first phase on: a request that lands
    /// while the world server is still booting abandons startup and tears
    /// down whatever was already brought up.
    ///
    /// Returns the process exit code: 0 after a requested shutdown, 1 when
    /// startup failed or the world server died underneath us.
    pub async fn run_until<F>(&self, stop: F) -> i32
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);

        if self.claim().is_err() {
            return 1;
        }

        let started = tokio::select! {
            outcome = self.bring_up() => Some(outcome),
            _ = &mut stop => None,
        };
        let Some(outcome) = started else {
            info!(phase = ?self.phase(), "Shutdown requested during startup");
            self.shutdown().await;
            return 0;
        };
        if self.settle_startup(outcome).await.is_err() {
            return 1;
        }

        let transport_closed = self.server.shutdown_token();
        let mut process = self.supervisor.subscribe_state();

        let code = tokio::select! {
            _ = &mut stop => {
                info!("Received shutdown signal");
                0
            }
            _ = transport_closed.cancelled() => {
                info!("Client closed the transport");
                0
            }
            _ = process.wait_for(|s| matches!(s, ProcessState::Stopped | ProcessState::Failed)) => {
                error!("World server exited unexpectedly");
                1
            }
        };

        self.shutdown().await;
        code
    }

    fn enter(&self, phase: Phase) {
        debug!(?phase, "Orchestrator phase");
        self.phase.send_replace(phase);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Resolves on ctrl-c, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn log_events(mut rx: broadcast::Receiver<AvatarEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => log_event(&event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &AvatarEvent) {
    let source = match event.source {
        EventSource::Server => "server",
        EventSource::Session => "session",
    };
    match &event.kind {
        EventKind::Log { line } => debug!("[{}] {}", source, line),
        EventKind::Connected { username } => info!("[{}] connected as {}", source, username),
        EventKind::Chat { username, message } => info!("[{}] <{}> {}", source, username, message),
        EventKind::Stopped { code } => info!("[{}] stopped (code: {:?})", source, code),
        EventKind::Error { message } => warn!("[{}] error: {}", source, message),
        EventKind::Kicked { reason } => warn!("[{}] kicked: {}", source, reason),
        EventKind::Disconnected { reason } => warn!("[{}] disconnected: {}", source, reason),
    }
}

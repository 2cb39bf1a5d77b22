//! World server process lifecycle
//!
//! Spawns the server, watches its output for the readiness marker and tears
//! it down on request. Exactly one process handle is owned at a time.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use super::properties::prepare_server_directory;
use super::SupervisorError;
use crate::events::{AvatarEvent, EventBus, EventEmitter, EventKind, EventSource};
use crate::ServerConfig;

/// Substring of a stdout line announcing the server finished booting
pub const READINESS_MARKER: &str = "Done";

/// Case-insensitive substring of a stderr line that aborts startup
pub const ERROR_MARKER: &str = "error";

/// Maximum wait for the readiness marker
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Lifecycle of the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ProcessState {
    /// Whether `start()` may be called from this state
    pub fn can_start(self) -> bool {
        matches!(self, Self::NotStarted | Self::Stopped | Self::Failed)
    }
}

/// First decisive thing that happened while waiting for readiness
#[derive(Debug)]
enum StartupSignal {
    Ready,
    Error(String),
    Exited(Option<i32>),
}

/// The live process: a kill request channel and its exit notification
struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    /// `Some(code)` once the process has exited
    exit_rx: watch::Receiver<Option<Option<i32>>>,
}

/// Owns the external world server process
pub struct ProcessSupervisor {
    config: ServerConfig,
    events: EventBus,
    state: Arc<watch::Sender<ProcessState>>,
    handle: Mutex<Option<ProcessHandle>>,
    startup_timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new(config: ServerConfig, events: EventBus) -> Self {
        let (state, _) = watch::channel(ProcessState::NotStarted);
        Self {
            config,
            events,
            state: Arc::new(state),
            handle: Mutex::new(None),
            startup_timeout: STARTUP_TIMEOUT,
        }
    }

    /// Override the readiness window (tests use a short one)
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Spawn the server and wait until it prints the readiness marker
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if state.can_start() {
                *state = ProcessState::Starting;
                claimed = true;
            }
            claimed
        });
        if !claimed {
            return Err(SupervisorError::AlreadyRunning);
        }

        match self.launch().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(kind = e.kind(), "World server failed to start: {}", e);
                // a concurrent stop() already settled the state
                self.state.send_if_modified(|state| {
                    if *state == ProcessState::Starting {
                        *state = ProcessState::Failed;
                        true
                    } else {
                        false
                    }
                });
                Err(e)
            }
        }
    }

    async fn launch(&self) -> Result<(), SupervisorError> {
        let path = resolve_process_path(&self.config.process_path)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        prepare_server_directory(&dir, &self.config).await?;

        let (program, args) = launch_command(&self.config, &path);
        info!(program = %program, dir = %dir.display(), "Starting world server");

        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed {
                reason: format!("{program}: {e}"),
            })?;

        let (signal_tx, mut signal_rx) = mpsc::channel::<StartupSignal>(4);
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        if let Some(stdout) = child.stdout.take() {
            let events = self.events.clone();
            let signal_tx = signal_tx.clone();
            tokio::spawn(async move {
                let mut ready = false;
                drain_lines(stdout, |line| {
                    if !ready && line.contains(READINESS_MARKER) {
                        ready = true;
                        let _ = signal_tx.try_send(StartupSignal::Ready);
                    }
                    events.emit_log(line);
                })
                .await;
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let events = self.events.clone();
            let signal_tx = signal_tx.clone();
            tokio::spawn(async move {
                drain_lines(stderr, |line| {
                    if line.to_lowercase().contains(ERROR_MARKER) {
                        let _ = signal_tx.try_send(StartupSignal::Error(line.clone()));
                    }
                    events.emit_error(EventSource::Server, line);
                })
                .await;
            });
        }

        let pid = child.id();
        tokio::spawn(watch_exit(
            child,
            kill_rx,
            exit_tx,
            self.state.clone(),
            self.events.clone(),
            signal_tx,
        ));

        *self.handle.lock().await = Some(ProcessHandle {
            pid,
            kill_tx: Some(kill_tx),
            exit_rx,
        });

        let signal = tokio::time::timeout(self.startup_timeout, signal_rx.recv()).await;
        match signal {
            Ok(Some(StartupSignal::Ready)) => {
                let promoted = self.state.send_if_modified(|state| {
                    if *state == ProcessState::Starting {
                        *state = ProcessState::Running;
                        true
                    } else {
                        false
                    }
                });
                if !promoted {
                    self.terminate().await;
                    return Err(SupervisorError::Cancelled);
                }
                info!(pid = ?pid, "World server is ready");
                Ok(())
            }
            Ok(Some(StartupSignal::Error(message))) => {
                self.terminate().await;
                Err(SupervisorError::ProcessError { message })
            }
            Ok(Some(StartupSignal::Exited(code))) => {
                self.handle.lock().await.take();
                Err(SupervisorError::ProcessExited { code })
            }
            Ok(None) => {
                self.handle.lock().await.take();
                Err(SupervisorError::ProcessExited { code: None })
            }
            Err(_) => {
                self.terminate().await;
                Err(SupervisorError::StartupTimeout {
                    secs: self.startup_timeout.as_secs(),
                })
            }
        }
    }

    /// Ask the server to terminate and wait until it has exited.
    ///
    /// Also tears down a server that is still starting, so an abandoned
    /// `start()` never leaves a child behind. A no-op in every other state.
    pub async fn stop(&self) {
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if matches!(state, ProcessState::Running | ProcessState::Starting) {
                *state = ProcessState::Stopping;
                claimed = true;
            }
            claimed
        });
        if !claimed {
            return;
        }

        info!("Stopping world server");
        self.terminate().await;
        self.state.send_replace(ProcessState::Stopped);
    }

    /// Signal the current process (if any) and wait for its exit
    async fn terminate(&self) {
        let Some(mut handle) = self.handle.lock().await.take() else {
            return;
        };
        if let Some(kill_tx) = handle.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        debug!(pid = ?handle.pid, "Waiting for world server to exit");
        let _ = handle.exit_rx.wait_for(|exit| exit.is_some()).await;
    }
}

/// Feed every output line to `on_line` until EOF.
///
/// Lines are decoded lossily; a line that is not UTF-8 never stops the drain.
async fn drain_lines<R>(reader: R, mut on_line: impl FnMut(String))
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                on_line(line.trim_end_matches(&['\r', '\n'][..]).to_string());
            }
            Err(e) => {
                warn!("Failed to read world server output: {}", e);
                break;
            }
        }
    }
}

/// Own the child until it exits, terminating it when asked
async fn watch_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<Option<i32>>>,
    state: Arc<watch::Sender<ProcessState>>,
    events: EventBus,
    signal_tx: mpsc::Sender<StartupSignal>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            send_terminate(&mut child);
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("Failed to wait for world server: {}", e);
            None
        }
    };
    info!(code = ?code, "World server process exited");

    state.send_modify(|state| {
        if matches!(state, ProcessState::Running | ProcessState::Stopping) {
            *state = ProcessState::Stopped;
        }
    });
    events.emit(AvatarEvent::new(
        EventSource::Server,
        EventKind::Stopped { code },
    ));
    exit_tx.send_replace(Some(code));
    let _ = signal_tx.try_send(StartupSignal::Exited(code));
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
            return;
        }
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    let _ = child.start_kill();
}

/// Expand `~`, make the path absolute and check that it exists
pub fn resolve_process_path(raw: &Path) -> Result<PathBuf, SupervisorError> {
    let expanded = expand_home(raw);
    let absolute =
        std::path::absolute(&expanded).map_err(|_| SupervisorError::ExecutableNotFound {
            path: expanded.clone(),
        })?;
    if !absolute.exists() {
        return Err(SupervisorError::ExecutableNotFound { path: absolute });
    }
    Ok(absolute)
}

fn expand_home(raw: &Path) -> PathBuf {
    let text = raw.to_string_lossy();
    let home = || dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    if text == "~" {
        home()
    } else if let Some(rest) = text.strip_prefix("~/") {
        home().join(rest)
    } else {
        raw.to_path_buf()
    }
}

/// Program and arguments used to launch the server at `path`.
///
/// Jars run under the configured Java runtime; anything else is treated as
/// a launch script and handed to `sh` with the same heap arguments.
pub fn launch_command(config: &ServerConfig, path: &Path) -> (String, Vec<String>) {
    let heap = [
        format!("-Xmx{}", config.memory_allocation),
        format!("-Xms{}", config.memory_allocation),
    ];
    let path_arg = path.to_string_lossy().into_owned();
    let is_jar = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jar"));

    if is_jar {
        let mut args = heap.to_vec();
        args.extend(["-jar".to_string(), path_arg, "nogui".to_string()]);
        (config.java_runtime.clone(), args)
    } else {
        let mut args = vec![path_arg];
        args.extend(heap);
        args.push("nogui".to_string());
        ("sh".to_string(), args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jar_launch_command() {
        let mut config = ServerConfig::with_path("/srv/server.jar").unwrap();
        config.memory_allocation = "1G".into();
        let (program, args) = launch_command(&config, Path::new("/srv/server.jar"));
        assert_eq!(program, "java");
        assert_eq!(args, vec!["-Xmx1G", "-Xms1G", "-jar", "/srv/server.jar", "nogui"]);
    }

    #[test]
    fn test_script_launch_command() {
        let config = ServerConfig::with_path("/srv/run.sh").unwrap();
        let (program, args) = launch_command(&config, Path::new("/srv/run.sh"));
        assert_eq!(program, "sh");
        assert_eq!(args, vec!["/srv/run.sh", "-Xmx2G", "-Xms2G", "nogui"]);
    }

    #[test]
    fn test_resolve_missing_path() {
        let err = resolve_process_path(Path::new("definitely/not/here.jar")).unwrap_err();
        match err {
            SupervisorError::ExecutableNotFound { path } => {
                assert!(path.is_absolute());
                assert!(path.ends_with("definitely/not/here.jar"));
            }
            other => panic!("expected ExecutableNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/srv/a.jar")), home.join("srv/a.jar"));
        }
        assert_eq!(expand_home(Path::new("/abs/a.jar")), PathBuf::from("/abs/a.jar"));
    }

    #[test]
    fn test_can_start_states() {
        assert!(ProcessState::NotStarted.can_start());
        assert!(ProcessState::Stopped.can_start());
        assert!(ProcessState::Failed.can_start());
        assert!(!ProcessState::Starting.can_start());
        assert!(!ProcessState::Running.can_start());
        assert!(!ProcessState::Stopping.can_start());
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_noop() {
        let supervisor =
            ProcessSupervisor::new(ServerConfig::with_path("x.jar").unwrap(), EventBus::default());
        supervisor.stop().await;
        assert_eq!(supervisor.state(), ProcessState::NotStarted);
    }

    #[tokio::test]
    async fn test_start_missing_executable_fails() {
        let supervisor = ProcessSupervisor::new(
            ServerConfig::with_path("/nonexistent/world/server.jar").unwrap(),
            EventBus::default(),
        );
        let err = supervisor.start().await.unwrap_err();
        assert_eq!(err.kind(), "ExecutableNotFound");
        assert_eq!(supervisor.state(), ProcessState::Failed);
        assert!(!supervisor.is_running());
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use crate::supervisor::properties::{EULA_FILE, PROPERTIES_FILE};

        fn supervisor_for(script: &str) -> (tempfile::TempDir, ProcessSupervisor, EventBus) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("start.sh");
            std::fs::write(&path, script).unwrap();
            let events = EventBus::default();
            let supervisor =
                ProcessSupervisor::new(ServerConfig::with_path(&path).unwrap(), events.clone())
                    .with_startup_timeout(Duration::from_secs(10));
            (dir, supervisor, events)
        }

        #[tokio::test]
        async fn test_ready_then_stop() {
            let (dir, supervisor, events) = supervisor_for(
                "echo 'Starting world'\necho '[Server thread/INFO]: Done (1.204s)! For help, type \"help\"'\nexec sleep 30\n",
            );
            let mut rx = events.subscribe();

            supervisor.start().await.unwrap();
            assert!(supervisor.is_running());
            assert!(std::fs::read_to_string(dir.path().join(EULA_FILE))
                .unwrap()
                .contains("eula=true"));
            assert!(std::fs::read_to_string(dir.path().join(PROPERTIES_FILE))
                .unwrap()
                .contains("online-mode=false"));

            let err = supervisor.start().await.unwrap_err();
            assert!(matches!(err, SupervisorError::AlreadyRunning));

            supervisor.stop().await;
            assert_eq!(supervisor.state(), ProcessState::Stopped);

            let mut saw_log = false;
            let mut saw_stopped = false;
            while let Ok(event) = rx.try_recv() {
                match event.kind {
                    EventKind::Log { line } if line.contains("Starting world") => saw_log = true,
                    EventKind::Stopped { .. } => saw_stopped = true,
                    _ => {}
                }
            }
            assert!(saw_log);
            assert!(saw_stopped);
        }

        async fn wait_for_pid(dir: &Path) -> i32 {
            let path = dir.join("pid");
            loop {
                if let Ok(text) = std::fs::read_to_string(&path) {
                    if let Ok(pid) = text.trim().parse() {
                        return pid;
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }

        fn is_alive(pid: i32) -> bool {
            nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
        }

        #[tokio::test]
        async fn test_non_utf8_output_does_not_block_readiness() {
            let (_dir, supervisor, events) = supervisor_for(
                "printf 'Loading \\247aMOTD\\n'\necho 'Done (1.0s)!'\nexec sleep 30\n",
            );
            let mut rx = events.subscribe();

            supervisor.start().await.unwrap();
            assert!(supervisor.is_running());

            let first = rx.recv().await.unwrap();
            match first.kind {
                EventKind::Log { line } => {
                    assert!(line.starts_with("Loading "));
                    assert!(line.ends_with("aMOTD"));
                }
                other => panic!("expected a log line, got {other:?}"),
            }

            supervisor.stop().await;
            assert_eq!(supervisor.state(), ProcessState::Stopped);
        }

        #[tokio::test]
        async fn test_stop_while_starting_kills_the_child() {
            let (dir, supervisor, _events) = supervisor_for("echo $$ > pid\nexec sleep 30\n");
            let supervisor = Arc::new(supervisor);

            let starting = tokio::spawn({
                let supervisor = supervisor.clone();
                async move { supervisor.start().await }
            });
            let pid = wait_for_pid(dir.path()).await;
            assert_eq!(supervisor.state(), ProcessState::Starting);

            supervisor.stop().await;
            assert_eq!(supervisor.state(), ProcessState::Stopped);
            assert!(!is_alive(pid));

            let err = starting.await.unwrap().unwrap_err();
            assert!(matches!(err, SupervisorError::ProcessExited { .. }));
            assert_eq!(supervisor.state(), ProcessState::Stopped);
        }

        #[tokio::test]
        async fn test_startup_timeout_leaves_not_running() {
            let (_dir, supervisor, _events) = supervisor_for("echo 'loading spawn area'\nexec sleep 30\n");
            let supervisor = supervisor.with_startup_timeout(Duration::from_millis(300));

            let err = supervisor.start().await.unwrap_err();
            assert!(matches!(err, SupervisorError::StartupTimeout { .. }));
            assert_eq!(supervisor.state(), ProcessState::Failed);
            assert!(!supervisor.is_running());
        }

        #[tokio::test]
        async fn test_exit_before_ready() {
            let (_dir, supervisor, _events) = supervisor_for("echo 'Unsupported Java'\nexit 3\n");
            let err = supervisor.start().await.unwrap_err();
            match err {
                SupervisorError::ProcessExited { code } => assert_eq!(code, Some(3)),
                other => panic!("expected ProcessExited, got {other:?}"),
            }
            assert!(supervisor.state().can_start());
        }

        #[tokio::test]
        async fn test_stderr_error_fails_startup() {
            let (_dir, supervisor, _events) =
                supervisor_for("echo 'Error: Unable to access jarfile' >&2\nexec sleep 30\n");
            let err = supervisor.start().await.unwrap_err();
            assert_eq!(err.kind(), "ProcessError");
            assert_eq!(supervisor.state(), ProcessState::Failed);
        }
    }
}

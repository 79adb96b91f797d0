//! Fakes for process and window primitives used by unit tests

use crate::{
    process::control::{
        ChildProcess, Liveness, ProcessControl, ProcessStatus, SignalOutcome, SpawnRequest,
    },
    program::{MinimizePolicy, ProgramSpec},
    window::{WindowHandle, WindowLocator},
};
use std::{
    collections::{HashMap, HashSet},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

/// A path that certainly exists
pub fn existing_path() -> PathBuf {
    std::env::current_exe().expect("test binary path")
}

/// Minimize policy that finishes fast under paused time
pub fn quick_policy() -> MinimizePolicy {
    MinimizePolicy {
        max_attempts: 2,
        retry_delay: Duration::from_millis(100),
        timeout: Duration::from_secs(1),
        initial_delay: Duration::from_millis(50),
    }
}

/// Directory of placeholder executables, one per program name
pub struct ProgramFiles {
    dir: tempfile::TempDir,
}

impl ProgramFiles {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if !path.exists() {
            std::fs::write(&path, b"").expect("placeholder executable");
        }
        path
    }

    pub fn spec(&self, name: &str) -> ProgramSpec {
        ProgramSpec::new(name, self.path(name)).with_minimize_policy(quick_policy())
    }
}

#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub detached: bool,
    pub pid: u32,
    pub at: tokio::time::Instant,
}

impl SpawnRecord {
    pub fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FakeState {
    Running,
    Zombie(Option<i32>),
    Reaped(Option<i32>),
}

#[derive(Debug)]
struct FakeProc {
    state: FakeState,
    ignores_sigterm: bool,
    fails_poll: bool,
    terminate_calls: u32,
    kill_calls: u32,
}

#[derive(Default)]
struct FakeTable {
    next_pid: u32,
    spawns: Vec<SpawnRecord>,
    procs: HashMap<u32, FakeProc>,
    exit_on_spawn: HashMap<PathBuf, Option<i32>>,
    fail_spawn: HashSet<PathBuf>,
    ignore_sigterm: HashSet<PathBuf>,
    failing_probes: HashSet<u32>,
    failing_polls: HashSet<PathBuf>,
    probe_calls: u32,
}

/// In-memory [`ProcessControl`] with scriptable process behavior
#[derive(Clone, Default)]
pub struct FakeProcesses {
    table: Arc<Mutex<FakeTable>>,
}

impl FakeProcesses {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.table.lock().unwrap().next_pid = 1000;
        fake
    }

    /// Programs at `path` exit with `code` right after spawning
    pub fn exit_on_spawn(&self, path: impl AsRef<Path>, code: Option<i32>) {
        self.table
            .lock()
            .unwrap()
            .exit_on_spawn
            .insert(path.as_ref().to_path_buf(), code);
    }

    pub fn fail_spawn(&self, path: impl AsRef<Path>) {
        self.table
            .lock()
            .unwrap()
            .fail_spawn
            .insert(path.as_ref().to_path_buf());
    }

    /// Programs at `path` survive SIGTERM and need SIGKILL
    pub fn ignore_sigterm(&self, path: impl AsRef<Path>) {
        self.table
            .lock()
            .unwrap()
            .ignore_sigterm
            .insert(path.as_ref().to_path_buf());
    }

    /// Liveness queries for `pid` fail from now on
    pub fn fail_probe(&self, pid: u32) {
        self.table.lock().unwrap().failing_probes.insert(pid);
    }

    /// Exit-status checks of programs at `path` fail
    pub fn fail_poll(&self, path: impl AsRef<Path>) {
        self.table
            .lock()
            .unwrap()
            .failing_polls
            .insert(path.as_ref().to_path_buf());
    }

    /// Simulate the process exiting on its own
    pub fn exit(&self, pid: u32, code: Option<i32>) {
        if let Some(proc) = self.table.lock().unwrap().procs.get_mut(&pid) {
            if proc.state == FakeState::Running {
                proc.state = FakeState::Zombie(code);
            }
        }
    }

    pub fn spawns(&self) -> Vec<SpawnRecord> {
        self.table.lock().unwrap().spawns.clone()
    }

    pub fn spawned_names(&self) -> Vec<String> {
        self.spawns().iter().map(SpawnRecord::name).collect()
    }

    pub fn pid_of(&self, name: &str) -> Option<u32> {
        self.spawns()
            .iter()
            .rev()
            .find(|record| record.name() == name)
            .map(|record| record.pid)
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.table
            .lock()
            .unwrap()
            .procs
            .get(&pid)
            .is_some_and(|p| p.state == FakeState::Running)
    }

    pub fn terminate_calls(&self, pid: u32) -> u32 {
        self.table
            .lock()
            .unwrap()
            .procs
            .get(&pid)
            .map_or(0, |p| p.terminate_calls)
    }

    pub fn kill_calls(&self, pid: u32) -> u32 {
        self.table
            .lock()
            .unwrap()
            .procs
            .get(&pid)
            .map_or(0, |p| p.kill_calls)
    }

    pub fn probe_calls(&self) -> u32 {
        self.table.lock().unwrap().probe_calls
    }
}

impl ProcessControl for FakeProcesses {
    fn spawn(&self, request: &SpawnRequest<'_>) -> io::Result<Box<dyn ChildProcess>> {
        let mut table = self.table.lock().unwrap();
        if table.fail_spawn.contains(request.program) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "spawn refused"));
        }

        table.next_pid += 1;
        let pid = table.next_pid;
        let state = match table.exit_on_spawn.get(request.program) {
            Some(code) => FakeState::Zombie(*code),
            None => FakeState::Running,
        };
        let ignores_sigterm = table.ignore_sigterm.contains(request.program);
        let fails_poll = table.failing_polls.contains(request.program);
        table.procs.insert(
            pid,
            FakeProc {
                state,
                ignores_sigterm,
                fails_poll,
                terminate_calls: 0,
                kill_calls: 0,
            },
        );
        table.spawns.push(SpawnRecord {
            program: request.program.to_path_buf(),
            args: request.args.to_vec(),
            detached: request.detached,
            pid,
            at: tokio::time::Instant::now(),
        });

        Ok(Box::new(FakeChild {
            pid,
            table: self.table.clone(),
        }))
    }

    fn probe(&self, pid: u32) -> eyre::Result<Liveness> {
        let mut table = self.table.lock().unwrap();
        table.probe_calls += 1;
        if table.failing_probes.contains(&pid) {
            eyre::bail!("probe of PID {} failed", pid);
        }
        Ok(match table.procs.get(&pid).map(|p| p.state) {
            Some(FakeState::Running) => Liveness::Alive,
            Some(FakeState::Zombie(_)) => Liveness::Zombie,
            Some(FakeState::Reaped(_)) | None => Liveness::Gone,
        })
    }
}

struct FakeChild {
    pid: u32,
    table: Arc<Mutex<FakeTable>>,
}

impl ChildProcess for FakeChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn poll(&mut self) -> io::Result<ProcessStatus> {
        let mut table = self.table.lock().unwrap();
        let proc = table
            .procs
            .get_mut(&self.pid)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown fake pid"))?;
        if proc.fails_poll {
            return Err(io::Error::other("wait failed"));
        }
        Ok(match proc.state {
            FakeState::Running => ProcessStatus::Running,
            FakeState::Zombie(code) | FakeState::Reaped(code) => {
                proc.state = FakeState::Reaped(code);
                ProcessStatus::Exited { code }
            }
        })
    }

    fn terminate(&mut self) -> io::Result<SignalOutcome> {
        let mut table = self.table.lock().unwrap();
        let proc = table.procs.get_mut(&self.pid).expect("fake pid");
        proc.terminate_calls += 1;
        if proc.state != FakeState::Running {
            return Ok(SignalOutcome::AlreadyGone);
        }
        if !proc.ignores_sigterm {
            proc.state = FakeState::Zombie(None);
        }
        Ok(SignalOutcome::Delivered)
    }

    fn kill(&mut self) -> io::Result<SignalOutcome> {
        let mut table = self.table.lock().unwrap();
        let proc = table.procs.get_mut(&self.pid).expect("fake pid");
        proc.kill_calls += 1;
        if proc.state != FakeState::Running {
            return Ok(SignalOutcome::AlreadyGone);
        }
        proc.state = FakeState::Zombie(None);
        Ok(SignalOutcome::Delivered)
    }
}

#[derive(Default)]
struct WindowTable {
    windows: HashMap<u32, Vec<WindowHandle>>,
    owners: HashMap<WindowHandle, u32>,
    stubborn: HashMap<u32, usize>,
    find_calls: HashMap<u32, usize>,
    minimized: HashSet<WindowHandle>,
    vanished: HashSet<WindowHandle>,
    next_handle: u64,
}

/// In-memory [`WindowLocator`]
#[derive(Clone, Default)]
pub struct FakeWindows {
    table: Arc<Mutex<WindowTable>>,
}

impl FakeWindows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `pid` `count` visible windows
    pub fn open(&self, pid: u32, count: usize) -> Vec<WindowHandle> {
        let mut table = self.table.lock().unwrap();
        let mut handles = Vec::with_capacity(count);
        for _ in 0..count {
            table.next_handle += 1;
            let handle = WindowHandle(table.next_handle);
            table.owners.insert(handle, pid);
            handles.push(handle);
        }
        table
            .windows
            .entry(pid)
            .or_default()
            .extend(handles.iter().copied());
        handles
    }

    /// Ignore minimize requests for `pid` during its first `attempts` lookups
    pub fn stay_visible_for(&self, pid: u32, attempts: usize) {
        self.table.lock().unwrap().stubborn.insert(pid, attempts);
    }

    /// Placement queries for `window` fail, as if it had been destroyed
    pub fn vanish(&self, window: WindowHandle) {
        self.table.lock().unwrap().vanished.insert(window);
    }

    pub fn find_calls(&self, pid: u32) -> usize {
        self.table
            .lock()
            .unwrap()
            .find_calls
            .get(&pid)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_find_calls(&self) -> usize {
        self.table.lock().unwrap().find_calls.values().sum()
    }
}

impl WindowLocator for FakeWindows {
    fn find_windows(&self, pid: u32) -> Vec<WindowHandle> {
        let mut table = self.table.lock().unwrap();
        *table.find_calls.entry(pid).or_default() += 1;
        table.windows.get(&pid).cloned().unwrap_or_default()
    }

    fn set_minimized(&self, window: WindowHandle) -> bool {
        let mut table = self.table.lock().unwrap();
        let Some(&pid) = table.owners.get(&window) else {
            return false;
        };
        let lookups = table.find_calls.get(&pid).copied().unwrap_or(0);
        let stubborn = table.stubborn.get(&pid).copied().unwrap_or(0);
        if lookups > stubborn {
            table.minimized.insert(window);
        }
        true
    }

    fn is_minimized(&self, window: WindowHandle) -> eyre::Result<bool> {
        let table = self.table.lock().unwrap();
        if table.vanished.contains(&window) {
            eyre::bail!("window {} no longer exists", window);
        }
        Ok(table.minimized.contains(&window))
    }

    fn backend_name(&self) -> &'static str {
        "fake"
    }
}

/// Formatted log output collected for assertions. Install it on a
/// current-thread runtime so every event lands in the buffer.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(self.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Number of lines logged at `level` (e.g. "WARN") that contain `needle`
    pub fn lines(&self, level: &str, needle: &str) -> usize {
        let buf = self.buf.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .filter(|line| line.contains(level) && line.contains(needle))
            .count()
    }
}

pub struct LogWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(self.buf.clone())
    }
}

// Operator control channel and its file bridge

use crate::error::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Stop = 0,
    Run = 1,
    Pause = 2,
    Step = 3,
}

impl RunState {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(RunState::Stop),
            1 => Some(RunState::Run),
            2 => Some(RunState::Pause),
            3 => Some(RunState::Step),
            _ => None,
        }
    }

    /// Parses the first state digit found in `s`.
    pub fn from_str(s: &str) -> Option<Self> {
        s.chars()
            .filter_map(|c| c.to_digit(10))
            .find_map(|d| Self::from_u8(d as u8))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Stop => "0",
            RunState::Run => "1",
            RunState::Pause => "2",
            RunState::Step => "3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Write the current graph to disk.
    GetGraph,
}

impl Command {
    pub fn from_str(s: &str) -> Option<Self> {
        if s.contains("get_graph") {
            Some(Command::GetGraph)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::GetGraph => "get_graph",
        }
    }
}

struct Inner {
    state: watch::Sender<RunState>,
    queue: Mutex<Option<String>>,
    command: Mutex<Option<Command>>,
    resume: Notify,
}

#[derive(Clone)]
pub struct Control {
    inner: Arc<Inner>,
}

impl Control {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RunState::Run);
        Self {
            inner: Arc::new(Inner {
                state,
                queue: Mutex::new(None),
                command: Mutex::new(None),
                resume: Notify::new(),
            }),
        }
    }

    pub fn state(&self) -> RunState {
        *self.inner.state.borrow()
    }

    pub fn set_state(&self, state: RunState) {
        let prev = self.inner.state.send_replace(state);
        if prev != state {
            debug!("Run state {} -> {}", prev.as_str(), state.as_str());
        }
        if matches!(state, RunState::Run | RunState::Stop) {
            self.inner.resume.notify_waiters();
        }
    }

    /// Sees every later state change.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.inner.state.subscribe()
    }

    pub fn stop(&self) {
        self.set_state(RunState::Stop);
    }

    /// Releases a paused or stepping crawl for one more step.
    pub fn resume(&self) {
        self.inner.resume.notify_one();
    }

    /// Returns once resumed, or at once if the state is already run or stop.
    pub async fn wait_for_resume(&self) {
        let notified = self.inner.resume.notified();
        tokio::pin!(notified);
        // Registered before the state check so a stop in between still wakes us
        notified.as_mut().enable();
        if matches!(self.state(), RunState::Run | RunState::Stop) {
            return;
        }
        notified.await;
    }

    /// Replaces any URL already waiting.
    pub async fn queue_url(&self, url: impl Into<String>) {
        *self.inner.queue.lock().await = Some(url.into());
    }

    pub async fn take_queued(&self) -> Option<String> {
        self.inner.queue.lock().await.take()
    }

    pub async fn send_command(&self, command: Command) {
        *self.inner.command.lock().await = Some(command);
    }

    pub async fn take_command(&self) -> Option<Command> {
        self.inner.command.lock().await.take()
    }
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

/// File bridge: `{key}-run.flag`, `{key}-queue.txt`, `{key}-command.txt`.
pub struct FileControl {
    dir: PathBuf,
    key: String,
    control: Control,
    last_state: Option<RunState>,
}

impl FileControl {
    pub fn new(dir: impl Into<PathBuf>, key: impl Into<String>, control: Control) -> Self {
        Self {
            dir: dir.into(),
            key: key.into(),
            control,
            last_state: None,
        }
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}-{}", self.key, suffix))
    }

    pub fn run_flag_path(&self) -> PathBuf {
        self.file("run.flag")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.file("queue.txt")
    }

    pub fn command_path(&self) -> PathBuf {
        self.file("command.txt")
    }

    /// Creates the directory and resets the files to run, empty, empty.
    pub async fn init(&mut self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.run_flag_path(), RunState::Run.as_str()).await?;
        tokio::fs::write(self.queue_path(), "").await?;
        tokio::fs::write(self.command_path(), "").await?;
        self.control.set_state(RunState::Run);
        self.last_state = Some(RunState::Run);
        info!("Control files initialised in {}", self.dir.display());
        Ok(())
    }

    /// One sync pass. Operator edits win; otherwise state changes made by
    /// the crawler are written back to the flag file.
    pub async fn sync_once(&mut self) -> Result<()> {
        let flag = tokio::fs::read_to_string(self.run_flag_path()).await?;
        let file_state = RunState::from_str(&flag);
        let current = self.control.state();

        match file_state {
            Some(s) if Some(s) != self.last_state => {
                info!("Run flag set to {}", s.as_str());
                self.control.set_state(s);
                self.last_state = Some(s);
            }
            _ if Some(current) != self.last_state => {
                tokio::fs::write(self.run_flag_path(), current.as_str()).await?;
                self.last_state = Some(current);
            }
            _ => {}
        }

        let queued = tokio::fs::read_to_string(self.queue_path()).await?;
        let queued = queued.trim();
        if !queued.is_empty() {
            info!("User supplied url: {}", queued);
            self.control.queue_url(queued).await;
            tokio::fs::write(self.queue_path(), "").await?;
        }

        let command = tokio::fs::read_to_string(self.command_path()).await?;
        if let Some(cmd) = Command::from_str(&command) {
            self.control.send_command(cmd).await;
            tokio::fs::write(self.command_path(), "").await?;
        } else if !command.trim().is_empty() {
            warn!("Unknown command: {}", command.trim());
            tokio::fs::write(self.command_path(), "").await?;
        }

        Ok(())
    }

    /// Whether a watcher event touched one of this session's files.
    fn concerns(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
            && event.paths.iter().any(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(self.key.as_str()))
            })
    }

    /// Watches the control files and mirrors them into the shared control
    /// until the crawl stops. Crawler-side state changes go back to the flag
    /// file.
    pub fn spawn(mut self) -> Result<JoinHandle<()>> {
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => warn!("Control file watch error: {}", e),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;
        let mut states = self.control.subscribe();

        Ok(tokio::spawn(async move {
            let _watcher = watcher;
            if let Err(e) = self.sync_once().await {
                warn!("Control file sync failed: {}", e);
            }
            while self.control.state() != RunState::Stop {
                let sync = tokio::select! {
                    Some(event) = events.recv() => self.concerns(&event),
                    Ok(()) = states.changed() => true,
                    else => break,
                };
                if sync && let Err(e) = self.sync_once().await {
                    warn!("Control file sync failed: {}", e);
                }
            }
            if let Err(e) = self.sync_once().await {
                warn!("Control file sync failed: {}", e);
            }
            debug!("Control file watcher finished");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_run_state_parse() {
        assert_eq!(RunState::from_str("0\n"), Some(RunState::Stop));
        assert_eq!(RunState::from_str(" 3"), Some(RunState::Step));
        assert_eq!(RunState::from_str(""), None);
        assert_eq!(RunState::from_str("9"), None);
    }

    #[tokio::test]
    async fn test_queue_and_command_slots_hold_one_value() {
        let control = Control::new();
        control.queue_url("http://a/").await;
        control.queue_url("http://b/").await;
        assert_eq!(control.take_queued().await.as_deref(), Some("http://b/"));
        assert!(control.take_queued().await.is_none());

        control.send_command(Command::GetGraph).await;
        assert_eq!(control.take_command().await, Some(Command::GetGraph));
        assert!(control.take_command().await.is_none());
    }

    #[tokio::test]
    async fn test_resume_releases_waiter() {
        let control = Control::new();
        control.set_state(RunState::Step);
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_for_resume().await })
        };
        tokio::task::yield_now().await;
        control.resume();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_wait_is_not_lost() {
        let control = Control::new();
        control.set_state(RunState::Pause);
        // Lands after the caller saw Pause but before it started waiting
        control.stop();
        tokio::time::timeout(Duration::from_secs(1), control.wait_for_resume())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_wakes_paused_waiter() {
        let control = Control::new();
        control.set_state(RunState::Pause);
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_for_resume().await })
        };
        tokio::task::yield_now().await;
        control.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_file_control_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let control = Control::new();
        let mut files = FileControl::new(temp_dir.path(), "example.com-http", control.clone());
        files.init().await.unwrap();

        assert_eq!(std::fs::read_to_string(files.run_flag_path()).unwrap(), "1");
        assert_eq!(std::fs::read_to_string(files.queue_path()).unwrap(), "");

        std::fs::write(files.queue_path(), "http://example.com/x\n").unwrap();
        std::fs::write(files.command_path(), "get_graph").unwrap();
        std::fs::write(files.run_flag_path(), "2").unwrap();
        files.sync_once().await.unwrap();

        assert_eq!(control.state(), RunState::Pause);
        assert_eq!(control.take_queued().await.as_deref(), Some("http://example.com/x"));
        assert_eq!(control.take_command().await, Some(Command::GetGraph));
        assert_eq!(std::fs::read_to_string(files.queue_path()).unwrap(), "");
        assert_eq!(std::fs::read_to_string(files.command_path()).unwrap(), "");

        // Crawler-side change is written back
        control.set_state(RunState::Step);
        files.sync_once().await.unwrap();
        assert_eq!(std::fs::read_to_string(files.run_flag_path()).unwrap(), "3");
    }

    #[tokio::test]
    async fn test_watcher_applies_edits_and_writes_back_stop() {
        let temp_dir = TempDir::new().unwrap();
        let control = Control::new();
        let mut files = FileControl::new(temp_dir.path(), "example.com-http", control.clone());
        files.init().await.unwrap();
        let flag = files.run_flag_path();
        let queue = files.queue_path();
        let handle = files.spawn().unwrap();

        std::fs::write(&flag, "2").unwrap();
        let mut paused = false;
        for _ in 0..250 {
            if control.state() == RunState::Pause {
                paused = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(paused);

        std::fs::write(&queue, "http://example.com/q").unwrap();
        let mut queued = None;
        for _ in 0..250 {
            queued = control.take_queued().await;
            if queued.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(queued.as_deref(), Some("http://example.com/q"));

        control.stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(std::fs::read_to_string(&flag).unwrap(), "0");
    }
}

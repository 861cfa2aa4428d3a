//! The engine: a cloneable handle in front of a worker task that owns the
//! queue, the file snapshot, and the write schedule.
//!
//! Mutation calls validate their arguments, post a command, and return.
//! The worker debounces bursts of mutations into one reconciliation cycle
//! (stat, maybe read, merge, write), runs at most one cycle at a time, and
//! owes itself another cycle when mutations land mid-write. Cycle steps
//! run as spawned sub-tasks reporting back over an internal channel, so
//! commands keep flowing while the disk is busy: a mutation arriving
//! before the merge step joins the current cycle, one arriving after is
//! carried by the re-armed cycle.

use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Duration, Instant, sleep_until};

use crate::config::HostsOptions;
use crate::error::{FileOp, HostsError, HostsResult};
use crate::events::{EventChannel, HostsEvent};
use crate::fs::{HostsFs, RealFs};
use crate::merge;
use crate::queue::{HostArg, MutationQueue};
use crate::snapshot::FileSnapshot;

const EVENT_CAPACITY: usize = 64;

/// Handle to a hosts engine.
///
/// Cheap to clone; all clones talk to the same worker. The worker stops
/// once every handle is dropped, after finishing any cycle it still owes.
#[derive(Clone)]
pub struct Hosts {
    commands: mpsc::UnboundedSender<Command>,
    events: EventChannel,
}

impl Hosts {
    /// Start an engine on the real file system.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(options: HostsOptions) -> HostsResult<Self> {
        Self::with_fs(options, RealFs)
    }

    /// Start an engine over a caller-supplied file system.
    pub fn with_fs(options: HostsOptions, fs: impl HostsFs + 'static) -> HostsResult<Self> {
        options.validate()?;

        let events = EventChannel::new(EVENT_CAPACITY);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (step_tx, step_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            debounce: Duration::from_millis(options.debounce_ms),
            options,
            fs: Arc::new(fs),
            queue: MutationQueue::new(),
            snapshot: FileSnapshot::new(),
            events: events.clone(),
            state: ScheduleState::Idle,
            commands: command_rx,
            steps: step_rx,
            step_tx,
            success_waiters: Vec::new(),
            cycle_flush: Vec::new(),
            pending_flush: Vec::new(),
            close_ack: None,
            commands_done: false,
        };
        tokio::spawn(worker.run());

        Ok(Self { commands, events })
    }

    /// Queue hostnames to append to `ip`'s record and arm the scheduler.
    pub fn add(&self, ip: impl Into<String>, hosts: impl Into<HostArg>) -> HostsResult<()> {
        let ip = ip.into();
        let hosts = hosts.into();
        validate_ip(&ip)?;
        validate_hosts(&hosts)?;
        self.send(Command::Add { ip, hosts })
    }

    /// Queue hostnames to strip from `ip`'s record and arm the scheduler.
    /// The single name `"*"` removes every hostname for that IP.
    pub fn remove(&self, ip: impl Into<String>, hosts: impl Into<HostArg>) -> HostsResult<()> {
        let ip = ip.into();
        let hosts = hosts.into();
        validate_ip(&ip)?;
        validate_hosts(&hosts)?;
        self.send(Command::Remove { ip, hosts })
    }

    /// Queue a hostname to strip from every record and arm the scheduler.
    pub fn remove_host(&self, host: impl Into<String>) -> HostsResult<()> {
        let host = host.into();
        validate_token("hostname", &host)?;
        self.send(Command::RemoveHost { host })
    }

    /// Discard all pending intents. Does not arm the scheduler; a cycle
    /// already owed still runs, merging an empty queue.
    pub fn clear_queue(&self) -> HostsResult<()> {
        self.send(Command::ClearQueue)
    }

    /// Subscribe to cycle lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<HostsEvent> {
        self.events.subscribe()
    }

    /// Wait for the next successful write.
    ///
    /// Resolves only on success; failed cycles are skipped over. Errors
    /// with [`HostsError::Closed`] if the engine shuts down first.
    pub async fn post_write(&self) -> HostsResult<()> {
        let (done, waiter) = oneshot::channel();
        self.send(Command::PostWrite { done })?;
        waiter.await.map_err(|_| HostsError::Closed)
    }

    /// Run a reconciliation cycle now, skipping the debounce window, and
    /// return its outcome. Waits out any cycle already in flight first.
    /// Works in no-write mode too; this is the manual override.
    pub async fn flush(&self) -> HostsResult<()> {
        let (done, waiter) = oneshot::channel();
        self.send(Command::Flush { done })?;
        waiter.await.map_err(|_| HostsError::Closed)?
    }

    /// Shut the engine down.
    ///
    /// Finishes any in-flight cycle, then stops. A pending or owed debounce
    /// window and its queued intents are discarded; `flush` first if they
    /// must land. Outstanding `post_write` waiters resolve with
    /// [`HostsError::Closed`].
    pub async fn close(self) -> HostsResult<()> {
        let (done, waiter) = oneshot::channel();
        self.send(Command::Close { done })?;
        waiter.await.map_err(|_| HostsError::Closed)
    }

    fn send(&self, command: Command) -> HostsResult<()> {
        self.commands.send(command).map_err(|_| HostsError::Closed)
    }
}

fn validate_token(what: &str, token: &str) -> HostsResult<()> {
    if token.is_empty() {
        return Err(HostsError::invalid_argument(format!(
            "{what} must not be empty"
        )));
    }
    if token.chars().any(char::is_whitespace) {
        return Err(HostsError::invalid_argument(format!(
            "{what} must not contain whitespace: {token:?}"
        )));
    }
    Ok(())
}

fn validate_ip(ip: &str) -> HostsResult<()> {
    // Syntax beyond tokenization is not checked; anything whitespace-free
    // can key a record.
    validate_token("ip", ip)
}

fn validate_hosts(hosts: &HostArg) -> HostsResult<()> {
    if let HostArg::Many(list) = hosts {
        if list.is_empty() {
            return Err(HostsError::invalid_argument("host list must not be empty"));
        }
    }
    for host in hosts.tokens() {
        validate_token("hostname", host)?;
    }
    Ok(())
}

enum Command {
    Add { ip: String, hosts: HostArg },
    Remove { ip: String, hosts: HostArg },
    RemoveHost { host: String },
    ClearQueue,
    Flush { done: oneshot::Sender<HostsResult<()>> },
    PostWrite { done: oneshot::Sender<()> },
    Close { done: oneshot::Sender<()> },
}

/// Write-scheduling state. One engine is in at most one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScheduleState {
    /// Nothing owed.
    Idle,
    /// Mutations queued; a cycle starts when the deadline passes without
    /// another mutation pushing it back.
    DebouncePending { deadline: Instant },
    /// A cycle is in flight.
    Writing,
    /// A cycle is in flight and a mutation arrived since it began; a
    /// fresh debounce window opens when it completes.
    WritingWithRearm,
}

/// Result of one spawned cycle sub-task. Steps are strictly sequential
/// within a cycle: stat, then optionally read, then write.
enum Step {
    Stat(io::Result<SystemTime>),
    Read {
        change_time: SystemTime,
        result: io::Result<String>,
    },
    Write(io::Result<()>),
}

struct Worker {
    options: HostsOptions,
    debounce: Duration,
    fs: Arc<dyn HostsFs>,
    queue: MutationQueue,
    snapshot: FileSnapshot,
    events: EventChannel,
    state: ScheduleState,
    commands: mpsc::UnboundedReceiver<Command>,
    steps: mpsc::UnboundedReceiver<Step>,
    step_tx: mpsc::UnboundedSender<Step>,
    success_waiters: Vec<oneshot::Sender<()>>,
    /// Flush waiters riding the cycle currently in flight.
    cycle_flush: Vec<oneshot::Sender<HostsResult<()>>>,
    /// Flush requests that arrived mid-cycle; they get their own cycle
    /// immediately after the current one completes.
    pending_flush: Vec<oneshot::Sender<HostsResult<()>>>,
    close_ack: Option<oneshot::Sender<()>>,
    commands_done: bool,
}

impl Worker {
    async fn run(mut self) {
        loop {
            if self.commands_done && self.settled() {
                break;
            }
            let deadline = match self.state {
                ScheduleState::DebouncePending { deadline } => deadline,
                _ => Instant::now(),
            };
            tokio::select! {
                cmd = self.commands.recv(), if !self.commands_done => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => self.commands_done = true,
                },
                Some(step) = self.steps.recv() => self.handle_step(step),
                _ = sleep_until(deadline),
                    if matches!(self.state, ScheduleState::DebouncePending { .. }) =>
                {
                    tracing::debug!("debounce window elapsed");
                    self.begin_cycle();
                }
            }
        }
        tracing::debug!("engine worker stopped");
        if let Some(ack) = self.close_ack.take() {
            let _ = ack.send(());
        }
        // Dropping the remaining success waiters resolves them as Closed.
    }

    /// Done when no cycle is in flight and none is owed. A pending
    /// debounce window blocks shutdown on the drop path so fire-and-forget
    /// mutations still land; `close` clears it first.
    fn settled(&self) -> bool {
        self.state == ScheduleState::Idle && self.pending_flush.is_empty()
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Add { ip, hosts } => {
                self.queue.add(ip, hosts);
                self.arm();
            }
            Command::Remove { ip, hosts } => {
                self.queue.remove(ip, hosts);
                self.arm();
            }
            Command::RemoveHost { host } => {
                self.queue.remove_host(host);
                self.arm();
            }
            Command::ClearQueue => self.queue.clear(),
            Command::Flush { done } => match self.state {
                ScheduleState::Idle | ScheduleState::DebouncePending { .. } => {
                    self.cycle_flush.push(done);
                    self.begin_cycle();
                }
                ScheduleState::Writing | ScheduleState::WritingWithRearm => {
                    self.pending_flush.push(done);
                }
            },
            Command::PostWrite { done } => self.success_waiters.push(done),
            Command::Close { done } => {
                self.commands.close();
                self.close_ack = Some(done);
                // Keep only the cycle already in flight; owed windows and
                // owed rearms are dropped.
                match self.state {
                    ScheduleState::DebouncePending { .. } => {
                        self.state = ScheduleState::Idle;
                    }
                    ScheduleState::WritingWithRearm => {
                        self.state = ScheduleState::Writing;
                    }
                    ScheduleState::Idle | ScheduleState::Writing => {}
                }
            }
        }
    }

    /// Trailing-edge debounce: every mutation in the window pushes the
    /// deadline back. Mutations during a cycle owe a fresh window instead.
    /// In no-write mode, and once close has been requested, mutations
    /// never change the schedule.
    fn arm(&mut self) {
        if self.options.no_writes || self.close_ack.is_some() {
            return;
        }
        match self.state {
            ScheduleState::Idle | ScheduleState::DebouncePending { .. } => {
                self.state = ScheduleState::DebouncePending {
                    deadline: Instant::now() + self.debounce,
                };
            }
            ScheduleState::Writing => self.state = ScheduleState::WritingWithRearm,
            ScheduleState::WritingWithRearm => {}
        }
    }

    fn begin_cycle(&mut self) {
        self.state = ScheduleState::Writing;
        self.events.send(HostsEvent::WriteStarted);
        tracing::debug!("reconciliation cycle started");

        let fs = Arc::clone(&self.fs);
        let path = self.options.hosts_file.clone();
        let tx = self.step_tx.clone();
        tokio::spawn(async move {
            let result = fs.change_time(&path).await;
            let _ = tx.send(Step::Stat(result));
        });
    }

    fn handle_step(&mut self, step: Step) {
        match step {
            Step::Stat(Ok(change_time)) => {
                if self.snapshot.should_reread(change_time) {
                    tracing::debug!("file changed since last read, rereading");
                    self.spawn_read(change_time);
                } else {
                    tracing::debug!("file unchanged, merging against cached text");
                    let text = self.snapshot.text().unwrap_or_default().to_string();
                    self.merge_and_write(&text);
                }
            }
            Step::Stat(Err(err)) => {
                self.finish_cycle(Err(HostsError::io(
                    FileOp::Stat,
                    &self.options.hosts_file,
                    &err,
                )));
            }
            Step::Read {
                change_time,
                result: Ok(text),
            } => {
                self.snapshot.store(text.clone(), change_time);
                self.merge_and_write(&text);
            }
            Step::Read {
                result: Err(err), ..
            } => {
                // Snapshot untouched: text and change time only move together.
                self.finish_cycle(Err(HostsError::io(
                    FileOp::Read,
                    &self.options.hosts_file,
                    &err,
                )));
            }
            Step::Write(Ok(())) => self.finish_cycle(Ok(())),
            Step::Write(Err(err)) => {
                self.finish_cycle(Err(HostsError::io(
                    FileOp::Write,
                    &self.options.hosts_file,
                    &err,
                )));
            }
        }
    }

    fn spawn_read(&self, change_time: SystemTime) {
        let fs = Arc::clone(&self.fs);
        let path = self.options.hosts_file.clone();
        let tx = self.step_tx.clone();
        tokio::spawn(async move {
            let result = fs.read_to_string(&path).await;
            let _ = tx.send(Step::Read {
                change_time,
                result,
            });
        });
    }

    /// Merge the queue into `text` and hand the result to the write
    /// primitive. The queue is drained here; mutations arriving while the
    /// write is in flight belong to the next cycle.
    fn merge_and_write(&mut self, text: &str) {
        let body = merge::reconcile(text, &mut self.queue, self.options.eol);

        let fs = Arc::clone(&self.fs);
        let path = self.options.hosts_file.clone();
        let atomic = self.options.atomic_writes;
        let tx = self.step_tx.clone();
        tokio::spawn(async move {
            let result = if atomic {
                fs.write_atomic(&path, &body).await
            } else {
                fs.write(&path, &body).await
            };
            let _ = tx.send(Step::Write(result));
        });
    }

    fn finish_cycle(&mut self, outcome: HostsResult<()>) {
        match &outcome {
            Ok(()) => {
                tracing::debug!("reconciliation cycle succeeded");
                self.events.send(HostsEvent::WriteSucceeded);
                for waiter in self.success_waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
            Err(error) => {
                // Fatal for this cycle only. Intents still queued are
                // picked up by the next one.
                tracing::warn!("reconciliation cycle failed: {error}");
                self.events.send(HostsEvent::WriteFailed {
                    error: error.clone(),
                });
            }
        }
        for waiter in self.cycle_flush.drain(..) {
            let _ = waiter.send(outcome.clone());
        }

        let rearm = self.state == ScheduleState::WritingWithRearm;
        self.state = ScheduleState::Idle;

        if !self.pending_flush.is_empty() {
            // Flush outranks the debounce: the owed cycle starts now and
            // carries the waiters (and any rearm-pending mutations).
            self.cycle_flush = std::mem::take(&mut self.pending_flush);
            self.begin_cycle();
        } else if rearm {
            self.state = ScheduleState::DebouncePending {
                deadline: Instant::now() + self.debounce,
            };
        }
    }
}

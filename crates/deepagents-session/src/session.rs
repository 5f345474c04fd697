//! Thread session: optimistic sends reconciled against the runtime's
//! checkpointed thread state.

use std::{collections::BTreeSet, sync::Arc};

use deepagents_core::{
    AgentRuntime, Checkpoint, EventStore, FileMap, Message, RunConfig, RunInput, RuntimeError,
    SessionEvent, SessionPhase, StateDelta, StreamEvent, SubmittedRun, ThreadId, ThreadValues,
    TodoItem, thread::merge_files,
};
use futures::{StreamExt, stream::BoxStream};
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle};

/// Session error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("A run is already in flight")]
    Busy,
    #[error("Send was cancelled")]
    Cancelled,
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub thread_id: Option<ThreadId>,
    pub phase: SessionPhase,
    pub messages: Vec<Message>,
    pub todos: Vec<TodoItem>,
    pub files: FileMap,
    pub failed_messages: Vec<String>,
}

/// Local guess applied before the runtime confirmed a send.
struct Optimistic {
    message_id: String,
    previous_files: FileMap,
}

struct ActiveRun {
    thread_id: Option<ThreadId>,
    run_id: Option<String>,
    optimistic: Option<Optimistic>,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SessionState {
    thread_id: Option<ThreadId>,
    phase: SessionPhase,
    values: ThreadValues,
    failed_messages: BTreeSet<String>,
    run: Option<ActiveRun>,
    /// Bumped by every operation that supersedes in-flight work.
    generation: u64,
    /// Generation of a send that `stop()` interrupted before it streamed.
    stopped_send: Option<u64>,
}

struct Inner<R> {
    runtime: Arc<R>,
    user_id: Option<String>,
    state: Mutex<SessionState>,
    events: EventStore,
}

/// Client-side session of one conversation thread.
///
/// Sends are applied optimistically and then reconciled against the
/// events streamed by the runtime. Cheap to clone; clones share state.
pub struct ThreadSession<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for ThreadSession<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> ThreadSession<R>
where
    R: AgentRuntime + 'static,
{
    /// Create a session, optionally bound to an existing thread.
    ///
    /// Call [`Self::load_thread`] to pull an existing thread's values.
    #[must_use]
    pub fn new(runtime: Arc<R>, user_id: Option<String>, thread_id: Option<ThreadId>) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                user_id,
                state: Mutex::new(SessionState {
                    thread_id,
                    ..SessionState::default()
                }),
                events: EventStore::new(),
            }),
        }
    }

    /// Session events: history first, then live.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, SessionEvent> {
        self.inner.events.history_plus_stream()
    }

    pub async fn snapshot(&self) -> SessionView {
        let state = self.inner.state.lock().await;
        SessionView {
            thread_id: state.thread_id.clone(),
            phase: state.phase,
            messages: state.values.messages.clone(),
            todos: state.values.todos.clone(),
            files: state.values.files.clone(),
            failed_messages: state.failed_messages.iter().cloned().collect(),
        }
    }

    /// Send a user message, optionally attaching the client's files.
    ///
    /// Returns the optimistic message once the runtime accepted the run;
    /// the run's events are merged in the background.
    ///
    /// # Errors
    /// Returns `Busy` if a run is in flight, `Cancelled` if the send was
    /// superseded while in flight, or the runtime's submission error.
    pub async fn send_message(
        &self,
        content: impl Into<String>,
        files: Option<FileMap>,
    ) -> Result<Message, SessionError> {
        let message = Message::human(content);

        let (generation, thread_id, fetch_checkpoint) = {
            let mut state = self.inner.state.lock().await;
            if state.phase.is_busy() {
                return Err(SessionError::Busy);
            }
            state.generation += 1;
            let fetch = state.thread_id.is_some() && self.inner.runtime.is_authenticated();
            let phase = if fetch {
                SessionPhase::AwaitingCheckpoint
            } else {
                SessionPhase::Submitting
            };
            self.set_phase(&mut state, phase);
            state.run = Some(ActiveRun {
                thread_id: state.thread_id.clone(),
                run_id: None,
                optimistic: None,
                task: None,
            });
            (state.generation, state.thread_id.clone(), fetch)
        };

        let checkpoint = match &thread_id {
            Some(id) if fetch_checkpoint => self.latest_checkpoint(id).await,
            _ => None,
        };

        let mut config = RunConfig::new(self.inner.user_id.clone());
        if let Some(checkpoint) = &checkpoint {
            config = config.anchored(checkpoint);
        }
        let input = RunInput::new(message.clone(), files.clone());

        let previous_files = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            if state.generation != generation {
                return Err(SessionError::Cancelled);
            }
            self.set_phase(state, SessionPhase::Submitting);

            let before = state.values.clone();
            state.values.messages.push(message.clone());
            if let Some(files) = &files {
                merge_files(&mut state.values.files, files);
            }
            if let Some(run) = state.run.as_mut() {
                run.optimistic = Some(Optimistic {
                    message_id: message.id.clone(),
                    previous_files: before.files.clone(),
                });
            }
            self.publish_changes(&before, &state.values);
            before.files
        };

        let submitted = self
            .inner
            .runtime
            .submit(thread_id.as_ref(), &input, &config)
            .await;

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        if state.generation != generation {
            let optimistic = Optimistic {
                message_id: message.id.clone(),
                previous_files,
            };
            self.settle_superseded(state, generation, optimistic, submitted);
            return Err(SessionError::Cancelled);
        }

        match submitted {
            Ok(SubmittedRun { thread_id, events }) => {
                if state.thread_id.as_ref() != Some(&thread_id) {
                    tracing::info!(%thread_id, "thread created");
                    state.thread_id = Some(thread_id.clone());
                    self.inner.events.push(SessionEvent::ThreadChanged {
                        thread_id: Some(thread_id.clone()),
                    });
                }
                self.set_phase(state, SessionPhase::Streaming);
                let task = tokio::spawn(self.clone().drive(generation, events));
                if let Some(run) = state.run.as_mut() {
                    run.thread_id = Some(thread_id);
                    run.task = Some(task);
                }
                Ok(message)
            }
            Err(e) => {
                tracing::error!("Failed to submit message: {e}");
                self.fail_run(state, &e.to_string(), e.is_rejection());
                Err(e.into())
            }
        }
    }

    /// Cancel the in-flight run. No-op when nothing is in flight.
    ///
    /// The local stream is dropped at once; the remote cancel request is
    /// sent in the background. A send stopped before its run streamed
    /// returns `Cancelled`.
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        if !state.phase.is_busy() {
            return;
        }
        if state.phase != SessionPhase::Streaming {
            state.stopped_send = Some(state.generation);
        }
        state.generation += 1;
        self.abort_run(&mut state);
        self.set_phase(&mut state, SessionPhase::Stopped);
    }

    /// Switch to another thread and pull its values from the runtime.
    ///
    /// Fetch failures are logged and leave an empty view.
    ///
    /// # Errors
    /// Returns `Busy` if a run is in flight.
    pub async fn load_thread(&self, thread_id: ThreadId) -> Result<(), SessionError> {
        let generation = {
            let mut state = self.inner.state.lock().await;
            if state.phase.is_busy() {
                return Err(SessionError::Busy);
            }
            state.generation += 1;
            if state.thread_id.as_ref() != Some(&thread_id) {
                state.thread_id = Some(thread_id.clone());
                self.inner.events.push(SessionEvent::ThreadChanged {
                    thread_id: Some(thread_id.clone()),
                });
            }
            state.generation
        };

        let values = if self.inner.runtime.is_authenticated() {
            match self.inner.runtime.get_state(&thread_id).await {
                Ok(snapshot) => snapshot.values,
                Err(e) => {
                    tracing::error!(%thread_id, "Failed to fetch thread state: {e}");
                    ThreadValues::default()
                }
            }
        } else {
            ThreadValues::default()
        };

        let mut state = self.inner.state.lock().await;
        if state.generation != generation {
            return Ok(());
        }
        let before = std::mem::replace(&mut state.values, values);
        state.failed_messages.clear();
        self.publish_changes(&before, &state.values);
        self.set_phase(&mut state, SessionPhase::Idle);
        Ok(())
    }

    /// Forget the current thread. The next send creates a new one.
    pub async fn new_thread(&self) {
        let mut state = self.inner.state.lock().await;
        state.generation += 1;
        self.abort_run(&mut state);
        state.failed_messages.clear();

        let before = std::mem::take(&mut state.values);
        self.publish_changes(&before, &state.values);
        if state.thread_id.take().is_some() {
            self.inner
                .events
                .push(SessionEvent::ThreadChanged { thread_id: None });
        }
        self.set_phase(&mut state, SessionPhase::Idle);
    }

    /// Save one file locally and sync it into the thread state.
    ///
    /// The local write is visible at once. Without a thread or a
    /// credential the file stays local.
    ///
    /// # Errors
    /// Returns the runtime error after restoring the previous content.
    pub async fn save_file(
        &self,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), SessionError> {
        let (path, content) = (path.into(), content.into());

        let (thread_id, previous) = {
            let mut state = self.inner.state.lock().await;
            let previous = state.values.files.insert(path.clone(), content.clone());
            self.push_files(&state.values);
            (state.thread_id.clone(), previous)
        };

        let Some(thread_id) = thread_id.filter(|_| self.inner.runtime.is_authenticated()) else {
            return Ok(());
        };

        let delta = StateDelta::files(FileMap::from([(path.clone(), content.clone())]));
        match self.inner.runtime.update_state(&thread_id, &delta).await {
            Ok(checkpoint) => {
                tracing::info!(
                    %path,
                    checkpoint = ?checkpoint.map(|c| c.checkpoint_id),
                    "file synced to agent state"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(%path, "Failed to sync file to thread state: {e}");
                let mut state = self.inner.state.lock().await;
                if state.values.files.get(&path) == Some(&content) {
                    match previous {
                        Some(old) => state.values.files.insert(path, old),
                        None => state.values.files.remove(&path),
                    };
                    self.push_files(&state.values);
                }
                Err(e.into())
            }
        }
    }

    async fn latest_checkpoint(&self, thread_id: &ThreadId) -> Option<Checkpoint> {
        match self.inner.runtime.get_state(thread_id).await {
            Ok(snapshot) => {
                tracing::debug!(
                    checkpoint = ?snapshot.checkpoint.as_ref().map(|c| &c.checkpoint_id),
                    "latest checkpoint before message"
                );
                snapshot.checkpoint
            }
            Err(e) => {
                tracing::warn!(%thread_id, "Could not get latest checkpoint: {e}");
                None
            }
        }
    }

    /// Merge a run's events until it ends, fails or is superseded.
    async fn drive(
        self,
        generation: u64,
        mut events: BoxStream<'static, Result<StreamEvent, RuntimeError>>,
    ) {
        while let Some(next) = events.next().await {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            if state.generation != generation {
                return;
            }
            match next {
                Ok(StreamEvent::Metadata { run_id }) => {
                    tracing::debug!(%run_id, "run started");
                    if let Some(run) = state.run.as_mut() {
                        run.run_id = Some(run_id);
                    }
                }
                Ok(StreamEvent::Values(values)) => {
                    self.merge(state, |v| v.apply_snapshot(&values));
                    state.failed_messages.clear();
                }
                Ok(StreamEvent::Updates(updates)) => {
                    for delta in updates.values() {
                        self.merge(state, |v| v.apply_delta(delta));
                    }
                }
                Ok(StreamEvent::Error { message }) => {
                    tracing::error!("Run failed: {message}");
                    self.fail_run(state, &message, false);
                    return;
                }
                Ok(StreamEvent::End) => break,
                Err(e) => {
                    tracing::error!("Run stream failed: {e}");
                    self.fail_run(state, &e.to_string(), false);
                    return;
                }
            }
        }

        let mut state = self.inner.state.lock().await;
        if state.generation == generation {
            state.run = None;
            self.set_phase(&mut state, SessionPhase::Idle);
        }
    }

    /// Apply authoritative data and confirm the optimistic message once
    /// the runtime reports it.
    fn merge(&self, state: &mut SessionState, apply: impl FnOnce(&mut ThreadValues)) {
        let before = state.values.clone();
        apply(&mut state.values);
        self.publish_changes(&before, &state.values);

        if let Some(run) = state.run.as_mut() {
            let confirmed = run.optimistic.as_ref().is_some_and(|o| {
                state
                    .values
                    .messages
                    .iter()
                    .any(|m| m.id == o.message_id)
            });
            if confirmed {
                run.optimistic = None;
            }
        }
    }

    /// Settle a failed run.
    ///
    /// A confirmed rejection rolls the optimistic update back; any other
    /// failure keeps the message and marks it failed.
    fn fail_run(&self, state: &mut SessionState, error: &str, rejected: bool) {
        let optimistic = state.run.take().and_then(|run| run.optimistic);
        let (message_id, rolled_back) = match optimistic {
            Some(o) => (Some(o.message_id.clone()), self.settle_optimistic(state, o, rejected)),
            None => (None, false),
        };

        self.set_phase(state, SessionPhase::Idle);
        self.inner.events.push(SessionEvent::RunFailed {
            error: error.to_string(),
            message_id,
            rolled_back,
        });
    }

    /// Returns whether the optimistic update was rolled back.
    fn settle_optimistic(&self, state: &mut SessionState, o: Optimistic, rejected: bool) -> bool {
        if rejected {
            let before = state.values.clone();
            state.values.messages.retain(|m| m.id != o.message_id);
            state.values.files = o.previous_files;
            self.publish_changes(&before, &state.values);
            true
        } else {
            state.failed_messages.insert(o.message_id);
            false
        }
    }

    /// Settle a submission that returned after its send was superseded.
    ///
    /// An accepted run is always cancelled remotely. When only `stop()`
    /// intervened, the thread the runtime created is adopted and the
    /// optimistic message is settled like a failed run, leaving the
    /// phase at `Stopped`.
    fn settle_superseded(
        &self,
        state: &mut SessionState,
        generation: u64,
        optimistic: Optimistic,
        submitted: Result<SubmittedRun, RuntimeError>,
    ) {
        let stopped_only =
            state.stopped_send == Some(generation) && state.generation == generation + 1;

        let (error, rejected) = match submitted {
            Ok(run) => {
                tracing::info!(thread_id = %run.thread_id, "cancelling run accepted after stop");
                if stopped_only && state.thread_id.as_ref() != Some(&run.thread_id) {
                    state.thread_id = Some(run.thread_id.clone());
                    self.inner.events.push(SessionEvent::ThreadChanged {
                        thread_id: Some(run.thread_id.clone()),
                    });
                }
                self.cancel_when_started(run);
                ("Run stopped before it started".to_string(), false)
            }
            Err(e) => (e.to_string(), e.is_rejection()),
        };

        if !stopped_only {
            return;
        }
        let message_id = optimistic.message_id.clone();
        let rolled_back = self.settle_optimistic(state, optimistic, rejected);
        self.inner.events.push(SessionEvent::RunFailed {
            error,
            message_id: Some(message_id),
            rolled_back,
        });
    }

    /// Read an orphaned run's stream until its id is known, then cancel it.
    fn cancel_when_started(&self, run: SubmittedRun) {
        let runtime = Arc::clone(&self.inner.runtime);
        let SubmittedRun {
            thread_id,
            mut events,
        } = run;
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    Ok(StreamEvent::Metadata { run_id }) => {
                        cancel_run(runtime.as_ref(), &thread_id, &run_id).await;
                        return;
                    }
                    Ok(StreamEvent::End | StreamEvent::Error { .. }) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        });
    }

    fn abort_run(&self, state: &mut SessionState) {
        let Some(run) = state.run.take() else {
            return;
        };
        if let Some(task) = run.task {
            task.abort();
        }
        if let (Some(thread_id), Some(run_id)) = (run.thread_id, run.run_id) {
            let runtime = Arc::clone(&self.inner.runtime);
            tokio::spawn(async move {
                cancel_run(runtime.as_ref(), &thread_id, &run_id).await;
            });
        }
    }

    fn set_phase(&self, state: &mut SessionState, phase: SessionPhase) {
        if state.phase != phase {
            state.phase = phase;
            self.inner.events.push(SessionEvent::Phase { phase });
        }
    }

    fn push_files(&self, values: &ThreadValues) {
        self.inner.events.push(SessionEvent::Files {
            files: values.files.clone(),
        });
    }

    fn publish_changes(&self, before: &ThreadValues, after: &ThreadValues) {
        if before.messages != after.messages {
            self.inner.events.push(SessionEvent::Messages {
                messages: after.messages.clone(),
            });
        }
        if before.todos != after.todos {
            self.inner.events.push(SessionEvent::Todos {
                todos: after.todos.clone(),
            });
        }
        if before.files != after.files {
            self.push_files(after);
        }
    }
}

async fn cancel_run<R: AgentRuntime + ?Sized>(runtime: &R, thread_id: &ThreadId, run_id: &str) {
    if let Err(e) = runtime.cancel(thread_id, run_id).await {
        tracing::warn!(%thread_id, %run_id, "Failed to cancel run: {e}");
    }
}

//! Runner module - remote function invocations.
//!
//! A [`Runner`] is one `run_task` request bound to a [`RunnerKind`]: a plain
//! function call (thread id 0) or a call inside a started [`Thread`]. It is
//! spawned immediately and awaited like a future. A runner only ever
//! resolves to the function's result, a [`BasError::Function`] reported by
//! the script, or a [`BasError::RunnerFatal`] when the transport failed.

mod thread;

pub use thread::Thread;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::client::Session;
use crate::error::{BasError, Result};
use crate::protocol::{kind, Response};

/// What a runner executes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    /// Ad-hoc function call outside any thread.
    Function,
    /// Call inside a started remote thread.
    Thread {
        /// Remote thread id.
        thread_id: u32,
    },
}

impl RunnerKind {
    /// Thread id sent with the call; 0 for ad-hoc calls.
    pub fn thread_id(&self) -> u32 {
        match self {
            RunnerKind::Function => 0,
            RunnerKind::Thread { thread_id } => *thread_id,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RunnerKind::Function => "function",
            RunnerKind::Thread { .. } => "thread",
        }
    }
}

/// Progress of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Spawned, request not written yet.
    Created,
    /// Request written, waiting for the reply.
    Running,
    /// Resolved with a result.
    Completed,
    /// Resolved with an error.
    Failed,
}

impl RunnerState {
    /// Check if the runner has resolved.
    pub fn is_done(&self) -> bool {
        matches!(self, RunnerState::Completed | RunnerState::Failed)
    }
}

/// An in-flight remote function call.
///
/// Await it for the result. Dropping it does not cancel the call.
#[derive(Debug)]
pub struct Runner {
    kind: RunnerKind,
    function: String,
    state: watch::Receiver<RunnerState>,
    task: JoinHandle<Result<Value>>,
}

impl Runner {
    /// Spawn the call. The task holds the session weakly.
    pub(crate) fn spawn(
        session: &Arc<Session>,
        kind: RunnerKind,
        name: &str,
        params: Value,
    ) -> Self {
        let (state_tx, state) = watch::channel(RunnerState::Created);
        let span = tracing::info_span!(
            "runner",
            kind = kind.label(),
            function = %name,
            thread_id = kind.thread_id()
        );

        let task = tokio::spawn(
            run(
                Arc::downgrade(session),
                kind,
                name.to_string(),
                params,
                state_tx,
            )
            .instrument(span),
        );

        Self {
            kind,
            function: name.to_string(),
            state,
            task,
        }
    }

    /// What this runner executes in.
    pub fn kind(&self) -> RunnerKind {
        self.kind
    }

    /// Thread id sent with the call.
    pub fn thread_id(&self) -> u32 {
        self.kind.thread_id()
    }

    /// Name of the remote function.
    pub fn function_name(&self) -> &str {
        &self.function
    }

    /// Current progress.
    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }

    /// Watch progress; used by [`Thread`] to detect a busy thread.
    pub(crate) fn watch_state(&self) -> watch::Receiver<RunnerState> {
        self.state.clone()
    }
}

impl Future for Runner {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(e)) => Poll::Ready(Err(BasError::RunnerFatal(e.to_string()))),
        }
    }
}

async fn run(
    session: Weak<Session>,
    kind: RunnerKind,
    function: String,
    params: Value,
    state: watch::Sender<RunnerState>,
) -> Result<Value> {
    let outcome = call(&session, kind, &function, params, &state).await;

    match &outcome {
        Ok(_) => {
            tracing::debug!("completed");
            state.send_replace(RunnerState::Completed);
        }
        Err(e) => {
            tracing::warn!("failed: {}", e);
            state.send_replace(RunnerState::Failed);
        }
    }
    outcome
}

async fn call(
    session: &Weak<Session>,
    kind: RunnerKind,
    function: &str,
    params: Value,
    state: &watch::Sender<RunnerState>,
) -> Result<Value> {
    let params = if params.is_null() { json!({}) } else { params };
    let data = json!({
        "params": serde_json::to_string(&params).map_err(runner_fatal)?,
        "function_name": function,
        "thread_id": kind.thread_id(),
    });

    let pending = {
        let session = session
            .upgrade()
            .ok_or_else(|| BasError::RunnerFatal("client dropped".to_string()))?;
        session
            .submit(kind::RUN_TASK, data)
            .await
            .map_err(runner_fatal)?
    };
    state.send_replace(RunnerState::Running);

    let payload = pending.wait().await.map_err(runner_fatal)?;
    let response = Response::from_payload(payload)
        .map_err(|e| BasError::RunnerFatal(format!("malformed run_task reply: {}", e)))?;

    if response.success {
        Ok(response.result)
    } else {
        Err(BasError::Function(response.message))
    }
}

fn runner_fatal<E: std::fmt::Display>(error: E) -> BasError {
    BasError::RunnerFatal(error.to_string())
}

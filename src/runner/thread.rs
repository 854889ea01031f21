//! Remote thread handle.

use std::sync::Weak;

use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::watch;

use super::{Runner, RunnerKind, RunnerState};
use crate::client::Session;
use crate::error::{BasError, Result};
use crate::protocol::kind;

/// Range thread ids are drawn from.
const THREAD_ID_RANGE: std::ops::RangeInclusive<u32> = 1..=1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Started(u32),
    Stopped,
}

/// A remote thread running one function at a time.
///
/// ```text
/// Created ──start()──► Started(id) ──stop()──► Stopped
/// ```
pub struct Thread {
    session: Weak<Session>,
    state: State,
    current: Option<watch::Receiver<RunnerState>>,
}

impl Thread {
    pub(crate) fn new(session: Weak<Session>) -> Self {
        Self {
            session,
            state: State::Created,
            current: None,
        }
    }

    /// Remote thread id, 0 until started.
    pub fn id(&self) -> u32 {
        match self.state {
            State::Started(id) => id,
            _ => 0,
        }
    }

    /// Check if the thread is started and not stopped.
    pub fn is_started(&self) -> bool {
        matches!(self.state, State::Started(_))
    }

    /// Check if a function is still running in this thread.
    pub fn is_running(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|state| !state.borrow().is_done())
    }

    fn session(&self) -> Result<std::sync::Arc<Session>> {
        let session = self.session.upgrade().ok_or(BasError::ClientClosed)?;
        session.ensure_started()?;
        Ok(session)
    }

    fn started_id(&self) -> Result<u32> {
        match self.state {
            State::Created => Err(BasError::ThreadNotStarted),
            State::Started(id) => Ok(id),
            State::Stopped => Err(BasError::ThreadStopped),
        }
    }

    /// Start the remote thread under a fresh random id.
    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            State::Created => {}
            State::Started(_) => return Err(BasError::ThreadAlreadyStarted),
            State::Stopped => return Err(BasError::ThreadStopped),
        }

        let session = self.session()?;
        let id = rand::rng().random_range(THREAD_ID_RANGE);

        session
            .post(kind::START_THREAD, json!({ "thread_id": id }))
            .await?;

        tracing::debug!("thread {} started", id);
        self.state = State::Started(id);
        Ok(())
    }

    /// Run a function in this thread.
    ///
    /// # Errors
    ///
    /// - [`BasError::ThreadNotStarted`] before `start()`
    /// - [`BasError::ThreadStopped`] after `stop()`
    /// - [`BasError::AlreadyRunning`] while the previous function is running
    pub fn run_function(&mut self, name: &str, params: Value) -> Result<Runner> {
        let id = self.started_id()?;
        if self.is_running() {
            return Err(BasError::AlreadyRunning);
        }

        let session = self.session()?;
        let runner = Runner::spawn(&session, RunnerKind::Thread { thread_id: id }, name, params);
        self.current = Some(runner.watch_state());
        Ok(runner)
    }

    /// Stop the remote thread. The handle cannot be restarted.
    pub async fn stop(&mut self) -> Result<()> {
        let id = self.started_id()?;
        self.state = State::Stopped;

        let session = self.session()?;
        session
            .post(kind::STOP_THREAD, json!({ "thread_id": id }))
            .await?;

        tracing::debug!("thread {} stopped", id);
        Ok(())
    }
}

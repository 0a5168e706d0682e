//! Cycle sequencer
//!
//! Holds sessions in memory and advances them one stage per call.
//!
//! Each session sits behind two locks. The gate is held for a whole
//! [`CycleSequencer::execute_next_stage`] call, so steps for one session never
//! overlap. The session lock is only held for bookkeeping and never across a
//! handler await, so readers and [`CycleSequencer::end_session`] are not
//! blocked by a slow stage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::cycle::config::{AgentConfig, CycleConfig, StoreConfig};
use crate::cycle::error::SequencerError;
use crate::cycle::handler::{StageHandler, StageHandlers};
use crate::cycle::session::{Session, SessionStatus, Step};
use crate::cycle::stage::Stage;
use crate::cycle::state::CycleState;

struct SessionSlot {
    gate: Mutex<()>,
    session: Mutex<Session>,
}

/// Drives sessions through the stage cycle
#[derive(Default)]
pub struct CycleSequencer {
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
    store: StoreConfig,
}

impl CycleSequencer {
    /// Create a sequencer that keeps sessions until they are disposed
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sequencer with the given store settings
    #[must_use]
    pub fn with_store_config(store: StoreConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Register a new pending session and return its id.
    ///
    /// Expired sessions are evicted first when a TTL is configured.
    pub async fn start_cycle(
        &self,
        agent: &AgentConfig,
        config: CycleConfig,
        initial_input: Value,
    ) -> String {
        self.evict_expired().await;

        let session = Session::new(agent, config, initial_input);
        let id = session.id.clone();
        let slot = Arc::new(SessionSlot {
            gate: Mutex::new(()),
            session: Mutex::new(session),
        });
        self.sessions.write().await.insert(id.clone(), slot);
        id
    }

    /// Run the next stage of a session.
    ///
    /// Returns `Ok(None)` when the session has ended, is paused, or has just
    /// reached its iteration cap. Handler failures are recorded on the
    /// returned step rather than surfaced as errors.
    pub async fn execute_next_stage(
        &self,
        session_id: &str,
        handlers: &StageHandlers,
    ) -> Result<Option<Step>, SequencerError> {
        let slot = self.slot(session_id).await?;
        let _gate = slot.gate.lock().await;

        let (stage, input, handler, timeout) = {
            let mut session = slot.session.lock().await;
            if session.status.is_terminal() || session.status == SessionStatus::Paused {
                return Ok(None);
            }

            let stage = match session.state {
                CycleState::Ready { next } => next,
                CycleState::Retrying { stage, .. } => stage,
                CycleState::Exhausted => {
                    session.finish(SessionStatus::Completed);
                    return Ok(None);
                }
                CycleState::Failed { .. } => {
                    session.finish(SessionStatus::Failed);
                    return Ok(None);
                }
            };

            let handler = handlers
                .get(stage)
                .ok_or(SequencerError::HandlerNotFound(stage))?;
            let input = session.stage_input(stage);
            session.begin_step(stage, input.clone());
            let timeout = Duration::from_millis(session.config.timeout_per_stage_ms);
            (stage, input, handler, timeout)
        };

        let outcome = run_handler(handler.as_ref(), stage, input, timeout).await;

        let mut session = slot.session.lock().await;
        Ok(session.record_outcome(outcome))
    }

    /// Snapshot of a session
    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        let slot = self.slot(session_id).await.ok()?;
        let session = slot.session.lock().await;
        Some(session.clone())
    }

    /// Force a session to `Completed`, storing an optional final result.
    ///
    /// A handler already in flight is not interrupted; its step still records
    /// the outcome but the session stays completed.
    pub async fn end_session(
        &self,
        session_id: &str,
        final_result: Option<Value>,
    ) -> Result<(), SequencerError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.session.lock().await;
        session.finish(SessionStatus::Completed);
        session.final_result = final_result;
        Ok(())
    }

    /// Suspend a session. Later `execute_next_stage` calls do nothing until it
    /// is resumed.
    pub async fn pause_session(&self, session_id: &str) -> Result<(), SequencerError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.session.lock().await;
        if session.status.is_terminal() {
            return Err(SequencerError::SessionTerminal(session_id.to_string()));
        }
        session.status = SessionStatus::Paused;
        Ok(())
    }

    /// Resume a paused session where it left off
    pub async fn resume_session(&self, session_id: &str) -> Result<(), SequencerError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.session.lock().await;
        if session.status.is_terminal() {
            return Err(SequencerError::SessionTerminal(session_id.to_string()));
        }
        if session.status == SessionStatus::Paused {
            session.status = if session.steps.is_empty() {
                SessionStatus::Pending
            } else {
                SessionStatus::Running
            };
        }
        Ok(())
    }

    /// Remove a session from the store, returning its final state
    pub async fn dispose(&self, session_id: &str) -> Option<Session> {
        let slot = self.sessions.write().await.remove(session_id)?;
        let session = slot.session.lock().await;
        Some(session.clone())
    }

    /// Drop ended sessions older than the configured TTL.
    ///
    /// Returns the number of sessions evicted. Without a TTL, or with one too
    /// large to represent, nothing is evicted.
    pub async fn evict_expired(&self) -> usize {
        let Some(ttl) = self
            .store
            .session_ttl_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds)
        else {
            return 0;
        };
        let now = Utc::now();

        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        for (id, slot) in sessions.iter() {
            // A locked session is mid-update and therefore not expired
            let Ok(session) = slot.session.try_lock() else {
                continue;
            };
            if !session.status.is_terminal() {
                continue;
            }
            if let Some(end) = session.end_time {
                if now.signed_duration_since(end) >= ttl {
                    expired.push(id.clone());
                }
            }
        }

        for id in &expired {
            sessions.remove(id);
        }
        expired.len()
    }

    /// Ids of all stored sessions
    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Number of stored sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn slot(&self, session_id: &str) -> Result<Arc<SessionSlot>, SequencerError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SequencerError::SessionNotFound(session_id.to_string()))
    }
}

/// Invoke a handler under the stage timeout, flattening errors to messages
async fn run_handler(
    handler: &dyn StageHandler,
    stage: Stage,
    input: Value,
    timeout: Duration,
) -> Result<Value, String> {
    match tokio::time::timeout(timeout, handler.handle(stage, input)).await {
        Ok(Ok(data)) => Ok(data),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(_) => Err(format!(
            "Stage '{stage}' timed out after {}ms",
            timeout.as_millis()
        )),
    }
}

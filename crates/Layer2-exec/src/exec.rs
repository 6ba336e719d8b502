//! Exec - one task's lifecycle
//!
//! An [`Exec`] is shared by everyone who asked for its id. Its state is
//! published on a watch channel; the terminal result is stored before the
//! terminal state is sent, so a waiter woken by the transition always finds
//! the result.

use crate::config::ExecConfig;
use crate::fileset::ExecResult;
use crate::layout::{ContainerRecord, ExecDir};
use crate::profile::{format_bytes, Gauges, Profile, Profiler, TMP};
use crate::resources::{CPU, DISK, MEM};
use crate::state::ExecState;
use chrono::{DateTime, Utc};
use dockyard_foundation::{ContentId, Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Live or historical view of an exec
#[derive(Debug, Clone, Serialize)]
pub struct ExecInspect {
    pub id: ContentId,
    pub config: ExecConfig,
    pub state: ExecState,
    pub created: DateTime<Utc>,
    pub container: Option<ContainerRecord>,
    pub gauges: Gauges,
    pub profile: Profile,
    /// Task error once terminal
    pub error: Option<String>,
}

impl ExecInspect {
    /// One-line status report
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} {} {} [{}]",
            self.state.symbol(),
            self.id.short(),
            self.config.kind(),
            self.state
        );
        if let Some(cpu) = self.gauges.get(CPU) {
            line.push_str(&format!(", CPU {:.2}", cpu));
        }
        for name in [MEM, DISK, TMP] {
            if let Some(value) = self.gauges.get(name) {
                line.push_str(&format!(", {} {}", name, format_bytes(*value as u64)));
            }
        }
        if let Some(err) = &self.error {
            line.push_str(&format!(": {}", err));
        }
        line
    }
}

pub struct Exec {
    id: ContentId,
    config: ExecConfig,
    created: DateTime<Utc>,
    dir: ExecDir,
    state_tx: watch::Sender<ExecState>,
    result: RwLock<Option<ExecResult>>,
    container: RwLock<Option<ContainerRecord>>,
    profiler: Profiler,
    /// Child of the executor-wide token
    shutdown: CancellationToken,
    stop_reason: Mutex<Option<String>>,
}

impl Exec {
    pub(crate) fn new(
        id: ContentId,
        config: ExecConfig,
        dir: ExecDir,
        state: ExecState,
        profiler: Profiler,
        shutdown: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(state);
        Self {
            id,
            config,
            created: Utc::now(),
            dir,
            state_tx,
            result: RwLock::new(None),
            container: RwLock::new(None),
            profiler,
            shutdown,
            stop_reason: Mutex::new(None),
        }
    }

    /// Exec that is already terminal
    pub(crate) fn restored(
        id: ContentId,
        config: ExecConfig,
        dir: ExecDir,
        result: ExecResult,
        profiler: Profiler,
        shutdown: CancellationToken,
    ) -> Self {
        let state = terminal_state(&result);
        let exec = Self::new(id, config, dir, state, profiler, shutdown);
        *exec.result.write() = Some(result);
        exec
    }

    pub(crate) fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    pub fn id(&self) -> ContentId {
        self.id
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn state(&self) -> ExecState {
        *self.state_tx.borrow()
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Receiver for state transitions
    pub fn subscribe(&self) -> watch::Receiver<ExecState> {
        self.state_tx.subscribe()
    }

    /// Block until the exec is terminal.
    ///
    /// Returns `Canceled` if `cancel` fires first, or if the exec is torn
    /// down (executor shutdown or removal). Neither touches the exec.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        let mut rx = self.state_tx.subscribe();
        let terminal = async move {
            rx.wait_for(|state| state.is_terminal())
                .await
                .map(|_| ())
                .map_err(|_| Error::Internal("exec state channel closed".to_string()))
        };

        tokio::select! {
            biased;
            res = terminal => res,
            _ = cancel.cancelled() => Err(Error::Canceled("wait canceled by caller".to_string())),
            _ = self.shutdown.cancelled() => {
                let reason = self
                    .stop_reason
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "executor shut down".to_string());
                Err(Error::Canceled(reason))
            }
        }
    }

    /// Terminal result; `NotReady` before that
    pub fn result(&self) -> Result<ExecResult> {
        if !self.state().is_terminal() {
            return Err(Error::NotReady(format!("exec {} is {}", self.id.short(), self.state())));
        }
        self.result
            .read()
            .clone()
            .ok_or_else(|| Error::Internal(format!("exec {} has no result", self.id.short())))
    }

    pub fn inspect(&self) -> ExecInspect {
        let (gauges, profile) = self.profiler.snapshot();
        ExecInspect {
            id: self.id,
            config: self.config.clone(),
            state: self.state(),
            created: self.created,
            container: self.container.read().clone(),
            gauges,
            profile,
            error: self.result.read().as_ref().and_then(|r| r.err.clone()),
        }
    }

    // ========================================================================
    // Driver side
    // ========================================================================

    pub(crate) fn dir(&self) -> &ExecDir {
        &self.dir
    }

    pub(crate) fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn container(&self) -> Option<ContainerRecord> {
        self.container.read().clone()
    }

    pub(crate) fn set_container(&self, record: ContainerRecord) {
        *self.container.write() = Some(record);
    }

    /// `Created → Running`; no-op from any other state
    pub(crate) fn set_running(&self) -> bool {
        self.state_tx.send_if_modified(|state| {
            if state.can_transition_to(ExecState::Running) {
                *state = ExecState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Store the result, then publish the terminal state. Terminal execs are
    /// immutable, so a second call is ignored and returns false.
    pub(crate) fn publish(&self, result: ExecResult) -> bool {
        let state = terminal_state(&result);
        {
            let mut slot = self.result.write();
            if slot.is_some() || self.state().is_terminal() {
                return false;
            }
            *slot = Some(result);
        }
        self.state_tx.send_replace(state);
        true
    }

    /// Stop the driver and wake waiters with `reason`
    pub(crate) fn stop(&self, reason: &str) {
        self.stop_reason.lock().get_or_insert_with(|| reason.to_string());
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Exec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exec")
            .field("id", &self.id)
            .field("kind", &self.config.kind())
            .field("state", &self.state())
            .finish()
    }
}

fn terminal_state(result: &ExecResult) -> ExecState {
    if result.is_success() {
        ExecState::Complete
    } else {
        ExecState::Error
    }
}

//! Refresh cycle state machine
//!
//! One cycle = login, fetch the tank list, upsert every reading, rearm.
//! - Transient failure: retry timer (10 min)
//! - Fatal auth failure: no timer, polling halts until an external trigger
//! - Success: refresh timer (30 min)
//!
//! At most one timer is outstanding between cycles.

use crate::error::{AuthError, FetchError, LoginError};
use crate::registry::{DeviceSink, TankReading, TankRegistry, TankView};
use crate::scheduler::{Scheduler, TimerHandle, TimerKind, TokioScheduler};
use crate::session::{Session, SessionManager};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const RETRY_DELAY: Duration = Duration::from_secs(10 * 60);
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const INITIAL_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub retry_delay: Duration,
    pub refresh_interval: Duration,
    pub initial_delay: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            retry_delay: RETRY_DELAY,
            refresh_interval: REFRESH_INTERVAL,
            initial_delay: INITIAL_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    LoggingIn,
    FetchingTanks,
    RetryScheduled,
    NextCycleScheduled,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Refreshed { tanks: usize },
    RetryScheduled,
    Halted(AuthError),
}

/// `gcvt` call: the tank list for the session's client id
pub async fn fetch_tank_list(sessions: &SessionManager) -> Result<Vec<TankReading>, FetchError> {
    let Session::Authenticated { client_id, backend_url } = sessions.session() else {
        return Err(FetchError::NotAuthenticated);
    };

    let form = [("cmd", "gcvt"), ("data", client_id.as_str())];
    let body = sessions.post_form(backend_url, &form).await?;
    let readings: Vec<TankReading> = serde_json::from_str(&body)?;

    debug!("gcvt returned {} tanks", readings.len());
    Ok(readings)
}

pub struct Poller<S, D> {
    sessions: SessionManager,
    registry: TankRegistry<D>,
    scheduler: S,
    settings: PollSettings,
    state: CycleState,
    pending: Option<TimerHandle>,
}

impl<S: Scheduler, D: DeviceSink> Poller<S, D> {
    pub fn new(sessions: SessionManager, registry: TankRegistry<D>, scheduler: S, settings: PollSettings) -> Self {
        Self {
            sessions,
            registry,
            scheduler,
            settings,
            state: CycleState::Idle,
            pending: None,
        }
    }

    /// Arm the first cycle
    pub fn start(&mut self) -> TimerHandle {
        self.arm(self.settings.initial_delay, TimerKind::Initial)
    }

    pub async fn run_cycle(&mut self) -> CycleOutcome {
        // Fired timers are already gone; an early trigger must not leave a second one behind
        if let Some(handle) = self.pending.take() {
            self.scheduler.cancel(handle);
        }

        info!("Refreshing iLevel data ({})", self.sessions.credentials().username());

        self.state = CycleState::LoggingIn;
        let login = self.sessions.login().await.map(|_| ());
        match login {
            Ok(()) => {}
            Err(LoginError::Transient(e)) => return self.retry("POST LOGIN", e),
            Err(LoginError::Auth(e)) => {
                error!("Fatal. {} - polling stopped until re-triggered", e);
                self.state = CycleState::Idle;
                return CycleOutcome::Halted(e);
            }
        }

        self.state = CycleState::FetchingTanks;
        let readings = match fetch_tank_list(&self.sessions).await {
            Ok(readings) => readings,
            Err(e) => return self.retry("POST gcvt", e),
        };

        for reading in &readings {
            self.registry.upsert(reading);
        }

        self.arm(self.settings.refresh_interval, TimerKind::Refresh);
        self.state = CycleState::NextCycleScheduled;
        CycleOutcome::Refreshed { tanks: readings.len() }
    }

    fn retry(&mut self, reason: &str, err: impl Display) -> CycleOutcome {
        warn!(
            "{}: retrying in {} minutes: {}",
            reason,
            self.settings.retry_delay.as_secs() / 60,
            err
        );
        self.arm(self.settings.retry_delay, TimerKind::Retry);
        self.state = CycleState::RetryScheduled;
        CycleOutcome::RetryScheduled
    }

    fn arm(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle {
        if let Some(old) = self.pending.take() {
            self.scheduler.cancel(old);
        }
        let handle = self.scheduler.schedule(delay, kind);
        self.pending = Some(handle);
        handle
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn pending_timer(&self) -> Option<TimerHandle> {
        self.pending
    }

    pub fn registry(&self) -> &TankRegistry<D> {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn snapshot(&self) -> Vec<TankView> {
        self.registry.snapshot()
    }
}

enum Wake {
    Timer(TimerKind),
    Trigger,
    TriggersClosed,
}

impl<D: DeviceSink> Poller<TokioScheduler, D> {
    /// Drive cycles from the tokio timer and from external refresh requests.
    /// Returns once nothing can start another cycle: no timer armed and the
    /// trigger channel closed.
    pub async fn run(mut self, mut triggers: mpsc::Receiver<()>) {
        self.start();
        let mut triggers_open = true;

        loop {
            let wake = tokio::select! {
                kind = self.scheduler.fired() => Wake::Timer(kind),
                msg = triggers.recv(), if triggers_open => match msg {
                    Some(()) => Wake::Trigger,
                    None => Wake::TriggersClosed,
                },
            };

            match wake {
                Wake::Timer(kind) => debug!("Starting cycle on {} timer", kind),
                Wake::Trigger => info!("External refresh requested"),
                Wake::TriggersClosed => {
                    triggers_open = false;
                    if !self.scheduler.is_armed() {
                        break;
                    }
                    continue;
                }
            }

            self.run_cycle().await;

            if !triggers_open && !self.scheduler.is_armed() {
                break;
            }
        }

        info!("Poller stopped: no timer armed and no trigger source left");
    }
}

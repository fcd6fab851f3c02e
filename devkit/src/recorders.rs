/*!
Collaborateurs enregistreurs

- `RecordingSink`: capture les appels register / notify_updated de l'inventaire
- `ManualScheduler`: timers que le test déclenche à la main
*/

use ilevel_agent::{DeviceSink, Scheduler, TankId, TankState, TimerHandle, TimerKind};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Registered(TankState),
    Updated(TankState),
}

impl SinkCall {
    pub fn tank_id(&self) -> TankId {
        match self {
            SinkCall::Registered(state) | SinkCall::Updated(state) => state.tank_id(),
        }
    }
}

/// Inventaire factice, clonable: le clone gardé par le test voit les appels
/// faits par celui donné au registre.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn registered_ids(&self) -> Vec<TankId> {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::Registered(_)))
            .map(SinkCall::tank_id)
            .collect()
    }

    pub fn updated_ids(&self) -> Vec<TankId> {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::Updated(_)))
            .map(SinkCall::tank_id)
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: SinkCall) {
        log::debug!("📥 [SINK] {:?} tank {}", call_name(&call), call.tank_id());
        self.calls.lock().unwrap().push(call);
    }
}

fn call_name(call: &SinkCall) -> &'static str {
    match call {
        SinkCall::Registered(_) => "register",
        SinkCall::Updated(_) => "notify_updated",
    }
}

impl DeviceSink for RecordingSink {
    fn register(&self, _tank_id: TankId, initial: &TankState) {
        self.record(SinkCall::Registered(initial.clone()));
    }

    fn notify_updated(&self, _tank_id: TankId, state: &TankState) {
        self.record(SinkCall::Updated(state.clone()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTimer {
    pub handle: TimerHandle,
    pub delay: Duration,
    pub kind: TimerKind,
}

/// Scheduler sans horloge: rien ne se déclenche tant que le test n'appelle pas `fire`
#[derive(Debug, Default)]
pub struct ManualScheduler {
    next_id: u64,
    outstanding: Vec<ScheduledTimer>,
    history: Vec<ScheduledTimer>,
    cancelled: Vec<TimerHandle>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timers armés et pas encore déclenchés ni annulés
    pub fn outstanding(&self) -> &[ScheduledTimer] {
        &self.outstanding
    }

    /// Tout ce qui a été armé, dans l'ordre
    pub fn history(&self) -> &[ScheduledTimer] {
        &self.history
    }

    pub fn cancelled(&self) -> &[TimerHandle] {
        &self.cancelled
    }

    /// Déclenche le timer le plus proche (le plus ancien à délai égal)
    pub fn fire(&mut self) -> Option<ScheduledTimer> {
        let (index, _) = self
            .outstanding
            .iter()
            .enumerate()
            .min_by_key(|(i, t)| (t.delay, *i))?;
        let timer = self.outstanding.remove(index);
        log::info!("⏰ [TIMER] firing {} timer after {:?}", timer.kind, timer.delay);
        Some(timer)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle {
        self.next_id += 1;
        let timer = ScheduledTimer {
            handle: TimerHandle::new(self.next_id),
            delay,
            kind,
        };
        self.outstanding.push(timer);
        self.history.push(timer);
        timer.handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        let before = self.outstanding.len();
        self.outstanding.retain(|t| t.handle != handle);
        if self.outstanding.len() != before {
            self.cancelled.push(handle);
        }
    }
}

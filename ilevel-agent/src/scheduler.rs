//! One-shot timers driving the refresh cycle
//!
//! The only thing a timer ever does is start the next cycle, so a schedule
//! request carries a delay and a kind (for logs) rather than a callback.

use std::fmt;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Deadline used when `now + delay` does not fit the clock
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Very first cycle after startup
    Initial,
    /// After a transient failure
    Retry,
    /// Normal refresh interval
    Refresh,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerKind::Initial => "initial",
            TimerKind::Retry => "retry",
            TimerKind::Refresh => "refresh",
        };
        f.write_str(name)
    }
}

pub trait Scheduler {
    /// Arm a one-shot timer that starts a cycle after `delay`
    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle;

    /// Disarm a timer. Unknown or already fired handles are ignored.
    fn cancel(&mut self, handle: TimerHandle);
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    handle: TimerHandle,
    deadline: Instant,
    kind: TimerKind,
}

/// Single-slot scheduler on the tokio clock
#[derive(Debug, Default)]
pub struct TokioScheduler {
    next_id: u64,
    armed: Option<Armed>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Resolves when the armed timer fires, consuming it. Never resolves
    /// while nothing is armed.
    pub async fn fired(&mut self) -> TimerKind {
        let Some(armed) = self.armed else {
            return std::future::pending().await;
        };

        sleep_until(armed.deadline).await;
        self.armed = None;
        debug!("Timer {} ({}) fired", armed.handle.id(), armed.kind);
        armed.kind
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        let now = Instant::now();
        let deadline = now.checked_add(delay).unwrap_or_else(|| {
            warn!("{} delay {:?} out of range, clamping", kind, delay);
            now + FAR_FUTURE
        });
        self.armed = Some(Armed { handle, deadline, kind });
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if self.armed.map(|a| a.handle) == Some(handle) {
            self.armed = None;
        }
    }
}

//! iLevel Agent - oil tank levels from the iLevel cloud to the local inventory
//!
//! - `session`: login and session token scraping
//! - `registry`: per-tank state with the anti-oscillation filter
//! - `poller` / `scheduler`: refresh cycle and its single timer
//! - `inventory`: MQTT publication of tanks + refresh requests
//! - `config`: agent configuration

pub mod config;
pub mod error;
pub mod inventory;
pub mod poller;
pub mod registry;
pub mod scheduler;
pub mod session;

pub use error::{AuthError, FetchError, LoginError, ParseError, SetupError, TransientNetworkError};
pub use poller::{CycleOutcome, CycleState, PollSettings, Poller};
pub use registry::{DeviceSink, Gauge, Level, Quantity, TankId, TankReading, TankRegistry, TankState, TankView};
pub use scheduler::{Scheduler, TimerHandle, TimerKind, TokioScheduler};
pub use session::{Credentials, Session, SessionManager};

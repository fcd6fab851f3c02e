//! Tank registry with the anti-oscillation filter
//!
//! The level sensors occasionally report a single spurious sample. The filter
//! trusts any drop, trusts a full tank, and otherwise only accepts a rise that
//! beats the level from two accepted readings ago.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

pub const UNIT: &str = "%";
pub const ATTRIBUTION: &str = "Oil level measured with iLevel by Poem Technology.";
pub const ENTITY_PREFIX: &str = "ilevel";

pub type TankId = u64;

/// Fill percentage, always within 0..=100
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Level(u8);

impl Level {
    pub const EMPTY: Level = Level(0);
    pub const FULL: Level = Level(100);

    pub fn new(percent: u8) -> Option<Self> {
        (percent <= 100).then_some(Level(percent))
    }

    pub fn percent(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Level {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(Level::new)
            .ok_or_else(|| format!("level {} outside 0..=100", value))
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> u8 {
        level.0
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gallons / capacity as the dashboard sends them: sometimes a string,
/// sometimes a number. Kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Number(n) => write!(f, "{}", n),
            Quantity::Text(s) => f.write_str(s),
        }
    }
}

/// One element of the `gcvt` tank list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankReading {
    #[serde(rename = "tankID")]
    pub tank_id: TankId,
    #[serde(rename = "tankDescription")]
    pub description: String,
    pub gallons: Quantity,
    #[serde(rename = "tankCapacity")]
    pub capacity: Quantity,
    pub level: Level,
    pub inches: f64,
}

/// Gauge icon shown for a displayed level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gauge {
    Empty,
    Low,
    Medium,
    Full,
}

impl Gauge {
    pub fn for_level(level: Level) -> Self {
        match level.percent() {
            76..=u8::MAX => Gauge::Full,
            51..=75 => Gauge::Medium,
            26..=50 => Gauge::Low,
            _ => Gauge::Empty,
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Gauge::Full => "mdi:gauge-full",
            Gauge::Medium => "mdi:gauge",
            Gauge::Low => "mdi:gauge-low",
            Gauge::Empty => "mdi:gauge-empty",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated(FilterOutcome),
}

/// Filtered state of one tank
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TankState {
    tank_id: TankId,
    name: String,
    displayed_level: Level,
    prior_level: Level,
    gallons: Quantity,
    capacity: Quantity,
    inches: f64,
    last_update: DateTime<Utc>,
}

impl TankState {
    /// First sighting: the reading is taken as-is over a zeroed history
    pub fn from_reading(reading: &TankReading, now: DateTime<Utc>) -> Self {
        Self {
            tank_id: reading.tank_id,
            name: reading.description.clone(),
            displayed_level: reading.level,
            prior_level: Level::EMPTY,
            gallons: reading.gallons.clone(),
            capacity: reading.capacity.clone(),
            inches: reading.inches,
            last_update: now,
        }
    }

    pub fn accepts(&self, new: Level) -> bool {
        new < self.displayed_level || new > self.prior_level || new == Level::FULL
    }

    /// Apply the anti-oscillation rule. A rejected reading changes nothing.
    pub fn apply(&mut self, reading: &TankReading, now: DateTime<Utc>) -> FilterOutcome {
        if !self.accepts(reading.level) {
            return FilterOutcome::Rejected;
        }

        self.prior_level = self.displayed_level;
        self.displayed_level = reading.level;
        self.name = reading.description.clone();
        self.gallons = reading.gallons.clone();
        self.capacity = reading.capacity.clone();
        self.inches = reading.inches;
        self.last_update = now;
        FilterOutcome::Accepted
    }

    pub fn tank_id(&self) -> TankId {
        self.tank_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn displayed_level(&self) -> Level {
        self.displayed_level
    }

    pub fn prior_level(&self) -> Level {
        self.prior_level
    }

    pub fn gallons(&self) -> &Quantity {
        &self.gallons
    }

    pub fn capacity(&self) -> &Quantity {
        &self.capacity
    }

    pub fn inches(&self) -> f64 {
        self.inches
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    pub fn gauge(&self) -> Gauge {
        Gauge::for_level(self.displayed_level)
    }

    pub fn view(&self) -> TankView {
        TankView {
            entity: format!("{} {}", ENTITY_PREFIX, self.tank_id),
            tank_id: self.tank_id,
            name: self.name.clone(),
            level: self.displayed_level,
            unit: UNIT,
            icon: self.gauge().icon(),
            gallons: self.gallons.clone(),
            capacity: self.capacity.clone(),
            inches: self.inches,
            last_update: self.last_update,
            attribution: ATTRIBUTION,
        }
    }
}

/// Read model handed to the presentation side
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TankView {
    pub entity: String,
    pub tank_id: TankId,
    pub name: String,
    pub level: Level,
    pub unit: &'static str,
    pub icon: &'static str,
    pub gallons: Quantity,
    pub capacity: Quantity,
    pub inches: f64,
    pub last_update: DateTime<Utc>,
    pub attribution: &'static str,
}

/// Collaborator that exposes tanks outside the agent
pub trait DeviceSink {
    /// Called once per newly discovered tank
    fn register(&self, tank_id: TankId, initial: &TankState);

    /// Called after every upsert of a known tank, accepted or not
    fn notify_updated(&self, tank_id: TankId, state: &TankState);
}

pub struct TankRegistry<D> {
    tanks: HashMap<TankId, TankState>,
    sink: D,
}

impl<D: DeviceSink> TankRegistry<D> {
    pub fn new(sink: D) -> Self {
        Self {
            tanks: HashMap::new(),
            sink,
        }
    }

    pub fn upsert(&mut self, reading: &TankReading) -> UpsertOutcome {
        self.upsert_at(reading, Utc::now())
    }

    pub fn upsert_at(&mut self, reading: &TankReading, now: DateTime<Utc>) -> UpsertOutcome {
        let tank_id = reading.tank_id;

        if let Some(state) = self.tanks.get_mut(&tank_id) {
            let outcome = state.apply(reading, now);
            match outcome {
                FilterOutcome::Accepted => info!("Updating tank {} -> {}%", tank_id, reading.level),
                FilterOutcome::Rejected => debug!(
                    "Tank {}: ignoring {}% (displayed {}%, prior {}%)",
                    tank_id, reading.level, state.displayed_level, state.prior_level
                ),
            }
            self.sink.notify_updated(tank_id, state);
            return UpsertOutcome::Updated(outcome);
        }

        info!("Adding tank {} ({}%)", tank_id, reading.level);
        let state = TankState::from_reading(reading, now);
        self.sink.register(tank_id, &state);
        self.tanks.insert(tank_id, state);
        UpsertOutcome::Created
    }

    pub fn get(&self, tank_id: TankId) -> Option<&TankState> {
        self.tanks.get(&tank_id)
    }

    pub fn len(&self) -> usize {
        self.tanks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tanks.is_empty()
    }

    /// Point-in-time copy for readers outside the poll cycle
    pub fn snapshot(&self) -> Vec<TankView> {
        let mut views: Vec<TankView> = self.tanks.values().map(TankState::view).collect();
        views.sort_by_key(|v| v.tank_id);
        views
    }

    pub fn sink(&self) -> &D {
        &self.sink
    }
}

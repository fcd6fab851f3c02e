/*!
Test Harness pour l'agent iLevel

Facilite l'écriture de tests du cycle de rafraîchissement avec:
- Stub HTTP du cloud iLevel prêt à l'emploi
- Timers manuels (on déclenche le cycle suivant à la main)
- Inventaire enregistreur pour les assertions
*/

use crate::http_stub::IlevelStub;
use crate::recorders::{ManualScheduler, RecordingSink, ScheduledTimer};
use anyhow::Result;
use ilevel_agent::session::REQUEST_TIMEOUT;
use ilevel_agent::{
    CycleOutcome, Credentials, PollSettings, Poller, SessionManager, TankId, TankRegistry, TimerHandle,
};

pub const USERNAME: &str = "tank-owner@example.com";
pub const PASSWORD: &str = "s3cret";

/// Harness de test complet pour le poller
pub struct TestHarness {
    pub stub: IlevelStub,
    poller: Poller<ManualScheduler, RecordingSink>,
    sink: RecordingSink,
    cycles: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessStats {
    pub cycles: usize,
    pub tanks: usize,
    pub sink_calls: usize,
    pub outstanding_timers: usize,
}

impl TestHarness {
    /// Crée un nouveau harness avec les délais par défaut (10 / 30 min)
    pub async fn new() -> Result<Self> {
        Self::with_settings(PollSettings::default()).await
    }

    pub async fn with_settings(settings: PollSettings) -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        let stub = IlevelStub::start().await;
        let sessions = SessionManager::new(Credentials::new(USERNAME, PASSWORD), &stub.base_url(), REQUEST_TIMEOUT)?;
        let sink = RecordingSink::new();
        let poller = Poller::new(
            sessions,
            TankRegistry::new(sink.clone()),
            ManualScheduler::new(),
            settings,
        );

        Ok(Self {
            stub,
            poller,
            sink,
            cycles: 0,
        })
    }

    pub fn poller(&self) -> &Poller<ManualScheduler, RecordingSink> {
        &self.poller
    }

    pub fn sink(&self) -> &RecordingSink {
        &self.sink
    }

    /// Arme le timer initial, comme au démarrage de l'agent
    pub fn start(&mut self) -> TimerHandle {
        self.poller.start()
    }

    /// Lance un cycle immédiatement (équivalent d'un refresh externe)
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;
        let outcome = self.poller.run_cycle().await;
        log::info!("🔁 Cycle {} -> {:?}", self.cycles, outcome);
        outcome
    }

    /// Déclenche le prochain timer puis le cycle qu'il démarre
    pub async fn fire_next(&mut self) -> Option<(ScheduledTimer, CycleOutcome)> {
        let timer = self.poller.scheduler_mut().fire()?;
        let outcome = self.run_cycle().await;
        Some((timer, outcome))
    }

    pub fn outstanding(&self) -> Vec<ScheduledTimer> {
        self.poller.scheduler().outstanding().to_vec()
    }

    /// (niveau affiché, niveau précédent) d'une cuve
    pub fn levels(&self, tank_id: TankId) -> Option<(u8, u8)> {
        self.poller
            .registry()
            .get(tank_id)
            .map(|s| (s.displayed_level().percent(), s.prior_level().percent()))
    }

    /// Vérifie les attentes HTTP du stub
    pub async fn verify(&self) -> Result<()> {
        self.stub.verify_expectations().await
    }

    pub fn stats(&self) -> HarnessStats {
        HarnessStats {
            cycles: self.cycles,
            tanks: self.poller.registry().len(),
            sink_calls: self.sink.calls().len(),
            outstanding_timers: self.poller.scheduler().outstanding().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::IlevelPayloads;
    use ilevel_agent::TimerKind;

    #[tokio::test]
    async fn test_harness_starts_idle() {
        let mut harness = TestHarness::new().await.unwrap();
        assert_eq!(
            harness.stats(),
            HarnessStats {
                cycles: 0,
                tanks: 0,
                sink_calls: 0,
                outstanding_timers: 0
            }
        );

        let initial = harness.start();
        let outstanding = harness.outstanding();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].handle, initial);
        assert_eq!(outstanding[0].kind, TimerKind::Initial);
    }

    #[tokio::test]
    async fn test_fire_next_runs_one_cycle() {
        let mut harness = TestHarness::new().await.unwrap();
        harness.stub.login_ok(7, 1).await;
        harness
            .stub
            .tanks(7, &IlevelPayloads::tank_list(&[IlevelPayloads::tank(1, "Cellar", 60)]), 1)
            .await;

        harness.start();
        let (timer, outcome) = harness.fire_next().await.unwrap();

        assert_eq!(timer.kind, TimerKind::Initial);
        assert_eq!(outcome, CycleOutcome::Refreshed { tanks: 1 });
        assert_eq!(harness.levels(1), Some((60, 0)));
        assert_eq!(harness.stats().cycles, 1);
        harness.verify().await.unwrap();
    }
}

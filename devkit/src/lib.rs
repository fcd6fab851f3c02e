/*!
# iLevel DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant les tests de l'agent iLevel sans accès au cloud:
- Serveur HTTP stub du tableau de bord iLevel (login + gcvt)
- Collaborateurs enregistreurs (inventaire, timers manuels)
- Payloads conformes (page de login, liste de cuves)
- Harness de test pilotant le poller cycle par cycle
*/

pub mod fixtures;
pub mod http_stub;
pub mod recorders;
pub mod test_utils;

pub use fixtures::IlevelPayloads;
pub use http_stub::IlevelStub;
pub use recorders::{ManualScheduler, RecordingSink, ScheduledTimer, SinkCall};
pub use test_utils::{HarnessStats, TestHarness};

/*!
Stub HTTP du tableau de bord iLevel

Permet de tester l'agent sans joindre myilevel.com. Un seul mock actif par
endpoint (login, gcvt); le remplacer vérifie d'abord le nombre d'appels
attendu sur l'ancien.
*/

use crate::fixtures::{IlevelPayloads, BACKEND_PATH};
use anyhow::Result;
use mockito::{Matcher, Mock, Server, ServerGuard};

const LOGIN_ROUTE: &str = "/iLevel/login/iLevel_login.php";
const BACKEND_ROUTE: &str = "/iLevel/ClientView.php";

pub struct IlevelStub {
    server: ServerGuard,
    login: Option<(Mock, usize)>,
    tanks: Option<(Mock, usize)>,
    failures: Vec<String>,
}

impl IlevelStub {
    pub async fn start() -> Self {
        let server = Server::new_async().await;
        log::info!("🌐 [STUB] iLevel dashboard listening on {}", server.url());
        Self {
            server,
            login: None,
            tanks: None,
            failures: Vec::new(),
        }
    }

    /// Base URL à donner au SessionManager
    pub fn base_url(&self) -> String {
        format!("{}/iLevel/", self.server.url())
    }

    /// Login accepté: renvoie la page avec clientID + backendURL
    pub async fn login_ok(&mut self, client_id: u64, expected_hits: usize) {
        let mock = self
            .server
            .mock("POST", LOGIN_ROUTE)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("username".into(), crate::test_utils::USERNAME.into()),
                Matcher::UrlEncoded("pass".into(), crate::test_utils::PASSWORD.into()),
                Matcher::UrlEncoded("submit".into(), "Log in".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(IlevelPayloads::login_page(client_id, BACKEND_PATH))
            .expect(expected_hits)
            .create_async()
            .await;
        self.replace_login(mock, expected_hits).await;
    }

    /// Login refusé: la page contient "Invalid"
    pub async fn login_invalid(&mut self, expected_hits: usize) {
        let mock = self
            .server
            .mock("POST", LOGIN_ROUTE)
            .with_status(200)
            .with_body(IlevelPayloads::invalid_login_page())
            .expect(expected_hits)
            .create_async()
            .await;
        self.replace_login(mock, expected_hits).await;
    }

    pub async fn login_status(&mut self, status: usize, expected_hits: usize) {
        let mock = self
            .server
            .mock("POST", LOGIN_ROUTE)
            .with_status(status)
            .expect(expected_hits)
            .create_async()
            .await;
        self.replace_login(mock, expected_hits).await;
    }

    /// Réponse gcvt pour un client donné
    pub async fn tanks(&mut self, client_id: u64, body: &str, expected_hits: usize) {
        let mock = self
            .server
            .mock("POST", BACKEND_ROUTE)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("cmd".into(), "gcvt".into()),
                Matcher::UrlEncoded("data".into(), client_id.to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(expected_hits)
            .create_async()
            .await;
        self.replace_tanks(mock, expected_hits).await;
    }

    pub async fn tanks_status(&mut self, status: usize, expected_hits: usize) {
        let mock = self
            .server
            .mock("POST", BACKEND_ROUTE)
            .with_status(status)
            .expect(expected_hits)
            .create_async()
            .await;
        self.replace_tanks(mock, expected_hits).await;
    }

    async fn replace_login(&mut self, mock: Mock, expected_hits: usize) {
        if let Some(old) = self.login.take() {
            self.retire(old, "login").await;
        }
        self.login = Some((mock, expected_hits));
    }

    async fn replace_tanks(&mut self, mock: Mock, expected_hits: usize) {
        if let Some(old) = self.tanks.take() {
            self.retire(old, "gcvt").await;
        }
        self.tanks = Some((mock, expected_hits));
    }

    async fn retire(&mut self, (mock, expected_hits): (Mock, usize), endpoint: &str) {
        if !mock.matched_async().await {
            self.failures
                .push(format!("{endpoint}: expected {expected_hits} calls before replacement"));
        }
        mock.remove_async().await;
    }

    /// Vérifie toutes les attentes (mocks actifs + remplacés)
    pub async fn verify_expectations(&self) -> Result<()> {
        let mut failures = self.failures.clone();

        for (endpoint, slot) in [("login", &self.login), ("gcvt", &self.tanks)] {
            if let Some((mock, expected_hits)) = slot {
                if !mock.matched_async().await {
                    failures.push(format!("{endpoint}: expected {expected_hits} calls"));
                }
            }
        }

        if !failures.is_empty() {
            anyhow::bail!("HTTP expectations failed: {}", failures.join("; "));
        }

        log::info!("✅ [STUB] all HTTP expectations met");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unmet_expectation_is_reported() {
        let mut stub = IlevelStub::start().await;
        stub.login_status(500, 1).await;

        assert!(stub.verify_expectations().await.is_err());
    }

    #[tokio::test]
    async fn test_replaced_mock_is_still_checked() {
        let mut stub = IlevelStub::start().await;
        stub.tanks_status(503, 2).await;
        stub.tanks_status(200, 0).await;

        let err = stub.verify_expectations().await.unwrap_err();
        assert!(err.to_string().contains("before replacement"));
    }

    #[tokio::test]
    async fn test_zero_expected_hits_verifies_untouched() {
        let mut stub = IlevelStub::start().await;
        stub.login_invalid(0).await;
        stub.tanks_status(200, 0).await;

        stub.verify_expectations().await.unwrap();
    }
}

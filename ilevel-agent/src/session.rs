//! iLevel dashboard session
//!
//! Handles:
//! - Credentials (immutable for the process lifetime)
//! - Login form POST with cookie-keeping HTTP client
//! - Scraping of the client id / backend URL globals from the login page
//!
//! The session survives failed cycles; only a successful login replaces it.

use crate::error::{AuthError, LoginError, ParseError, SetupError, TransientNetworkError};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://myilevel.com/iLevel/";
pub const LOGIN_PATH: &str = "login/iLevel_login.php";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Marker the dashboard puts in the login page when credentials are refused
const INVALID_MARKER: &str = "Invalid";

static CLIENT_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"globals.clientID\s*=\s*(?P<client_id>\d+)").expect("client id pattern")
});

static BACKEND_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"globals.backendURL\s*=\s*'(?P<backend_url>.*?)';").expect("backend URL pattern")
});

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Authenticated context required by the tank list endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Session {
    #[default]
    Unauthenticated,
    Authenticated {
        client_id: String,
        backend_url: Url,
    },
}

/// Extracts the session token pair from the login page body.
///
/// The backend URL is given relative to `base` in the page and is resolved by
/// plain concatenation, the way the dashboard's own scripts do it.
pub fn parse_login_page(text: &str, base: &Url) -> Result<Session, ParseError> {
    let client_id = CLIENT_ID_RE
        .captures(text)
        .and_then(|c| c.name("client_id"))
        .map(|m| m.as_str().to_string())
        .ok_or(ParseError::MissingClientId)?;

    let path = BACKEND_URL_RE
        .captures(text)
        .and_then(|c| c.name("backend_url"))
        .map(|m| m.as_str())
        .ok_or(ParseError::MissingBackendUrl)?;

    let joined = format!("{}{}", base, path);
    let backend_url = Url::parse(&joined).map_err(|_| ParseError::InvalidBackendUrl(joined))?;

    Ok(Session::Authenticated {
        client_id,
        backend_url,
    })
}

/// Owns the credentials, the long-lived HTTP client (and its cookie jar) and
/// the current session.
pub struct SessionManager {
    http: Client,
    credentials: Credentials,
    base_url: Url,
    login_url: Url,
    timeout: Duration,
    session: Session,
}

impl SessionManager {
    pub fn new(credentials: Credentials, base_url: &str, timeout: Duration) -> Result<Self, SetupError> {
        let http = Client::builder().cookie_store(true).build()?;
        Self::with_client(http, credentials, base_url, timeout)
    }

    /// Same as [`SessionManager::new`] with a caller-built client. The client
    /// must keep cookies between requests for the backend call to be accepted.
    pub fn with_client(
        http: Client,
        credentials: Credentials,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, SetupError> {
        let base_url = normalize_base(base_url)?;
        let login_url = base_url.join(LOGIN_PATH).map_err(|e| SetupError::BaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            http,
            credentials,
            base_url,
            login_url,
            timeout,
            session: Session::Unauthenticated,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Log in and replace the held session on success
    pub async fn login(&mut self) -> Result<&Session, LoginError> {
        info!("Logging in to iLevel as {}", self.credentials.username);

        let form = [
            ("username", self.credentials.username.as_str()),
            ("pass", self.credentials.password.as_str()),
            ("submit", "Log in"),
        ];
        let body = self.post_form(&self.login_url, &form).await?;

        if body.contains(INVALID_MARKER) {
            return Err(AuthError::InvalidCredentials.into());
        }

        let session = parse_login_page(&body, &self.base_url).map_err(AuthError::from)?;
        if let Session::Authenticated { client_id, backend_url } = &session {
            debug!("Login OK: client id {} @ {}", client_id, backend_url);
        }

        self.session = session;
        Ok(&self.session)
    }

    /// Form-encoded POST bounded by the request timeout. Anything but a 200
    /// with a readable body is a transient failure.
    pub async fn post_form(&self, url: &Url, form: &[(&str, &str)]) -> Result<String, TransientNetworkError> {
        let response = self
            .http
            .post(url.clone())
            .form(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransientNetworkError::from_reqwest(url.as_str(), e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(TransientNetworkError::Status {
                url: url.to_string(),
                status,
            });
        }

        response
            .text()
            .await
            .map_err(|e| TransientNetworkError::from_reqwest(url.as_str(), e))
    }
}

fn normalize_base(base_url: &str) -> Result<Url, SetupError> {
    let mut url = Url::parse(base_url).map_err(|e| SetupError::BaseUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;

    if url.cannot_be_a_base() {
        return Err(SetupError::BaseUrl {
            url: base_url.to_string(),
            reason: "not a hierarchical URL".to_string(),
        });
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use std::io::Write as _;

    const LOGIN_PAGE: &str = r#"<html><script>
        var globals = {};
        globals.clientID = 4242;
        globals.backendURL = 'ClientView.php';
    </script></html>"#;

    fn base() -> Url {
        Url::parse(DEFAULT_BASE_URL).unwrap()
    }

    fn manager_for(server: &mockito::ServerGuard) -> SessionManager {
        SessionManager::new(
            Credentials::new("oil@example.com", "s3cret"),
            &format!("{}/iLevel/", server.url()),
            REQUEST_TIMEOUT,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_login_page() {
        let session = parse_login_page(LOGIN_PAGE, &base()).unwrap();
        assert_eq!(
            session,
            Session::Authenticated {
                client_id: "4242".to_string(),
                backend_url: Url::parse("https://myilevel.com/iLevel/ClientView.php").unwrap(),
            }
        );
    }

    #[test]
    fn test_parse_login_page_tight_assignments() {
        let page = "globals.clientID=7;globals.backendURL='api/v2.php';";
        let session = parse_login_page(page, &base()).unwrap();
        match session {
            Session::Authenticated { client_id, backend_url } => {
                assert_eq!(client_id, "7");
                assert_eq!(backend_url.as_str(), "https://myilevel.com/iLevel/api/v2.php");
            }
            Session::Unauthenticated => panic!("expected an authenticated session"),
        }
    }

    #[test]
    fn test_parse_login_page_missing_tokens() {
        let no_id = "globals.backendURL = 'ClientView.php';";
        assert_eq!(parse_login_page(no_id, &base()), Err(ParseError::MissingClientId));

        let no_backend = "globals.clientID = 12;";
        assert_eq!(parse_login_page(no_backend, &base()), Err(ParseError::MissingBackendUrl));

        // Non-numeric id does not count as an assignment
        let bad_id = "globals.clientID = 'abc'; globals.backendURL = 'x.php';";
        assert_eq!(parse_login_page(bad_id, &base()), Err(ParseError::MissingClientId));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("me", "hunter2");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("me"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let manager = SessionManager::new(
            Credentials::new("u", "p"),
            "https://myilevel.com/iLevel",
            REQUEST_TIMEOUT,
        )
        .unwrap();
        assert_eq!(manager.base_url().as_str(), DEFAULT_BASE_URL);
        assert_eq!(
            manager.login_url.as_str(),
            "https://myilevel.com/iLevel/login/iLevel_login.php"
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let result = SessionManager::new(Credentials::new("u", "p"), "not a url", REQUEST_TIMEOUT);
        assert!(matches!(result, Err(SetupError::BaseUrl { .. })));
    }

    #[tokio::test]
    async fn test_login_posts_form_and_stores_session() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/iLevel/login/iLevel_login.php")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("username".into(), "oil@example.com".into()),
                Matcher::UrlEncoded("pass".into(), "s3cret".into()),
                Matcher::UrlEncoded("submit".into(), "Log in".into()),
            ]))
            .with_status(200)
            .with_body(LOGIN_PAGE)
            .create_async()
            .await;

        let mut manager = manager_for(&server);
        let session = manager.login().await.unwrap().clone();

        mock.assert_async().await;
        assert_eq!(
            session,
            Session::Authenticated {
                client_id: "4242".to_string(),
                backend_url: Url::parse(&format!("{}/iLevel/ClientView.php", server.url())).unwrap(),
            }
        );
        assert_eq!(manager.session(), &session);
    }

    #[tokio::test]
    async fn test_login_invalid_credentials_is_fatal() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/iLevel/login/iLevel_login.php")
            .with_status(200)
            .with_body("<p>Invalid username or password</p>")
            .create_async()
            .await;

        let mut manager = manager_for(&server);
        let err = manager.login().await.unwrap_err();

        assert!(matches!(err, LoginError::Auth(AuthError::InvalidCredentials)));
        assert_eq!(manager.session(), &Session::Unauthenticated);
    }

    #[tokio::test]
    async fn test_login_unparseable_page_is_fatal() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/iLevel/login/iLevel_login.php")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let mut manager = manager_for(&server);
        let err = manager.login().await.unwrap_err();

        assert!(matches!(
            err,
            LoginError::Auth(AuthError::ParseFailure(ParseError::MissingClientId))
        ));
    }

    #[tokio::test]
    async fn test_login_non_200_is_transient() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/iLevel/login/iLevel_login.php")
            .with_status(503)
            .create_async()
            .await;

        let mut manager = manager_for(&server);
        let err = manager.login().await.unwrap_err();

        match err {
            LoginError::Transient(TransientNetworkError::Status { status, .. }) => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            }
            other => panic!("expected a transient status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_login_connection_refused_is_transient() {
        let mut manager = SessionManager::new(
            Credentials::new("u", "p"),
            "http://127.0.0.1:1/iLevel/",
            Duration::from_secs(2),
        )
        .unwrap();

        let err = manager.login().await.unwrap_err();
        assert!(matches!(err, LoginError::Transient(_)));
    }

    #[tokio::test]
    async fn test_login_timeout_is_transient() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/iLevel/login/iLevel_login.php")
            .with_status(200)
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_millis(1200));
                w.write_all(LOGIN_PAGE.as_bytes())
            })
            .create_async()
            .await;

        let mut manager = SessionManager::new(
            Credentials::new("u", "p"),
            &format!("{}/iLevel/", server.url()),
            Duration::from_millis(200),
        )
        .unwrap();

        match manager.login().await.unwrap_err() {
            LoginError::Transient(TransientNetworkError::Timeout { url }) => {
                assert!(url.ends_with("/iLevel/login/iLevel_login.php"));
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert_eq!(manager.session(), &Session::Unauthenticated);
    }

    #[tokio::test]
    async fn test_failed_login_keeps_previous_session() {
        let mut server = Server::new_async().await;
        let ok = server
            .mock("POST", "/iLevel/login/iLevel_login.php")
            .with_status(200)
            .with_body(LOGIN_PAGE)
            .create_async()
            .await;

        let mut manager = manager_for(&server);
        let first = manager.login().await.unwrap().clone();
        ok.remove_async().await;

        server
            .mock("POST", "/iLevel/login/iLevel_login.php")
            .with_status(500)
            .create_async()
            .await;

        assert!(manager.login().await.is_err());
        assert_eq!(manager.session(), &first);
    }
}

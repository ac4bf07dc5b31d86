use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use super::errors::CoreError;
use super::models::{AuthStatus, RuntimeSettings};
use super::observer::{RunEvent, RunObserver};

const AUTH_AUTHORIZE: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const AUTH_TOKEN: &str = "https://oauth2.googleapis.com/token";
const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
const CALLBACK_PATH: &str = "/callback";
const CALLBACK_READ_TIMEOUT: Duration = Duration::from_secs(5);
const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_utc: DateTime<Utc>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl OAuthToken {
    fn is_expiring_within(&self, duration: Duration) -> bool {
        let now = Utc::now();
        let threshold = now
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::minutes(5));
        self.expires_at_utc <= threshold
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
    scope: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

pub async fn load_client_secrets(path: &Path) -> anyhow::Result<ClientSecrets> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(CoreError::MissingPrerequisite(format!(
            "OAuth client credentials not found at {}",
            path.display()
        ))
        .into());
    }

    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed = serde_json::from_str::<CredentialsFile>(&raw)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;

    parsed
        .installed
        .or(parsed.web)
        .filter(|secrets| !secrets.client_id.trim().is_empty())
        .ok_or_else(|| {
            CoreError::MissingPrerequisite(format!(
                "{} has no 'installed' or 'web' client",
                path.display()
            ))
            .into()
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    NoToken,
    AwaitingConsent,
    AwaitingCallback,
    TokenPersisted,
    Ready,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct CredentialConfig {
    pub token_path: PathBuf,
    pub callback_port: u16,
    pub consent_timeout: Duration,
    pub open_browser: bool,
}

impl CredentialConfig {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            token_path: settings.token_path.clone(),
            callback_port: settings.callback_port,
            consent_timeout: settings.consent_timeout(),
            open_browser: settings.open_browser_for_consent,
        }
    }
}

pub struct CredentialStore {
    client: Client,
    secrets: ClientSecrets,
    config: CredentialConfig,
    authorize_endpoint: String,
    token_endpoint: String,
    state: CredentialState,
}

impl CredentialStore {
    pub fn new(client: Client, secrets: ClientSecrets, config: CredentialConfig) -> Self {
        Self {
            client,
            secrets,
            config,
            authorize_endpoint: AUTH_AUTHORIZE.to_string(),
            token_endpoint: AUTH_TOKEN.to_string(),
            state: CredentialState::NoToken,
        }
    }

    pub fn with_endpoints(mut self, authorize_endpoint: &str, token_endpoint: &str) -> Self {
        self.authorize_endpoint = authorize_endpoint.to_string();
        self.token_endpoint = token_endpoint.to_string();
        self
    }

    pub fn state(&self) -> CredentialState {
        self.state
    }

    pub async fn status(&self) -> anyhow::Result<AuthStatus> {
        Ok(match self.load_token().await? {
            Some(token) => AuthStatus {
                signed_in: !token.is_expiring_within(Duration::ZERO)
                    || token.refresh_token.is_some(),
                expires_at: Some(token.expires_at_utc),
                refreshable: token.refresh_token.is_some(),
            },
            None => AuthStatus {
                signed_in: false,
                expires_at: None,
                refreshable: false,
            },
        })
    }

    pub async fn authorize(&mut self, observer: &dyn RunObserver) -> anyhow::Result<OAuthToken> {
        if let Some(cached) = self.load_token().await? {
            if !cached.is_expiring_within(Duration::from_secs(60)) {
                self.state = CredentialState::Ready;
                observer.on_event(&RunEvent::TokenReused);
                return Ok(cached);
            }

            if let Some(refresh_token) = cached.refresh_token.clone() {
                match self.refresh_token(&refresh_token).await {
                    Ok(refreshed) => {
                        self.save_token(&refreshed).await?;
                        self.state = CredentialState::Ready;
                        observer.on_event(&RunEvent::TokenRefreshed);
                        return Ok(refreshed);
                    }
                    Err(err) => {
                        self.state = CredentialState::NoToken;
                        tracing::warn!(error = %err, "stored refresh token rejected");
                    }
                }
            }
        }

        self.consent(observer).await
    }

    pub async fn consent(&mut self, observer: &dyn RunObserver) -> anyhow::Result<OAuthToken> {
        self.state = CredentialState::NoToken;

        let csrf_state = Uuid::new_v4().to_string();
        let verifier = generate_code_verifier();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));

        let port = self.config.callback_port;
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("failed to listen for the OAuth callback on port {port}"))?;
        self.state = CredentialState::AwaitingConsent;
        let redirect_uri = format!("http://localhost:{port}{CALLBACK_PATH}");

        let auth_url = self.build_authorize_url(&csrf_state, &challenge, &redirect_uri)?;
        observer.on_event(&RunEvent::ConsentRequired {
            url: auth_url.to_string(),
        });
        if self.config.open_browser {
            if let Err(err) = open::that_detached(auth_url.as_str()) {
                tracing::warn!(error = %err, "could not open the system browser");
            }
        }

        self.state = CredentialState::AwaitingCallback;
        observer.on_event(&RunEvent::CallbackListening { port });

        let received = tokio::select! {
            callback = wait_for_oauth_callback(&listener, port) => Some(callback),
            _ = tokio::time::sleep(self.config.consent_timeout) => None,
        };
        drop(listener);

        let Some(callback) = received else {
            self.state = CredentialState::TimedOut;
            return Err(CoreError::CredentialTimeout {
                seconds: self.config.consent_timeout.as_secs(),
            }
            .into());
        };
        let exchanged = match callback {
            Ok(callback) if callback.state != csrf_state => {
                Err(anyhow::anyhow!("OAuth state mismatch"))
            }
            Ok(callback) => self.exchange_code(callback.code, verifier, redirect_uri).await,
            Err(err) => Err(err),
        };
        let token = match exchanged {
            Ok(token) => token,
            Err(err) => {
                self.state = CredentialState::NoToken;
                return Err(err);
            }
        };

        if let Err(err) = self.save_token(&token).await {
            self.state = CredentialState::NoToken;
            return Err(err);
        }
        self.state = CredentialState::TokenPersisted;
        observer.on_event(&RunEvent::TokenPersisted {
            path: self.config.token_path.clone(),
        });

        self.state = CredentialState::Ready;
        Ok(token)
    }

    async fn load_token(&self) -> anyhow::Result<Option<OAuthToken>> {
        let path = &self.config.token_path;
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }

        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read token file {}", path.display()))?;

        match serde_json::from_str::<OAuthToken>(&raw) {
            Ok(token) => Ok(Some(token)),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "ignoring unreadable token file"
                );
                Ok(None)
            }
        }
    }

    async fn save_token(&self, token: &OAuthToken) -> anyhow::Result<()> {
        let path = self.config.token_path.clone();
        let json = serde_json::to_vec_pretty(token)?;

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            std::fs::create_dir_all(&dir)?;

            let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
            std::io::Write::write_all(&mut temp, &json)?;
            temp.persist(&path)
                .with_context(|| format!("failed to persist token to {}", path.display()))?;
            Ok(())
        })
        .await?
    }

    async fn refresh_token(&self, refresh_token: &str) -> anyhow::Result<OAuthToken> {
        let form = vec![
            ("client_id", self.secrets.client_id.clone()),
            ("client_secret", self.secrets.client_secret.clone()),
            ("refresh_token", refresh_token.to_string()),
            ("grant_type", "refresh_token".to_string()),
        ];

        let payload = self.request_token(&form).await?;
        Ok(OAuthToken {
            access_token: payload.access_token,
            refresh_token: payload
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
            expires_at_utc: Utc::now() + chrono::Duration::seconds(payload.expires_in),
            scope: payload.scope,
        })
    }

    async fn exchange_code(
        &self,
        code: String,
        verifier: String,
        redirect_uri: String,
    ) -> anyhow::Result<OAuthToken> {
        let form = vec![
            ("client_id", self.secrets.client_id.clone()),
            ("client_secret", self.secrets.client_secret.clone()),
            ("code", code),
            ("code_verifier", verifier),
            ("grant_type", "authorization_code".to_string()),
            ("redirect_uri", redirect_uri),
        ];

        let payload = self.request_token(&form).await?;
        Ok(OAuthToken {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            expires_at_utc: Utc::now() + chrono::Duration::seconds(payload.expires_in),
            scope: payload.scope,
        })
    }

    async fn request_token(&self, form: &[(&str, String)]) -> anyhow::Result<TokenResponse> {
        let response = self
            .client
            .post(&self.token_endpoint)
            .form(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(CoreError::GoogleApi {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        serde_json::from_str::<TokenResponse>(&body).context("failed to parse token response")
    }

    fn build_authorize_url(
        &self,
        state: &str,
        challenge: &str,
        redirect_uri: &str,
    ) -> anyhow::Result<Url> {
        let url = Url::parse_with_params(
            &self.authorize_endpoint,
            &[
                ("client_id", self.secrets.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", DRIVE_FILE_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
                ("code_challenge", challenge),
                ("code_challenge_method", "S256"),
            ],
        )?;

        Ok(url)
    }
}

#[async_trait]
pub trait AccessTokenSource: Send {
    async fn authorize(&mut self, observer: &dyn RunObserver) -> anyhow::Result<OAuthToken>;

    async fn consent(&mut self, observer: &dyn RunObserver) -> anyhow::Result<OAuthToken>;
}

#[async_trait]
impl AccessTokenSource for CredentialStore {
    async fn authorize(&mut self, observer: &dyn RunObserver) -> anyhow::Result<OAuthToken> {
        CredentialStore::authorize(self, observer).await
    }

    async fn consent(&mut self, observer: &dyn RunObserver) -> anyhow::Result<OAuthToken> {
        CredentialStore::consent(self, observer).await
    }
}

fn generate_code_verifier() -> String {
    let mut rng = rand::rng();
    (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(96)
        .map(char::from)
        .collect::<String>()
}

struct OAuthCallback {
    code: String,
    state: String,
}

// Each connection is served on its own task so an idle preconnect cannot hold
// up the redirect. Requests other than the callback (favicon etc.) get a 404.
async fn wait_for_oauth_callback(
    listener: &TcpListener,
    port: u16,
) -> anyhow::Result<OAuthCallback> {
    let (tx, mut rx) = mpsc::channel(1);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("failed to accept OAuth callback connection")?;
                tokio::spawn(serve_callback_connection(stream, port, tx.clone()));
            }
            Some(callback) = rx.recv() => return callback,
        }
    }
}

async fn serve_callback_connection(
    mut stream: TcpStream,
    port: u16,
    tx: mpsc::Sender<anyhow::Result<OAuthCallback>>,
) {
    let mut buffer = vec![0u8; 16_384];
    let read = match tokio::time::timeout(CALLBACK_READ_TIMEOUT, stream.read(&mut buffer)).await {
        Ok(Ok(read)) if read > 0 => read,
        _ => return,
    };
    let request = String::from_utf8_lossy(&buffer[..read]);

    let Some(callback) = parse_callback_request(&request, port) else {
        let _ = stream.write_all(NOT_FOUND.as_bytes()).await;
        return;
    };

    let html = match &callback {
        Ok(_) => "<html><body><h3>Authorization complete.</h3><p>You can close this window.</p></body></html>",
        Err(_) => "<html><body><h3>Authorization was not granted.</h3></body></html>",
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        html.len(),
        html
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;

    let _ = tx.send(callback).await;
}

// `None` when the request is not a redirect to the callback path.
fn parse_callback_request(request: &str, port: u16) -> Option<anyhow::Result<OAuthCallback>> {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))?;
    let parsed = Url::parse(&format!("http://localhost:{port}{path}")).ok()?;
    if parsed.path() != CALLBACK_PATH {
        return None;
    }

    let mut code = String::new();
    let mut state = String::new();
    let mut error = None;
    for (k, v) in parsed.query_pairs() {
        match k.as_ref() {
            "code" => code = v.to_string(),
            "state" => state = v.to_string(),
            "error" => error = Some(v.to_string()),
            _ => {}
        }
    }

    match error {
        Some(error) => Some(Err(anyhow::anyhow!("authorization denied: {error}"))),
        None if code.is_empty() => None,
        None => Some(Ok(OAuthCallback { code, state })),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::core::observer::testing::RecordingObserver;

    fn secrets() -> ClientSecrets {
        ClientSecrets {
            client_id: "client-123.apps.googleusercontent.com".to_string(),
            client_secret: "shh".to_string(),
        }
    }

    fn http() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn config(token_path: PathBuf, port: u16, timeout: Duration) -> CredentialConfig {
        CredentialConfig {
            token_path,
            callback_port: port,
            consent_timeout: timeout,
            open_browser: false,
        }
    }

    struct ConsentRelay {
        urls: Mutex<Option<mpsc::UnboundedSender<String>>>,
        inner: RecordingObserver,
    }

    impl RunObserver for ConsentRelay {
        fn on_event(&self, event: &RunEvent) {
            if let RunEvent::ConsentRequired { url } = event {
                if let Some(tx) = self.urls.lock().unwrap().as_ref() {
                    let _ = tx.send(url.clone());
                }
            }
            self.inner.on_event(event);
        }
    }

    async fn fake_token_endpoint(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buffer = vec![0u8; 16_384];
            let _ = stream.read(&mut buffer).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
        });
        format!("http://{addr}/token")
    }

    fn write_token(path: &Path, access_token: &str, expires_in: chrono::Duration) {
        let token = OAuthToken {
            access_token: access_token.to_string(),
            refresh_token: Some("1//refresh".to_string()),
            expires_at_utc: Utc::now() + expires_in,
            scope: Some(DRIVE_FILE_SCOPE.to_string()),
        };
        std::fs::write(path, serde_json::to_string(&token).unwrap()).unwrap();
    }

    fn relay() -> (ConsentRelay, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = ConsentRelay {
            urls: Mutex::new(Some(tx)),
            inner: RecordingObserver::default(),
        };
        (observer, rx)
    }

    fn query_value(url: &Url, key: &str) -> String {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.to_string())
            .unwrap()
    }

    const FRESH_TOKEN: &str = r#"{"access_token":"ya29.fresh","refresh_token":"1//new","expires_in":3599,"scope":"https://www.googleapis.com/auth/drive.file"}"#;

    #[tokio::test]
    async fn valid_persisted_token_skips_consent() {
        let temp = tempfile::tempdir().unwrap();
        let token_path = temp.path().join("token.json");
        write_token(&token_path, "ya29.cached", chrono::Duration::hours(1));

        let mut store = CredentialStore::new(
            http(),
            secrets(),
            config(token_path, free_port(), Duration::from_millis(50)),
        );
        let observer = RecordingObserver::default();

        let loaded = store.authorize(&observer).await.unwrap();

        assert_eq!(loaded.access_token, "ya29.cached");
        assert_eq!(store.state(), CredentialState::Ready);
        assert_eq!(observer.events(), vec![RunEvent::TokenReused]);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_without_consent() {
        let temp = tempfile::tempdir().unwrap();
        let token_path = temp.path().join("token.json");
        write_token(&token_path, "ya29.stale", chrono::Duration::minutes(-5));
        let token_endpoint = fake_token_endpoint(
            "200 OK",
            r#"{"access_token":"ya29.refreshed","expires_in":3599}"#,
        )
        .await;

        let mut store = CredentialStore::new(
            http(),
            secrets(),
            config(token_path.clone(), free_port(), Duration::from_millis(50)),
        )
        .with_endpoints("https://accounts.example.test/auth", &token_endpoint);
        let observer = RecordingObserver::default();

        let token = store.authorize(&observer).await.unwrap();

        assert_eq!(token.access_token, "ya29.refreshed");
        assert_eq!(store.state(), CredentialState::Ready);
        assert_eq!(observer.events(), vec![RunEvent::TokenRefreshed]);

        let persisted: OAuthToken =
            serde_json::from_str(&std::fs::read_to_string(&token_path).unwrap()).unwrap();
        assert_eq!(persisted.access_token, "ya29.refreshed");
        assert_eq!(persisted.refresh_token.as_deref(), Some("1//refresh"));
        assert!(persisted.expires_at_utc > Utc::now());
    }

    #[tokio::test]
    async fn rejected_refresh_falls_back_to_consent() {
        let temp = tempfile::tempdir().unwrap();
        let token_path = temp.path().join("token.json");
        write_token(&token_path, "ya29.stale", chrono::Duration::minutes(-5));
        let before = std::fs::read_to_string(&token_path).unwrap();
        let token_endpoint =
            fake_token_endpoint("400 Bad Request", r#"{"error":"invalid_grant"}"#).await;

        let mut store = CredentialStore::new(
            http(),
            secrets(),
            config(token_path.clone(), free_port(), Duration::from_millis(50)),
        )
        .with_endpoints("https://accounts.example.test/auth", &token_endpoint);
        let observer = RecordingObserver::default();

        let err = store.authorize(&observer).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::CredentialTimeout { .. })
        ));
        let events = observer.events();
        assert!(!events.contains(&RunEvent::TokenRefreshed));
        assert!(matches!(events[0], RunEvent::ConsentRequired { .. }));
        assert_eq!(std::fs::read_to_string(&token_path).unwrap(), before);
    }

    #[tokio::test]
    async fn consent_timeout_writes_nothing_and_releases_port() {
        let temp = tempfile::tempdir().unwrap();
        let token_path = temp.path().join("token.json");
        let port = free_port();
        let mut store = CredentialStore::new(
            http(),
            secrets(),
            config(token_path.clone(), port, Duration::from_millis(50)),
        );
        let observer = RecordingObserver::default();

        let err = store.authorize(&observer).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::CredentialTimeout { .. })
        ));
        assert_eq!(store.state(), CredentialState::TimedOut);
        assert!(!token_path.exists());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
        assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    #[tokio::test]
    async fn consent_exchanges_code_and_persists_token() {
        let temp = tempfile::tempdir().unwrap();
        let token_path = temp.path().join("token.json");
        let port = free_port();
        let token_endpoint = fake_token_endpoint("200 OK", FRESH_TOKEN).await;

        let mut store = CredentialStore::new(
            http(),
            secrets(),
            config(token_path.clone(), port, Duration::from_secs(5)),
        )
        .with_endpoints("https://accounts.example.test/auth", &token_endpoint);
        let (observer, mut rx) = relay();

        let browser = tokio::spawn(async move {
            let consent_url = Url::parse(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(query_value(&consent_url, "scope"), DRIVE_FILE_SCOPE);
            let state = query_value(&consent_url, "state");

            let client = http();
            let favicon = client
                .get(format!("http://127.0.0.1:{port}/favicon.ico"))
                .send()
                .await
                .unwrap();
            assert_eq!(favicon.status().as_u16(), 404);

            client
                .get(format!(
                    "http://127.0.0.1:{port}/callback?code=4/abc&state={state}"
                ))
                .send()
                .await
                .unwrap()
                .status()
        });

        let token = store.authorize(&observer).await.unwrap();
        assert!(browser.await.unwrap().is_success());

        assert_eq!(token.access_token, "ya29.fresh");
        assert_eq!(store.state(), CredentialState::Ready);

        let persisted: OAuthToken =
            serde_json::from_str(&std::fs::read_to_string(&token_path).unwrap()).unwrap();
        assert_eq!(persisted.refresh_token.as_deref(), Some("1//new"));
        assert!(observer
            .inner
            .events()
            .contains(&RunEvent::TokenPersisted { path: token_path }));
    }

    #[tokio::test]
    async fn idle_preconnect_does_not_block_the_redirect() {
        let temp = tempfile::tempdir().unwrap();
        let token_path = temp.path().join("token.json");
        let port = free_port();
        let token_endpoint = fake_token_endpoint("200 OK", FRESH_TOKEN).await;

        let mut store = CredentialStore::new(
            http(),
            secrets(),
            config(token_path.clone(), port, Duration::from_secs(2)),
        )
        .with_endpoints("https://accounts.example.test/auth", &token_endpoint);
        let (observer, mut rx) = relay();

        let browser = tokio::spawn(async move {
            let consent_url = Url::parse(&rx.recv().await.unwrap()).unwrap();
            let state = query_value(&consent_url, "state");

            // Opened and never written to, like a browser speculative connection.
            let idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;

            let status = http()
                .get(format!(
                    "http://127.0.0.1:{port}/callback?code=4/abc&state={state}"
                ))
                .send()
                .await
                .unwrap()
                .status();
            drop(idle);
            status
        });

        let token = store.authorize(&observer).await.unwrap();

        assert!(browser.await.unwrap().is_success());
        assert_eq!(token.access_token, "ya29.fresh");
        assert!(token_path.exists());
    }

    #[tokio::test]
    async fn state_mismatch_resets_the_store_and_writes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let token_path = temp.path().join("token.json");
        let port = free_port();

        let mut store = CredentialStore::new(
            http(),
            secrets(),
            config(token_path.clone(), port, Duration::from_secs(5)),
        );
        let (observer, mut rx) = relay();

        let browser = tokio::spawn(async move {
            rx.recv().await.unwrap();
            http()
                .get(format!(
                    "http://127.0.0.1:{port}/callback?code=4/abc&state=forged"
                ))
                .send()
                .await
                .unwrap()
                .status()
        });

        let err = store.authorize(&observer).await.unwrap_err();
        browser.await.unwrap();

        assert!(err.to_string().contains("state mismatch"));
        assert_eq!(store.state(), CredentialState::NoToken);
        assert!(!token_path.exists());
    }

    #[tokio::test]
    async fn denied_consent_resets_the_store() {
        let temp = tempfile::tempdir().unwrap();
        let port = free_port();
        let mut store = CredentialStore::new(
            http(),
            secrets(),
            config(temp.path().join("token.json"), port, Duration::from_secs(5)),
        );
        let (observer, mut rx) = relay();

        let browser = tokio::spawn(async move {
            rx.recv().await.unwrap();
            http()
                .get(format!("http://127.0.0.1:{port}/callback?error=access_denied"))
                .send()
                .await
                .unwrap()
                .status()
        });

        let err = store.authorize(&observer).await.unwrap_err();
        browser.await.unwrap();

        assert!(err.to_string().contains("access_denied"));
        assert_eq!(store.state(), CredentialState::NoToken);
    }

    #[tokio::test]
    async fn credentials_file_accepts_installed_or_web_clients() {
        let temp = tempfile::tempdir().unwrap();
        let installed = temp.path().join("installed.json");
        let web = temp.path().join("web.json");
        std::fs::write(
            &installed,
            r#"{"installed":{"client_id":"a","client_secret":"b","redirect_uris":["http://localhost"]}}"#,
        )
        .unwrap();
        std::fs::write(&web, r#"{"web":{"client_id":"c","client_secret":"d"}}"#).unwrap();

        assert_eq!(load_client_secrets(&installed).await.unwrap().client_id, "a");
        assert_eq!(load_client_secrets(&web).await.unwrap().client_secret, "d");

        let missing = load_client_secrets(&temp.path().join("nope.json"))
            .await
            .unwrap_err();
        assert!(matches!(
            missing.downcast_ref::<CoreError>(),
            Some(CoreError::MissingPrerequisite(_))
        ));
    }
}

//! OAuth credential lifecycle for the mailbox: load the persisted
//! authorized-user credential, refresh it when expired, and fall back to an
//! interactive authorization-code + PKCE grant caught on a loopback listener.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, RedirectUrl,
    RefreshToken, Scope, TokenResponse, TokenUrl,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tiny_http::{Response, Server};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::AuthError;

/// Read, label-modify and send access.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.modify",
];

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// How long the loopback listener waits for the browser redirect.
const CONSENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Tokens expiring within this window are treated as expired.
const EXPIRY_SKEW: chrono::Duration = chrono::Duration::seconds(60);

/// Anything that can hand out a currently valid access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<SecretString, AuthError>;
}

/// Persisted authorized-user credential (`token.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl StoredCredential {
    /// A credential without an expiry is assumed valid.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && self.expiry.is_none_or(|expiry| expiry - EXPIRY_SKEW > now)
    }

    pub fn load(path: &Path) -> Result<Option<Self>, AuthError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AuthError::InvalidCredential {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| AuthError::InvalidCredential {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    pub fn save(&self, path: &Path) -> Result<(), AuthError> {
        let persist_err = |reason: String| AuthError::PersistFailed {
            path: path.display().to_string(),
            reason,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| persist_err(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| persist_err(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| persist_err(e.to_string()))
    }
}

/// Client secret file downloaded from the provider console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    #[serde(default)]
    installed: Option<ClientSecrets>,
    #[serde(default)]
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Accepts both "installed" and "web" application layouts.
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let text = std::fs::read_to_string(path).map_err(|_| AuthError::MissingClientSecret {
            path: path.display().to_string(),
        })?;
        let file: ClientSecretsFile =
            serde_json::from_str(&text).map_err(|e| AuthError::InvalidCredential {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        file.installed
            .or(file.web)
            .ok_or_else(|| AuthError::InvalidCredential {
                path: path.display().to_string(),
                reason: "expected an \"installed\" or \"web\" section".into(),
            })
    }
}

/// Outcome of one request hitting the loopback listener.
#[derive(Debug, PartialEq, Eq)]
enum Callback {
    Code(String),
    Denied(String),
    Ignored,
}

fn parse_callback(path_and_query: &str, expected_state: &str) -> Callback {
    let Ok(url) = Url::parse(&format!("http://127.0.0.1{path_and_query}")) else {
        return Callback::Ignored;
    };
    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Callback::Denied(value.into_owned()),
            _ => {}
        }
    }
    match (code, state) {
        (Some(code), Some(state)) if state == expected_state => Callback::Code(code),
        _ => Callback::Ignored,
    }
}

fn wait_for_code(server: Server, expected_state: &str) -> Result<String, AuthError> {
    let deadline = Instant::now() + CONSENT_TIMEOUT;
    while Instant::now() < deadline {
        let Ok(Some(request)) = server.recv_timeout(Duration::from_millis(500)) else {
            continue;
        };
        match parse_callback(request.url(), expected_state) {
            Callback::Code(code) => {
                let _ = request.respond(Response::from_string(
                    "Authorization received. You can close this tab.",
                ));
                return Ok(code);
            }
            Callback::Denied(reason) => {
                let _ = request.respond(Response::from_string("Authorization denied."));
                return Err(AuthError::GrantFailed(format!("consent denied: {reason}")));
            }
            Callback::Ignored => {
                let _ = request.respond(Response::from_string("Waiting for authorization."));
            }
        }
    }
    Err(AuthError::GrantFailed(format!(
        "no authorization received within {}s",
        CONSENT_TIMEOUT.as_secs()
    )))
}

/// File-backed credential manager.
///
/// Refresh and interactive grant run under `renew_lock`, so concurrent
/// callers holding an expired token wait for one renewal and then reuse it.
pub struct OAuthManager {
    credentials_path: PathBuf,
    token_path: PathBuf,
    renew_lock: Mutex<()>,
}

impl OAuthManager {
    pub fn new(credentials_path: impl Into<PathBuf>, token_path: impl Into<PathBuf>) -> Self {
        Self {
            credentials_path: credentials_path.into(),
            token_path: token_path.into(),
            renew_lock: Mutex::new(()),
        }
    }

    fn valid_stored(&self) -> Result<Option<StoredCredential>, AuthError> {
        Ok(StoredCredential::load(&self.token_path)?.filter(|c| c.is_valid_at(Utc::now())))
    }

    fn client(
        client_id: &str,
        client_secret: Option<&str>,
        auth_uri: &str,
        token_uri: &str,
    ) -> Result<BasicClient, AuthError> {
        let auth_url = AuthUrl::new(auth_uri.to_string())
            .map_err(|e| AuthError::GrantFailed(format!("bad auth uri: {e}")))?;
        let token_url = TokenUrl::new(token_uri.to_string())
            .map_err(|e| AuthError::GrantFailed(format!("bad token uri: {e}")))?;
        Ok(BasicClient::new(
            ClientId::new(client_id.to_string()),
            client_secret.map(|s| ClientSecret::new(s.to_string())),
            auth_url,
            Some(token_url),
        ))
    }

    async fn refresh(&self, stored: &StoredCredential) -> Result<StoredCredential, AuthError> {
        let refresh_token = stored
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::RefreshFailed("no refresh token stored".into()))?;
        let client = Self::client(
            &stored.client_id,
            stored.client_secret.as_deref(),
            DEFAULT_AUTH_URI,
            &stored.token_uri,
        )?;
        let token = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        let mut refreshed = stored.clone();
        refreshed.token = token.access_token().secret().to_string();
        // Refresh responses usually omit the refresh token; keep the old one.
        if let Some(rt) = token.refresh_token() {
            refreshed.refresh_token = Some(rt.secret().to_string());
        }
        refreshed.expiry = token
            .expires_in()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);
        Ok(refreshed)
    }

    async fn interactive_grant(&self) -> Result<StoredCredential, AuthError> {
        let secrets = ClientSecrets::load(&self.credentials_path)?;
        let client = Self::client(
            &secrets.client_id,
            secrets.client_secret.as_deref(),
            &secrets.auth_uri,
            &secrets.token_uri,
        )?;

        // Listen before handing out the URL so the redirect cannot race us.
        let bind_err = |e: String| AuthError::GrantFailed(format!("cannot bind callback listener: {e}"));
        let listener = std::net::TcpListener::bind("127.0.0.1:0").map_err(|e| bind_err(e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| bind_err(e.to_string()))?
            .port();
        let server = Server::from_listener(listener, None).map_err(|e| bind_err(e.to_string()))?;
        let redirect = RedirectUrl::new(format!("http://127.0.0.1:{port}"))
            .map_err(|e| AuthError::GrantFailed(e.to_string()))?;
        let client = client.set_redirect_uri(redirect);

        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, csrf) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(SCOPES.iter().map(|s| Scope::new((*s).to_string())))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(challenge)
            .url();

        info!(url = %auth_url, "Open this URL to authorize mailbox access");
        if let Err(e) = open::that(auth_url.as_str()) {
            warn!(error = %e, "Could not open browser automatically");
        }

        let expected_state = csrf.secret().clone();
        let code = tokio::task::spawn_blocking(move || wait_for_code(server, &expected_state))
            .await
            .map_err(|e| AuthError::GrantFailed(format!("callback listener panicked: {e}")))??;

        let token = client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(verifier)
            .request_async(async_http_client)
            .await
            .map_err(|e| AuthError::GrantFailed(e.to_string()))?;

        Ok(StoredCredential {
            token: token.access_token().secret().to_string(),
            refresh_token: token.refresh_token().map(|rt| rt.secret().to_string()),
            token_uri: secrets.token_uri,
            client_id: secrets.client_id,
            client_secret: secrets.client_secret,
            scopes: SCOPES.iter().map(|s| (*s).to_string()).collect(),
            expiry: token
                .expires_in()
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| Utc::now() + d),
        })
    }
}

#[async_trait]
impl TokenSource for OAuthManager {
    async fn access_token(&self) -> Result<SecretString, AuthError> {
        if let Some(valid) = self.valid_stored()? {
            return Ok(SecretString::from(valid.token));
        }

        let _renewing = self.renew_lock.lock().await;
        // Another caller may have renewed while we waited.
        if let Some(valid) = self.valid_stored()? {
            debug!("Using credential renewed by a concurrent caller");
            return Ok(SecretString::from(valid.token));
        }

        if let Some(stored) = StoredCredential::load(&self.token_path)? {
            if stored.refresh_token.is_some() {
                match self.refresh(&stored).await {
                    Ok(refreshed) => {
                        refreshed.save(&self.token_path)?;
                        info!("Refreshed mailbox credential");
                        return Ok(SecretString::from(refreshed.token));
                    }
                    Err(e) => warn!(error = %e, "Refresh failed, starting interactive grant"),
                }
            }
        }

        let granted = self.interactive_grant().await?;
        granted.save(&self.token_path)?;
        info!(path = %self.token_path.display(), "Stored new mailbox credential");
        Ok(SecretString::from(granted.token))
    }
}

//! Identity resolution — credential verification with guest fallback.
//!
//! ARCHITECTURE
//! ============
//! The handshake carries either a bearer credential or a guest hint.
//! Credentials are verified against an external identity service behind
//! the `VerifyIdentity` trait object (HTTP in production, mocks in tests).
//!
//! ERROR HANDLING
//! ==============
//! `resolve` never fails. Any verification failure — expired or malformed
//! credential, unreachable service, timeout — demotes the connection to a
//! synthesized guest identity instead of rejecting it. Availability over
//! strictness: a whiteboard session with an anonymous cursor beats a
//! refused connection.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::services::presence;

// =============================================================================
// TYPES
// =============================================================================

/// Identity hints supplied with the websocket upgrade request.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub credential: Option<String>,
    pub guest_id: Option<String>,
    pub guest_name: Option<String>,
}

impl Handshake {
    /// Read handshake fields from the upgrade URL's query parameters.
    #[must_use]
    pub fn from_query(params: &HashMap<String, String>) -> Self {
        Self {
            credential: params.get("credential").cloned(),
            guest_id: params.get("guestId").cloned(),
            guest_name: params.get("guestName").cloned(),
        }
    }
}

/// Resolved identity of a connection. Fixed for the transport session.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub is_guest: bool,
    pub color: String,
}

/// Successful verification result from the identity service.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedSubject {
    pub subject_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity service request failed: {0}")]
    Request(String),
    #[error("identity service rejected credential: {0}")]
    Rejected(String),
}

// =============================================================================
// VERIFIER
// =============================================================================

/// Credential verification boundary. Object-safe so `AppState` can hold
/// production and test implementations interchangeably.
#[async_trait]
pub trait VerifyIdentity: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<VerifiedSubject, IdentityError>;
}

/// Identity service configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub verify_url: String,
    pub verify_timeout: Duration,
}

impl IdentityConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

    /// Load from `IDENTITY_VERIFY_URL` and `IDENTITY_VERIFY_TIMEOUT_MS`.
    /// Returns `None` if the URL is missing (verification disabled; every
    /// connection becomes a guest).
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let verify_url = std::env::var("IDENTITY_VERIFY_URL").ok()?;
        let verify_timeout = std::env::var("IDENTITY_VERIFY_TIMEOUT_MS")
            .ok()
            .and_then(|ms| ms.parse().ok())
            .map_or(Self::DEFAULT_TIMEOUT, Duration::from_millis);
        Some(Self { verify_url, verify_timeout })
    }
}

/// Production verifier: POSTs the credential to the identity service.
pub struct HttpVerifier {
    client: reqwest::Client,
    verify_url: String,
}

impl HttpVerifier {
    #[must_use]
    pub fn new(config: &IdentityConfig) -> Self {
        Self { client: reqwest::Client::new(), verify_url: config.verify_url.clone() }
    }
}

#[async_trait]
impl VerifyIdentity for HttpVerifier {
    async fn verify(&self, credential: &str) -> Result<VerifiedSubject, IdentityError> {
        let resp = self
            .client
            .post(&self.verify_url)
            .json(&serde_json::json!({ "credential": credential }))
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(IdentityError::Rejected(format!("{status}: {body}")));
        }

        resp.json::<VerifiedSubject>()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))
    }
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Resolve a handshake into an identity. Infallible: every failure path
/// lands on a guest identity.
pub async fn resolve(
    verifier: Option<&dyn VerifyIdentity>,
    verify_timeout: Duration,
    handshake: &Handshake,
    connection_id: Uuid,
) -> Identity {
    let credential = handshake
        .credential
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    if let Some(credential) = credential {
        let Some(verifier) = verifier else {
            debug!(%connection_id, "identity service not configured; continuing as guest");
            return guest(handshake, connection_id);
        };
        match tokio::time::timeout(verify_timeout, verifier.verify(credential)).await {
            Ok(Ok(subject)) => return authenticated(subject),
            Ok(Err(e)) => {
                warn!(%connection_id, error = %e, "identity verification failed; continuing as guest");
            }
            Err(_) => {
                warn!(
                    %connection_id,
                    timeout_ms = verify_timeout.as_millis(),
                    "identity verification timed out; continuing as guest"
                );
            }
        }
    }

    guest(handshake, connection_id)
}

fn authenticated(subject: VerifiedSubject) -> Identity {
    let display_name = subject
        .display_name
        .filter(|name| !name.trim().is_empty())
        .or_else(|| subject.email.clone())
        .unwrap_or_else(|| format!("User {}", tail(&subject.subject_id)));
    Identity {
        color: presence::color_for(&subject.subject_id),
        user_id: subject.subject_id,
        display_name,
        email: subject.email,
        avatar_url: subject.avatar_url,
        is_guest: false,
    }
}

fn guest(handshake: &Handshake, connection_id: Uuid) -> Identity {
    let user_id = handshake
        .guest_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(|| format!("guest-{connection_id}"), str::to_string);
    let display_name = handshake
        .guest_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map_or_else(|| format!("Guest {}", tail(&user_id)), str::to_string);
    Identity {
        color: presence::color_for(&user_id),
        user_id,
        display_name,
        email: None,
        avatar_url: None,
        is_guest: true,
    }
}

/// Last four characters of an id, for synthesized display names.
fn tail(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    chars[chars.len().saturating_sub(4)..].iter().collect()
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;

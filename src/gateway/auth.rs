//! Shared auth tokens
//!
//! Tokens are versioned and HMAC-signed:
//! `v1.{urlsafe-base64(claims json)}.{nonce}.{hex hmac-sha256}` where the MAC
//! covers `{payload}.{nonce}`. Claims serialise with sorted keys.

use crate::config::{ConfigError, Environment, GatewayConfig};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_VERSION: &str = "v1";
const NONCE_BYTES: usize = 8;
const GENERATED_SECRET_BYTES: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("Missing or invalid authorization header")]
    MissingHeader,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Unsupported token version '{0}'")]
    UnsupportedVersion(String),

    #[error("Invalid or expired token")]
    InvalidSignature,

    #[error("Invalid or expired token")]
    Expired,

    #[error("Signing key rejected")]
    InvalidKey,
}

/// Roles known to the permission table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
    Operator,
    Researcher,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "USER" => Some(Role::User),
            "ADMIN" => Some(Role::Admin),
            "OPERATOR" => Some(Role::Operator),
            "RESEARCHER" => Some(Role::Researcher),
            _ => None,
        }
    }
}

use Role::{Admin, Operator, Researcher, User};

/// Roles allowed per initiative, keyed by project code
const PROJECT_PERMISSIONS: [(&str, &str, &[Role]); 13] = [
    ("P01", "P01_FOAM_HOMES", &[User, Admin, Operator]),
    ("P02", "P02_SYMBIOSIS", &[User, Admin, Researcher]),
    ("P03", "P03_FARM", &[User, Admin, Operator]),
    ("P04", "P04_HEMP_LAB", &[Admin, Researcher]),
    ("P05", "P05_GREENHOUSE", &[User, Admin, Researcher]),
    ("P06", "P06_REACTOR", &[Admin, Researcher]),
    ("P07", "P07_BIOREACTOR", &[Admin, Operator, Researcher]),
    ("P08", "P08_BULB", &[User, Admin, Operator]),
    ("P09", "P09_AWG", &[User, Admin, Operator]),
    ("P10", "P10_GEOTHERMAL", &[User, Admin, Operator]),
    ("P11", "P11_RESERVED", &[Admin]),
    ("P12", "P12_SOLAR", &[User, Admin, Operator]),
    ("P13", "P13_HYDRO", &[User, Admin, Operator]),
];

/// Roles permitted on a project, accepting either `P09` or `P09_AWG`
pub fn roles_for_project(project: &str) -> &'static [Role] {
    PROJECT_PERMISSIONS
        .iter()
        .find(|(code, key, _)| *code == project || *key == project)
        .map(|(_, _, roles)| *roles)
        .unwrap_or(&[])
}

/// Signed token payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub project_access: Vec<String>,
    pub issued_at: String,
    pub exp: String,
}

impl Claims {
    pub fn role(&self) -> Option<Role> {
        Role::parse(&self.role)
    }

    /// Admins see everything; everyone else needs the code in `project_access`
    pub fn has_project_access(&self, project_code: &str) -> bool {
        self.role() == Some(Role::Admin) || self.project_access.iter().any(|p| p == project_code)
    }

    /// Role-based check against the per-project permission table
    pub fn role_permits(&self, project: &str) -> bool {
        self.role()
            .map(|role| roles_for_project(project).contains(&role))
            .unwrap_or(false)
    }

    pub fn expires_at(&self) -> Result<DateTime<Utc>, AuthError> {
        DateTime::parse_from_rfc3339(&self.exp)
            .map(|exp| exp.with_timezone(&Utc))
            .map_err(|_| AuthError::Malformed(format!("unreadable expiry '{}'", self.exp)))
    }
}

/// Token issued by [`TokenSigner::issue`]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in_hours: i64,
    pub scopes: Vec<String>,
    pub issued_at: String,
    pub expires_at: String,
}

/// Issues and verifies tokens with one HMAC secret
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl_hours: i64,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("secret", &"***")
            .field("ttl_hours", &self.ttl_hours)
            .finish()
    }
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>, ttl_hours: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl_hours,
        }
    }

    /// Secret from the configured env var. Production refuses to start
    /// without one; development falls back to a random per-process secret.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let secret = match config.get_token_secret() {
            Ok(secret) => secret.into_bytes(),
            Err(e) if config.server.environment == Environment::Production => {
                return Err(ConfigError::InvalidConfig(format!(
                    "{} must be set in production ({e})",
                    config.auth.secret_env
                )));
            }
            Err(_) => {
                warn!(
                    env_var = %config.auth.secret_env,
                    "Token secret not set; using a random per-process secret"
                );
                generate_secret()
            }
        };
        Ok(Self::new(secret, config.auth.token_ttl_hours))
    }

    pub fn ttl_hours(&self) -> i64 {
        self.ttl_hours
    }

    pub fn issue(
        &self,
        user_id: &str,
        email: &str,
        role: &str,
        project_access: Vec<String>,
    ) -> Result<IssuedToken, AuthError> {
        self.issue_at(user_id, email, role, project_access, Utc::now())
    }

    /// Issue a token as of `now`, truncated to whole seconds
    pub fn issue_at(
        &self,
        user_id: &str,
        email: &str,
        role: &str,
        project_access: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let issued_at = now - Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos()));
        let expires_at = issued_at + Duration::hours(self.ttl_hours);

        let claims = Claims {
            user_id: user_id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            project_access: project_access.clone(),
            issued_at: iso_seconds(issued_at),
            exp: iso_seconds(expires_at),
        };

        let token = self.sign(&claims)?;
        debug!(user_id, role, "Issued auth token");

        Ok(IssuedToken {
            token,
            expires_in_hours: self.ttl_hours,
            scopes: project_access,
            issued_at: claims.issued_at,
            expires_at: claims.exp,
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        // A Value round trip sorts the keys
        let value = serde_json::to_value(claims).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let serialized =
            serde_json::to_string(&value).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let payload = URL_SAFE.encode(serialized.as_bytes());

        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce = URL_SAFE_NO_PAD.encode(nonce);

        let message = format!("{payload}.{nonce}");
        let signature = hex::encode(self.mac(&message)?.finalize().into_bytes());
        Ok(format!("{TOKEN_VERSION}.{message}.{signature}"))
    }

    fn mac(&self, message: &str) -> Result<HmacSha256, AuthError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| AuthError::InvalidKey)?;
        mac.update(message.as_bytes());
        Ok(mac)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, Utc::now())
    }

    /// Check signature, then expiry as of `now`
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let parts: Vec<&str> = token.trim().split('.').collect();
        let [version, payload, nonce, signature] = parts.as_slice() else {
            return Err(AuthError::Malformed(format!(
                "expected 4 segments, got {}",
                parts.len()
            )));
        };

        if *version != TOKEN_VERSION {
            return Err(AuthError::UnsupportedVersion(version.to_string()));
        }

        let signature = hex::decode(signature).map_err(|_| AuthError::InvalidSignature)?;
        self.mac(&format!("{payload}.{nonce}"))?
            .verify_slice(&signature)
            .map_err(|_| AuthError::InvalidSignature)?;

        let decoded = URL_SAFE
            .decode(payload)
            .or_else(|_| URL_SAFE_NO_PAD.decode(payload))
            .map_err(|e| AuthError::Malformed(format!("payload is not base64: {e}")))?;
        let claims: Claims = serde_json::from_slice(&decoded)
            .map_err(|e| AuthError::Malformed(format!("payload is not claims json: {e}")))?;

        if claims.expires_at()? <= now {
            return Err(AuthError::Expired);
        }

        Ok(claims)
    }
}

/// Token from an `Authorization: Bearer ...` header value
pub fn bearer_token(header: &str) -> Result<&str, AuthError> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingHeader)
}

fn iso_seconds(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn generate_secret() -> Vec<u8> {
    let mut bytes = [0u8; GENERATED_SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes).into_bytes()
}

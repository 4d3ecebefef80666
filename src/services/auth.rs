// 🔐 Authentication - argon2 passwords, HS256 access tokens, rotating refresh tokens
//
// Access tokens are short lived JWTs. Refresh tokens are opaque random
// strings; only their SHA-256 is stored. Every refresh revokes the token it
// was given and issues a new pair.

use crate::config::Config;
use crate::db::{now_rfc3339, record_event, sha256_hex};
use crate::error::{AkigError, Result};
use crate::models::user::{find_user_by_email, get_user, touch_last_login};
use crate::models::{Role, User};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// PASSWORDS
// ============================================================================

pub fn hash_password(password: &str) -> Result<String> {
    if password.len() < 8 {
        return Err(AkigError::validation("password must be at least 8 characters"));
    }
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AkigError::Internal(format!("password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

/// False for a wrong password and for a malformed stored hash
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

// ============================================================================
// ACCESS TOKENS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub agency: i64,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64> {
        self.sub
            .parse()
            .map_err(|_| AkigError::Unauthorized("malformed token subject".to_string()))
    }

    pub fn has_role(&self, allowed: &[Role]) -> bool {
        allowed.contains(&self.role)
    }
}

/// Route guard: the caller's role must be one of `allowed`
pub fn require_role(claims: &Claims, allowed: &[Role]) -> Result<()> {
    if claims.has_role(allowed) {
        Ok(())
    } else {
        Err(AkigError::Forbidden(format!(
            "role {} is not allowed to do this",
            claims.role
        )))
    }
}

#[derive(Clone)]
pub struct AuthKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    pub access_ttl_secs: i64,
    pub refresh_ttl_days: i64,
}

impl AuthKeys {
    pub fn new(secret: &str, access_ttl_secs: i64, refresh_ttl_days: i64) -> Self {
        AuthKeys {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl_secs,
            refresh_ttl_days,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.require_jwt_secret()?,
            config.jwt_ttl_secs,
            config.refresh_ttl_days,
        ))
    }

    pub fn issue_access_token(&self, user: &User) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.to_string(),
            agency: user.agency_id,
            role: user.role,
            iat: now,
            exp: now + self.access_ttl_secs,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn decode_access_token(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))?;
        Ok(data.claims)
    }
}

// ============================================================================
// REFRESH TOKENS
// ============================================================================

fn new_refresh_token() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

fn store_refresh_token(conn: &Connection, user_id: i64, token: &str, ttl_days: i64) -> Result<()> {
    let expires_at = (Utc::now() + Duration::days(ttl_days)).to_rfc3339();
    conn.execute(
        "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) VALUES (?1, ?2, ?3)",
        params![user_id, sha256_hex(&[token]), expires_at],
    )?;
    Ok(())
}

/// Revoke a refresh token and return its owner. Unknown, revoked or expired
/// tokens are rejected.
fn consume_refresh_token(conn: &Connection, token: &str) -> Result<i64> {
    let token_hash = sha256_hex(&[token]);
    let row: Option<(i64, i64, String, Option<String>)> = conn
        .query_row(
            "SELECT id, user_id, expires_at, revoked_at FROM refresh_tokens WHERE token_hash = ?1",
            [&token_hash],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    let invalid = || AkigError::Unauthorized("invalid refresh token".to_string());
    let (id, user_id, expires_at, revoked_at) = row.ok_or_else(invalid)?;
    if revoked_at.is_some() {
        warn!(user_id, "revoked refresh token presented");
        return Err(invalid());
    }
    let expired = DateTime::parse_from_rfc3339(&expires_at)
        .map(|t| t.with_timezone(&Utc) <= Utc::now())
        .unwrap_or(true);
    if expired {
        return Err(invalid());
    }

    conn.execute(
        "UPDATE refresh_tokens SET revoked_at = ?1 WHERE id = ?2",
        params![now_rfc3339(), id],
    )?;
    Ok(user_id)
}

// ============================================================================
// SESSION FLOWS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: User,
}

fn issue_pair(conn: &Connection, keys: &AuthKeys, user: User) -> Result<TokenPair> {
    let refresh_token = new_refresh_token();
    store_refresh_token(conn, user.id, &refresh_token, keys.refresh_ttl_days)?;
    Ok(TokenPair {
        access_token: keys.issue_access_token(&user)?,
        refresh_token,
        token_type: "Bearer",
        expires_in: keys.access_ttl_secs,
        user,
    })
}

pub fn login(conn: &Connection, keys: &AuthKeys, email: &str, password: &str) -> Result<TokenPair> {
    let invalid = || AkigError::Unauthorized("invalid email or password".to_string());

    let user = find_user_by_email(conn, email)?.ok_or_else(invalid)?;
    if !user.active || !verify_password(password, &user.password_hash) {
        warn!(email = %user.email, "failed login");
        return Err(invalid());
    }

    let tx = conn.unchecked_transaction()?;
    touch_last_login(&tx, user.id)?;
    record_event(&tx, "user_login", "user", user.id, serde_json::json!({}), &user.email)?;
    let pair = issue_pair(&tx, keys, user)?;
    tx.commit()?;

    info!(user_id = pair.user.id, role = %pair.user.role, "user logged in");
    Ok(pair)
}

/// Trade a refresh token for a new pair; the old token stops working
pub fn refresh(conn: &Connection, keys: &AuthKeys, refresh_token: &str) -> Result<TokenPair> {
    let tx = conn.unchecked_transaction()?;
    let user_id = consume_refresh_token(&tx, refresh_token)?;
    let user = get_user(&tx, user_id)?;
    if !user.active {
        return Err(AkigError::Unauthorized("account disabled".to_string()));
    }
    let pair = issue_pair(&tx, keys, user)?;
    tx.commit()?;
    Ok(pair)
}

/// Revoke a refresh token. Logging out twice is not an error.
pub fn logout(conn: &Connection, refresh_token: &str) -> Result<()> {
    let revoked = conn.execute(
        "UPDATE refresh_tokens SET revoked_at = ?1 WHERE token_hash = ?2 AND revoked_at IS NULL",
        params![now_rfc3339(), sha256_hex(&[refresh_token])],
    )?;
    if revoked > 0 {
        info!("refresh token revoked");
    }
    Ok(())
}

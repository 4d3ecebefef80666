// 🔑 Session endpoints and the `AuthUser` extractor
//
// The access token is accepted as `Authorization: Bearer <jwt>` or from the
// `akig_token` cookie set at login.

use super::{ok, ApiResponse, ApiResult, AppState};
use crate::error::AkigError;
use crate::models::{Role, User};
use crate::services::auth::{self, require_role, Claims};
use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

pub const SESSION_COOKIE: &str = "akig_token";

/// Authenticated caller, decoded from a valid access token
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl AuthUser {
    pub fn agency(&self) -> i64 {
        self.0.agency
    }

    /// Name written to the audit trail
    pub fn actor(&self) -> String {
        format!("user:{}", self.0.sub)
    }

    pub fn require(&self, allowed: &[Role]) -> crate::error::Result<()> {
        require_role(&self.0, allowed)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.to_string())
        .filter(|token| !token.is_empty())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AkigError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .or_else(|| cookie_token(&parts.headers))
            .ok_or_else(|| AkigError::Unauthorized("missing access token".to_string()))?;
        let claims = state.keys.decode_access_token(&token)?;
        Ok(AuthUser(claims))
    }
}

fn session_cookie(state: &AppState, token: &str, max_age: i64) -> String {
    let secure = if state.config.cors_origin.starts_with("https://") {
        "; Secure"
    } else {
        ""
    };
    format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}{}",
        SESSION_COOKIE, token, max_age, secure
    )
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AkigError> {
    let pair = {
        let conn = state.db()?;
        auth::login(&conn, &state.keys, &request.email, &request.password)?
    };
    let cookie = session_cookie(&state, &pair.access_token, pair.expires_in);
    Ok(([(header::SET_COOKIE, cookie)], Json(ApiResponse::ok(pair))))
}

/// POST /api/auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AkigError> {
    let pair = {
        let conn = state.db()?;
        auth::refresh(&conn, &state.keys, &request.refresh_token)?
    };
    let cookie = session_cookie(&state, &pair.access_token, pair.expires_in);
    Ok(([(header::SET_COOKIE, cookie)], Json(ApiResponse::ok(pair))))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AkigError> {
    {
        let conn = state.db()?;
        auth::logout(&conn, &request.refresh_token)?;
    }
    let cookie = session_cookie(&state, "", 0);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(ApiResponse::ok(serde_json::json!({ "logged_out": true }))),
    ))
}

/// GET /api/auth/me
pub async fn me(State(state): State<AppState>, user: AuthUser) -> ApiResult<User> {
    let conn = state.db()?;
    let account = crate::models::user::get_user(&conn, user.0.user_id()?)?;
    if !account.active || account.agency_id != user.agency() {
        return Err(AkigError::Unauthorized("account disabled".to_string()));
    }
    ok(account)
}

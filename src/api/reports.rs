// 📊 Dashboards, risk overview and collection reminders

use super::auth::AuthUser;
use super::{ok, ApiResult, AppState};
use crate::models::notification::list_notifications as query_notifications;
use crate::models::{Notification, NotificationStatus, Role};
use crate::services::notifications::{self, GenerateSummary};
use crate::services::reports::{self, Dashboard, MonthlyPoint};
use crate::services::risk::{self, RiskOverview};
use axum::extract::{Path, Query, State};
use chrono::{Datelike, NaiveDate, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

pub async fn dashboard(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<DateQuery>,
) -> ApiResult<Dashboard> {
    user.require(Role::STAFF)?;
    let today = query.date.unwrap_or_else(|| Utc::now().date_naive());
    let conn = state.db()?;
    ok(reports::dashboard(&conn, user.agency(), today)?)
}

#[derive(Debug, Deserialize)]
pub struct YearQuery {
    pub year: Option<i32>,
}

pub async fn monthly(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<YearQuery>,
) -> ApiResult<Vec<MonthlyPoint>> {
    user.require(Role::STAFF)?;
    let year = query.year.unwrap_or_else(|| Utc::now().year());
    let conn = state.db()?;
    ok(reports::monthly_series(&conn, user.agency(), year)?)
}

pub async fn risk_overview(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<DateQuery>,
) -> ApiResult<RiskOverview> {
    user.require(Role::STAFF)?;
    let as_of = query.date.unwrap_or_else(|| Utc::now().date_naive());
    let conn = state.db()?;
    ok(risk::risk_overview(&conn, user.agency(), as_of)?)
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub status: Option<NotificationStatus>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Vec<Notification>> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(query_notifications(&conn, user.agency(), query.status)?)
}

pub async fn generate_notifications(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<YearQuery>,
) -> ApiResult<GenerateSummary> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(notifications::generate_reminders(&conn, user.agency(), query.year)?)
}

pub async fn mark_notification_sent(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Notification> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(notifications::mark_notification_sent(
        &conn,
        user.agency(),
        id,
        &user.actor(),
    )?)
}

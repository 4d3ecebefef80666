// 💰 Payments, bulk imports and arrears

use super::auth::AuthUser;
use super::{ok, ApiResponse, ApiResult, AppState};
use crate::db::{get_events_for_entity, Event};
use crate::error::AkigError;
use crate::models::import_run::{get_import_run, list_import_runs};
use crate::models::payment::{self, Payment, PaymentFilter};
use crate::models::{ImportRun, PageRequest, Paginated, Role};
use crate::services::arrears::{
    self, ArrearsFilter, ArrearsRow, ArrearsTotals, PaymentPlan, PlanRequest, RecomputeSummary,
};
use crate::services::deduplication::{review_duplicates, DuplicateMatch};
use crate::services::import::{import_payments, ImportFormat, ImportReport};
use crate::services::payments::{self as service, CreatePayment, OverduePayment, PaymentStats};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
pub const FILENAME_HEADER: &str = "x-filename";

// ============================================================================
// PAYMENTS
// ============================================================================

pub async fn list_payments(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<PaymentFilter>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Paginated<Payment>> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(payment::list_payments(&conn, user.agency(), &filter, page)?)
}

/// 201 for a new payment, 200 when an `Idempotency-Key` replay returns the original
pub async fn create_payment(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<CreatePayment>,
) -> Result<(StatusCode, Json<ApiResponse<Payment>>), AkigError> {
    user.require(Role::STAFF)?;
    let key = headers
        .get(IDEMPOTENCY_HEADER)
        .map(|v| {
            v.to_str()
                .map_err(|_| AkigError::validation("Idempotency-Key must be ASCII"))
        })
        .transpose()?
        .map(str::trim)
        .filter(|k| !k.is_empty());

    let outcome = {
        let conn = state.db()?;
        service::create_payment(&conn, user.agency(), &request, key, &user.actor())?
    };
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ApiResponse::ok(outcome.payment))))
}

pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Payment> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(payment::get_payment(&conn, user.agency(), id)?)
}

/// Audit trail of one payment, newest first
pub async fn payment_history(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Event>> {
    user.require(Role::FINANCE)?;
    let conn = state.db()?;
    let payment = payment::get_payment(&conn, user.agency(), id)?;
    ok(get_events_for_entity(&conn, "payment", &payment.id.to_string())?)
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Payment> {
    user.require(Role::FINANCE)?;
    let conn = state.db()?;
    ok(service::confirm_payment(&conn, user.agency(), id, &user.actor())?)
}

pub async fn fail_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Payment> {
    user.require(Role::FINANCE)?;
    let conn = state.db()?;
    ok(service::fail_payment(&conn, user.agency(), id, &user.actor())?)
}

pub async fn delete_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<serde_json::Value> {
    user.require(Role::FINANCE)?;
    let conn = state.db()?;
    service::delete_payment(&conn, user.agency(), id, &user.actor())?;
    ok(serde_json::json!({ "deleted": id }))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub async fn payment_stats(
    State(state): State<AppState>,
    user: AuthUser,
    Query(range): Query<RangeQuery>,
) -> ApiResult<PaymentStats> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(service::payment_stats(&conn, user.agency(), range.from, range.to)?)
}

#[derive(Debug, Deserialize)]
pub struct OverdueQuery {
    #[serde(default = "default_overdue_days")]
    pub days: i64,
}

fn default_overdue_days() -> i64 {
    30
}

pub async fn overdue_payments(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OverdueQuery>,
) -> ApiResult<Vec<OverduePayment>> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    let today = Utc::now().date_naive();
    ok(service::overdue_payments(&conn, user.agency(), query.days, today)?)
}

pub async fn duplicate_payments(
    State(state): State<AppState>,
    user: AuthUser,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Vec<DuplicateMatch>> {
    user.require(Role::FINANCE)?;
    let conn = state.db()?;
    ok(review_duplicates(&conn, user.agency(), range.from, range.to)?)
}

// ============================================================================
// IMPORTS
// ============================================================================

/// File name sent by the client, percent-encoded in `X-Filename`
fn upload_name(headers: &HeaderMap, fallback: &str) -> String {
    headers
        .get(FILENAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| urlencoding::decode(raw).ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn run_import(
    state: &AppState,
    user: &AuthUser,
    headers: &HeaderMap,
    format: ImportFormat,
    body: &[u8],
) -> ApiResult<ImportReport> {
    user.require(Role::FINANCE)?;
    if body.is_empty() {
        return Err(AkigError::validation("empty upload"));
    }
    let fallback = format!("upload.{}", format.as_str());
    let source_file = upload_name(headers, &fallback);

    let conn = state.db()?;
    ok(import_payments(
        &conn,
        user.agency(),
        &source_file,
        format,
        body,
        &user.actor(),
    )?)
}

pub async fn import_csv(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<ImportReport> {
    run_import(&state, &user, &headers, ImportFormat::Csv, &body)
}

pub async fn import_json(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<ImportReport> {
    run_import(&state, &user, &headers, ImportFormat::Json, &body)
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

pub async fn list_imports(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<ImportRun>> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(list_import_runs(&conn, user.agency(), query.limit.clamp(1, 100))?)
}

pub async fn get_import(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<ImportRun> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(get_import_run(&conn, user.agency(), id)?)
}

// ============================================================================
// ARREARS
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ArrearsListing {
    pub rows: Vec<ArrearsRow>,
    pub totals: ArrearsTotals,
}

pub async fn list_arrears(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<ArrearsFilter>,
) -> ApiResult<ArrearsListing> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    let rows = arrears::list_arrears(&conn, user.agency(), &filter)?;
    let totals = arrears::arrears_totals(&rows);
    ok(ArrearsListing { rows, totals })
}

pub async fn recompute_arrears(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<RecomputeSummary> {
    user.require(Role::FINANCE)?;
    let conn = state.db()?;
    ok(arrears::recompute_all(&conn, Some(user.agency()))?)
}

pub async fn payment_plan(
    user: AuthUser,
    Json(request): Json<PlanRequest>,
) -> ApiResult<PaymentPlan> {
    user.require(Role::STAFF)?;
    ok(arrears::payment_plan(&request)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_upload_name_is_percent_decoded() {
        let mut headers = HeaderMap::new();
        assert_eq!(upload_name(&headers, "upload.csv"), "upload.csv");

        headers.insert(
            FILENAME_HEADER,
            HeaderValue::from_static("paiements%20mars%202024.csv"),
        );
        assert_eq!(upload_name(&headers, "upload.csv"), "paiements mars 2024.csv");
    }
}

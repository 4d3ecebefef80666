// 📜 Leases and what hangs off them: templates, disputes, deposits

use super::auth::AuthUser;
use super::{audited, created, ok, ApiResult, AppState, Created};
use crate::db::{get_events_for_entity, Event};
use crate::models::contract::{self, Contract, ContractFilter, NewContract};
use crate::models::deposit::{self, Deposit, DepositMovement, DepositStatus};
use crate::models::dispute::{self, Dispute, DisputeStatus, NewDispute};
use crate::models::template::{self, ContractTemplate, TemplateInput};
use crate::models::{PageRequest, Paginated, Role};
use crate::services::templates::{self as rendering, RenderedContract};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

// ============================================================================
// CONTRACTS
// ============================================================================

pub async fn list_contracts(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<ContractFilter>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Paginated<Contract>> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(contract::list_contracts(&conn, user.agency(), &filter, page)?)
}

pub async fn create_contract(
    State(state): State<AppState>,
    user: AuthUser,
    Json(new): Json<NewContract>,
) -> Created<Contract> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let contract = audited(
        &conn,
        &user,
        "contract_created",
        "contract",
        |tx| contract::insert_contract(tx, agency_id, &new),
        |c| {
            (
                c.id,
                json!({ "reference": c.reference, "monthly_rent": c.monthly_rent }),
            )
        },
    )?;
    created(contract)
}

pub async fn get_contract(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Contract> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(contract::get_contract(&conn, user.agency(), id)?)
}

pub async fn terminate_contract(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Contract> {
    user.require(Role::MANAGEMENT)?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let contract = audited(
        &conn,
        &user,
        "contract_terminated",
        "contract",
        |tx| contract::terminate_contract(tx, agency_id, id),
        |c| (c.id, json!({ "terminated_at": c.terminated_at })),
    )?;
    ok(contract)
}

pub async fn contract_history(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Event>> {
    user.require(Role::MANAGEMENT)?;
    let conn = state.db()?;
    let contract = contract::get_contract(&conn, user.agency(), id)?;
    ok(get_events_for_entity(&conn, "contract", &contract.id.to_string())?)
}

#[derive(Debug, Deserialize)]
pub struct RenderQuery {
    pub template_id: Option<i64>,
}

pub async fn render_contract(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Query(query): Query<RenderQuery>,
) -> ApiResult<RenderedContract> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(rendering::render_contract(&conn, user.agency(), id, query.template_id)?)
}

// ============================================================================
// TEMPLATES
// ============================================================================

pub async fn list_templates(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<ContractTemplate>> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(template::list_templates(&conn, user.agency())?)
}

pub async fn create_template(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<TemplateInput>,
) -> Created<ContractTemplate> {
    user.require(Role::MANAGEMENT)?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let template = audited(
        &conn,
        &user,
        "template_created",
        "template",
        |tx| template::insert_template(tx, agency_id, &input),
        |t| (t.id, json!({ "name": t.name })),
    )?;
    created(template)
}

pub async fn get_template(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<ContractTemplate> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(template::get_template(&conn, user.agency(), id)?)
}

pub async fn update_template(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<TemplateInput>,
) -> ApiResult<ContractTemplate> {
    user.require(Role::MANAGEMENT)?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let template = audited(
        &conn,
        &user,
        "template_updated",
        "template",
        |tx| template::update_template(tx, agency_id, id, &input),
        |t| (t.id, json!({ "name": t.name })),
    )?;
    ok(template)
}

pub async fn delete_template(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<serde_json::Value> {
    user.require(Role::MANAGEMENT)?;
    let conn = state.db()?;
    let agency_id = user.agency();
    audited(
        &conn,
        &user,
        "template_deleted",
        "template",
        |tx| template::delete_template(tx, agency_id, id),
        |_| (id, json!({})),
    )?;
    ok(json!({ "deleted": id }))
}

// ============================================================================
// DISPUTES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DisputeQuery {
    pub status: Option<DisputeStatus>,
}

pub async fn list_disputes(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<DisputeQuery>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Paginated<Dispute>> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(dispute::list_disputes(&conn, user.agency(), query.status, page)?)
}

pub async fn create_dispute(
    State(state): State<AppState>,
    user: AuthUser,
    Json(new): Json<NewDispute>,
) -> Created<Dispute> {
    user.require(Role::STAFF)?;
    let created_by = user.0.user_id()?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let dispute = audited(
        &conn,
        &user,
        "dispute_filed",
        "dispute",
        |tx| dispute::insert_dispute(tx, agency_id, &new, Some(created_by)),
        |d| (d.id, json!({ "title": d.title, "type": d.dispute_type })),
    )?;
    created(dispute)
}

pub async fn get_dispute(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Dispute> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(dispute::get_dispute(&conn, user.agency(), id)?)
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: DisputeStatus,
}

pub async fn update_dispute_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(change): Json<StatusChange>,
) -> ApiResult<Dispute> {
    user.require(Role::MANAGEMENT)?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let dispute = audited(
        &conn,
        &user,
        "dispute_status_changed",
        "dispute",
        |tx| dispute::update_dispute_status(tx, agency_id, id, change.status),
        |d| (d.id, json!({ "status": d.status })),
    )?;
    ok(dispute)
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: String,
    pub awarded_amount: Option<i64>,
}

pub async fn record_decision(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(request): Json<DecisionRequest>,
) -> ApiResult<Dispute> {
    user.require(Role::MANAGEMENT)?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let dispute = audited(
        &conn,
        &user,
        "dispute_resolved",
        "dispute",
        |tx| {
            dispute::record_decision(
                tx,
                agency_id,
                id,
                &request.decision,
                request.awarded_amount,
            )
        },
        |d| (d.id, json!({ "awarded_amount": d.awarded_amount })),
    )?;
    ok(dispute)
}

// ============================================================================
// DEPOSITS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DepositQuery {
    pub status: Option<DepositStatus>,
}

#[derive(Debug, Serialize)]
pub struct DepositDetail {
    #[serde(flatten)]
    pub deposit: Deposit,
    pub movements: Vec<DepositMovement>,
}

#[derive(Debug, Deserialize)]
pub struct NewDeposit {
    pub contract_id: i64,
    pub amount: i64,
    pub received_at: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct Deduction {
    pub amount: i64,
    pub reason: String,
    pub occurred_at: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReturnRequest {
    pub returned_at: Option<NaiveDate>,
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub async fn list_deposits(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<DepositQuery>,
) -> ApiResult<Vec<Deposit>> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(deposit::list_deposits(&conn, user.agency(), query.status)?)
}

pub async fn register_deposit(
    State(state): State<AppState>,
    user: AuthUser,
    Json(new): Json<NewDeposit>,
) -> Created<Deposit> {
    user.require(Role::FINANCE)?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let received_at = new.received_at.unwrap_or_else(today);
    let deposit = audited(
        &conn,
        &user,
        "deposit_registered",
        "deposit",
        |tx| deposit::register_deposit(tx, agency_id, new.contract_id, new.amount, received_at),
        |d| (d.id, json!({ "contract_id": d.contract_id, "amount": d.amount })),
    )?;
    created(deposit)
}

pub async fn get_deposit(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<DepositDetail> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    let deposit = deposit::get_deposit(&conn, user.agency(), id)?;
    let movements = deposit::list_movements(&conn, deposit.id)?;
    ok(DepositDetail { deposit, movements })
}

pub async fn deduct_deposit(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(deduction): Json<Deduction>,
) -> ApiResult<Deposit> {
    user.require(Role::FINANCE)?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let occurred_at = deduction.occurred_at.unwrap_or_else(today);
    let deposit = audited(
        &conn,
        &user,
        "deposit_deducted",
        "deposit",
        |tx| {
            deposit::deduct_deposit(
                tx,
                agency_id,
                id,
                deduction.amount,
                &deduction.reason,
                occurred_at,
            )
        },
        |d| (d.id, json!({ "amount": deduction.amount, "balance": d.balance })),
    )?;
    ok(deposit)
}

pub async fn return_deposit(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    body: Option<Json<ReturnRequest>>,
) -> ApiResult<Deposit> {
    user.require(Role::FINANCE)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let returned_at = request.returned_at.unwrap_or_else(today);
    let conn = state.db()?;
    let agency_id = user.agency();
    let deposit = audited(
        &conn,
        &user,
        "deposit_returned",
        "deposit",
        |tx| deposit::return_deposit(tx, agency_id, id, returned_at),
        |d| (d.id, json!({ "returned_at": d.returned_at })),
    )?;
    ok(deposit)
}

// 📇 Agency, owners, properties and tenants

use super::auth::AuthUser;
use super::{audited, created, ok, ApiResult, AppState, Created};
use crate::models::agency::{self, Agency, AgencyUpdate};
use crate::models::owner::{self, NewOwner, Owner};
use crate::models::property::{self, NewProperty, Property, PropertyStatus};
use crate::models::tenant::{self, NewTenant, Tenant, TenantFilter, TenantUpdate};
use crate::models::{PageRequest, Paginated, Role};
use crate::services::commission::{owner_statement as build_statement, OwnerStatement};
use crate::services::risk::{self, TenantRisk};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

// ============================================================================
// AGENCY
// ============================================================================

pub async fn get_agency(State(state): State<AppState>, user: AuthUser) -> ApiResult<Agency> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(agency::get_agency(&conn, user.agency())?)
}

pub async fn update_agency(
    State(state): State<AppState>,
    user: AuthUser,
    Json(update): Json<AgencyUpdate>,
) -> ApiResult<Agency> {
    user.require(&[Role::Admin])?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let updated = audited(
        &conn,
        &user,
        "agency_updated",
        "agency",
        |tx| agency::update_agency(tx, agency_id, &update),
        |a| (a.id, json!({ "name": a.name })),
    )?;
    ok(updated)
}

// ============================================================================
// TENANTS
// ============================================================================

pub async fn list_tenants(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<TenantFilter>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Paginated<Tenant>> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(tenant::list_tenants(&conn, user.agency(), &filter, page)?)
}

pub async fn create_tenant(
    State(state): State<AppState>,
    user: AuthUser,
    Json(new): Json<NewTenant>,
) -> Created<Tenant> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let tenant = audited(
        &conn,
        &user,
        "tenant_created",
        "tenant",
        |tx| tenant::insert_tenant(tx, agency_id, &new),
        |t| (t.id, json!({ "full_name": t.full_name })),
    )?;
    created(tenant)
}

pub async fn get_tenant(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Tenant> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(tenant::get_tenant(&conn, user.agency(), id)?)
}

pub async fn update_tenant(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(update): Json<TenantUpdate>,
) -> ApiResult<Tenant> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let updated = audited(
        &conn,
        &user,
        "tenant_updated",
        "tenant",
        |tx| tenant::update_tenant(tx, agency_id, id, &update),
        |t| (t.id, json!({ "status": t.status })),
    )?;
    ok(updated)
}

/// Tenants are never hard-deleted: payments and contracts keep pointing at them
pub async fn deactivate_tenant(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Tenant> {
    user.require(Role::MANAGEMENT)?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let tenant = audited(
        &conn,
        &user,
        "tenant_deactivated",
        "tenant",
        |tx| tenant::deactivate_tenant(tx, agency_id, id),
        |t| (t.id, json!({})),
    )?;
    ok(tenant)
}

#[derive(Debug, Deserialize)]
pub struct AsOfQuery {
    pub as_of: Option<NaiveDate>,
}

pub async fn tenant_risk(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Query(query): Query<AsOfQuery>,
) -> ApiResult<TenantRisk> {
    user.require(Role::STAFF)?;
    let as_of = query.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let conn = state.db()?;
    ok(risk::tenant_risk(&conn, user.agency(), id, as_of)?)
}

// ============================================================================
// PROPERTIES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PropertyQuery {
    pub status: Option<PropertyStatus>,
}

pub async fn list_properties(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PropertyQuery>,
) -> ApiResult<Vec<Property>> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(property::list_properties(&conn, user.agency(), query.status)?)
}

pub async fn create_property(
    State(state): State<AppState>,
    user: AuthUser,
    Json(new): Json<NewProperty>,
) -> Created<Property> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let property = audited(
        &conn,
        &user,
        "property_created",
        "property",
        |tx| property::insert_property(tx, agency_id, &new),
        |p| (p.id, json!({ "name": p.name })),
    )?;
    created(property)
}

pub async fn get_property(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Property> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(property::get_property(&conn, user.agency(), id)?)
}

// ============================================================================
// OWNERS
// ============================================================================

pub async fn list_owners(State(state): State<AppState>, user: AuthUser) -> ApiResult<Vec<Owner>> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(owner::list_owners(&conn, user.agency())?)
}

pub async fn create_owner(
    State(state): State<AppState>,
    user: AuthUser,
    Json(new): Json<NewOwner>,
) -> Created<Owner> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    let agency_id = user.agency();
    let owner = audited(
        &conn,
        &user,
        "owner_created",
        "owner",
        |tx| owner::insert_owner(tx, agency_id, &new),
        |o| (o.id, json!({ "name": o.name })),
    )?;
    created(owner)
}

pub async fn get_owner(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Owner> {
    user.require(Role::STAFF)?;
    let conn = state.db()?;
    ok(owner::get_owner(&conn, user.agency(), id)?)
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

pub async fn owner_statement(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Query(period): Query<PeriodQuery>,
) -> ApiResult<OwnerStatement> {
    user.require(Role::FINANCE)?;
    let conn = state.db()?;
    ok(build_statement(&conn, user.agency(), id, period.from, period.to)?)
}

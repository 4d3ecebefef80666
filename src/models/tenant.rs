use super::{PageRequest, Paginated, QueryFilter};
use crate::error::{AkigError, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Inactive,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for TenantStatus {
    type Err = AkigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(TenantStatus::Active),
            "inactive" => Ok(TenantStatus::Inactive),
            other => Err(AkigError::validation(format!(
                "unknown tenant status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Tenant {
    pub id: i64,
    pub agency_id: i64,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub property_id: Option<i64>,
    pub status: TenantStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTenant {
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub property_id: Option<i64>,
}

/// Partial update; `None` leaves the column untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub property_id: Option<i64>,
    pub status: Option<TenantStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantFilter {
    /// Case-insensitive match on name, phone or email
    pub search: Option<String>,
    pub status: Option<TenantStatus>,
    pub property_id: Option<i64>,
}

const TENANT_COLUMNS: &str =
    "id, agency_id, full_name, phone, email, property_id, status, created_at, updated_at";

impl Tenant {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        Ok(Tenant {
            id: row.get("id")?,
            agency_id: row.get("agency_id")?,
            full_name: row.get("full_name")?,
            phone: row.get("phone")?,
            email: row.get("email")?,
            property_id: row.get("property_id")?,
            status: status.parse().unwrap_or(TenantStatus::Active),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Normalise a Guinean phone number to `+224XXXXXXXXX`.
///
/// Numbers already carrying another country code are kept as-is.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }

    if trimmed.starts_with('+') {
        return Some(format!("+{}", digits));
    }
    if let Some(rest) = digits.strip_prefix("00224") {
        return Some(format!("+224{}", rest));
    }
    if digits.starts_with("224") && digits.len() > 9 {
        return Some(format!("+{}", digits));
    }

    Some(format!("+224{}", digits))
}

fn validate_email(email: Option<&str>) -> Result<()> {
    match email {
        Some(e) if !e.trim().is_empty() && !e.contains('@') => {
            Err(AkigError::validation(format!("invalid email '{}'", e)))
        }
        _ => Ok(()),
    }
}

fn map_unique(err: rusqlite::Error, name: &str) -> AkigError {
    let err = AkigError::from(err);
    if err.is_constraint_violation() {
        AkigError::Conflict(format!("tenant '{}' already exists for this property", name))
    } else {
        err
    }
}

pub fn insert_tenant(conn: &Connection, agency_id: i64, new: &NewTenant) -> Result<Tenant> {
    let name = new.full_name.trim();
    if name.is_empty() {
        return Err(AkigError::validation("tenant full name is required"));
    }
    validate_email(new.email.as_deref())?;
    if let Some(property_id) = new.property_id {
        super::property::get_property(conn, agency_id, property_id)?;
    }

    let phone = new.phone.as_deref().and_then(normalize_phone);
    conn.execute(
        "INSERT INTO tenants (agency_id, full_name, phone, email, property_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![agency_id, name, phone, new.email, new.property_id],
    )
    .map_err(|e| map_unique(e, name))?;

    get_tenant(conn, agency_id, conn.last_insert_rowid())
}

pub fn get_tenant(conn: &Connection, agency_id: i64, id: i64) -> Result<Tenant> {
    conn.query_row(
        &format!(
            "SELECT {} FROM tenants WHERE id = ?1 AND agency_id = ?2",
            TENANT_COLUMNS
        ),
        params![id, agency_id],
        Tenant::from_row,
    )
    .optional()?
    .ok_or_else(|| AkigError::not_found("tenant", id))
}

pub fn list_tenants(
    conn: &Connection,
    agency_id: i64,
    filter: &TenantFilter,
    page: PageRequest,
) -> Result<Paginated<Tenant>> {
    let mut q = QueryFilter::new();
    q.push("agency_id = ?", agency_id);
    q.push_opt("status = ?", filter.status.map(|s| s.as_str().to_string()));
    q.push_opt("property_id = ?", filter.property_id);
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search.to_lowercase());
        q.push(
            "(lower(full_name) LIKE ? OR lower(coalesce(email, '')) LIKE ? OR coalesce(phone, '') LIKE ?)",
            pattern,
        );
    }

    let where_sql = q.where_sql();
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM tenants {}", where_sql),
        params_from_iter(q.values().iter()),
        |row| row.get(0),
    )?;

    let limit_index = q.next_index();
    let sql = format!(
        "SELECT {} FROM tenants {} ORDER BY full_name LIMIT ?{} OFFSET ?{}",
        TENANT_COLUMNS,
        where_sql,
        limit_index,
        limit_index + 1
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(q.with_page(page).iter()), Tenant::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Paginated::new(items, total, page))
}

pub fn update_tenant(
    conn: &Connection,
    agency_id: i64,
    id: i64,
    update: &TenantUpdate,
) -> Result<Tenant> {
    let current = get_tenant(conn, agency_id, id)?;

    if let Some(name) = &update.full_name {
        if name.trim().is_empty() {
            return Err(AkigError::validation("tenant full name cannot be empty"));
        }
    }
    validate_email(update.email.as_deref())?;
    if let Some(property_id) = update.property_id {
        super::property::get_property(conn, agency_id, property_id)?;
    }

    let name = update
        .full_name
        .as_deref()
        .map(str::trim)
        .unwrap_or(&current.full_name)
        .to_string();
    let phone = update.phone.as_deref().and_then(normalize_phone);

    conn.execute(
        "UPDATE tenants SET
            full_name = ?1,
            phone = COALESCE(?2, phone),
            email = COALESCE(?3, email),
            property_id = COALESCE(?4, property_id),
            status = COALESCE(?5, status),
            updated_at = CURRENT_TIMESTAMP
         WHERE id = ?6 AND agency_id = ?7",
        params![
            name,
            phone,
            update.email,
            update.property_id,
            update.status.map(|s| s.as_str()),
            id,
            agency_id
        ],
    )
    .map_err(|e| map_unique(e, &name))?;

    get_tenant(conn, agency_id, id)
}

/// Soft delete: tenants keep their payment history
pub fn deactivate_tenant(conn: &Connection, agency_id: i64, id: i64) -> Result<Tenant> {
    update_tenant(
        conn,
        agency_id,
        id,
        &TenantUpdate {
            status: Some(TenantStatus::Inactive),
            ..Default::default()
        },
    )
}

/// Find a tenant by (name, property), creating it when missing.
/// A known tenant is reactivated and takes the newer phone number.
pub fn upsert_tenant(
    conn: &Connection,
    agency_id: i64,
    full_name: &str,
    phone: Option<&str>,
    property_id: i64,
) -> Result<i64> {
    let name = full_name.trim();
    if name.is_empty() {
        return Err(AkigError::validation("tenant name is required"));
    }
    let phone = phone.and_then(normalize_phone);

    conn.execute(
        "INSERT INTO tenants (agency_id, full_name, phone, property_id) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (agency_id, full_name, property_id)
         DO UPDATE SET phone = COALESCE(excluded.phone, phone), status = 'active',
                       updated_at = CURRENT_TIMESTAMP",
        params![agency_id, name, phone, property_id],
    )?;

    let id = conn.query_row(
        "SELECT id FROM tenants WHERE agency_id = ?1 AND full_name = ?2 AND property_id = ?3",
        params![agency_id, name, property_id],
        |row| row.get(0),
    )?;
    Ok(id)
}

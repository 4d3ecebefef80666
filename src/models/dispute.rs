use super::{PageRequest, Paginated, QueryFilter};
use crate::error::{AkigError, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeType {
    PropertyDamage,
    RentArrears,
    LeaseViolation,
    RefundClaim,
}

impl DisputeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeType::PropertyDamage => "property_damage",
            DisputeType::RentArrears => "rent_arrears",
            DisputeType::LeaseViolation => "lease_violation",
            DisputeType::RefundClaim => "refund_claim",
        }
    }
}

impl FromStr for DisputeType {
    type Err = AkigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "property_damage" => Ok(DisputeType::PropertyDamage),
            "rent_arrears" => Ok(DisputeType::RentArrears),
            "lease_violation" => Ok(DisputeType::LeaseViolation),
            "refund_claim" => Ok(DisputeType::RefundClaim),
            other => Err(AkigError::validation(format!(
                "unknown dispute type '{}'",
                other
            ))),
        }
    }
}

/// Dispute lifecycle: filed → mediation → arbitration → resolved → closed.
/// Mediation and arbitration can be skipped; any open dispute can be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeStatus {
    Filed,
    Mediation,
    Arbitration,
    Resolved,
    Closed,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Filed => "filed",
            DisputeStatus::Mediation => "mediation",
            DisputeStatus::Arbitration => "arbitration",
            DisputeStatus::Resolved => "resolved",
            DisputeStatus::Closed => "closed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            DisputeStatus::Filed => 0,
            DisputeStatus::Mediation => 1,
            DisputeStatus::Arbitration => 2,
            DisputeStatus::Resolved => 3,
            DisputeStatus::Closed => 4,
        }
    }

    pub fn can_transition_to(&self, next: DisputeStatus) -> bool {
        *self != DisputeStatus::Closed && next.rank() > self.rank()
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisputeStatus {
    type Err = AkigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "filed" => Ok(DisputeStatus::Filed),
            "mediation" => Ok(DisputeStatus::Mediation),
            "arbitration" => Ok(DisputeStatus::Arbitration),
            "resolved" => Ok(DisputeStatus::Resolved),
            "closed" => Ok(DisputeStatus::Closed),
            other => Err(AkigError::validation(format!(
                "unknown dispute status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Dispute {
    pub id: i64,
    pub agency_id: i64,
    pub tenant_id: i64,
    pub contract_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub dispute_type: DisputeType,
    pub claim_amount: Option<i64>,
    pub status: DisputeStatus,
    pub decision: Option<String>,
    pub awarded_amount: Option<i64>,
    pub created_by: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDispute {
    pub tenant_id: i64,
    pub contract_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub dispute_type: DisputeType,
    pub claim_amount: Option<i64>,
}

const DISPUTE_COLUMNS: &str = "id, agency_id, tenant_id, contract_id, title, description, \
     dispute_type, claim_amount, status, decision, awarded_amount, created_by, created_at, updated_at";

impl Dispute {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let dispute_type: String = row.get("dispute_type")?;
        let status: String = row.get("status")?;
        Ok(Dispute {
            id: row.get("id")?,
            agency_id: row.get("agency_id")?,
            tenant_id: row.get("tenant_id")?,
            contract_id: row.get("contract_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            dispute_type: dispute_type.parse().unwrap_or(DisputeType::LeaseViolation),
            claim_amount: row.get("claim_amount")?,
            status: status.parse().unwrap_or(DisputeStatus::Filed),
            decision: row.get("decision")?,
            awarded_amount: row.get("awarded_amount")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub fn insert_dispute(
    conn: &Connection,
    agency_id: i64,
    new: &NewDispute,
    created_by: Option<i64>,
) -> Result<Dispute> {
    if new.title.trim().is_empty() {
        return Err(AkigError::validation("dispute title is required"));
    }
    if matches!(new.claim_amount, Some(a) if a < 0) {
        return Err(AkigError::validation("claim amount cannot be negative"));
    }
    super::tenant::get_tenant(conn, agency_id, new.tenant_id)?;
    if let Some(contract_id) = new.contract_id {
        let contract = super::contract::get_contract(conn, agency_id, contract_id)?;
        if contract.tenant_id != new.tenant_id {
            return Err(AkigError::validation(
                "contract does not belong to this tenant",
            ));
        }
    }

    conn.execute(
        "INSERT INTO disputes (agency_id, tenant_id, contract_id, title, description,
                               dispute_type, claim_amount, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            agency_id,
            new.tenant_id,
            new.contract_id,
            new.title.trim(),
            new.description,
            new.dispute_type.as_str(),
            new.claim_amount,
            created_by
        ],
    )?;

    get_dispute(conn, agency_id, conn.last_insert_rowid())
}

pub fn get_dispute(conn: &Connection, agency_id: i64, id: i64) -> Result<Dispute> {
    conn.query_row(
        &format!(
            "SELECT {} FROM disputes WHERE id = ?1 AND agency_id = ?2",
            DISPUTE_COLUMNS
        ),
        params![id, agency_id],
        Dispute::from_row,
    )
    .optional()?
    .ok_or_else(|| AkigError::not_found("dispute", id))
}

pub fn list_disputes(
    conn: &Connection,
    agency_id: i64,
    status: Option<DisputeStatus>,
    page: PageRequest,
) -> Result<Paginated<Dispute>> {
    let mut q = QueryFilter::new();
    q.push("agency_id = ?", agency_id);
    q.push_opt("status = ?", status.map(|s| s.as_str().to_string()));

    let where_sql = q.where_sql();
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM disputes {}", where_sql),
        params_from_iter(q.values().iter()),
        |row| row.get(0),
    )?;

    let n = q.next_index();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM disputes {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
        DISPUTE_COLUMNS,
        where_sql,
        n,
        n + 1
    ))?;
    let items = stmt
        .query_map(params_from_iter(q.with_page(page).iter()), Dispute::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Paginated::new(items, total, page))
}

pub fn update_dispute_status(
    conn: &Connection,
    agency_id: i64,
    id: i64,
    next: DisputeStatus,
) -> Result<Dispute> {
    let dispute = get_dispute(conn, agency_id, id)?;
    if !dispute.status.can_transition_to(next) {
        return Err(AkigError::transition("dispute", dispute.status, next));
    }

    conn.execute(
        "UPDATE disputes SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        params![next.as_str(), id],
    )?;
    get_dispute(conn, agency_id, id)
}

/// Record the decision and move the dispute to `resolved`
pub fn record_decision(
    conn: &Connection,
    agency_id: i64,
    id: i64,
    decision: &str,
    awarded_amount: Option<i64>,
) -> Result<Dispute> {
    if decision.trim().is_empty() {
        return Err(AkigError::validation("decision text is required"));
    }
    if matches!(awarded_amount, Some(a) if a < 0) {
        return Err(AkigError::validation("awarded amount cannot be negative"));
    }

    let dispute = get_dispute(conn, agency_id, id)?;
    if !dispute.status.can_transition_to(DisputeStatus::Resolved) {
        return Err(AkigError::transition(
            "dispute",
            dispute.status,
            DisputeStatus::Resolved,
        ));
    }

    conn.execute(
        "UPDATE disputes SET status = 'resolved', decision = ?1, awarded_amount = ?2,
                updated_at = CURRENT_TIMESTAMP
         WHERE id = ?3",
        params![decision.trim(), awarded_amount, id],
    )?;
    get_dispute(conn, agency_id, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ensure_default_agency, open_database};
    use crate::models::{property::upsert_property_by_name, tenant::upsert_tenant};

    fn setup() -> (Connection, i64, i64) {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();
        let site = upsert_property_by_name(&conn, agency, "Villa Nongo", None).unwrap();
        let tenant = upsert_tenant(&conn, agency, "Sékou Camara", None, site).unwrap();
        (conn, agency, tenant)
    }

    fn new_dispute(tenant_id: i64) -> NewDispute {
        NewDispute {
            tenant_id,
            contract_id: None,
            title: "Dégâts des eaux".into(),
            description: None,
            dispute_type: DisputeType::PropertyDamage,
            claim_amount: Some(2_000_000),
        }
    }

    #[test]
    fn test_transition_rules() {
        use DisputeStatus::*;
        assert!(Filed.can_transition_to(Mediation));
        assert!(Mediation.can_transition_to(Arbitration));
        assert!(Filed.can_transition_to(Closed));
        assert!(Arbitration.can_transition_to(Resolved));
        assert!(!Mediation.can_transition_to(Filed));
        assert!(!Resolved.can_transition_to(Mediation));
        assert!(!Closed.can_transition_to(Closed));
    }

    #[test]
    fn test_dispute_workflow() {
        let (conn, agency, tenant) = setup();
        let d = insert_dispute(&conn, agency, &new_dispute(tenant), Some(1)).unwrap();
        assert_eq!(d.status, DisputeStatus::Filed);

        update_dispute_status(&conn, agency, d.id, DisputeStatus::Mediation).unwrap();
        let d = record_decision(&conn, agency, d.id, "Remboursement partiel", Some(750_000))
            .unwrap();
        assert_eq!(d.status, DisputeStatus::Resolved);
        assert_eq!(d.awarded_amount, Some(750_000));

        let d = update_dispute_status(&conn, agency, d.id, DisputeStatus::Closed).unwrap();
        assert!(matches!(
            update_dispute_status(&conn, agency, d.id, DisputeStatus::Closed),
            Err(AkigError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_list_by_status() {
        let (conn, agency, tenant) = setup();
        let d = insert_dispute(&conn, agency, &new_dispute(tenant), None).unwrap();
        insert_dispute(&conn, agency, &new_dispute(tenant), None).unwrap();
        update_dispute_status(&conn, agency, d.id, DisputeStatus::Closed).unwrap();

        let open = list_disputes(&conn, agency, Some(DisputeStatus::Filed), PageRequest::default())
            .unwrap();
        assert_eq!(open.total, 1);
        let all = list_disputes(&conn, agency, None, PageRequest::default()).unwrap();
        assert_eq!(all.total, 2);
    }
}

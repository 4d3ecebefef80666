// 💰 Payment rows - the ledger of collected rent
//
// Writes that involve business rules (commission, receipts, idempotency)
// go through `services::payments`; this module only knows the table.

use super::{PageRequest, Paginated, QueryFilter};
use crate::error::{AkigError, Result};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// PAYMENT MODE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Cash,
    OrangeMoney,
    Marchand,
    Virement,
    Autre,
}

impl PaymentMode {
    pub const ALL: [PaymentMode; 5] = [
        PaymentMode::Cash,
        PaymentMode::OrangeMoney,
        PaymentMode::Marchand,
        PaymentMode::Virement,
        PaymentMode::Autre,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "cash",
            PaymentMode::OrangeMoney => "orange_money",
            PaymentMode::Marchand => "marchand",
            PaymentMode::Virement => "virement",
            PaymentMode::Autre => "autre",
        }
    }

    /// Map the free-text labels found in agency spreadsheets to a mode.
    ///
    /// Order matters: "Espèces", "OM marchand" and "virement banque" all
    /// appear in real files.
    pub fn normalize(raw: &str) -> PaymentMode {
        let v = raw.trim().to_lowercase();

        if v.contains("esp") || v.contains("cash") {
            PaymentMode::Cash
        } else if v.contains("marchand") {
            PaymentMode::Marchand
        } else if v.contains("orange") || v.contains("om") {
            PaymentMode::OrangeMoney
        } else if v.contains("vir") || v.contains("banque") {
            PaymentMode::Virement
        } else {
            PaymentMode::Autre
        }
    }
}

impl fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMode {
    type Err = AkigError;

    fn from_str(s: &str) -> Result<Self> {
        PaymentMode::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| AkigError::validation(format!("unknown payment mode '{}'", s)))
    }
}

// ============================================================================
// PAYMENT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Only pending payments move, and only once
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Confirmed)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = AkigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "confirmed" => Ok(PaymentStatus::Confirmed),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(AkigError::validation(format!(
                "unknown payment status '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// PAYMENT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: i64,
    pub agency_id: i64,
    pub contract_id: Option<i64>,
    pub tenant_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub property_id: Option<i64>,
    pub amount: i64,
    pub currency: String,
    pub mode: PaymentMode,
    pub status: PaymentStatus,
    pub paid_at: NaiveDate,
    pub due_date: Option<NaiveDate>,
    /// Receipt number, `GNF-<year>-<counter>`
    pub reference: Option<String>,
    pub external_ref: Option<String>,
    pub allocation: Option<String>,
    pub channel: Option<String>,
    pub comment: Option<String>,
    pub commission_amount: i64,
    pub owner_net: i64,
    #[serde(skip_serializing)]
    pub raw_hash: String,
    pub idempotency_key: Option<String>,
    pub source_file: Option<String>,
    pub import_run_id: Option<i64>,
    pub created_at: String,
}

/// Everything needed to write one payment row
#[derive(Debug, Clone)]
pub struct PaymentRow {
    pub agency_id: i64,
    pub contract_id: Option<i64>,
    pub tenant_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub property_id: Option<i64>,
    pub amount: i64,
    pub mode: PaymentMode,
    pub status: PaymentStatus,
    pub paid_at: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub reference: Option<String>,
    pub external_ref: Option<String>,
    pub allocation: Option<String>,
    pub channel: Option<String>,
    pub comment: Option<String>,
    pub commission_amount: i64,
    pub owner_net: i64,
    pub raw_hash: String,
    pub idempotency_key: Option<String>,
    pub source_file: Option<String>,
    pub import_run_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSort {
    #[default]
    PaidAtDesc,
    PaidAtAsc,
    AmountDesc,
    AmountAsc,
}

impl PaymentSort {
    fn order_by(&self) -> &'static str {
        match self {
            PaymentSort::PaidAtDesc => "paid_at DESC, id DESC",
            PaymentSort::PaidAtAsc => "paid_at ASC, id ASC",
            PaymentSort::AmountDesc => "amount DESC, id DESC",
            PaymentSort::AmountAsc => "amount ASC, id ASC",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
    pub tenant_id: Option<i64>,
    pub contract_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub mode: Option<PaymentMode>,
    pub min_amount: Option<i64>,
    pub max_amount: Option<i64>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub sort: PaymentSort,
}

const PAYMENT_COLUMNS: &str = "id, agency_id, contract_id, tenant_id, owner_id, property_id, \
     amount, currency, mode, status, paid_at, due_date, reference, external_ref, allocation, \
     channel, comment, commission_amount, owner_net, raw_hash, idempotency_key, source_file, \
     import_run_id, created_at";

impl Payment {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mode: String = row.get("mode")?;
        let status: String = row.get("status")?;
        Ok(Payment {
            id: row.get("id")?,
            agency_id: row.get("agency_id")?,
            contract_id: row.get("contract_id")?,
            tenant_id: row.get("tenant_id")?,
            owner_id: row.get("owner_id")?,
            property_id: row.get("property_id")?,
            amount: row.get("amount")?,
            currency: row.get("currency")?,
            mode: mode.parse().unwrap_or(PaymentMode::Autre),
            status: status.parse().unwrap_or(PaymentStatus::Pending),
            paid_at: row.get("paid_at")?,
            due_date: row.get("due_date")?,
            reference: row.get("reference")?,
            external_ref: row.get("external_ref")?,
            allocation: row.get("allocation")?,
            channel: row.get("channel")?,
            comment: row.get("comment")?,
            commission_amount: row.get("commission_amount")?,
            owner_net: row.get("owner_net")?,
            raw_hash: row.get("raw_hash")?,
            idempotency_key: row.get("idempotency_key")?,
            source_file: row.get("source_file")?,
            import_run_id: row.get("import_run_id")?,
            created_at: row.get("created_at")?,
        })
    }
}

// ============================================================================
// QUERIES
// ============================================================================

pub fn insert_payment_row(conn: &Connection, row: &PaymentRow) -> Result<i64> {
    super::check_amount(row.amount, "payment amount")?;

    conn.execute(
        "INSERT INTO payments (
            agency_id, contract_id, tenant_id, owner_id, property_id, amount, mode, status,
            paid_at, due_date, reference, external_ref, allocation, channel, comment,
            commission_amount, owner_net, raw_hash, idempotency_key, source_file, import_run_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
        params![
            row.agency_id,
            row.contract_id,
            row.tenant_id,
            row.owner_id,
            row.property_id,
            row.amount,
            row.mode.as_str(),
            row.status.as_str(),
            row.paid_at,
            row.due_date,
            row.reference,
            row.external_ref,
            row.allocation,
            row.channel,
            row.comment,
            row.commission_amount,
            row.owner_net,
            row.raw_hash,
            row.idempotency_key,
            row.source_file,
            row.import_run_id,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn get_payment(conn: &Connection, agency_id: i64, id: i64) -> Result<Payment> {
    conn.query_row(
        &format!(
            "SELECT {} FROM payments WHERE id = ?1 AND agency_id = ?2",
            PAYMENT_COLUMNS
        ),
        params![id, agency_id],
        Payment::from_row,
    )
    .optional()?
    .ok_or_else(|| AkigError::not_found("payment", id))
}

fn payment_where(agency_id: i64, filter: &PaymentFilter) -> QueryFilter {
    let mut q = QueryFilter::new();
    q.push("agency_id = ?", agency_id);
    q.push_opt("status = ?", filter.status.map(|s| s.as_str().to_string()));
    q.push_opt("tenant_id = ?", filter.tenant_id);
    q.push_opt("contract_id = ?", filter.contract_id);
    q.push_opt("owner_id = ?", filter.owner_id);
    q.push_opt("mode = ?", filter.mode.map(|m| m.as_str().to_string()));
    q.push_opt("amount >= ?", filter.min_amount);
    q.push_opt("amount <= ?", filter.max_amount);
    q.push_opt("paid_at >= ?", filter.from.map(|d| d.to_string()));
    q.push_opt("paid_at <= ?", filter.to.map(|d| d.to_string()));
    q
}

pub fn list_payments(
    conn: &Connection,
    agency_id: i64,
    filter: &PaymentFilter,
    page: PageRequest,
) -> Result<Paginated<Payment>> {
    if let (Some(min), Some(max)) = (filter.min_amount, filter.max_amount) {
        if min > max {
            return Err(AkigError::validation("min_amount is greater than max_amount"));
        }
    }

    let q = payment_where(agency_id, filter);
    let where_sql = q.where_sql();

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM payments {}", where_sql),
        params_from_iter(q.values().iter()),
        |row| row.get(0),
    )?;

    let n = q.next_index();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM payments {} ORDER BY {} LIMIT ?{} OFFSET ?{}",
        PAYMENT_COLUMNS,
        where_sql,
        filter.sort.order_by(),
        n,
        n + 1
    ))?;
    let items = stmt
        .query_map(params_from_iter(q.with_page(page).iter()), Payment::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Paginated::new(items, total, page))
}

/// All payments matching a filter, unpaginated (reports and duplicate review)
pub fn query_payments(
    conn: &Connection,
    agency_id: i64,
    filter: &PaymentFilter,
) -> Result<Vec<Payment>> {
    let q = payment_where(agency_id, filter);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM payments {} ORDER BY {}",
        PAYMENT_COLUMNS,
        q.where_sql(),
        filter.sort.order_by()
    ))?;
    let items = stmt
        .query_map(params_from_iter(q.values().iter()), Payment::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(items)
}

pub fn update_payment_status(
    conn: &Connection,
    agency_id: i64,
    id: i64,
    next: PaymentStatus,
) -> Result<Payment> {
    let payment = get_payment(conn, agency_id, id)?;
    if !payment.status.can_transition_to(next) {
        return Err(AkigError::transition("payment", payment.status, next));
    }

    conn.execute(
        "UPDATE payments SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        params![next.as_str(), id],
    )?;
    get_payment(conn, agency_id, id)
}

/// Delete a payment; only pending payments can go
pub fn delete_pending_payment(conn: &Connection, agency_id: i64, id: i64) -> Result<Payment> {
    let payment = get_payment(conn, agency_id, id)?;
    if payment.status != PaymentStatus::Pending {
        return Err(AkigError::Conflict(format!(
            "payment {} is {} and cannot be deleted",
            id, payment.status
        )));
    }

    conn.execute("DELETE FROM payments WHERE id = ?1", [id])?;
    Ok(payment)
}

pub fn find_payment_by_hash(conn: &Connection, raw_hash: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM payments WHERE raw_hash = ?1 AND status != 'failed'",
            [raw_hash],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn find_payment_by_idempotency_key(
    conn: &Connection,
    agency_id: i64,
    key: &str,
) -> Result<Option<Payment>> {
    let payment = conn
        .query_row(
            &format!(
                "SELECT {} FROM payments WHERE idempotency_key = ?1 AND agency_id = ?2",
                PAYMENT_COLUMNS
            ),
            params![key, agency_id],
            Payment::from_row,
        )
        .optional()?;
    Ok(payment)
}

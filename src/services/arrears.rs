// ⏰ Arrears (impayés) - yearly snapshot per contract
//
// For every open contract and every year that has payments:
//   due     = monthly_rent × 12
//   paid    = Σ confirmed payments of that year
//   arrears = max(0, due − paid)
//   months  = arrears / monthly_rent
//
// The pressure level drives collection follow-up (see `pressure_level`).

use crate::error::{AkigError, Result};
use crate::models::contract::{get_contract, list_open_contracts, set_contract_status};
use crate::models::{check_amount, ContractStatus};
use chrono::{Datelike, Months, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Above this amount a single month of arrears is already "pressure"
pub const PRESSURE_AMOUNT_THRESHOLD: i64 = 2_000_000;

/// From this many unpaid months on, the file goes to closure
pub const CLOSURE_MONTHS: i64 = 6;

// ============================================================================
// PRESSURE LEVEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    None,
    Reminder,
    Pressure,
    Closure,
}

impl PressureLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PressureLevel::None => "none",
            PressureLevel::Reminder => "reminder",
            PressureLevel::Pressure => "pressure",
            PressureLevel::Closure => "closure",
        }
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PressureLevel {
    type Err = AkigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(PressureLevel::None),
            "reminder" => Ok(PressureLevel::Reminder),
            "pressure" => Ok(PressureLevel::Pressure),
            "closure" => Ok(PressureLevel::Closure),
            other => Err(AkigError::validation(format!(
                "unknown pressure level '{}'",
                other
            ))),
        }
    }
}

/// Collection stage for a given arrears position
pub fn pressure_level(arrears_months: i64, arrears_amount: i64) -> PressureLevel {
    if arrears_months >= CLOSURE_MONTHS {
        PressureLevel::Closure
    } else if arrears_months > 1 || arrears_amount > PRESSURE_AMOUNT_THRESHOLD {
        PressureLevel::Pressure
    } else if arrears_months == 1 {
        PressureLevel::Reminder
    } else {
        PressureLevel::None
    }
}

/// (arrears amount, whole months of arrears) for one year
pub fn compute_arrears(monthly_rent: i64, paid: i64) -> (i64, i64) {
    let due = monthly_rent.saturating_mul(12);
    let arrears = due.saturating_sub(paid).max(0);
    let months = if monthly_rent > 0 {
        arrears / monthly_rent
    } else {
        0
    };
    (arrears, months)
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ArrearsSnapshot {
    pub contract_id: i64,
    pub year: i32,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub due_amount: i64,
    pub paid_amount: i64,
    pub arrears_amount: i64,
    pub arrears_months: i64,
    pub pressure_level: PressureLevel,
    pub last_update: String,
}

impl ArrearsSnapshot {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let level: String = row.get("pressure_level")?;
        Ok(ArrearsSnapshot {
            contract_id: row.get("contract_id")?,
            year: row.get("year")?,
            period_from: row.get("period_from")?,
            period_to: row.get("period_to")?,
            due_amount: row.get("due_amount")?,
            paid_amount: row.get("paid_amount")?,
            arrears_amount: row.get("arrears_amount")?,
            arrears_months: row.get("arrears_months")?,
            pressure_level: level.parse().unwrap_or(PressureLevel::None),
            last_update: row.get("last_update")?,
        })
    }
}

pub fn get_snapshot(conn: &Connection, contract_id: i64, year: i32) -> Result<Option<ArrearsSnapshot>> {
    let snapshot = conn
        .query_row(
            "SELECT * FROM payment_status_year WHERE contract_id = ?1 AND year = ?2",
            params![contract_id, year],
            ArrearsSnapshot::from_row,
        )
        .optional()?;
    Ok(snapshot)
}

/// Recompute and store the snapshot of one contract for one year
pub fn recompute_contract_year(
    conn: &Connection,
    contract_id: i64,
    year: i32,
) -> Result<ArrearsSnapshot> {
    let (monthly_rent, agency_id): (i64, i64) = conn.query_row(
        "SELECT monthly_rent, agency_id FROM contracts WHERE id = ?1",
        [contract_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let paid: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM payments
         WHERE contract_id = ?1 AND status = 'confirmed' AND strftime('%Y', paid_at) = ?2",
        params![contract_id, format!("{:04}", year)],
        |row| row.get(0),
    )?;

    let (arrears, months) = compute_arrears(monthly_rent, paid);
    let level = pressure_level(months, arrears);
    let period_from = NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| AkigError::validation(format!("invalid year {}", year)))?;
    let period_to = NaiveDate::from_ymd_opt(year, 12, 31)
        .ok_or_else(|| AkigError::validation(format!("invalid year {}", year)))?;

    conn.execute(
        "INSERT INTO payment_status_year (
            contract_id, year, period_from, period_to, due_amount, paid_amount,
            arrears_amount, arrears_months, pressure_level, last_update
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT (contract_id, year) DO UPDATE SET
            period_from = excluded.period_from, period_to = excluded.period_to,
            due_amount = excluded.due_amount, paid_amount = excluded.paid_amount,
            arrears_amount = excluded.arrears_amount, arrears_months = excluded.arrears_months,
            pressure_level = excluded.pressure_level, last_update = excluded.last_update",
        params![
            contract_id,
            year,
            period_from,
            period_to,
            monthly_rent.saturating_mul(12),
            paid,
            arrears,
            months,
            level.as_str(),
            crate::db::now_rfc3339()
        ],
    )?;

    debug!(contract_id, year, arrears, months, level = %level, "arrears snapshot updated");
    sync_contract_status(conn, agency_id, contract_id)?;

    get_snapshot(conn, contract_id, year)?
        .ok_or_else(|| AkigError::Internal("snapshot vanished after upsert".into()))
}

/// Flag a contract overdue while its latest snapshot is at pressure or
/// above, and back to active once it drops below
fn sync_contract_status(conn: &Connection, agency_id: i64, contract_id: i64) -> Result<()> {
    let latest: Option<String> = conn
        .query_row(
            "SELECT pressure_level FROM payment_status_year
             WHERE contract_id = ?1 ORDER BY year DESC LIMIT 1",
            [contract_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(level) = latest else {
        return Ok(());
    };
    let level: PressureLevel = level.parse()?;

    let contract = get_contract(conn, agency_id, contract_id)?;
    let target = if level >= PressureLevel::Pressure {
        ContractStatus::Overdue
    } else {
        ContractStatus::Active
    };
    if !contract.is_terminated() && contract.status != target {
        set_contract_status(conn, agency_id, contract_id, target)?;
        info!(contract_id, status = %target, "contract status follows arrears");
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecomputeSummary {
    pub contracts: usize,
    pub years: Vec<i32>,
    pub snapshots: usize,
}

/// Recompute every open contract for every year that has payments
/// (the current year when there are none). `agency_id = None` covers all agencies.
pub fn recompute_all(conn: &Connection, agency_id: Option<i64>) -> Result<RecomputeSummary> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT CAST(strftime('%Y', paid_at) AS INTEGER) FROM payments
         WHERE ?1 IS NULL OR agency_id = ?1 ORDER BY 1",
    )?;
    let mut years = stmt
        .query_map([agency_id], |row| row.get::<_, i32>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if years.is_empty() {
        years.push(Utc::now().year());
    }

    let contracts = list_open_contracts(conn, agency_id)?;
    let mut snapshots = 0;
    for contract in &contracts {
        for &year in &years {
            recompute_contract_year(conn, contract.id, year)?;
            snapshots += 1;
        }
    }

    info!(contracts = contracts.len(), snapshots, "arrears recomputed");
    Ok(RecomputeSummary {
        contracts: contracts.len(),
        years,
        snapshots,
    })
}

// ============================================================================
// ARREARS LIST
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ArrearsRow {
    pub contract_id: i64,
    pub contract_reference: Option<String>,
    pub tenant_id: i64,
    pub tenant_name: String,
    pub tenant_phone: Option<String>,
    pub property_name: Option<String>,
    pub monthly_rent: i64,
    #[serde(flatten)]
    pub snapshot: ArrearsSnapshot,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArrearsFilter {
    pub year: Option<i32>,
    /// Only rows at or above this level
    pub min_level: Option<PressureLevel>,
}

/// Snapshots with arrears, largest first
pub fn list_arrears(
    conn: &Connection,
    agency_id: i64,
    filter: &ArrearsFilter,
) -> Result<Vec<ArrearsRow>> {
    let mut stmt = conn.prepare(
        "SELECT psy.*, c.reference, c.tenant_id, c.monthly_rent, t.full_name, t.phone,
                pr.name AS property_name
         FROM payment_status_year psy
         JOIN contracts c ON c.id = psy.contract_id
         JOIN tenants t ON t.id = c.tenant_id
         LEFT JOIN properties pr ON pr.id = c.property_id
         WHERE c.agency_id = ?1 AND psy.arrears_amount > 0 AND (?2 IS NULL OR psy.year = ?2)
         ORDER BY psy.arrears_amount DESC, psy.contract_id",
    )?;

    let rows = stmt
        .query_map(params![agency_id, filter.year], |row| {
            Ok(ArrearsRow {
                contract_id: row.get("contract_id")?,
                contract_reference: row.get("reference")?,
                tenant_id: row.get("tenant_id")?,
                tenant_name: row.get("full_name")?,
                tenant_phone: row.get("phone")?,
                property_name: row.get("property_name")?,
                monthly_rent: row.get("monthly_rent")?,
                snapshot: ArrearsSnapshot::from_row(row)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter(|r| {
            filter
                .min_level
                .map_or(true, |min| r.snapshot.pressure_level >= min)
        })
        .collect())
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ArrearsTotals {
    pub contracts: usize,
    pub total_arrears: i64,
    pub reminder: usize,
    pub pressure: usize,
    pub closure: usize,
}

pub fn arrears_totals(rows: &[ArrearsRow]) -> ArrearsTotals {
    let count = |level: PressureLevel| rows.iter().filter(|r| r.snapshot.pressure_level == level).count();
    ArrearsTotals {
        contracts: rows.len(),
        total_arrears: rows.iter().map(|r| r.snapshot.arrears_amount).sum(),
        reminder: count(PressureLevel::Reminder),
        pressure: count(PressureLevel::Pressure),
        closure: count(PressureLevel::Closure),
    }
}

// ============================================================================
// PAYMENT PLAN
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PlanRequest {
    pub balance: i64,
    pub instalments: u32,
    /// Fixed monthly amount; defaults to an even split
    pub monthly_amount: Option<i64>,
    pub start_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Instalment {
    pub number: u32,
    pub due_date: NaiveDate,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentPlan {
    pub balance: i64,
    pub instalments: Vec<Instalment>,
}

/// Split an arrears balance into monthly instalments; the last one absorbs
/// the remainder. A plan that cannot cover the debt is rejected.
pub fn payment_plan(request: &PlanRequest) -> Result<PaymentPlan> {
    let n = request.instalments;
    check_amount(request.balance, "balance")?;
    if n == 0 || n > 36 {
        return Err(AkigError::validation("instalments must be between 1 and 36"));
    }

    let monthly = match request.monthly_amount {
        Some(m) => check_amount(m, "monthly amount")?,
        None => request.balance / i64::from(n),
    };
    if monthly == 0 {
        return Err(AkigError::validation(
            "balance too small for this number of instalments",
        ));
    }
    // both factors are bounded (MAX_AMOUNT, 36) so this stays in i64
    if monthly * i64::from(n) < request.balance && request.monthly_amount.is_some() {
        return Err(AkigError::validation(
            "the payment plan does not cover the whole debt",
        ));
    }

    let last = request.balance - monthly * (i64::from(n) - 1);
    if last <= 0 {
        return Err(AkigError::validation(
            "monthly amount too high for this number of instalments",
        ));
    }

    let instalments = (0..n)
        .map(|i| {
            let due_date = request
                .start_date
                .checked_add_months(Months::new(i))
                .ok_or_else(|| AkigError::validation("plan runs past the calendar"))?;
            Ok(Instalment {
                number: i + 1,
                due_date,
                amount: if i + 1 == n { last } else { monthly },
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PaymentPlan {
        balance: request.balance,
        instalments,
    })
}

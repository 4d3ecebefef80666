// 📉 Tenant solvency scoring
//
// Scoring is a pure function over a tenant's month-by-month history. A month
// is LATE when its rent was not fully collected by `payment_day + 5` days.
//
//   late_ratio  < 0.2 → low
//   late_ratio  < 0.5 → medium
//   otherwise         → high
//
// payment probability = clamp(0.7·paid + 0.2·(1 − late) + 0.1·(1 − partial), 0.05, 0.95)

use crate::error::Result;
use crate::models::contract::current_contract_for_tenant;
use crate::models::tenant::get_tenant;
use crate::models::Contract;
use chrono::{Datelike, Duration, Months, NaiveDate};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// Days after the contractual payment day before a month counts as late
pub const GRACE_DAYS: i64 = 5;

/// Below this probability a tenant is listed as at risk
pub const AT_RISK_PROBABILITY: f64 = 0.6;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_late_ratio(late_ratio: f64) -> Self {
        if late_ratio < 0.2 {
            RiskLevel::Low
        } else if late_ratio < 0.5 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

/// Rent due and collected for one calendar month
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthRecord {
    /// First day of the month
    pub month: NaiveDate,
    pub due: i64,
    /// Collected before the grace deadline
    pub paid_on_time: i64,
    /// Collected over the whole month
    pub paid_total: i64,
}

impl MonthRecord {
    pub fn is_late(&self) -> bool {
        self.paid_on_time < self.due
    }

    pub fn is_paid(&self) -> bool {
        self.paid_total >= self.due
    }

    pub fn is_partial(&self) -> bool {
        self.paid_total > 0 && self.paid_total < self.due
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub months: usize,
    pub late_months: usize,
    pub late_ratio: f64,
    pub paid_ratio: f64,
    pub partial_ratio: f64,
    pub level: RiskLevel,
    pub payment_probability: f64,
}

// ============================================================================
// SCORING
// ============================================================================

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Score a month-by-month history. No history means low risk.
pub fn assess(history: &[MonthRecord]) -> RiskAssessment {
    let months = history.len();
    if months == 0 {
        return RiskAssessment {
            months: 0,
            late_months: 0,
            late_ratio: 0.0,
            paid_ratio: 0.0,
            partial_ratio: 0.0,
            level: RiskLevel::Low,
            payment_probability: 0.95,
        };
    }

    let total = months as f64;
    let late_months = history.iter().filter(|m| m.is_late()).count();
    let late_ratio = late_months as f64 / total;
    let paid_ratio = history.iter().filter(|m| m.is_paid()).count() as f64 / total;
    let partial_ratio = history.iter().filter(|m| m.is_partial()).count() as f64 / total;

    let probability =
        (0.7 * paid_ratio + 0.2 * (1.0 - late_ratio) + 0.1 * (1.0 - partial_ratio)).clamp(0.05, 0.95);

    RiskAssessment {
        months,
        late_months,
        late_ratio: round2(late_ratio),
        paid_ratio: round2(paid_ratio),
        partial_ratio: round2(partial_ratio),
        level: RiskLevel::from_late_ratio(late_ratio),
        payment_probability: round2(probability),
    }
}

/// Build the monthly history of a contract from its confirmed payments.
///
/// Months run from the contract start up to and including `until`'s month.
/// A payment counts for the month in which it was made.
pub fn build_history(
    contract: &Contract,
    payments: &[(NaiveDate, i64)],
    until: NaiveDate,
) -> Vec<MonthRecord> {
    let mut history = Vec::new();
    let Some(mut month) = contract.start_date.with_day(1) else {
        return history;
    };
    let last = contract
        .end_date
        .map_or(until, |end| end.min(until));

    while month <= last {
        let deadline = month
            .with_day(contract.payment_day.min(28))
            .unwrap_or(month)
            + Duration::days(GRACE_DAYS);

        let in_month = payments
            .iter()
            .filter(|(d, _)| d.year() == month.year() && d.month() == month.month());
        let paid_total = in_month.clone().map(|(_, a)| a).sum();
        let paid_on_time = in_month.filter(|(d, _)| *d <= deadline).map(|(_, a)| a).sum();

        history.push(MonthRecord {
            month,
            due: contract.monthly_rent,
            paid_on_time,
            paid_total,
        });

        match month.checked_add_months(Months::new(1)) {
            Some(next) => month = next,
            None => break,
        }
    }

    history
}

// ============================================================================
// DATABASE LOADERS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TenantRisk {
    pub tenant_id: i64,
    pub tenant_name: String,
    pub contract_id: Option<i64>,
    #[serde(flatten)]
    pub assessment: RiskAssessment,
}

fn confirmed_payments(conn: &Connection, contract_id: i64) -> Result<Vec<(NaiveDate, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT paid_at, amount FROM payments
         WHERE contract_id = ?1 AND status = 'confirmed' ORDER BY paid_at",
    )?;
    let rows = stmt
        .query_map(params![contract_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Risk of one tenant, evaluated on their current contract up to `as_of`
pub fn tenant_risk(
    conn: &Connection,
    agency_id: i64,
    tenant_id: i64,
    as_of: NaiveDate,
) -> Result<TenantRisk> {
    let tenant = get_tenant(conn, agency_id, tenant_id)?;
    let contract = current_contract_for_tenant(conn, tenant.id)?;

    let history = match &contract {
        Some(c) => build_history(c, &confirmed_payments(conn, c.id)?, as_of),
        None => Vec::new(),
    };

    Ok(TenantRisk {
        tenant_id: tenant.id,
        tenant_name: tenant.full_name,
        contract_id: contract.map(|c| c.id),
        assessment: assess(&history),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskOverview {
    pub tenants: Vec<TenantRisk>,
    pub at_risk: usize,
}

/// All active tenants, riskiest (lowest probability) first
pub fn risk_overview(conn: &Connection, agency_id: i64, as_of: NaiveDate) -> Result<RiskOverview> {
    let mut stmt = conn.prepare(
        "SELECT id FROM tenants WHERE agency_id = ?1 AND status = 'active' ORDER BY id",
    )?;
    let ids = stmt
        .query_map([agency_id], |row| row.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut tenants = ids
        .into_iter()
        .map(|id| tenant_risk(conn, agency_id, id, as_of))
        .collect::<Result<Vec<_>>>()?;
    tenants.sort_by(|a, b| {
        a.assessment
            .payment_probability
            .total_cmp(&b.assessment.payment_probability)
    });

    let at_risk = tenants
        .iter()
        .filter(|t| t.assessment.payment_probability < AT_RISK_PROBABILITY)
        .count();
    Ok(RiskOverview { tenants, at_risk })
}

// 🧮 Commission & owner remittance
//
// The agency keeps a flat 15% of every collected payment; the owner gets
// the rest:
//   commission = round_half_up(amount × 15%)
//   owner_net  = amount − commission
//
// Amounts are integer GNF, so the split is exact and always sums back
// to the collected amount.

use crate::error::{AkigError, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// Commission rate in basis points (1500 = 15%)
pub const COMMISSION_RATE_BPS: i64 = 1500;

// ============================================================================
// ALLOCATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub amount: i64,
    pub commission: i64,
    pub owner_net: i64,
}

/// Split a collected amount between agency commission and owner net
///
/// The product is taken in i128, so the split stays exact for any i64.
pub fn allocate(amount: i64) -> Allocation {
    let scaled = (i128::from(amount) * i128::from(COMMISSION_RATE_BPS) + 5_000) / 10_000;
    // |commission| <= |amount|, so it fits back into i64
    let commission = scaled as i64;
    Allocation {
        amount,
        commission,
        owner_net: amount - commission,
    }
}

// ============================================================================
// OWNER STATEMENT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertyLine {
    pub property_id: Option<i64>,
    pub property_name: String,
    pub payments: i64,
    pub gross: i64,
    pub commission: i64,
    pub net: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerStatement {
    pub owner_id: i64,
    pub owner_name: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub lines: Vec<PropertyLine>,
    pub total_gross: i64,
    pub total_commission: i64,
    pub total_net: i64,
}

impl OwnerStatement {
    pub fn summary(&self) -> String {
        format!(
            "{} ({} → {}): collected {} GNF, commission {} GNF, net {} GNF",
            self.owner_name,
            self.from,
            self.to,
            self.total_gross,
            self.total_commission,
            self.total_net
        )
    }
}

/// Remittance statement for one owner over `[from, to]`.
/// Only confirmed payments count.
pub fn owner_statement(
    conn: &Connection,
    agency_id: i64,
    owner_id: i64,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<OwnerStatement> {
    if from > to {
        return Err(AkigError::validation("statement period start is after its end"));
    }
    let owner = crate::models::owner::get_owner(conn, agency_id, owner_id)?;

    let mut stmt = conn.prepare(
        "SELECT p.property_id, COALESCE(pr.name, '(sans site)'), COUNT(*),
                SUM(p.amount), SUM(p.commission_amount), SUM(p.owner_net)
         FROM payments p
         LEFT JOIN properties pr ON pr.id = p.property_id
         WHERE p.agency_id = ?1 AND p.owner_id = ?2 AND p.status = 'confirmed'
           AND p.paid_at >= ?3 AND p.paid_at <= ?4
         GROUP BY p.property_id
         ORDER BY 2",
    )?;

    let lines = stmt
        .query_map(params![agency_id, owner_id, from, to], |row| {
            Ok(PropertyLine {
                property_id: row.get(0)?,
                property_name: row.get(1)?,
                payments: row.get(2)?,
                gross: row.get(3)?,
                commission: row.get(4)?,
                net: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(OwnerStatement {
        owner_id,
        owner_name: owner.name,
        from,
        to,
        total_gross: lines.iter().map(|l| l.gross).sum(),
        total_commission: lines.iter().map(|l| l.commission).sum(),
        total_net: lines.iter().map(|l| l.net).sum(),
        lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_round_amounts() {
        let a = allocate(1_000_000);
        assert_eq!(a.commission, 150_000);
        assert_eq!(a.owner_net, 850_000);
    }

    #[test]
    fn test_allocate_rounds_half_up() {
        // 15% of 10 = 1.5 → 2
        assert_eq!(allocate(10).commission, 2);
        // 15% of 3 = 0.45 → 0
        assert_eq!(allocate(3).commission, 0);
        // 15% of 7 = 1.05 → 1
        assert_eq!(allocate(7).commission, 1);
    }

    #[test]
    fn test_allocation_sums_back() {
        for amount in [1, 99, 333_333, 1_234_567, 25_000_001] {
            let a = allocate(amount);
            assert_eq!(a.commission + a.owner_net, amount);
        }
    }

    #[test]
    fn test_allocate_huge_amounts_stay_exact() {
        let a = allocate(7_000_000_000_000_000);
        assert_eq!(a.commission, 1_050_000_000_000_000);
        assert_eq!(a.owner_net, 5_950_000_000_000_000);

        let max = allocate(i64::MAX);
        assert!(max.commission > 0);
        assert_eq!(max.commission + max.owner_net, i64::MAX);
    }
}

// 🔐 Security deposits held for the duration of a lease

use crate::error::{AkigError, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Held,
    Returned,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Held => "held",
            DepositStatus::Returned => "returned",
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositStatus {
    type Err = AkigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "held" => Ok(DepositStatus::Held),
            "returned" => Ok(DepositStatus::Returned),
            other => Err(AkigError::validation(format!(
                "unknown deposit status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Deduct,
    Return,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Deduct => "deduct",
            MovementKind::Return => "return",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Deposit {
    pub id: i64,
    pub agency_id: i64,
    pub contract_id: i64,
    pub amount: i64,
    pub balance: i64,
    pub status: DepositStatus,
    pub received_at: NaiveDate,
    pub returned_at: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositMovement {
    pub id: i64,
    pub deposit_id: i64,
    pub kind: MovementKind,
    pub amount: i64,
    pub reason: Option<String>,
    pub occurred_at: NaiveDate,
}

impl Deposit {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        Ok(Deposit {
            id: row.get("id")?,
            agency_id: row.get("agency_id")?,
            contract_id: row.get("contract_id")?,
            amount: row.get("amount")?,
            balance: row.get("balance")?,
            status: status.parse().unwrap_or(DepositStatus::Held),
            received_at: row.get("received_at")?,
            returned_at: row.get("returned_at")?,
        })
    }

    fn ensure_held(&self) -> Result<()> {
        if self.status != DepositStatus::Held {
            return Err(AkigError::Conflict(format!(
                "deposit {} is already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

const DEPOSIT_COLUMNS: &str =
    "id, agency_id, contract_id, amount, balance, status, received_at, returned_at";

/// Register the deposit received for a contract (one per contract)
pub fn register_deposit(
    conn: &Connection,
    agency_id: i64,
    contract_id: i64,
    amount: i64,
    received_at: NaiveDate,
) -> Result<Deposit> {
    super::check_amount(amount, "deposit amount")?;
    super::contract::get_contract(conn, agency_id, contract_id)?;

    let result = conn.execute(
        "INSERT INTO deposits (agency_id, contract_id, amount, balance, received_at)
         VALUES (?1, ?2, ?3, ?3, ?4)",
        params![agency_id, contract_id, amount, received_at],
    );
    if let Err(e) = result {
        let err = AkigError::from(e);
        return Err(if err.is_constraint_violation() {
            AkigError::Conflict(format!(
                "contract {} already has a deposit",
                contract_id
            ))
        } else {
            err
        });
    }

    get_deposit(conn, agency_id, conn.last_insert_rowid())
}

pub fn get_deposit(conn: &Connection, agency_id: i64, id: i64) -> Result<Deposit> {
    conn.query_row(
        &format!(
            "SELECT {} FROM deposits WHERE id = ?1 AND agency_id = ?2",
            DEPOSIT_COLUMNS
        ),
        params![id, agency_id],
        Deposit::from_row,
    )
    .optional()?
    .ok_or_else(|| AkigError::not_found("deposit", id))
}

pub fn list_deposits(
    conn: &Connection,
    agency_id: i64,
    status: Option<DepositStatus>,
) -> Result<Vec<Deposit>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM deposits WHERE agency_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY received_at DESC, id DESC",
        DEPOSIT_COLUMNS
    ))?;
    let deposits = stmt
        .query_map(
            params![agency_id, status.map(|s| s.as_str())],
            Deposit::from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(deposits)
}

pub fn list_movements(conn: &Connection, deposit_id: i64) -> Result<Vec<DepositMovement>> {
    let mut stmt = conn.prepare(
        "SELECT id, deposit_id, kind, amount, reason, occurred_at
         FROM deposit_movements WHERE deposit_id = ?1 ORDER BY id",
    )?;
    let movements = stmt
        .query_map([deposit_id], |row| {
            let kind: String = row.get("kind")?;
            Ok(DepositMovement {
                id: row.get("id")?,
                deposit_id: row.get("deposit_id")?,
                kind: if kind == "return" {
                    MovementKind::Return
                } else {
                    MovementKind::Deduct
                },
                amount: row.get("amount")?,
                reason: row.get("reason")?,
                occurred_at: row.get("occurred_at")?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(movements)
}

fn insert_movement(
    conn: &Connection,
    deposit_id: i64,
    kind: MovementKind,
    amount: i64,
    reason: Option<&str>,
    occurred_at: NaiveDate,
) -> Result<()> {
    conn.execute(
        "INSERT INTO deposit_movements (deposit_id, kind, amount, reason, occurred_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![deposit_id, kind.as_str(), amount, reason, occurred_at],
    )?;
    Ok(())
}

/// Withhold part of the deposit (repairs, unpaid charges)
pub fn deduct_deposit(
    conn: &Connection,
    agency_id: i64,
    id: i64,
    amount: i64,
    reason: &str,
    occurred_at: NaiveDate,
) -> Result<Deposit> {
    super::check_amount(amount, "deduction")?;
    if reason.trim().is_empty() {
        return Err(AkigError::validation("deduction reason is required"));
    }

    let deposit = get_deposit(conn, agency_id, id)?;
    deposit.ensure_held()?;
    if amount > deposit.balance {
        return Err(AkigError::validation(format!(
            "deduction of {} exceeds the remaining balance of {}",
            amount, deposit.balance
        )));
    }

    insert_movement(conn, id, MovementKind::Deduct, amount, Some(reason.trim()), occurred_at)?;
    conn.execute(
        "UPDATE deposits SET balance = balance - ?1 WHERE id = ?2",
        params![amount, id],
    )?;
    get_deposit(conn, agency_id, id)
}

/// Refund what is left and close the deposit
pub fn return_deposit(
    conn: &Connection,
    agency_id: i64,
    id: i64,
    returned_at: NaiveDate,
) -> Result<Deposit> {
    let deposit = get_deposit(conn, agency_id, id)?;
    deposit.ensure_held()?;
    if returned_at < deposit.received_at {
        return Err(AkigError::validation(
            "return date is before the deposit was received",
        ));
    }

    insert_movement(
        conn,
        id,
        MovementKind::Return,
        deposit.balance,
        Some("refund"),
        returned_at,
    )?;
    conn.execute(
        "UPDATE deposits SET balance = 0, status = 'returned', returned_at = ?1 WHERE id = ?2",
        params![returned_at, id],
    )?;
    get_deposit(conn, agency_id, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ensure_default_agency, open_database};
    use crate::models::contract::{insert_contract, NewContract};
    use crate::models::{property::upsert_property_by_name, tenant::upsert_tenant};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn setup() -> (Connection, i64, i64) {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();
        let site = upsert_property_by_name(&conn, agency, "Résidence Dixinn", None).unwrap();
        let tenant = upsert_tenant(&conn, agency, "Mariama Diallo", None, site).unwrap();
        let contract = insert_contract(&conn, agency, &NewContract::new(tenant, 1_000_000, day(1)))
            .unwrap();
        (conn, agency, contract.id)
    }

    #[test]
    fn test_deduct_then_return() {
        let (conn, agency, contract) = setup();
        let d = register_deposit(&conn, agency, contract, 2_000_000, day(1)).unwrap();
        assert_eq!(d.balance, 2_000_000);

        let d = deduct_deposit(&conn, agency, d.id, 300_000, "peinture", day(20)).unwrap();
        assert_eq!(d.balance, 1_700_000);

        let d = return_deposit(&conn, agency, d.id, day(25)).unwrap();
        assert_eq!(d.status, DepositStatus::Returned);
        assert_eq!(d.balance, 0);

        let movements = list_movements(&conn, d.id).unwrap();
        assert_eq!(movements.len(), 2);
        assert_eq!(movements[1].kind, MovementKind::Return);
        assert_eq!(movements[1].amount, 1_700_000);
    }

    #[test]
    fn test_deduction_cannot_exceed_balance() {
        let (conn, agency, contract) = setup();
        let d = register_deposit(&conn, agency, contract, 500_000, day(1)).unwrap();
        assert!(matches!(
            deduct_deposit(&conn, agency, d.id, 500_001, "travaux", day(2)),
            Err(AkigError::Validation(_))
        ));
        // the whole balance is fine
        let d = deduct_deposit(&conn, agency, d.id, 500_000, "travaux", day(2)).unwrap();
        assert_eq!(d.balance, 0);
    }

    #[test]
    fn test_returned_deposit_is_closed() {
        let (conn, agency, contract) = setup();
        let d = register_deposit(&conn, agency, contract, 500_000, day(1)).unwrap();
        return_deposit(&conn, agency, d.id, day(2)).unwrap();

        assert!(matches!(
            deduct_deposit(&conn, agency, d.id, 1, "x", day(3)),
            Err(AkigError::Conflict(_))
        ));
        assert!(matches!(
            return_deposit(&conn, agency, d.id, day(3)),
            Err(AkigError::Conflict(_))
        ));
    }

    #[test]
    fn test_one_deposit_per_contract() {
        let (conn, agency, contract) = setup();
        register_deposit(&conn, agency, contract, 500_000, day(1)).unwrap();
        assert!(matches!(
            register_deposit(&conn, agency, contract, 500_000, day(1)),
            Err(AkigError::Conflict(_))
        ));
        assert_eq!(list_deposits(&conn, agency, Some(DepositStatus::Held)).unwrap().len(), 1);
    }
}

// 💳 Payment processing
//
// create → (pending) → confirm | fail
//
// Every created payment gets its commission split, a yearly receipt number
// and a dedup hash. A client-supplied idempotency key turns a retried
// request into a read of the original payment.

use super::{arrears, commission};
use crate::db::{next_receipt_number, record_event, sha256_hex};
use crate::error::{AkigError, Result};
use crate::models::contract::get_contract;
use crate::models::payment::{
    delete_pending_payment, find_payment_by_hash, find_payment_by_idempotency_key, get_payment,
    insert_payment_row, update_payment_status,
};
use crate::models::{check_amount, Payment, PaymentMode, PaymentRow, PaymentStatus};
use chrono::{Datelike, Duration, NaiveDate};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Payments below this share of the monthly rent are flagged in the logs
const UNDERPAYMENT_WARN_PERCENT: i64 = 90;

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePayment {
    pub contract_id: i64,
    pub tenant_id: i64,
    pub amount: i64,
    /// Free text is accepted and normalised ("Espèces", "OM", ...)
    pub mode: String,
    pub paid_at: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub external_ref: Option<String>,
    pub allocation: Option<String>,
    pub channel: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    pub payment: Payment,
    /// false when an idempotent replay returned the original payment
    pub created: bool,
}

/// Dedup key of a payment entered through the API
pub fn payment_hash(
    contract_id: i64,
    tenant_id: i64,
    paid_at: NaiveDate,
    amount: i64,
    mode: PaymentMode,
) -> String {
    sha256_hex(&[
        &contract_id.to_string(),
        &tenant_id.to_string(),
        &paid_at.to_string(),
        &amount.to_string(),
        mode.as_str(),
    ])
}

pub fn create_payment(
    conn: &Connection,
    agency_id: i64,
    input: &CreatePayment,
    idempotency_key: Option<&str>,
    actor: &str,
) -> Result<PaymentOutcome> {
    check_amount(input.amount, "payment amount")?;
    let idempotency_key = idempotency_key.map(str::trim).filter(|k| !k.is_empty());

    if let Some(key) = idempotency_key {
        if let Some(existing) = find_payment_by_idempotency_key(conn, agency_id, key)? {
            info!(payment_id = existing.id, key, "idempotent replay");
            return Ok(PaymentOutcome {
                payment: existing,
                created: false,
            });
        }
    }

    let contract = get_contract(conn, agency_id, input.contract_id)?;
    if contract.is_terminated() {
        return Err(AkigError::Conflict(format!(
            "contract {} is terminated",
            contract.id
        )));
    }
    if contract.tenant_id != input.tenant_id {
        return Err(AkigError::validation(format!(
            "contract {} does not belong to tenant {}",
            contract.id, input.tenant_id
        )));
    }

    let mode = PaymentMode::normalize(&input.mode);
    let raw_hash = payment_hash(contract.id, input.tenant_id, input.paid_at, input.amount, mode);
    if let Some(existing) = find_payment_by_hash(conn, &raw_hash)? {
        return Err(AkigError::Conflict(format!(
            "an identical payment already exists (id {})",
            existing
        )));
    }

    if contract.monthly_rent > 0
        && i128::from(input.amount) * 100
            < i128::from(contract.monthly_rent) * i128::from(UNDERPAYMENT_WARN_PERCENT)
    {
        warn!(
            contract_id = contract.id,
            amount = input.amount,
            monthly_rent = contract.monthly_rent,
            "payment below 90% of the monthly rent"
        );
    }

    let split = commission::allocate(input.amount);

    let tx = conn.unchecked_transaction()?;
    let reference = next_receipt_number(&tx, agency_id, input.paid_at.year())?;
    let id = insert_payment_row(
        &tx,
        &PaymentRow {
            agency_id,
            contract_id: Some(contract.id),
            tenant_id: Some(input.tenant_id),
            owner_id: contract.owner_id,
            property_id: contract.property_id,
            amount: input.amount,
            mode,
            status: PaymentStatus::Pending,
            paid_at: input.paid_at,
            due_date: input.due_date,
            reference: Some(reference.clone()),
            external_ref: input.external_ref.clone(),
            allocation: input.allocation.clone(),
            channel: input.channel.clone(),
            comment: input.comment.clone(),
            commission_amount: split.commission,
            owner_net: split.owner_net,
            raw_hash,
            idempotency_key: idempotency_key.map(String::from),
            source_file: None,
            import_run_id: None,
        },
    )?;
    record_event(
        &tx,
        "payment_created",
        "payment",
        id,
        serde_json::json!({
            "amount": input.amount,
            "mode": mode.as_str(),
            "reference": reference,
            "contract_id": contract.id,
        }),
        actor,
    )?;
    tx.commit()?;

    info!(payment_id = id, %reference, amount = input.amount, "payment created");
    Ok(PaymentOutcome {
        payment: get_payment(conn, agency_id, id)?,
        created: true,
    })
}

fn change_status(
    conn: &Connection,
    agency_id: i64,
    id: i64,
    next: PaymentStatus,
    actor: &str,
) -> Result<Payment> {
    let tx = conn.unchecked_transaction()?;
    let payment = update_payment_status(&tx, agency_id, id, next)?;
    record_event(
        &tx,
        &format!("payment_{}", next),
        "payment",
        id,
        serde_json::json!({ "status": next.as_str() }),
        actor,
    )?;

    // the yearly snapshot only counts confirmed money
    if next == PaymentStatus::Confirmed {
        if let Some(contract_id) = payment.contract_id {
            arrears::recompute_contract_year(&tx, contract_id, payment.paid_at.year())?;
        }
    }
    tx.commit()?;

    info!(payment_id = id, status = %next, "payment status changed");
    Ok(payment)
}

pub fn confirm_payment(conn: &Connection, agency_id: i64, id: i64, actor: &str) -> Result<Payment> {
    change_status(conn, agency_id, id, PaymentStatus::Confirmed, actor)
}

pub fn fail_payment(conn: &Connection, agency_id: i64, id: i64, actor: &str) -> Result<Payment> {
    change_status(conn, agency_id, id, PaymentStatus::Failed, actor)
}

pub fn delete_payment(conn: &Connection, agency_id: i64, id: i64, actor: &str) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    let payment = delete_pending_payment(&tx, agency_id, id)?;
    record_event(
        &tx,
        "payment_deleted",
        "payment",
        id,
        serde_json::json!({ "amount": payment.amount, "reference": payment.reference }),
        actor,
    )?;
    tx.commit()?;
    Ok(())
}

// ============================================================================
// STATISTICS
// ============================================================================

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusTotal {
    pub status: String,
    pub count: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModeTotal {
    pub mode: String,
    pub count: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStats {
    pub count: i64,
    pub total_amount: i64,
    pub average_amount: f64,
    pub min_amount: Option<i64>,
    pub max_amount: Option<i64>,
    pub total_commission: i64,
    pub by_status: Vec<StatusTotal>,
    pub by_mode: Vec<ModeTotal>,
}

/// Aggregate figures over `[from, to]` (both optional)
pub fn payment_stats(
    conn: &Connection,
    agency_id: i64,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<PaymentStats> {
    const RANGE: &str =
        "agency_id = ?1 AND (?2 IS NULL OR paid_at >= ?2) AND (?3 IS NULL OR paid_at <= ?3)";

    let (count, total_amount, average_amount, min_amount, max_amount, total_commission) = conn
        .query_row(
            &format!(
                "SELECT COUNT(*), COALESCE(SUM(amount), 0), COALESCE(AVG(amount), 0.0),
                        MIN(amount), MAX(amount), COALESCE(SUM(commission_amount), 0)
                 FROM payments WHERE {}",
                RANGE
            ),
            params![agency_id, from, to],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT status, COUNT(*), SUM(amount) FROM payments WHERE {} GROUP BY status ORDER BY status",
        RANGE
    ))?;
    let by_status = stmt
        .query_map(params![agency_id, from, to], |row| {
            Ok(StatusTotal {
                status: row.get(0)?,
                count: row.get(1)?,
                total: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(&format!(
        "SELECT mode, COUNT(*), SUM(amount) FROM payments WHERE {} GROUP BY mode ORDER BY 3 DESC",
        RANGE
    ))?;
    let by_mode = stmt
        .query_map(params![agency_id, from, to], |row| {
            Ok(ModeTotal {
                mode: row.get(0)?,
                count: row.get(1)?,
                total: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(PaymentStats {
        count,
        total_amount,
        average_amount,
        min_amount,
        max_amount,
        total_commission,
        by_status,
        by_mode,
    })
}

// ============================================================================
// OVERDUE
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct OverduePayment {
    #[serde(flatten)]
    pub payment: Payment,
    pub days_overdue: i64,
}

/// Pending payments whose due date is more than `days` days before `today`
pub fn overdue_payments(
    conn: &Connection,
    agency_id: i64,
    days: i64,
    today: NaiveDate,
) -> Result<Vec<OverduePayment>> {
    if days < 0 {
        return Err(AkigError::validation("days must not be negative"));
    }
    let cutoff = today - Duration::days(days);

    let mut stmt = conn.prepare(
        "SELECT * FROM payments
         WHERE agency_id = ?1 AND status = 'pending' AND due_date IS NOT NULL AND due_date < ?2
         ORDER BY due_date ASC, id ASC",
    )?;
    let payments = stmt
        .query_map(params![agency_id, cutoff], Payment::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(payments
        .into_iter()
        .filter_map(|payment| {
            let due = payment.due_date?;
            Some(OverduePayment {
                days_overdue: (today - due).num_days(),
                payment,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_rows, ensure_default_agency, open_database};
    use crate::models::contract::{insert_contract, terminate_contract, NewContract};
    use crate::models::{
        owner::upsert_owner_by_name, property::upsert_property_by_name, tenant::upsert_tenant,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Fixture {
        conn: Connection,
        agency: i64,
        tenant: i64,
        contract: i64,
        owner: i64,
    }

    fn fixture() -> Fixture {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();
        let owner = upsert_owner_by_name(&conn, agency, "Mamadou Bah").unwrap();
        let site = upsert_property_by_name(&conn, agency, "Immeuble Kaloum", Some(owner)).unwrap();
        let tenant = upsert_tenant(&conn, agency, "Aissatou Barry", None, site).unwrap();
        let contract =
            insert_contract(&conn, agency, &NewContract::new(tenant, 1_000_000, date(2024, 1, 1)))
                .unwrap();
        Fixture {
            conn,
            agency,
            tenant,
            contract: contract.id,
            owner,
        }
    }

    fn input(f: &Fixture, amount: i64, paid_at: NaiveDate) -> CreatePayment {
        CreatePayment {
            contract_id: f.contract,
            tenant_id: f.tenant,
            amount,
            mode: "Espèces".into(),
            paid_at,
            due_date: None,
            external_ref: None,
            allocation: None,
            channel: None,
            comment: None,
        }
    }

    #[test]
    fn test_create_assigns_receipt_and_commission() {
        let f = fixture();
        let out = create_payment(&f.conn, f.agency, &input(&f, 1_000_000, date(2024, 2, 3)), None, "test")
            .unwrap();

        assert!(out.created);
        let p = out.payment;
        assert_eq!(p.reference.as_deref(), Some("GNF-2024-000001"));
        assert_eq!(p.commission_amount, 150_000);
        assert_eq!(p.owner_net, 850_000);
        assert_eq!(p.mode, PaymentMode::Cash);
        assert_eq!(p.status, PaymentStatus::Pending);
        assert_eq!(p.owner_id, Some(f.owner));
    }

    #[test]
    fn test_idempotent_replay_returns_original() {
        let f = fixture();
        let first = create_payment(
            &f.conn,
            f.agency,
            &input(&f, 500_000, date(2024, 2, 3)),
            Some("key-123"),
            "test",
        )
        .unwrap();
        let replay = create_payment(
            &f.conn,
            f.agency,
            &input(&f, 500_000, date(2024, 2, 3)),
            Some("key-123"),
            "test",
        )
        .unwrap();

        assert!(first.created);
        assert!(!replay.created);
        assert_eq!(first.payment.id, replay.payment.id);
        assert_eq!(count_rows(&f.conn, "payments").unwrap(), 1);
    }

    #[test]
    fn test_identical_payment_without_key_conflicts() {
        let f = fixture();
        create_payment(&f.conn, f.agency, &input(&f, 500_000, date(2024, 2, 3)), None, "test").unwrap();
        let dup = create_payment(&f.conn, f.agency, &input(&f, 500_000, date(2024, 2, 3)), None, "test");
        assert!(matches!(dup, Err(AkigError::Conflict(_))));
    }

    #[test]
    fn test_failed_payment_can_be_entered_again() {
        let f = fixture();
        let mut om = input(&f, 750_000, date(2024, 4, 2));
        om.mode = "Orange Money".into();

        let first = create_payment(&f.conn, f.agency, &om, None, "t").unwrap().payment;
        fail_payment(&f.conn, f.agency, first.id, "t").unwrap();

        let retry = create_payment(&f.conn, f.agency, &om, None, "t").unwrap();
        assert!(retry.created);
        assert_ne!(retry.payment.id, first.id);
        assert_eq!(retry.payment.reference.as_deref(), Some("GNF-2024-000002"));
        assert_eq!(retry.payment.status, PaymentStatus::Pending);

        // the live retry blocks a third copy again
        assert!(matches!(
            create_payment(&f.conn, f.agency, &om, None, "t"),
            Err(AkigError::Conflict(_))
        ));
        assert_eq!(count_rows(&f.conn, "payments").unwrap(), 2);
    }

    #[test]
    fn test_receipts_and_keys_are_per_agency() {
        let f = fixture();
        let other = crate::models::agency::insert_agency(&f.conn, "Agence Kindia", Some("Kindia"))
            .unwrap();
        let site = upsert_property_by_name(&f.conn, other, "Résidence Kindia", None).unwrap();
        let tenant = upsert_tenant(&f.conn, other, "Kadiatou Camara", None, site).unwrap();
        let contract =
            insert_contract(&f.conn, other, &NewContract::new(tenant, 800_000, date(2024, 1, 1)))
                .unwrap();

        let here = create_payment(
            &f.conn,
            f.agency,
            &input(&f, 500_000, date(2024, 2, 3)),
            Some("shared-key"),
            "t",
        )
        .unwrap();
        let mut there_input = input(&f, 800_000, date(2024, 2, 3));
        there_input.contract_id = contract.id;
        there_input.tenant_id = tenant;
        let there = create_payment(&f.conn, other, &there_input, Some("shared-key"), "t").unwrap();

        assert!(there.created);
        assert_ne!(here.payment.id, there.payment.id);
        assert_eq!(here.payment.reference, there.payment.reference);
    }

    #[test]
    fn test_rejects_out_of_range_amount() {
        let f = fixture();
        let huge = create_payment(
            &f.conn,
            f.agency,
            &input(&f, 7_000_000_000_000_000, date(2024, 2, 3)),
            None,
            "t",
        );
        assert!(matches!(huge, Err(AkigError::Validation(_))));
        assert_eq!(count_rows(&f.conn, "payments").unwrap(), 0);
    }

    #[test]
    fn test_rejects_bad_input() {
        let f = fixture();
        let zero = create_payment(&f.conn, f.agency, &input(&f, 0, date(2024, 2, 3)), None, "t");
        assert!(matches!(zero, Err(AkigError::Validation(_))));

        let mut wrong_tenant = input(&f, 100, date(2024, 2, 3));
        wrong_tenant.tenant_id = f.tenant + 100;
        assert!(matches!(
            create_payment(&f.conn, f.agency, &wrong_tenant, None, "t"),
            Err(AkigError::Validation(_))
        ));

        terminate_contract(&f.conn, f.agency, f.contract).unwrap();
        assert!(matches!(
            create_payment(&f.conn, f.agency, &input(&f, 100, date(2024, 2, 3)), None, "t"),
            Err(AkigError::Conflict(_))
        ));
    }

    #[test]
    fn test_confirm_updates_arrears_snapshot() {
        let f = fixture();
        let p = create_payment(&f.conn, f.agency, &input(&f, 3_000_000, date(2024, 3, 1)), None, "t")
            .unwrap()
            .payment;

        confirm_payment(&f.conn, f.agency, p.id, "t").unwrap();
        let snapshot = arrears::get_snapshot(&f.conn, f.contract, 2024).unwrap().unwrap();
        assert_eq!(snapshot.paid_amount, 3_000_000);
        assert_eq!(snapshot.arrears_amount, 9_000_000);

        assert!(matches!(
            fail_payment(&f.conn, f.agency, p.id, "t"),
            Err(AkigError::InvalidTransition { .. })
        ));
        assert!(matches!(
            delete_payment(&f.conn, f.agency, p.id, "t"),
            Err(AkigError::Conflict(_))
        ));
    }

    #[test]
    fn test_owner_statement_counts_confirmed_only() {
        let f = fixture();
        let a = create_payment(&f.conn, f.agency, &input(&f, 1_000_000, date(2024, 1, 5)), None, "t")
            .unwrap()
            .payment;
        create_payment(&f.conn, f.agency, &input(&f, 1_000_000, date(2024, 2, 5)), None, "t").unwrap();
        confirm_payment(&f.conn, f.agency, a.id, "t").unwrap();

        let statement = commission::owner_statement(
            &f.conn,
            f.agency,
            f.owner,
            date(2024, 1, 1),
            date(2024, 12, 31),
        )
        .unwrap();
        assert_eq!(statement.lines.len(), 1);
        assert_eq!(statement.total_gross, 1_000_000);
        assert_eq!(statement.total_commission, 150_000);
        assert_eq!(statement.total_net, 850_000);
    }

    #[test]
    fn test_stats_and_overdue() {
        let f = fixture();
        let mut late = input(&f, 400_000, date(2024, 1, 5));
        late.due_date = Some(date(2024, 1, 5));
        create_payment(&f.conn, f.agency, &late, None, "t").unwrap();

        let mut recent = input(&f, 600_000, date(2024, 3, 1));
        recent.due_date = Some(date(2024, 3, 1));
        recent.mode = "Orange Money".into();
        let recent = create_payment(&f.conn, f.agency, &recent, None, "t").unwrap().payment;
        confirm_payment(&f.conn, f.agency, recent.id, "t").unwrap();

        let stats = payment_stats(&f.conn, f.agency, None, None).unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_amount, 1_000_000);
        assert_eq!(stats.min_amount, Some(400_000));
        assert_eq!(stats.max_amount, Some(600_000));
        assert!((stats.average_amount - 500_000.0).abs() < f64::EPSILON);
        assert_eq!(stats.by_status.len(), 2);
        assert_eq!(stats.by_mode[0].mode, "orange_money");

        let overdue = overdue_payments(&f.conn, f.agency, 30, date(2024, 3, 10)).unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].days_overdue, 65);
    }
}

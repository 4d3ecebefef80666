// 🔔 Collection reminders derived from the arrears snapshots
//
// One notification per (contract, year, level): running the generator again
// is harmless, and a tenant who slides from reminder to pressure gets a new
// message for the new level.

use super::arrears::PressureLevel;
use super::templates::format_gnf;
use crate::db::record_event;
use crate::error::Result;
use crate::models::notification::{insert_notification_once, list_notifications, mark_sent};
use crate::models::{Notification, NotificationStatus};
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct GenerateSummary {
    pub examined: usize,
    pub created: usize,
}

pub fn reminder_message(
    tenant_name: &str,
    level: PressureLevel,
    year: i32,
    arrears: i64,
    months: i64,
) -> String {
    let amount = format_gnf(arrears);
    match level {
        PressureLevel::Closure => format!(
            "{}, sans règlement de {} ({} mois impayés en {}), la résiliation du bail sera engagée.",
            tenant_name, amount, months, year
        ),
        PressureLevel::Pressure => format!(
            "{}, votre arriéré de {} ({} mois en {}) doit être régularisé au plus vite.",
            tenant_name, amount, months, year
        ),
        _ => format!(
            "{}, rappel : {} de loyer restent dus pour {}.",
            tenant_name, amount, year
        ),
    }
}

/// Create reminders for every open contract whose latest snapshot (or the
/// snapshot of `year`, when given) is at reminder level or above
pub fn generate_reminders(
    conn: &Connection,
    agency_id: i64,
    year: Option<i32>,
) -> Result<GenerateSummary> {
    let mut stmt = conn.prepare(
        "SELECT c.id, t.id, t.full_name, s.year, s.arrears_amount, s.arrears_months, s.pressure_level
         FROM payment_status_year s
         JOIN contracts c ON c.id = s.contract_id
         JOIN tenants t ON t.id = c.tenant_id
         WHERE c.agency_id = ?1 AND c.status != 'terminated'
           AND s.pressure_level != 'none'
           AND s.year = COALESCE(?2,
                 (SELECT MAX(year) FROM payment_status_year WHERE contract_id = c.id))
         ORDER BY c.id",
    )?;
    let rows = stmt
        .query_map(params![agency_id, year], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i32>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut summary = GenerateSummary {
        examined: rows.len(),
        created: 0,
    };
    for (contract_id, tenant_id, tenant_name, year, arrears, months, level) in rows {
        let level: PressureLevel = level.parse()?;
        if level < PressureLevel::Reminder {
            continue;
        }
        let message = reminder_message(&tenant_name, level, year, arrears, months);
        if insert_notification_once(
            conn,
            agency_id,
            tenant_id,
            contract_id,
            year,
            level.as_str(),
            &message,
        )? {
            summary.created += 1;
        }
    }

    info!(examined = summary.examined, created = summary.created, "reminders generated");
    Ok(summary)
}

pub fn pending_notifications(conn: &Connection, agency_id: i64) -> Result<Vec<Notification>> {
    list_notifications(conn, agency_id, Some(NotificationStatus::Pending))
}

/// Mark as sent and keep a trace in the audit log
pub fn mark_notification_sent(
    conn: &Connection,
    agency_id: i64,
    id: i64,
    actor: &str,
) -> Result<Notification> {
    let tx = conn.unchecked_transaction()?;
    let notification = mark_sent(&tx, agency_id, id)?;
    record_event(
        &tx,
        "notification_sent",
        "notification",
        id,
        serde_json::json!({ "level": notification.level, "channel": notification.channel }),
        actor,
    )?;
    tx.commit()?;
    Ok(notification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ensure_default_agency, open_database};
    use crate::error::AkigError;
    use crate::models::contract::insert_contract;
    use crate::models::property::upsert_property_by_name;
    use crate::models::tenant::upsert_tenant;
    use crate::models::NewContract;
    use crate::services::arrears::recompute_contract_year;
    use chrono::NaiveDate;

    fn contract_with_arrears(conn: &Connection, agency: i64, name: &str) -> i64 {
        let site = upsert_property_by_name(conn, agency, &format!("Site {}", name), None).unwrap();
        let tenant = upsert_tenant(conn, agency, name, None, site).unwrap();
        let contract = insert_contract(
            conn,
            agency,
            &NewContract::new(tenant, 100_000, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
        )
        .unwrap();
        // nothing paid: 12 months of arrears → closure
        recompute_contract_year(conn, contract.id, 2024).unwrap();
        contract.id
    }

    #[test]
    fn test_messages_follow_level() {
        let msg = reminder_message("Awa", PressureLevel::Reminder, 2024, 500_000, 1);
        assert!(msg.contains("rappel"));
        assert!(msg.contains("500 000 GNF"));
        let msg = reminder_message("Awa", PressureLevel::Closure, 2024, 3_000_000, 6);
        assert!(msg.contains("résiliation"));
    }

    #[test]
    fn test_generate_is_idempotent() {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();
        contract_with_arrears(&conn, agency, "Awa Sylla");
        contract_with_arrears(&conn, agency, "Mamadou Diallo");

        let first = generate_reminders(&conn, agency, None).unwrap();
        assert_eq!(first, GenerateSummary { examined: 2, created: 2 });

        let again = generate_reminders(&conn, agency, Some(2024)).unwrap();
        assert_eq!(again.created, 0);

        let pending = pending_notifications(&conn, agency).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|n| n.level == "closure"));
    }

    #[test]
    fn test_mark_sent_once() {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();
        contract_with_arrears(&conn, agency, "Awa Sylla");
        generate_reminders(&conn, agency, None).unwrap();

        let id = pending_notifications(&conn, agency).unwrap()[0].id;
        let sent = mark_notification_sent(&conn, agency, id, "agent").unwrap();
        assert_eq!(sent.status, NotificationStatus::Sent);
        assert!(pending_notifications(&conn, agency).unwrap().is_empty());

        let again = mark_notification_sent(&conn, agency, id, "agent");
        assert!(matches!(again, Err(AkigError::Conflict(_))));
    }
}

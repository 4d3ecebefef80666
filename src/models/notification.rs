use crate::error::{AkigError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = AkigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            other => Err(AkigError::validation(format!(
                "unknown notification status '{}'",
                other
            ))),
        }
    }
}

/// Collection reminder addressed to a tenant
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: i64,
    pub agency_id: i64,
    pub tenant_id: Option<i64>,
    pub contract_id: Option<i64>,
    pub year: i32,
    /// reminder, pressure or closure
    pub level: String,
    pub channel: String,
    pub message: String,
    pub status: NotificationStatus,
    pub sent_at: Option<String>,
    pub created_at: String,
}

impl Notification {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        Ok(Notification {
            id: row.get("id")?,
            agency_id: row.get("agency_id")?,
            tenant_id: row.get("tenant_id")?,
            contract_id: row.get("contract_id")?,
            year: row.get("year")?,
            level: row.get("level")?,
            channel: row.get("channel")?,
            message: row.get("message")?,
            status: status.parse().unwrap_or(NotificationStatus::Pending),
            sent_at: row.get("sent_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

const NOTIFICATION_COLUMNS: &str = "id, agency_id, tenant_id, contract_id, year, level, channel, \
     message, status, sent_at, created_at";

/// Insert unless the (contract, year, level) notification already exists.
/// Returns true when a row was written.
pub fn insert_notification_once(
    conn: &Connection,
    agency_id: i64,
    tenant_id: i64,
    contract_id: i64,
    year: i32,
    level: &str,
    message: &str,
) -> Result<bool> {
    let written = conn.execute(
        "INSERT INTO notifications (agency_id, tenant_id, contract_id, year, level, message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (contract_id, year, level) DO NOTHING",
        params![agency_id, tenant_id, contract_id, year, level, message],
    )?;
    Ok(written > 0)
}

pub fn list_notifications(
    conn: &Connection,
    agency_id: i64,
    status: Option<NotificationStatus>,
) -> Result<Vec<Notification>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications WHERE agency_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY created_at DESC, id DESC",
        NOTIFICATION_COLUMNS
    ))?;
    let items = stmt
        .query_map(
            params![agency_id, status.map(|s| s.as_str())],
            Notification::from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(items)
}

pub fn mark_sent(conn: &Connection, agency_id: i64, id: i64) -> Result<Notification> {
    let changed = conn.execute(
        "UPDATE notifications SET status = 'sent', sent_at = ?1
         WHERE id = ?2 AND agency_id = ?3 AND status = 'pending'",
        params![crate::db::now_rfc3339(), id, agency_id],
    )?;

    let notification = conn
        .query_row(
            &format!(
                "SELECT {} FROM notifications WHERE id = ?1 AND agency_id = ?2",
                NOTIFICATION_COLUMNS
            ),
            params![id, agency_id],
            Notification::from_row,
        )
        .optional()?
        .ok_or_else(|| AkigError::not_found("notification", id))?;

    if changed == 0 {
        return Err(AkigError::Conflict(format!(
            "notification {} was already sent",
            id
        )));
    }
    Ok(notification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ensure_default_agency, open_database};
    use crate::models::contract::{insert_contract, NewContract};
    use crate::models::{property::upsert_property_by_name, tenant::upsert_tenant};
    use chrono::NaiveDate;

    #[test]
    fn test_no_duplicate_per_level_and_mark_sent() {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();
        let site = upsert_property_by_name(&conn, agency, "Immeuble Taouyah", None).unwrap();
        let tenant = upsert_tenant(&conn, agency, "Ibrahima Sow", None, site).unwrap();
        let contract = insert_contract(
            &conn,
            agency,
            &NewContract::new(tenant, 500_000, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
        )
        .unwrap();

        assert!(insert_notification_once(&conn, agency, tenant, contract.id, 2024, "reminder", "m")
            .unwrap());
        assert!(!insert_notification_once(&conn, agency, tenant, contract.id, 2024, "reminder", "m")
            .unwrap());
        assert!(insert_notification_once(&conn, agency, tenant, contract.id, 2024, "pressure", "m")
            .unwrap());

        let pending = list_notifications(&conn, agency, Some(NotificationStatus::Pending)).unwrap();
        assert_eq!(pending.len(), 2);

        let sent = mark_sent(&conn, agency, pending[0].id).unwrap();
        assert_eq!(sent.status, NotificationStatus::Sent);
        assert!(matches!(
            mark_sent(&conn, agency, pending[0].id),
            Err(AkigError::Conflict(_))
        ));
        assert!(matches!(
            mark_sent(&conn, agency, 999),
            Err(AkigError::NotFound { .. })
        ));
    }
}

// 📊 Dashboard & collection reports

use crate::error::{AkigError, Result};
use chrono::{Datelike, NaiveDate};
use rusqlite::{params, Connection};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModeBreakdown {
    pub mode: String,
    pub payments: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub as_of: NaiveDate,
    pub tenants: i64,
    pub properties: i64,
    pub occupied_properties: i64,
    /// Percentage, one decimal
    pub occupancy_rate: f64,
    pub active_contracts: i64,
    pub collected_this_month: i64,
    pub commission_this_month: i64,
    pub pending_amount: i64,
    /// Arrears of the current year's snapshots
    pub total_arrears: i64,
    pub contracts_in_arrears: i64,
    pub by_mode: Vec<ModeBreakdown>,
}

fn month_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = day.with_day(1).unwrap_or(day);
    let next = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    };
    (first, next.map_or(first, |n| n.pred_opt().unwrap_or(n)))
}

fn scalar(conn: &Connection, sql: &str, agency_id: i64) -> Result<i64> {
    Ok(conn.query_row(sql, [agency_id], |row| row.get(0))?)
}

pub fn dashboard(conn: &Connection, agency_id: i64, today: NaiveDate) -> Result<Dashboard> {
    let tenants = scalar(
        conn,
        "SELECT COUNT(*) FROM tenants WHERE agency_id = ?1 AND status = 'active'",
        agency_id,
    )?;
    let properties = scalar(
        conn,
        "SELECT COUNT(*) FROM properties WHERE agency_id = ?1",
        agency_id,
    )?;
    let occupied_properties = scalar(
        conn,
        "SELECT COUNT(*) FROM properties WHERE agency_id = ?1 AND status = 'occupied'",
        agency_id,
    )?;
    let active_contracts = scalar(
        conn,
        "SELECT COUNT(*) FROM contracts WHERE agency_id = ?1 AND status != 'terminated'",
        agency_id,
    )?;
    let pending_amount = scalar(
        conn,
        "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE agency_id = ?1 AND status = 'pending'",
        agency_id,
    )?;

    let (first, last) = month_bounds(today);
    let (collected_this_month, commission_this_month): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0), COALESCE(SUM(commission_amount), 0) FROM payments
         WHERE agency_id = ?1 AND status = 'confirmed' AND paid_at >= ?2 AND paid_at <= ?3",
        params![agency_id, first, last],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let (total_arrears, contracts_in_arrears): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(s.arrears_amount), 0), COUNT(CASE WHEN s.arrears_amount > 0 THEN 1 END)
         FROM payment_status_year s JOIN contracts c ON c.id = s.contract_id
         WHERE c.agency_id = ?1 AND c.status != 'terminated' AND s.year = ?2",
        params![agency_id, today.year()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT mode, COUNT(*), SUM(amount) FROM payments
         WHERE agency_id = ?1 AND status = 'confirmed' AND paid_at >= ?2 AND paid_at <= ?3
         GROUP BY mode ORDER BY 3 DESC",
    )?;
    let by_mode = stmt
        .query_map(params![agency_id, first, last], |row| {
            Ok(ModeBreakdown {
                mode: row.get(0)?,
                payments: row.get(1)?,
                amount: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let occupancy_rate = if properties > 0 {
        (occupied_properties as f64 * 1000.0 / properties as f64).round() / 10.0
    } else {
        0.0
    };

    Ok(Dashboard {
        as_of: today,
        tenants,
        properties,
        occupied_properties,
        occupancy_rate,
        active_contracts,
        collected_this_month,
        commission_this_month,
        pending_amount,
        total_arrears,
        contracts_in_arrears,
        by_mode,
    })
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MonthlyPoint {
    pub month: u32,
    pub payments: i64,
    pub collected: i64,
    pub commission: i64,
    pub owner_net: i64,
}

/// Confirmed collections per month of `year`; all twelve months are present
pub fn monthly_series(conn: &Connection, agency_id: i64, year: i32) -> Result<Vec<MonthlyPoint>> {
    if !(2000..=2100).contains(&year) {
        return Err(AkigError::validation(format!("year {} out of range", year)));
    }

    let mut series: Vec<MonthlyPoint> = (1..=12)
        .map(|month| MonthlyPoint {
            month,
            ..Default::default()
        })
        .collect();

    let mut stmt = conn.prepare(
        "SELECT CAST(strftime('%m', paid_at) AS INTEGER), COUNT(*), SUM(amount),
                SUM(commission_amount), SUM(owner_net)
         FROM payments
         WHERE agency_id = ?1 AND status = 'confirmed'
           AND CAST(strftime('%Y', paid_at) AS INTEGER) = ?2
         GROUP BY 1",
    )?;
    let rows = stmt.query_map(params![agency_id, year], |row| {
        Ok(MonthlyPoint {
            month: row.get(0)?,
            payments: row.get(1)?,
            collected: row.get(2)?,
            commission: row.get(3)?,
            owner_net: row.get(4)?,
        })
    })?;

    for point in rows {
        let point = point?;
        if let Some(slot) = series.get_mut(point.month as usize - 1) {
            *slot = point;
        }
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ensure_default_agency, open_database};
    use crate::models::property::insert_property;
    use crate::models::{NewProperty, PaymentMode};
    use crate::services::import::{import_payments, ImportFormat};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seeded() -> (Connection, i64) {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();
        let data = "\
Locataire,Propriétaire,Site,Date,Montant,Mode
Mamadou Diallo,Alpha,Kaloum,2024-03-05,1000000,cash
Awa Sylla,Alpha,Dixinn,2024-03-10,500000,OM
Awa Sylla,Alpha,Dixinn,2024-04-10,500000,OM
";
        import_payments(&conn, agency, "seed.csv", ImportFormat::Csv, data.as_bytes(), "t")
            .unwrap();
        (conn, agency)
    }

    #[test]
    fn test_month_bounds() {
        assert_eq!(month_bounds(date(2024, 2, 14)), (date(2024, 2, 1), date(2024, 2, 29)));
        assert_eq!(month_bounds(date(2024, 12, 31)), (date(2024, 12, 1), date(2024, 12, 31)));
    }

    #[test]
    fn test_dashboard_figures() {
        let (conn, agency) = seeded();
        insert_property(
            &conn,
            agency,
            &NewProperty {
                name: "Ratoma lot 4".into(),
                ..Default::default()
            },
        )
        .unwrap();

        let d = dashboard(&conn, agency, date(2024, 3, 20)).unwrap();
        assert_eq!(d.tenants, 2);
        assert_eq!(d.properties, 3);
        assert_eq!(d.occupied_properties, 2);
        assert!((d.occupancy_rate - 66.7).abs() < 1e-9);
        assert_eq!(d.active_contracts, 2);
        assert_eq!(d.collected_this_month, 1_500_000);
        assert_eq!(d.commission_this_month, 225_000);
        assert_eq!(d.pending_amount, 0);
        assert_eq!(d.by_mode.len(), 2);
        assert_eq!(d.by_mode[0].mode, PaymentMode::Cash.as_str());
    }

    #[test]
    fn test_dashboard_empty_agency() {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();
        let d = dashboard(&conn, agency, date(2024, 3, 20)).unwrap();
        assert_eq!(d.occupancy_rate, 0.0);
        assert!(d.by_mode.is_empty());
    }

    #[test]
    fn test_monthly_series_zero_fills() {
        let (conn, agency) = seeded();
        let series = monthly_series(&conn, agency, 2024).unwrap();
        assert_eq!(series.len(), 12);
        assert_eq!(series[0].collected, 0);
        assert_eq!(series[2].collected, 1_500_000);
        assert_eq!(series[2].payments, 2);
        assert_eq!(series[3].collected, 500_000);
        assert_eq!(series[3].commission + series[3].owner_net, 500_000);
    }
}

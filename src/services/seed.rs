// 🌱 Demo data for a fresh install
//
// Running it twice leaves the database unchanged: every entity is looked up
// by its natural key before being created.

use crate::error::Result;
use crate::models::contract::{insert_contract, latest_contract_for};
use crate::models::owner::upsert_owner_by_name;
use crate::models::property::upsert_property_by_name;
use crate::models::template::{insert_template, list_templates};
use crate::models::tenant::upsert_tenant;
use crate::models::{NewContract, TemplateInput};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

pub const STANDARD_TEMPLATE_NAME: &str = "Bail d'habitation standard";

const STANDARD_TEMPLATE: &str = "CONTRAT DE BAIL N° {{reference}}\n\n\
Entre {{owner_name}}, représenté par l'agence {{agency_name}}, et {{tenant_name}}, \
il est convenu la location du bien {{property_name}} pour un loyer mensuel de \
{{monthly_rent}}.\n\n\
Le bail prend effet le {{start_date}} et prend fin le {{end_date}}.\n";

/// (owner, site, tenant, phone, rent, lease start)
const DEMO_LEASES: [(&str, &str, &str, &str, i64, (i32, u32, u32)); 4] = [
    ("Alpha Condé", "Résidence Kaloum", "Mamadou Diallo", "622 11 22 33", 1_500_000, (2024, 1, 1)),
    ("Alpha Condé", "Immeuble Ratoma", "Awa Sylla", "+224 664 55 66 77", 900_000, (2024, 3, 1)),
    ("Fatoumata Bah", "Villa Matoto", "Ibrahima Camara", "0628 90 12 34", 2_500_000, (2023, 9, 1)),
    ("Fatoumata Bah", "Studio Dixinn", "Mariama Barry", "", 600_000, (2024, 6, 1)),
];

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SeedSummary {
    pub contracts_created: usize,
    pub templates_created: usize,
}

pub fn seed_demo_data(conn: &Connection, agency_id: i64) -> Result<SeedSummary> {
    let tx = conn.unchecked_transaction()?;
    let mut summary = SeedSummary::default();

    let has_template = list_templates(&tx, agency_id)?
        .iter()
        .any(|t| t.name == STANDARD_TEMPLATE_NAME);
    let template_id = if has_template {
        None
    } else {
        summary.templates_created += 1;
        let template = insert_template(
            &tx,
            agency_id,
            &TemplateInput {
                name: STANDARD_TEMPLATE_NAME.to_string(),
                body: STANDARD_TEMPLATE.to_string(),
            },
        )?;
        Some(template.id)
    };

    for (owner, site, tenant, phone, rent, (y, m, d)) in DEMO_LEASES {
        let owner_id = upsert_owner_by_name(&tx, agency_id, owner)?;
        let property_id = upsert_property_by_name(&tx, agency_id, site, Some(owner_id))?;
        let phone = (!phone.is_empty()).then_some(phone);
        let tenant_id = upsert_tenant(&tx, agency_id, tenant, phone, property_id)?;

        if latest_contract_for(&tx, tenant_id, property_id)?.is_some() {
            continue;
        }
        let start = NaiveDate::from_ymd_opt(y, m, d)
            .ok_or_else(|| crate::error::AkigError::Internal("bad demo date".to_string()))?;
        let mut lease = NewContract::new(tenant_id, rent, start);
        lease.property_id = Some(property_id);
        lease.deposit_amount = rent * 2;
        lease.template_id = template_id;
        insert_contract(&tx, agency_id, &lease)?;
        summary.contracts_created += 1;
    }

    tx.commit()?;
    info!(
        contracts = summary.contracts_created,
        templates = summary.templates_created,
        "demo data seeded"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_rows, ensure_default_agency, open_database};

    #[test]
    fn test_seed_is_repeatable() {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();

        let first = seed_demo_data(&conn, agency).unwrap();
        assert_eq!(
            first,
            SeedSummary {
                contracts_created: 4,
                templates_created: 1
            }
        );

        let second = seed_demo_data(&conn, agency).unwrap();
        assert_eq!(second, SeedSummary::default());

        assert_eq!(count_rows(&conn, "owners").unwrap(), 2);
        assert_eq!(count_rows(&conn, "tenants").unwrap(), 4);
        assert_eq!(count_rows(&conn, "contracts").unwrap(), 4);
    }
}

// 📝 Contract template rendering
//
// Placeholders are `{{name}}` (inner whitespace allowed). Unknown names are
// left in the output untouched so a typo shows up in the rendered document.

use crate::error::Result;
use crate::models::agency::get_agency;
use crate::models::contract::get_contract;
use crate::models::owner::get_owner;
use crate::models::property::get_property;
use crate::models::template::get_template;
use crate::models::tenant::get_tenant;
use crate::models::Contract;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;

pub const PLACEHOLDERS: [&str; 8] = [
    "tenant_name",
    "property_name",
    "monthly_rent",
    "start_date",
    "end_date",
    "reference",
    "owner_name",
    "agency_name",
];

/// "1500000" → "1 500 000 GNF"
pub fn format_gnf(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(c);
    }
    let sign = if amount < 0 { "-" } else { "" };
    format!("{}{} GNF", sign, grouped)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// Substitute `{{key}}` occurrences from `values`
pub fn render_template(body: &str, values: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match values.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Placeholder values of one contract
pub fn contract_values(
    conn: &Connection,
    agency_id: i64,
    contract: &Contract,
) -> Result<HashMap<&'static str, String>> {
    let tenant = get_tenant(conn, agency_id, contract.tenant_id)?;
    let property = contract
        .property_id
        .map(|id| get_property(conn, agency_id, id))
        .transpose()?;
    let owner = contract
        .owner_id
        .map(|id| get_owner(conn, agency_id, id))
        .transpose()?;
    let agency = get_agency(conn, agency_id)?;

    let mut values = HashMap::new();
    values.insert("tenant_name", tenant.full_name);
    values.insert(
        "property_name",
        property.map(|p| p.name).unwrap_or_default(),
    );
    values.insert("monthly_rent", format_gnf(contract.monthly_rent));
    values.insert("start_date", format_date(contract.start_date));
    values.insert(
        "end_date",
        contract
            .end_date
            .map_or_else(|| "indéterminée".to_string(), format_date),
    );
    values.insert("reference", contract.reference.clone().unwrap_or_default());
    values.insert("owner_name", owner.map(|o| o.name).unwrap_or_default());
    values.insert("agency_name", agency.name);
    Ok(values)
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedContract {
    pub contract_id: i64,
    pub template_id: i64,
    pub content: String,
}

/// Render a contract with the given template, or the contract's own template
pub fn render_contract(
    conn: &Connection,
    agency_id: i64,
    contract_id: i64,
    template_id: Option<i64>,
) -> Result<RenderedContract> {
    let contract = get_contract(conn, agency_id, contract_id)?;
    let template_id = template_id.or(contract.template_id).ok_or_else(|| {
        crate::error::AkigError::validation("no template given and the contract has none")
    })?;
    let template = get_template(conn, agency_id, template_id)?;
    let values = contract_values(conn, agency_id, &contract)?;

    Ok(RenderedContract {
        contract_id,
        template_id,
        content: render_template(&template.body, &values),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ensure_default_agency, open_database};
    use crate::models::contract::insert_contract;
    use crate::models::owner::upsert_owner_by_name;
    use crate::models::property::upsert_property_by_name;
    use crate::models::template::insert_template;
    use crate::models::tenant::upsert_tenant;
    use crate::models::{NewContract, TemplateInput};

    #[test]
    fn test_format_gnf() {
        assert_eq!(format_gnf(0), "0 GNF");
        assert_eq!(format_gnf(950), "950 GNF");
        assert_eq!(format_gnf(1_500_000), "1 500 000 GNF");
        assert_eq!(format_gnf(12_345), "12 345 GNF");
    }

    #[test]
    fn test_unknown_placeholders_left_intact() {
        let mut values = HashMap::new();
        values.insert("tenant_name", "Awa".to_string());
        let out = render_template("Bail de {{ tenant_name }} {{garant}} {{unclosed", &values);
        assert_eq!(out, "Bail de Awa {{garant}} {{unclosed");
    }

    #[test]
    fn test_render_contract() {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();
        let owner = upsert_owner_by_name(&conn, agency, "Alpha Condé").unwrap();
        let site = upsert_property_by_name(&conn, agency, "Résidence Kaloum", Some(owner)).unwrap();
        let tenant = upsert_tenant(&conn, agency, "Mamadou Diallo", None, site).unwrap();

        let mut new = NewContract::new(
            tenant,
            1_500_000,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        new.reference = Some("CTR-7".into());
        let contract = insert_contract(&conn, agency, &new).unwrap();

        let template = insert_template(
            &conn,
            agency,
            &TemplateInput {
                name: "Bail standard".into(),
                body: "{{reference}}: {{tenant_name}} loue {{property_name}} à {{owner_name}} \
                       pour {{monthly_rent}} du {{start_date}} au {{end_date}}."
                    .into(),
            },
        )
        .unwrap();

        let rendered = render_contract(&conn, agency, contract.id, Some(template.id)).unwrap();
        assert_eq!(
            rendered.content,
            "CTR-7: Mamadou Diallo loue Résidence Kaloum à Alpha Condé \
             pour 1 500 000 GNF du 01/01/2024 au indéterminée."
        );

        let missing = render_contract(&conn, agency, contract.id, None);
        assert!(missing.is_err());
    }
}

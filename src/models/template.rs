use crate::error::{AkigError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Lease template with `{{placeholder}}` markers
#[derive(Debug, Clone, Serialize)]
pub struct ContractTemplate {
    pub id: i64,
    pub agency_id: i64,
    pub name: String,
    pub body: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateInput {
    pub name: String,
    pub body: String,
}

impl TemplateInput {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AkigError::validation("template name is required"));
        }
        if self.body.trim().is_empty() {
            return Err(AkigError::validation("template body is required"));
        }
        Ok(())
    }
}

impl ContractTemplate {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ContractTemplate {
            id: row.get("id")?,
            agency_id: row.get("agency_id")?,
            name: row.get("name")?,
            body: row.get("body")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

fn conflict_or(err: rusqlite::Error, name: &str) -> AkigError {
    let err = AkigError::from(err);
    if err.is_constraint_violation() {
        AkigError::Conflict(format!("template '{}' already exists", name))
    } else {
        err
    }
}

pub fn insert_template(
    conn: &Connection,
    agency_id: i64,
    input: &TemplateInput,
) -> Result<ContractTemplate> {
    input.validate()?;
    let name = input.name.trim();
    conn.execute(
        "INSERT INTO contract_templates (agency_id, name, body) VALUES (?1, ?2, ?3)",
        params![agency_id, name, input.body],
    )
    .map_err(|e| conflict_or(e, name))?;

    get_template(conn, agency_id, conn.last_insert_rowid())
}

pub fn get_template(conn: &Connection, agency_id: i64, id: i64) -> Result<ContractTemplate> {
    conn.query_row(
        "SELECT id, agency_id, name, body, created_at, updated_at
         FROM contract_templates WHERE id = ?1 AND agency_id = ?2",
        params![id, agency_id],
        ContractTemplate::from_row,
    )
    .optional()?
    .ok_or_else(|| AkigError::not_found("template", id))
}

pub fn list_templates(conn: &Connection, agency_id: i64) -> Result<Vec<ContractTemplate>> {
    let mut stmt = conn.prepare(
        "SELECT id, agency_id, name, body, created_at, updated_at
         FROM contract_templates WHERE agency_id = ?1 ORDER BY name",
    )?;
    let templates = stmt
        .query_map([agency_id], ContractTemplate::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(templates)
}

pub fn update_template(
    conn: &Connection,
    agency_id: i64,
    id: i64,
    input: &TemplateInput,
) -> Result<ContractTemplate> {
    input.validate()?;
    let name = input.name.trim();
    let changed = conn
        .execute(
            "UPDATE contract_templates SET name = ?1, body = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?3 AND agency_id = ?4",
            params![name, input.body, id, agency_id],
        )
        .map_err(|e| conflict_or(e, name))?;
    if changed == 0 {
        return Err(AkigError::not_found("template", id));
    }
    get_template(conn, agency_id, id)
}

pub fn delete_template(conn: &Connection, agency_id: i64, id: i64) -> Result<()> {
    let changed = conn.execute(
        "DELETE FROM contract_templates WHERE id = ?1 AND agency_id = ?2",
        params![id, agency_id],
    )?;
    if changed == 0 {
        return Err(AkigError::not_found("template", id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ensure_default_agency, open_database};

    #[test]
    fn test_template_crud() {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();

        let t = insert_template(
            &conn,
            agency,
            &TemplateInput {
                name: "Bail standard".into(),
                body: "Locataire: {{tenant_name}}".into(),
            },
        )
        .unwrap();

        let t = update_template(
            &conn,
            agency,
            t.id,
            &TemplateInput {
                name: "Bail standard".into(),
                body: "Locataire: {{tenant_name}}, loyer {{monthly_rent}}".into(),
            },
        )
        .unwrap();
        assert!(t.body.contains("monthly_rent"));
        assert_eq!(list_templates(&conn, agency).unwrap().len(), 1);

        delete_template(&conn, agency, t.id).unwrap();
        assert!(matches!(
            get_template(&conn, agency, t.id),
            Err(AkigError::NotFound { .. })
        ));
    }

    #[test]
    fn test_empty_body_rejected() {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();
        let err = insert_template(
            &conn,
            agency,
            &TemplateInput {
                name: "Vide".into(),
                body: "   ".into(),
            },
        );
        assert!(matches!(err, Err(AkigError::Validation(_))));
    }
}

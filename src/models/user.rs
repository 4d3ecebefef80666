use crate::error::{AkigError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Agent,
    Accountant,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Agent => "agent",
            Role::Accountant => "accountant",
            Role::Owner => "owner",
        }
    }

    /// Staff roles that may read operational data
    pub const STAFF: &'static [Role] = &[Role::Admin, Role::Manager, Role::Agent, Role::Accountant];

    /// Roles allowed to change money-related records
    pub const FINANCE: &'static [Role] = &[Role::Admin, Role::Manager, Role::Accountant];

    pub const MANAGEMENT: &'static [Role] = &[Role::Admin, Role::Manager];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AkigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "agent" => Ok(Role::Agent),
            "accountant" | "comptable" => Ok(Role::Accountant),
            "owner" | "proprietaire" => Ok(Role::Owner),
            other => Err(AkigError::validation(format!("unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub agency_id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub role: Role,
    pub active: bool,
    pub last_login: Option<String>,
}

impl User {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let role: String = row.get("role")?;
        Ok(User {
            id: row.get("id")?,
            agency_id: row.get("agency_id")?,
            email: row.get("email")?,
            password_hash: row.get("password_hash")?,
            name: row.get("name")?,
            role: role.parse().unwrap_or(Role::Agent),
            active: row.get("active")?,
            last_login: row.get("last_login")?,
        })
    }
}

const USER_COLUMNS: &str =
    "id, agency_id, email, password_hash, name, role, active, last_login";

pub fn insert_user(
    conn: &Connection,
    agency_id: i64,
    email: &str,
    password_hash: &str,
    name: &str,
    role: Role,
) -> Result<i64> {
    let email = email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(AkigError::validation("a valid email is required"));
    }
    if name.trim().is_empty() {
        return Err(AkigError::validation("user name is required"));
    }

    let result = conn.execute(
        "INSERT INTO users (agency_id, email, password_hash, name, role)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![agency_id, email, password_hash, name.trim(), role.as_str()],
    );

    match result {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(e) => {
            let err = AkigError::from(e);
            if err.is_constraint_violation() {
                Err(AkigError::Conflict(format!("user {} already exists", email)))
            } else {
                Err(err)
            }
        }
    }
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
            [email.trim().to_lowercase()],
            User::from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn get_user(conn: &Connection, id: i64) -> Result<User> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        [id],
        User::from_row,
    )
    .optional()?
    .ok_or_else(|| AkigError::not_found("user", id))
}

pub fn touch_last_login(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE users SET last_login = CURRENT_TIMESTAMP WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ensure_default_agency, open_database};

    #[test]
    fn test_role_parsing() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("comptable".parse::<Role>().unwrap(), Role::Accountant);
        assert!("janitor".parse::<Role>().is_err());
    }

    #[test]
    fn test_email_is_unique_and_case_insensitive() {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();

        insert_user(&conn, agency, "Admin@Akig.gn", "hash", "Admin", Role::Admin).unwrap();
        let dup = insert_user(&conn, agency, "admin@akig.gn", "hash", "Other", Role::Agent);
        assert!(matches!(dup, Err(AkigError::Conflict(_))));

        let found = find_user_by_email(&conn, "ADMIN@akig.gn").unwrap().unwrap();
        assert_eq!(found.role, Role::Admin);
        assert!(found.active);
    }
}

use super::{PageRequest, Paginated, QueryFilter};
use crate::error::{AkigError, Result};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Periodicity {
    #[default]
    Monthly,
    Quarterly,
    Semiannual,
    Annual,
}

impl Periodicity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Periodicity::Monthly => "monthly",
            Periodicity::Quarterly => "quarterly",
            Periodicity::Semiannual => "semiannual",
            Periodicity::Annual => "annual",
        }
    }

    /// Months covered by one rent instalment
    pub fn months(&self) -> u32 {
        match self {
            Periodicity::Monthly => 1,
            Periodicity::Quarterly => 3,
            Periodicity::Semiannual => 6,
            Periodicity::Annual => 12,
        }
    }
}

impl FromStr for Periodicity {
    type Err = AkigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "monthly" | "mensuel" => Ok(Periodicity::Monthly),
            "quarterly" | "trimestriel" => Ok(Periodicity::Quarterly),
            "semiannual" | "semestriel" => Ok(Periodicity::Semiannual),
            "annual" | "annuel" => Ok(Periodicity::Annual),
            other => Err(AkigError::validation(format!(
                "unknown periodicity '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Active,
    Overdue,
    Terminated,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Active => "active",
            ContractStatus::Overdue => "overdue",
            ContractStatus::Terminated => "terminated",
        }
    }

    /// active <-> overdue, active/overdue -> terminated. Terminated is final.
    pub fn can_transition_to(&self, next: ContractStatus) -> bool {
        use ContractStatus::*;
        matches!(
            (self, next),
            (Active, Overdue) | (Overdue, Active) | (Active, Terminated) | (Overdue, Terminated)
        )
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractStatus {
    type Err = AkigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(ContractStatus::Active),
            "overdue" => Ok(ContractStatus::Overdue),
            "terminated" => Ok(ContractStatus::Terminated),
            other => Err(AkigError::validation(format!(
                "unknown contract status '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// CONTRACT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Contract {
    pub id: i64,
    pub agency_id: i64,
    pub reference: Option<String>,
    pub tenant_id: i64,
    pub property_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub template_id: Option<i64>,
    pub monthly_rent: i64,
    pub deposit_amount: i64,
    pub periodicity: Periodicity,
    pub payment_day: u32,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub status: ContractStatus,
    pub terminated_at: Option<String>,
    pub created_at: String,
}

fn default_payment_day() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewContract {
    pub reference: Option<String>,
    pub tenant_id: i64,
    pub property_id: Option<i64>,
    /// Defaults to the property's owner
    pub owner_id: Option<i64>,
    pub template_id: Option<i64>,
    pub monthly_rent: i64,
    #[serde(default)]
    pub deposit_amount: i64,
    #[serde(default)]
    pub periodicity: Periodicity,
    #[serde(default = "default_payment_day")]
    pub payment_day: u32,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl NewContract {
    pub fn new(tenant_id: i64, monthly_rent: i64, start_date: NaiveDate) -> Self {
        NewContract {
            reference: None,
            tenant_id,
            property_id: None,
            owner_id: None,
            template_id: None,
            monthly_rent,
            deposit_amount: 0,
            periodicity: Periodicity::Monthly,
            payment_day: default_payment_day(),
            start_date,
            end_date: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        super::check_amount(self.monthly_rent, "monthly rent")?;
        if self.deposit_amount < 0 {
            return Err(AkigError::validation("deposit cannot be negative"));
        }
        if self.deposit_amount > super::MAX_AMOUNT {
            return Err(AkigError::validation(format!(
                "deposit exceeds {} GNF",
                super::MAX_AMOUNT
            )));
        }
        if !(1..=28).contains(&self.payment_day) {
            return Err(AkigError::validation("payment day must be between 1 and 28"));
        }
        if let Some(end) = self.end_date {
            if end <= self.start_date {
                return Err(AkigError::validation(
                    "contract end date must be after its start date",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractFilter {
    pub status: Option<ContractStatus>,
    pub tenant_id: Option<i64>,
    pub property_id: Option<i64>,
}

const CONTRACT_COLUMNS: &str = "id, agency_id, reference, tenant_id, property_id, owner_id, \
     template_id, monthly_rent, deposit_amount, periodicity, payment_day, start_date, end_date, \
     status, terminated_at, created_at";

impl Contract {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let periodicity: String = row.get("periodicity")?;
        let status: String = row.get("status")?;
        Ok(Contract {
            id: row.get("id")?,
            agency_id: row.get("agency_id")?,
            reference: row.get("reference")?,
            tenant_id: row.get("tenant_id")?,
            property_id: row.get("property_id")?,
            owner_id: row.get("owner_id")?,
            template_id: row.get("template_id")?,
            monthly_rent: row.get("monthly_rent")?,
            deposit_amount: row.get("deposit_amount")?,
            periodicity: periodicity.parse().unwrap_or_default(),
            payment_day: row.get("payment_day")?,
            start_date: row.get("start_date")?,
            end_date: row.get("end_date")?,
            status: status.parse().unwrap_or(ContractStatus::Active),
            terminated_at: row.get("terminated_at")?,
            created_at: row.get("created_at")?,
        })
    }

    pub fn is_terminated(&self) -> bool {
        self.status == ContractStatus::Terminated
    }
}

// ============================================================================
// QUERIES
// ============================================================================

pub fn insert_contract(conn: &Connection, agency_id: i64, new: &NewContract) -> Result<Contract> {
    new.validate()?;

    let tenant = super::tenant::get_tenant(conn, agency_id, new.tenant_id)?;
    let property_id = new.property_id.or(tenant.property_id);
    let owner_id = match (new.owner_id, property_id) {
        (Some(owner_id), _) => Some(super::owner::get_owner(conn, agency_id, owner_id)?.id),
        (None, Some(property_id)) => {
            super::property::get_property(conn, agency_id, property_id)?.owner_id
        }
        (None, None) => None,
    };
    if let Some(template_id) = new.template_id {
        super::template::get_template(conn, agency_id, template_id)?;
    }

    conn.execute(
        "INSERT INTO contracts (
            agency_id, reference, tenant_id, property_id, owner_id, template_id,
            monthly_rent, deposit_amount, periodicity, payment_day, start_date, end_date
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            agency_id,
            new.reference.as_deref().map(str::trim),
            new.tenant_id,
            property_id,
            owner_id,
            new.template_id,
            new.monthly_rent,
            new.deposit_amount,
            new.periodicity.as_str(),
            new.payment_day,
            new.start_date,
            new.end_date,
        ],
    )?;
    let id = conn.last_insert_rowid();

    if new.reference.is_none() {
        conn.execute(
            "UPDATE contracts SET reference = ?1 WHERE id = ?2",
            params![format!("CTR-{}-{:05}", new.start_date.format("%Y"), id), id],
        )?;
    }
    if let Some(property_id) = property_id {
        super::property::update_property_status(
            conn,
            agency_id,
            property_id,
            super::PropertyStatus::Occupied,
        )?;
    }

    get_contract(conn, agency_id, id)
}

pub fn get_contract(conn: &Connection, agency_id: i64, id: i64) -> Result<Contract> {
    conn.query_row(
        &format!(
            "SELECT {} FROM contracts WHERE id = ?1 AND agency_id = ?2",
            CONTRACT_COLUMNS
        ),
        params![id, agency_id],
        Contract::from_row,
    )
    .optional()?
    .ok_or_else(|| AkigError::not_found("contract", id))
}

pub fn list_contracts(
    conn: &Connection,
    agency_id: i64,
    filter: &ContractFilter,
    page: PageRequest,
) -> Result<Paginated<Contract>> {
    let mut q = QueryFilter::new();
    q.push("agency_id = ?", agency_id);
    q.push_opt("status = ?", filter.status.map(|s| s.as_str().to_string()));
    q.push_opt("tenant_id = ?", filter.tenant_id);
    q.push_opt("property_id = ?", filter.property_id);

    let where_sql = q.where_sql();
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM contracts {}", where_sql),
        params_from_iter(q.values().iter()),
        |row| row.get(0),
    )?;

    let n = q.next_index();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM contracts {} ORDER BY start_date DESC, id DESC LIMIT ?{} OFFSET ?{}",
        CONTRACT_COLUMNS,
        where_sql,
        n,
        n + 1
    ))?;
    let items = stmt
        .query_map(params_from_iter(q.with_page(page).iter()), Contract::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Paginated::new(items, total, page))
}

/// Contracts still producing rent (active or overdue)
pub fn list_open_contracts(conn: &Connection, agency_id: Option<i64>) -> Result<Vec<Contract>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM contracts
         WHERE status IN ('active', 'overdue') AND (?1 IS NULL OR agency_id = ?1)
         ORDER BY id",
        CONTRACT_COLUMNS
    ))?;
    let contracts = stmt
        .query_map([agency_id], Contract::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(contracts)
}

/// Move a contract to `next`, enforcing the lifecycle rules
pub fn set_contract_status(
    conn: &Connection,
    agency_id: i64,
    id: i64,
    next: ContractStatus,
) -> Result<Contract> {
    let contract = get_contract(conn, agency_id, id)?;
    if contract.status == next {
        return Ok(contract);
    }
    if !contract.status.can_transition_to(next) {
        return Err(AkigError::transition("contract", contract.status, next));
    }

    let terminated_at = (next == ContractStatus::Terminated).then(crate::db::now_rfc3339);
    conn.execute(
        "UPDATE contracts SET status = ?1, terminated_at = COALESCE(?2, terminated_at),
                updated_at = CURRENT_TIMESTAMP
         WHERE id = ?3",
        params![next.as_str(), terminated_at, id],
    )?;

    get_contract(conn, agency_id, id)
}

/// Terminate a contract and free its property
pub fn terminate_contract(conn: &Connection, agency_id: i64, id: i64) -> Result<Contract> {
    let contract = get_contract(conn, agency_id, id)?;
    if contract.is_terminated() {
        return Err(AkigError::transition(
            "contract",
            contract.status,
            ContractStatus::Terminated,
        ));
    }

    let contract = set_contract_status(conn, agency_id, id, ContractStatus::Terminated)?;

    if let Some(property_id) = contract.property_id {
        let still_let: i64 = conn.query_row(
            "SELECT COUNT(*) FROM contracts WHERE property_id = ?1 AND status != 'terminated'",
            [property_id],
            |row| row.get(0),
        )?;
        if still_let == 0 {
            super::property::update_property_status(
                conn,
                agency_id,
                property_id,
                super::PropertyStatus::Available,
            )?;
        }
    }

    Ok(contract)
}

pub fn find_contract_by_reference(
    conn: &Connection,
    agency_id: i64,
    reference: &str,
) -> Result<Option<Contract>> {
    let contract = conn
        .query_row(
            &format!(
                "SELECT {} FROM contracts WHERE agency_id = ?1 AND reference = ?2
                 ORDER BY id DESC LIMIT 1",
                CONTRACT_COLUMNS
            ),
            params![agency_id, reference.trim()],
            Contract::from_row,
        )
        .optional()?;
    Ok(contract)
}

/// Most recent contract binding a tenant to a property
pub fn latest_contract_for(
    conn: &Connection,
    tenant_id: i64,
    property_id: i64,
) -> Result<Option<Contract>> {
    let contract = conn
        .query_row(
            &format!(
                "SELECT {} FROM contracts WHERE tenant_id = ?1 AND property_id = ?2
                 ORDER BY start_date DESC, id DESC LIMIT 1",
                CONTRACT_COLUMNS
            ),
            params![tenant_id, property_id],
            Contract::from_row,
        )
        .optional()?;
    Ok(contract)
}

/// Latest open contract of a tenant, any property
pub fn current_contract_for_tenant(conn: &Connection, tenant_id: i64) -> Result<Option<Contract>> {
    let contract = conn
        .query_row(
            &format!(
                "SELECT {} FROM contracts WHERE tenant_id = ?1 AND status != 'terminated'
                 ORDER BY start_date DESC, id DESC LIMIT 1",
                CONTRACT_COLUMNS
            ),
            [tenant_id],
            Contract::from_row,
        )
        .optional()?;
    Ok(contract)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ensure_default_agency, open_database};
    use crate::models::property::{get_property, upsert_property_by_name};
    use crate::models::{owner::upsert_owner_by_name, tenant::upsert_tenant, PropertyStatus};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn setup() -> (Connection, i64, i64, i64) {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();
        let owner = upsert_owner_by_name(&conn, agency, "Mamadou Bah").unwrap();
        let site = upsert_property_by_name(&conn, agency, "Immeuble Kaloum", Some(owner)).unwrap();
        let tenant = upsert_tenant(&conn, agency, "Aissatou Barry", None, site).unwrap();
        (conn, agency, tenant, site)
    }

    #[test]
    fn test_status_transitions() {
        use ContractStatus::*;
        assert!(Active.can_transition_to(Overdue));
        assert!(Overdue.can_transition_to(Active));
        assert!(Overdue.can_transition_to(Terminated));
        assert!(!Terminated.can_transition_to(Active));
        assert!(!Terminated.can_transition_to(Overdue));
    }

    #[test]
    fn test_end_before_start_rejected() {
        let mut c = NewContract::new(1, 500_000, date("2024-01-01"));
        c.end_date = Some(date("2024-01-01"));
        assert!(c.validate().is_err());

        c.end_date = Some(date("2024-12-31"));
        assert!(c.validate().is_ok());

        c.payment_day = 31;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_rent_and_deposit_bounds() {
        let mut c = NewContract::new(1, crate::models::MAX_AMOUNT + 1, date("2024-01-01"));
        assert!(matches!(c.validate(), Err(AkigError::Validation(_))));

        c.monthly_rent = 500_000;
        c.deposit_amount = i64::MAX;
        assert!(matches!(c.validate(), Err(AkigError::Validation(_))));

        c.deposit_amount = 1_000_000;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_insert_derives_owner_and_reference() {
        let (conn, agency, tenant, site) = setup();
        let c = insert_contract(&conn, agency, &NewContract::new(tenant, 800_000, date("2024-03-01")))
            .unwrap();

        assert_eq!(c.property_id, Some(site));
        assert!(c.owner_id.is_some());
        assert_eq!(c.reference.as_deref(), Some(format!("CTR-2024-{:05}", c.id).as_str()));
        assert_eq!(c.status, ContractStatus::Active);
        assert_eq!(
            get_property(&conn, agency, site).unwrap().status,
            PropertyStatus::Occupied
        );
    }

    #[test]
    fn test_terminate_is_final_and_frees_property() {
        let (conn, agency, tenant, site) = setup();
        let c = insert_contract(&conn, agency, &NewContract::new(tenant, 800_000, date("2024-03-01")))
            .unwrap();

        let c = terminate_contract(&conn, agency, c.id).unwrap();
        assert!(c.is_terminated());
        assert!(c.terminated_at.is_some());
        assert_eq!(
            get_property(&conn, agency, site).unwrap().status,
            PropertyStatus::Available
        );

        assert!(matches!(
            terminate_contract(&conn, agency, c.id),
            Err(AkigError::InvalidTransition { .. })
        ));
        assert!(matches!(
            set_contract_status(&conn, agency, c.id, ContractStatus::Active),
            Err(AkigError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_lookup_helpers() {
        let (conn, agency, tenant, site) = setup();
        let mut new = NewContract::new(tenant, 800_000, date("2023-01-01"));
        new.reference = Some("REF-42".into());
        let old = insert_contract(&conn, agency, &new).unwrap();
        let recent =
            insert_contract(&conn, agency, &NewContract::new(tenant, 900_000, date("2024-01-01")))
                .unwrap();

        let by_ref = find_contract_by_reference(&conn, agency, " REF-42 ").unwrap().unwrap();
        assert_eq!(by_ref.id, old.id);

        let latest = latest_contract_for(&conn, tenant, site).unwrap().unwrap();
        assert_eq!(latest.id, recent.id);

        let filter = ContractFilter {
            tenant_id: Some(tenant),
            ..Default::default()
        };
        let page = list_contracts(&conn, agency, &filter, PageRequest::default()).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].id, recent.id);

        assert_eq!(list_open_contracts(&conn, Some(agency)).unwrap().len(), 2);
    }
}

// 🏠 Domain entities - one module per table family
//
// Each module owns its row struct, status enums and the SQL that reads and
// writes it. Business workflows that span several tables live in the
// `services` modules (payments, import, arrears, ...).

pub mod agency;
pub mod contract;
pub mod deposit;
pub mod dispute;
pub mod import_run;
pub mod notification;
pub mod owner;
pub mod payment;
pub mod property;
pub mod template;
pub mod tenant;
pub mod user;

pub use agency::{Agency, AgencyUpdate};
pub use contract::{Contract, ContractFilter, ContractStatus, NewContract, Periodicity};
pub use deposit::{Deposit, DepositMovement, DepositStatus, MovementKind};
pub use dispute::{Dispute, DisputeStatus, DisputeType, NewDispute};
pub use import_run::{ImportCounts, ImportRun, ImportRunStatus};
pub use notification::{Notification, NotificationStatus};
pub use owner::{NewOwner, Owner};
pub use payment::{Payment, PaymentFilter, PaymentMode, PaymentRow, PaymentSort, PaymentStatus};
pub use property::{NewProperty, Property, PropertyStatus};
pub use template::{ContractTemplate, TemplateInput};
pub use tenant::{NewTenant, Tenant, TenantFilter, TenantStatus, TenantUpdate};
pub use user::{Role, User};

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Largest GNF amount accepted anywhere (rent, payment, deposit, plan).
/// Keeps `amount × 12` and `amount × commission bps` inside i64.
pub const MAX_AMOUNT: i64 = 1_000_000_000_000;

/// Reject amounts that are not positive or exceed [`MAX_AMOUNT`]
pub fn check_amount(amount: i64, what: &str) -> crate::error::Result<i64> {
    if amount <= 0 {
        return Err(crate::error::AkigError::validation(format!(
            "{what} must be positive"
        )));
    }
    if amount > MAX_AMOUNT {
        return Err(crate::error::AkigError::validation(format!(
            "{what} exceeds {MAX_AMOUNT} GNF"
        )));
    }
    Ok(amount)
}

/// Page request, clamped to sane bounds
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        PageRequest { page, page_size }
    }

    pub fn page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn limit(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Rows to skip; widened so any `page` from a query string is safe
    pub fn offset(&self) -> i64 {
        i64::from(self.page() - 1) * i64::from(self.limit())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        let page_size = request.limit();
        let total_pages = ((total.max(0) as u64 + page_size as u64 - 1) / page_size as u64) as u32;
        Paginated {
            items,
            total,
            page: request.page(),
            page_size,
            total_pages,
        }
    }
}

/// Dynamic WHERE clause builder for list queries
///
/// Keeps the `?N` placeholders and their values in step.
#[derive(Default)]
pub(crate) struct QueryFilter {
    clauses: Vec<String>,
    values: Vec<rusqlite::types::Value>,
}

impl QueryFilter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a clause; each `?` in `clause` is replaced by the next numbered placeholder
    pub(crate) fn push(&mut self, clause: &str, value: impl Into<rusqlite::types::Value>) {
        let index = self.values.len() + 1;
        self.clauses.push(clause.replace('?', &format!("?{}", index)));
        self.values.push(value.into());
    }

    pub(crate) fn push_opt<V: Into<rusqlite::types::Value>>(&mut self, clause: &str, value: Option<V>) {
        if let Some(v) = value {
            self.push(clause, v);
        }
    }

    pub(crate) fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub(crate) fn next_index(&self) -> usize {
        self.values.len() + 1
    }

    pub(crate) fn values(&self) -> &[rusqlite::types::Value] {
        &self.values
    }

    pub(crate) fn with_page(&self, request: PageRequest) -> Vec<rusqlite::types::Value> {
        let mut values = self.values.clone();
        values.push(rusqlite::types::Value::Integer(request.limit() as i64));
        values.push(rusqlite::types::Value::Integer(request.offset()));
        values
    }
}

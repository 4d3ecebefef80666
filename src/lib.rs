// AKIG - Core Library
// Property management for Guinean agencies: tenants, leases, GNF payments,
// arrears follow-up and reporting. Used by the CLI, the API server and tests.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::{Config, LogFormat};
pub use db::{
    ensure_default_agency, get_events_for_entity, insert_event, open_database, record_event,
    setup_database, Event,
};
pub use error::{AkigError, Result};
pub use models::{
    Contract, ContractStatus, Owner, PageRequest, Paginated, Payment, PaymentMode, PaymentStatus,
    Property, Role, Tenant, User,
};
pub use services::arrears::{PressureLevel, RecomputeSummary};
pub use services::commission::{allocate, Allocation, COMMISSION_RATE_BPS};
pub use services::deduplication::{DeduplicationEngine, DuplicateMatch, MatchStrategy};
pub use services::import::{import_file, import_payments, ImportFormat, ImportReport, PaymentSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

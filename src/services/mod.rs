// 🧠 Business workflows on top of the models
//
// Models know their table; services combine them under the agency's rules
// (commission, receipts, arrears, imports) and write the audit trail.

pub mod arrears;
pub mod auth;
pub mod commission;
pub mod deduplication;
pub mod import;
pub mod notifications;
pub mod payments;
pub mod reports;
pub mod risk;
pub mod seed;
pub mod templates;

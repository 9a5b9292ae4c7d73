mod accounts;
mod audit;
mod store;

pub use accounts::*;
pub use audit::*;
pub use store::*;

/// SQL migration for the document table
pub const MIGRATION_001_DOCUMENTS: &str = include_str!("migrations/001_documents.sql");

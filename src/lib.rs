// Ledgerbook - Core Library
// Record layer for the personal ledger: identity cache, provenance reports,
// deduplicated writes, tags, links and alias resolution over SQLite

pub mod db;             // Store: connection + schema setup + row SQL
pub mod value;          // Column values, row encode/decode
pub mod schema;         // Entity/field/join declarations
pub mod error;
pub mod record;         // Handles, lazy references, entity traits
pub mod entities;
pub mod session;        // Unit of work + identity map
pub mod deduplication;  // Natural keys per entity type
pub mod tags;
pub mod links;
pub mod aliases;
pub mod config;
pub mod import;

// Re-export commonly used types
pub use db::Store;
pub use error::{RecordError, Result};
pub use value::{Key, Value};
pub use schema::{EntityKind, SchemaRegistry};
pub use record::{Entity, Handle, Linkable, Named, Owned, Persisted, RefField, Taggable};
pub use entities::{Account, Asset, Report, Statement, Tag, Transaction, Verification};
pub use session::{Batch, BatchSummary, Session, SessionStats, WriteStatus};
pub use deduplication::DedupPolicy;
pub use links::Link;
pub use aliases::{standardize, AliasConfig, AliasResolver};
pub use config::{load_config, LedgerConfig};
pub use import::{plan_csv, plan_file, ImportPlan, ImportPreview, RowFailure, SeedSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

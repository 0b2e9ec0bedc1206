// Entity Models
//
// Each entity is a plain value while unsaved (freely mutable), and becomes
// read-only once it carries a key (written or loaded through a Session).
//
// - Report: provenance batch, append-only, owns every other row
// - Asset / Account / Tag: named entities, resolvable by name
// - Statement / Transaction / Verification: dated records referencing them

pub mod report;
pub mod asset;
pub mod account;
pub mod tag;
pub mod statement;
pub mod transaction;

pub use report::Report;
pub use asset::Asset;
pub use account::Account;
pub use tag::Tag;
pub use statement::Statement;
pub use transaction::{Transaction, Verification};

// 🧾 Report Entity - provenance batch
//
// Every other row points at the Report that produced it. Reports are
// append-only: written once through `Session::create_report`, never updated.

use crate::entities::Account;
use crate::error::{RecordError, Result};
use crate::record::{Entity, Handle, RecordMeta, RefField};
use crate::schema::EntityKind;
use crate::value::{RowReader, RowWriter};
use chrono::{DateTime, Utc};
use std::fmt;

const NAME: &str = "Report";

#[derive(Debug, Clone)]
pub struct Report {
    meta: RecordMeta,
    category: Option<String>,
    account: RefField<Account>,
    description: Option<String>,
    created: Option<DateTime<Utc>>,
}

impl Report {
    /// New unsaved report, stamped with the current time
    pub fn new(category: impl Into<String>) -> Self {
        Report {
            meta: RecordMeta::unsaved(),
            category: Some(category.into()),
            account: RefField::unset(NAME, "account"),
            description: None,
            created: Some(Utc::now()),
        }
    }

    pub fn category(&self) -> Result<&str> {
        self.category.as_deref().ok_or(RecordError::FieldUnset {
            entity: NAME,
            field: "category",
        })
    }

    /// Account the report is about (e.g. the statement's account), if any
    pub fn account(&self) -> &RefField<Account> {
        &self.account
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn created(&self) -> Result<DateTime<Utc>> {
        self.created.ok_or(RecordError::FieldUnset {
            entity: NAME,
            field: "created",
        })
    }

    pub fn set_category(&mut self, category: impl Into<String>) -> Result<()> {
        self.meta.ensure_mutable(NAME, "category")?;
        self.category = Some(category.into());
        Ok(())
    }

    pub fn set_account(&mut self, account: Handle<Account>) -> Result<()> {
        self.meta.ensure_mutable(NAME, "account")?;
        self.account = RefField::from_handle(NAME, "account", account);
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> Result<()> {
        self.meta.ensure_mutable(NAME, "description")?;
        self.description = Some(description.into());
        Ok(())
    }
}

impl Entity for Report {
    const KIND: EntityKind = EntityKind::Report;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn encode(&self, row: &mut RowWriter) -> Result<()> {
        row.put("category", self.category.clone());
        row.put("account", self.account.key());
        row.put("description", self.description.clone());
        row.put("created", self.created);
        Ok(())
    }

    fn decode(row: &RowReader) -> Result<Self> {
        Ok(Report {
            meta: RecordMeta::stored(row.key(), None),
            category: row.text("category")?,
            account: RefField::from_key(NAME, "account", row.key_ref("account")?),
            description: row.text("description")?,
            created: row.timestamp("created")?,
        })
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let category = self.category.as_deref().unwrap_or("?");
        match self.created {
            Some(created) => write!(f, "{}[{}]", category, created.format("%y-%m-%d %H:%M:%S")),
            None => write!(f, "{}", category),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_creation() {
        let report = Report::new("import");
        assert_eq!(report.category().unwrap(), "import");
        assert!(report.created().is_ok());
        assert!(report.description().is_none());
        assert!(!report.account().is_set());
        assert!(!report.is_saved());
    }

    #[test]
    fn test_report_encode() {
        let mut report = Report::new("statement");
        report.set_description("March export").unwrap();
        let mut row = RowWriter::new(NAME);
        report.encode(&mut row).unwrap();
        assert_eq!(row.len(), 4);
        assert!(row.take("account").unwrap().is_null());
    }

    #[test]
    fn test_display() {
        let report = Report::new("import");
        assert!(report.to_string().starts_with("import["));
    }
}

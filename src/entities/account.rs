// 💳 Account Entity - a party money moves between
//
// Covers both own accounts (checking, credit card, brokerage) and
// counterparties (merchants, employers). Name is unique and is what the
// alias resolver maps free text onto.

use crate::error::{RecordError, Result};
use crate::record::{Entity, Named, Owned, RecordMeta, Taggable};
use crate::schema::EntityKind;
use crate::value::{RowReader, RowWriter};
use std::fmt;

const NAME: &str = "Account";

#[derive(Debug, Clone)]
pub struct Account {
    meta: RecordMeta,
    name: Option<String>,
    /// Account type (e.g. "bank", "credit", "merchant")
    category: Option<String>,
    owner: Option<String>,
    description: Option<String>,
}

impl Account {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Account {
            meta: RecordMeta::unsaved(),
            name: Some(name.into()),
            category: Some(category.into()),
            owner: Some(owner.into()),
            description: None,
        }
    }

    pub fn category(&self) -> Result<&str> {
        self.category.as_deref().ok_or(RecordError::FieldUnset {
            entity: NAME,
            field: "category",
        })
    }

    pub fn owner(&self) -> Result<&str> {
        self.owner.as_deref().ok_or(RecordError::FieldUnset {
            entity: NAME,
            field: "owner",
        })
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        self.meta.ensure_mutable(NAME, "name")?;
        self.name = Some(name.into());
        Ok(())
    }

    pub fn set_category(&mut self, category: impl Into<String>) -> Result<()> {
        self.meta.ensure_mutable(NAME, "category")?;
        self.category = Some(category.into());
        Ok(())
    }

    pub fn set_owner(&mut self, owner: impl Into<String>) -> Result<()> {
        self.meta.ensure_mutable(NAME, "owner")?;
        self.owner = Some(owner.into());
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> Result<()> {
        self.meta.ensure_mutable(NAME, "description")?;
        self.description = Some(description.into());
        Ok(())
    }

    /// Built-in alias strings: the name itself and `category:name`
    pub fn shortcuts(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(name) = &self.name {
            out.push(name.clone());
            if let Some(category) = &self.category {
                out.push(format!("{}:{}", category, name));
            }
        }
        out
    }
}

impl Entity for Account {
    const KIND: EntityKind = EntityKind::Account;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn encode(&self, row: &mut RowWriter) -> Result<()> {
        row.put("name", self.name.clone());
        row.put("category", self.category.clone());
        row.put("owner", self.owner.clone());
        row.put("description", self.description.clone());
        Ok(())
    }

    fn decode(row: &RowReader) -> Result<Self> {
        Ok(Account {
            meta: RecordMeta::stored(row.key(), row.report()),
            name: row.text("name")?,
            category: row.text("category")?,
            owner: row.text("owner")?,
            description: row.text("description")?,
        })
    }
}

impl Owned for Account {}

impl Taggable for Account {}

impl Named for Account {
    fn name(&self) -> Result<&str> {
        self.name.as_deref().ok_or(RecordError::FieldUnset {
            entity: NAME,
            field: "name",
        })
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.category, &self.name) {
            (Some(category), Some(name)) => write!(f, "<{}:{}>", category, name),
            (None, Some(name)) => write!(f, "<{}>", name),
            _ => write!(f, "<?>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Tag;

    #[test]
    fn test_account_creation() {
        let account = Account::new("Bank of America", "bank", "me");
        assert_eq!(account.name().unwrap(), "Bank of America");
        assert_eq!(account.category().unwrap(), "bank");
        assert_eq!(account.owner().unwrap(), "me");
        assert!(account.description().is_none());
        assert_eq!(account.to_string(), "<bank:Bank of America>");
    }

    #[test]
    fn test_loaded_account_rejects_mutation() {
        let mut values = std::collections::HashMap::new();
        values.insert("name", crate::value::Value::from("cash"));
        values.insert("category", crate::value::Value::from("wallet"));
        values.insert("owner", crate::value::Value::from("me"));
        let row = RowReader::new(NAME, 12, Some(1), values);

        let mut loaded = Account::decode(&row).unwrap();
        assert_eq!(loaded.key(), Some(12));
        assert!(matches!(
            loaded.set_owner("someone else"),
            Err(RecordError::AlreadyLoadedImmutable { key: 12, .. })
        ));
    }

    #[test]
    fn test_tag_unsaved_tag_rejected() {
        let mut account = Account::new("cash", "wallet", "me");
        let tag = Tag::new("travel");
        assert!(matches!(
            account.add_tag(&tag),
            Err(RecordError::AssociationPrecondition(_))
        ));
    }

    #[test]
    fn test_revise_keeps_key() {
        let mut values = std::collections::HashMap::new();
        values.insert("name", crate::value::Value::from("cash"));
        values.insert("category", crate::value::Value::from("wallet"));
        values.insert("owner", crate::value::Value::from("me"));
        let loaded = Account::decode(&RowReader::new(NAME, 5, Some(1), values)).unwrap();

        let revised = loaded
            .revise(|draft| draft.set_description("pocket money"))
            .unwrap();
        assert_eq!(revised.key(), Some(5));
        assert_eq!(revised.description(), Some("pocket money"));
        assert!(loaded.description().is_none());
    }
}

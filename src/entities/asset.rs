// 💱 Asset Entity - a unit of value (currency, security, commodity)

use crate::error::{RecordError, Result};
use crate::record::{Entity, Named, Owned, RecordMeta};
use crate::schema::EntityKind;
use crate::value::{RowReader, RowWriter};
use std::fmt;

const NAME: &str = "Asset";

#[derive(Debug, Clone)]
pub struct Asset {
    meta: RecordMeta,
    name: Option<String>,
    category: Option<String>,
    description: Option<String>,
}

impl Asset {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Asset {
            meta: RecordMeta::unsaved(),
            name: Some(name.into()),
            category: Some(category.into()),
            description: None,
        }
    }

    pub fn category(&self) -> Result<&str> {
        self.category.as_deref().ok_or(RecordError::FieldUnset {
            entity: NAME,
            field: "category",
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

impl Entity for Asset {
    const KIND: EntityKind = EntityKind::Asset;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn encode(&self, row: &mut RowWriter) -> Result<()> {
        row.put("name", self.name.clone());
        row.put("category", self.category.clone());
        row.put("description", self.description.clone());
        Ok(())
    }

    fn decode(row: &RowReader) -> Result<Self> {
        Ok(Asset {
            meta: RecordMeta::stored(row.key(), row.report()),
            name: row.text("name")?,
            category: row.text("category")?,
            description: row.text("description")?,
        })
    }
}

impl Owned for Asset {}

impl Named for Asset {
    fn name(&self) -> Result<&str> {
        self.name.as_deref().ok_or(RecordError::FieldUnset {
            entity: NAME,
            field: "name",
        })
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name.as_deref().unwrap_or("?"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_shortcuts() {
        let asset = Asset::new("usd", "currency");
        assert_eq!(asset.shortcuts(), vec!["usd", "currency:usd"]);
    }

    #[test]
    fn test_unsaved_asset_is_mutable() {
        let mut asset = Asset::new("usd", "currency");
        asset.set_description("US dollar").unwrap();
        asset.set_name("USD").unwrap();
        assert_eq!(asset.name().unwrap(), "USD");
        assert_eq!(asset.description(), Some("US dollar"));
    }
}

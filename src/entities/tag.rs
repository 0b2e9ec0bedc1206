// 🏷️ Tag Entity - free-form label attached to accounts, statements, transactions

use crate::error::{RecordError, Result};
use crate::record::{Entity, Named, Owned, RecordMeta};
use crate::schema::EntityKind;
use crate::value::{RowReader, RowWriter};
use std::fmt;

const NAME: &str = "Tag";

#[derive(Debug, Clone)]
pub struct Tag {
    meta: RecordMeta,
    name: Option<String>,
    category: Option<String>,
    description: Option<String>,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Tag {
            meta: RecordMeta::unsaved(),
            name: Some(name.into()),
            category: None,
            description: None,
        }
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
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

    pub fn shortcuts(&self) -> Vec<String> {
        match &self.name {
            Some(name) => vec![name.clone(), format!("<{}>", name), format!("TAG:{}", name)],
            None => Vec::new(),
        }
    }
}

impl Entity for Tag {
    const KIND: EntityKind = EntityKind::Tag;

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
        Ok(Tag {
            meta: RecordMeta::stored(row.key(), row.report()),
            name: row.text("name")?,
            category: row.text("category")?,
            description: row.text("description")?,
        })
    }
}

impl Owned for Tag {}

impl Named for Tag {
    fn name(&self) -> Result<&str> {
        self.name.as_deref().ok_or(RecordError::FieldUnset {
            entity: NAME,
            field: "name",
        })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<TAG:{}>", self.name.as_deref().unwrap_or("?"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_shortcuts() {
        let tag = Tag::new("travel");
        assert_eq!(tag.shortcuts(), vec!["travel", "<travel>", "TAG:travel"]);
        assert_eq!(tag.to_string(), "<TAG:travel>");
    }
}

// 📐 Entity Schema Registry
//
// One declarative descriptor per entity type: table, ordered content
// fields, field→column renames, primary key and optional lookup column.
// Tag join tables and link tables are declared the same way. The registry
// is validated once when a session is created; every read/write/update
// path goes through it, so adding an entity type only means declaring a
// descriptor here.

use crate::error::{RecordError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

// ============================================================================
// ENTITY KINDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Report,
    Asset,
    Account,
    Tag,
    Statement,
    Transaction,
    Verification,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Report,
        EntityKind::Asset,
        EntityKind::Account,
        EntityKind::Tag,
        EntityKind::Statement,
        EntityKind::Transaction,
        EntityKind::Verification,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Report => "Report",
            EntityKind::Asset => "Asset",
            EntityKind::Account => "Account",
            EntityKind::Tag => "Tag",
            EntityKind::Statement => "Statement",
            EntityKind::Transaction => "Transaction",
            EntityKind::Verification => "Verification",
        }
    }

    /// Case-insensitive lookup by type name (used by configuration)
    pub fn from_name(name: &str) -> Option<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// DESCRIPTORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Real,
    Date,
    Timestamp,
    /// Foreign key to another entity type
    Ref(EntityKind),
}

impl FieldKind {
    fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Text | FieldKind::Date | FieldKind::Timestamp => "TEXT",
            FieldKind::Real => "REAL",
            FieldKind::Ref(_) => "INTEGER",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSchema {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSchema {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        FieldSchema {
            name,
            column: name,
            kind,
            required: true,
        }
    }

    pub const fn column(mut self, column: &'static str) -> Self {
        self.column = column;
        self
    }

    pub const fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[derive(Debug)]
pub struct EntitySchema {
    pub kind: EntityKind,
    pub table: &'static str,
    pub primary_key: &'static str,
    /// Ordered content fields (primary key and owning report excluded)
    pub fields: &'static [FieldSchema],
    /// Field used for find-by-name
    pub lookup: Option<&'static str>,
    /// Column holding the owning report; `None` only for reports themselves
    pub report_column: Option<&'static str>,
}

impl EntitySchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Column for a field name, failing on names the schema does not declare
    pub fn column_for(&self, name: &str) -> Result<&'static str> {
        self.field(name).map(|f| f.column).ok_or_else(|| {
            RecordError::Schema(format!("{} has no field named {:?}", self.kind, name))
        })
    }

    pub fn lookup_field(&self) -> Result<&'static FieldSchema> {
        self.lookup
            .and_then(|name| self.field(name))
            .ok_or_else(|| RecordError::Schema(format!("{} has no lookup column", self.kind)))
    }

    /// Columns in fetch order: primary key, content fields, owning report
    pub fn select_list(&self) -> String {
        let mut columns = vec![self.primary_key];
        columns.extend(self.fields.iter().map(|f| f.column));
        if let Some(report) = self.report_column {
            columns.push(report);
        }
        columns.join(", ")
    }

    fn create_table_sql(&self, registry: &SchemaRegistry) -> Result<String> {
        let mut lines = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.primary_key)];
        for field in self.fields {
            let mut line = format!("{} {}", field.column, field.kind.sql_type());
            if field.required {
                line.push_str(" NOT NULL");
            }
            if self.lookup == Some(field.name) {
                line.push_str(" UNIQUE");
            }
            if let FieldKind::Ref(target) = field.kind {
                let target = registry.entity(target)?;
                line.push_str(&format!(" REFERENCES {}({})", target.table, target.primary_key));
            }
            lines.push(line);
        }
        if let Some(report) = self.report_column {
            let reports = registry.entity(EntityKind::Report)?;
            lines.push(format!(
                "{} INTEGER NOT NULL REFERENCES {}({})",
                report, reports.table, reports.primary_key
            ));
        }
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.table,
            lines.join(",\n    ")
        ))
    }
}

/// Join table between a taggable entity type and `Tag`
#[derive(Debug)]
pub struct TagJoinSchema {
    pub entity: EntityKind,
    pub table: &'static str,
    pub entity_column: &'static str,
    pub tag_column: &'static str,
    pub report_column: &'static str,
}

/// Undirected pair table between two entities of the same type
#[derive(Debug)]
pub struct LinkSchema {
    pub entity: EntityKind,
    pub table: &'static str,
    /// Smaller endpoint key
    pub left: &'static str,
    /// Larger endpoint key
    pub right: &'static str,
    pub category: &'static str,
    pub report_column: &'static str,
}

// ============================================================================
// STANDARD DESCRIPTORS
// ============================================================================

use FieldKind::{Date, Real, Ref, Text, Timestamp};

pub static REPORTS: EntitySchema = EntitySchema {
    kind: EntityKind::Report,
    table: "reports",
    primary_key: "id",
    fields: &[
        FieldSchema::new("category", Text),
        FieldSchema::new("account", Ref(EntityKind::Account))
            .column("associated_account")
            .optional(),
        FieldSchema::new("description", Text).optional(),
        FieldSchema::new("created", Timestamp),
    ],
    lookup: None,
    report_column: None,
};

pub static ASSETS: EntitySchema = EntitySchema {
    kind: EntityKind::Asset,
    table: "assets",
    primary_key: "id",
    fields: &[
        FieldSchema::new("name", Text).column("asset_name"),
        FieldSchema::new("category", Text).column("asset_type"),
        FieldSchema::new("description", Text).optional(),
    ],
    lookup: Some("name"),
    report_column: Some("report"),
};

pub static ACCOUNTS: EntitySchema = EntitySchema {
    kind: EntityKind::Account,
    table: "accounts",
    primary_key: "id",
    fields: &[
        FieldSchema::new("name", Text).column("account_name"),
        FieldSchema::new("category", Text).column("account_type"),
        FieldSchema::new("owner", Text).column("account_owner"),
        FieldSchema::new("description", Text).optional(),
    ],
    lookup: Some("name"),
    report_column: Some("report"),
};

pub static TAGS: EntitySchema = EntitySchema {
    kind: EntityKind::Tag,
    table: "tags",
    primary_key: "id",
    fields: &[
        FieldSchema::new("name", Text).column("tag_name"),
        FieldSchema::new("category", Text).optional(),
        FieldSchema::new("description", Text).optional(),
    ],
    lookup: Some("name"),
    report_column: Some("report"),
};

pub static STATEMENTS: EntitySchema = EntitySchema {
    kind: EntityKind::Statement,
    table: "statements",
    primary_key: "id",
    fields: &[
        FieldSchema::new("date", Date).column("dateof"),
        FieldSchema::new("account", Ref(EntityKind::Account)),
        FieldSchema::new("balance", Real),
        FieldSchema::new("unit", Ref(EntityKind::Asset)),
        FieldSchema::new("description", Text).optional(),
    ],
    lookup: None,
    report_column: Some("report"),
};

pub static TRANSACTIONS: EntitySchema = EntitySchema {
    kind: EntityKind::Transaction,
    table: "transactions",
    primary_key: "id",
    fields: &[
        FieldSchema::new("date", Date).column("dateof"),
        FieldSchema::new("location", Text).optional(),
        FieldSchema::new("sender", Ref(EntityKind::Account)),
        FieldSchema::new("amount", Real),
        FieldSchema::new("unit", Ref(EntityKind::Asset)),
        FieldSchema::new("receiver", Ref(EntityKind::Account)),
        FieldSchema::new("received_amount", Real).optional(),
        FieldSchema::new("received_unit", Ref(EntityKind::Asset)).optional(),
        FieldSchema::new("description", Text).optional(),
        FieldSchema::new("reference", Text).optional(),
    ],
    lookup: None,
    report_column: Some("report"),
};

pub static VERIFICATIONS: EntitySchema = EntitySchema {
    kind: EntityKind::Verification,
    table: "verifications",
    primary_key: "id",
    fields: &[
        FieldSchema::new("txn", Ref(EntityKind::Transaction)).optional(),
        FieldSchema::new("date", Date).column("dateof"),
        FieldSchema::new("location", Text).optional(),
        FieldSchema::new("sender", Ref(EntityKind::Account)),
        FieldSchema::new("amount", Real),
        FieldSchema::new("unit", Ref(EntityKind::Asset)),
        FieldSchema::new("receiver", Ref(EntityKind::Account)),
        FieldSchema::new("received_amount", Real).optional(),
        FieldSchema::new("received_unit", Ref(EntityKind::Asset)).optional(),
        FieldSchema::new("description", Text).optional(),
        FieldSchema::new("reference", Text).optional(),
    ],
    lookup: None,
    report_column: Some("report"),
};

pub static ACCOUNT_TAGS: TagJoinSchema = TagJoinSchema {
    entity: EntityKind::Account,
    table: "account_tags",
    entity_column: "account_id",
    tag_column: "tag_id",
    report_column: "report",
};

pub static STATEMENT_TAGS: TagJoinSchema = TagJoinSchema {
    entity: EntityKind::Statement,
    table: "statement_tags",
    entity_column: "statement_id",
    tag_column: "tag_id",
    report_column: "report",
};

pub static TRANSACTION_TAGS: TagJoinSchema = TagJoinSchema {
    entity: EntityKind::Transaction,
    table: "transaction_tags",
    entity_column: "transaction_id",
    tag_column: "tag_id",
    report_column: "report",
};

pub static STATEMENT_LINKS: LinkSchema = LinkSchema {
    entity: EntityKind::Statement,
    table: "statement_links",
    left: "id1",
    right: "id2",
    category: "category",
    report_column: "report",
};

pub static TRANSACTION_LINKS: LinkSchema = LinkSchema {
    entity: EntityKind::Transaction,
    table: "transaction_links",
    left: "id1",
    right: "id2",
    category: "category",
    report_column: "report",
};

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<EntityKind, &'static EntitySchema>,
    tag_joins: BTreeMap<EntityKind, &'static TagJoinSchema>,
    links: BTreeMap<EntityKind, &'static LinkSchema>,
}

impl SchemaRegistry {
    /// Empty registry; descriptors are added with the `register_*` methods
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    /// Registry with every ledger entity, tag join and link table, validated
    pub fn standard() -> Result<Self> {
        let mut registry = SchemaRegistry::new();
        for schema in [
            &REPORTS,
            &ASSETS,
            &ACCOUNTS,
            &TAGS,
            &STATEMENTS,
            &TRANSACTIONS,
            &VERIFICATIONS,
        ] {
            registry.register_entity(schema);
        }
        for join in [&ACCOUNT_TAGS, &STATEMENT_TAGS, &TRANSACTION_TAGS] {
            registry.register_tags(join);
        }
        for link in [&STATEMENT_LINKS, &TRANSACTION_LINKS] {
            registry.register_links(link);
        }
        registry.validate()?;
        Ok(registry)
    }

    pub fn register_entity(&mut self, schema: &'static EntitySchema) {
        self.entities.insert(schema.kind, schema);
    }

    pub fn register_tags(&mut self, join: &'static TagJoinSchema) {
        self.tag_joins.insert(join.entity, join);
    }

    pub fn register_links(&mut self, link: &'static LinkSchema) {
        self.links.insert(link.entity, link);
    }

    pub fn entity(&self, kind: EntityKind) -> Result<&'static EntitySchema> {
        self.entities
            .get(&kind)
            .copied()
            .ok_or_else(|| RecordError::Schema(format!("{} is not registered", kind)))
    }

    pub fn tag_join(&self, kind: EntityKind) -> Result<&'static TagJoinSchema> {
        self.tag_joins
            .get(&kind)
            .copied()
            .ok_or_else(|| RecordError::Schema(format!("{} is not taggable", kind)))
    }

    pub fn link(&self, kind: EntityKind) -> Result<&'static LinkSchema> {
        self.links
            .get(&kind)
            .copied()
            .ok_or_else(|| RecordError::Schema(format!("{} is not linkable", kind)))
    }

    pub fn entities(&self) -> impl Iterator<Item = &'static EntitySchema> + '_ {
        self.entities.values().copied()
    }

    /// Check every descriptor once; errors name the offending type and field
    pub fn validate(&self) -> Result<()> {
        let mut tables = HashSet::new();

        for (kind, schema) in &self.entities {
            if *kind != schema.kind {
                return Err(RecordError::Schema(format!(
                    "descriptor for {} registered under {}",
                    schema.kind, kind
                )));
            }
            if !tables.insert(schema.table) {
                return Err(RecordError::Schema(format!("table {} declared twice", schema.table)));
            }
            if schema.fields.is_empty() {
                return Err(RecordError::Schema(format!("{} declares no fields", kind)));
            }

            let mut names = HashSet::new();
            let mut columns = HashSet::from([schema.primary_key]);
            if let Some(report) = schema.report_column {
                columns.insert(report);
            }
            for field in schema.fields {
                if !names.insert(field.name) {
                    return Err(RecordError::Schema(format!(
                        "{} declares field {} twice",
                        kind, field.name
                    )));
                }
                if !columns.insert(field.column) {
                    return Err(RecordError::Schema(format!(
                        "{}.{} reuses column {}",
                        kind, field.name, field.column
                    )));
                }
                if let FieldKind::Ref(target) = field.kind {
                    if !self.entities.contains_key(&target) {
                        return Err(RecordError::Schema(format!(
                            "{}.{} references unregistered {}",
                            kind, field.name, target
                        )));
                    }
                }
            }

            if let Some(lookup) = schema.lookup {
                match schema.field(lookup) {
                    Some(field) if field.kind == FieldKind::Text => {}
                    _ => {
                        return Err(RecordError::Schema(format!(
                            "{} lookup field {} must be a text field",
                            kind, lookup
                        )))
                    }
                }
            }

            let owned = schema.report_column.is_some();
            if owned == (*kind == EntityKind::Report) {
                return Err(RecordError::Schema(format!(
                    "{} must {}carry an owning report column",
                    kind,
                    if owned { "not " } else { "" }
                )));
            }
        }

        if !self.entities.contains_key(&EntityKind::Report) {
            return Err(RecordError::Schema("Report is not registered".to_string()));
        }

        for join in self.tag_joins.values() {
            self.entity(join.entity)?;
            self.entity(EntityKind::Tag)?;
            if !tables.insert(join.table) {
                return Err(RecordError::Schema(format!("table {} declared twice", join.table)));
            }
        }
        for link in self.links.values() {
            self.entity(link.entity)?;
            if !tables.insert(link.table) {
                return Err(RecordError::Schema(format!("table {} declared twice", link.table)));
            }
        }

        Ok(())
    }

    /// DDL for every registered table and index
    pub fn create_statements(&self) -> Result<Vec<String>> {
        let mut statements = Vec::new();

        for schema in self.entities.values() {
            statements.push(schema.create_table_sql(self)?);
            for field in schema.fields {
                if matches!(field.kind, FieldKind::Ref(_) | FieldKind::Date) {
                    statements.push(format!(
                        "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {}({})",
                        schema.table, field.column, schema.table, field.column
                    ));
                }
            }
        }

        let reports = self.entity(EntityKind::Report)?;
        let tags = self.entity(EntityKind::Tag)?;
        for join in self.tag_joins.values() {
            let owner = self.entity(join.entity)?;
            statements.push(format!(
                "CREATE TABLE IF NOT EXISTS {table} (
    {entity_col} INTEGER NOT NULL REFERENCES {owner}({owner_pk}),
    {tag_col} INTEGER NOT NULL REFERENCES {tags}({tags_pk}),
    {report_col} INTEGER NOT NULL REFERENCES {reports}({reports_pk}),
    PRIMARY KEY ({entity_col}, {tag_col})
)",
                table = join.table,
                entity_col = join.entity_column,
                owner = owner.table,
                owner_pk = owner.primary_key,
                tag_col = join.tag_column,
                tags = tags.table,
                tags_pk = tags.primary_key,
                report_col = join.report_column,
                reports = reports.table,
                reports_pk = reports.primary_key,
            ));
        }

        for link in self.links.values() {
            let owner = self.entity(link.entity)?;
            statements.push(format!(
                "CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    {left} INTEGER NOT NULL REFERENCES {owner}({owner_pk}),
    {right} INTEGER NOT NULL REFERENCES {owner}({owner_pk}),
    {category} TEXT,
    {report_col} INTEGER NOT NULL REFERENCES {reports}({reports_pk}),
    CHECK ({left} < {right})
)",
                table = link.table,
                left = link.left,
                right = link.right,
                owner = owner.table,
                owner_pk = owner.primary_key,
                category = link.category,
                report_col = link.report_column,
                reports = reports.table,
                reports_pk = reports.primary_key,
            ));
            for column in [link.left, link.right] {
                statements.push(format!(
                    "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {}({})",
                    link.table, column, link.table, column
                ));
            }
        }

        Ok(statements)
    }
}

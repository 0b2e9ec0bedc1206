// 🗂️ Session - unit of work over one store connection
//
// The session owns the store binding and the identity map. The identity map
// is an arena of slots plus an index keyed by (type, key): every handle for
// the same stored row points at the same slot, and a slot is filled with the
// decoded entity on first access, with exactly one row fetch.
//
// Writes always happen under an owning Report. A batch groups many unsaved
// entities under one Report inside one store transaction; if anything fails
// the transaction is rolled back and every slot the batch touched is evicted.

use crate::db::Store;
use crate::deduplication::DedupPolicy;
use crate::entities::Report;
use crate::error::{RecordError, Result};
use crate::record::{Entity, Handle, Named, Owned, PendingLink, RefField};
use crate::schema::{EntityKind, EntitySchema, FieldKind, SchemaRegistry};
use crate::value::{Key, RowReader, RowWriter, Value, DATE_FORMAT};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info, warn};

// ============================================================================
// IDENTITY MAP
// ============================================================================

struct Slot {
    kind: EntityKind,
    key: Key,
    /// Decoded entity; `None` while the slot is a stub
    entity: Option<Rc<dyn Any>>,
    /// Persisted tag keys, fetched once on first `tags` call
    tags: Option<Vec<Key>>,
}

impl Slot {
    fn reset(&mut self) {
        self.entity = None;
        self.tags = None;
    }
}

/// Slots written inside the open store transaction
enum Touch {
    Inserted(usize),
    Modified(usize),
}

/// Counters for store round trips, observable from tests and the CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub row_fetches: u64,
    pub predicate_fetches: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deduplicated: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Inserted,
    Updated,
    /// Natural key matched a stored row; the stored entity was returned
    Deduplicated,
}

pub struct Session {
    store: Option<Store>,
    registry: SchemaRegistry,
    dedup: DedupPolicy,
    slots: Vec<Slot>,
    /// Evicted slots, reused before the arena grows
    free: Vec<usize>,
    index: HashMap<(EntityKind, Key), usize>,
    stats: SessionStats,
    journal: Option<Vec<Touch>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("bound", &self.store.is_some())
            .field("cached", &self.index.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Session {
    // ========================================================================
    // CONSTRUCTION & BINDING
    // ========================================================================

    /// Session without a store; both descriptor sets are validated here
    pub fn new(registry: SchemaRegistry, dedup: DedupPolicy) -> Result<Self> {
        registry.validate()?;
        dedup.validate(&registry)?;
        Ok(Session {
            store: None,
            registry,
            dedup,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            stats: SessionStats::default(),
            journal: None,
        })
    }

    /// Standard schema and default dedup policy, no store bound yet
    pub fn unbound() -> Result<Self> {
        Session::new(SchemaRegistry::standard()?, DedupPolicy::default())
    }

    /// Bind a store, creating any missing tables. Rebinding drops every cached entity.
    pub fn bind(&mut self, store: Store) -> Result<()> {
        store.setup_database(&self.registry)?;
        self.store = Some(store);
        self.clear_all_caches();
        Ok(())
    }

    pub fn open(path: &Path) -> Result<Self> {
        let mut session = Session::unbound()?;
        session.bind(Store::open(path)?)?;
        info!(path = %path.display(), "opened ledger");
        Ok(session)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut session = Session::unbound()?;
        session.bind(Store::open_in_memory()?)?;
        Ok(session)
    }

    pub fn with_dedup(mut self, dedup: DedupPolicy) -> Result<Self> {
        dedup.validate(&self.registry)?;
        self.dedup = dedup;
        Ok(self)
    }

    pub fn store(&self) -> Result<&Store> {
        self.store.as_ref().ok_or(RecordError::ConnectionNotConfigured)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn dedup(&self) -> &DedupPolicy {
        &self.dedup
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = SessionStats::default();
    }

    // ========================================================================
    // IDENTITY CACHE
    // ========================================================================

    /// Handle for `(T, key)`: the cached instance if any, else a new stub. No fetch.
    pub fn find<T: Entity>(&mut self, key: Key) -> Handle<T> {
        Handle::new(self.slot_for(T::KIND, key), key)
    }

    /// Whether the handle's entity content is already in memory
    pub fn is_loaded<T: Entity>(&self, handle: Handle<T>) -> bool {
        self.index
            .get(&(T::KIND, handle.key()))
            .map(|&slot| self.slots[slot].entity.is_some())
            .unwrap_or(false)
    }

    /// Number of cached (type, key) entries for `kind`
    pub fn cached(&self, kind: EntityKind) -> usize {
        self.index.keys().filter(|(k, _)| *k == kind).count()
    }

    /// Forget every cached instance of `kind`. Evicted slots are reused, so
    /// handles issued before the clear are stale: they still load by key but
    /// may compare unequal to handles issued afterwards.
    pub fn clear_cache(&mut self, kind: EntityKind) {
        let evicted: Vec<usize> = self
            .index
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, &slot)| slot)
            .collect();
        self.index.retain(|(k, _), _| *k != kind);
        for &slot in &evicted {
            self.slots[slot].reset();
        }
        self.free.extend(evicted.iter().copied());
        debug!(kind = %kind, evicted = evicted.len(), "cleared identity cache");
    }

    /// Drop the whole arena; every earlier handle becomes stale
    pub fn clear_all_caches(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        if let Some(journal) = self.journal.as_mut() {
            journal.clear();
        }
    }

    pub(crate) fn slot_for(&mut self, kind: EntityKind, key: Key) -> usize {
        if let Some(&slot) = self.index.get(&(kind, key)) {
            return slot;
        }
        let fresh = Slot {
            kind,
            key,
            entity: None,
            tags: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = fresh;
                slot
            }
            None => {
                self.slots.push(fresh);
                self.slots.len() - 1
            }
        };
        self.index.insert((kind, key), slot);
        debug!(kind = %kind, key, slot, "created stub");
        slot
    }

    /// Slot currently live for the handle's key (handles survive cache clears)
    fn live_slot<T: Entity>(&mut self, handle: Handle<T>) -> usize {
        match self.index.get(&(T::KIND, handle.key())) {
            Some(&slot) => slot,
            None => self.slot_for(T::KIND, handle.key()),
        }
    }

    pub(crate) fn cached_tags(&self, slot: usize) -> Option<&[Key]> {
        self.slots.get(slot).and_then(|s| s.tags.as_deref())
    }

    /// Install the persisted tag list; `changed` marks a write made in this transaction
    pub(crate) fn cache_tags(&mut self, slot: usize, tags: Vec<Key>, changed: bool) {
        self.slots[slot].tags = Some(tags);
        if changed {
            self.note(Touch::Modified(slot));
        }
    }

    pub(crate) fn count_predicate_fetch(&mut self) {
        self.stats.predicate_fetches += 1;
    }

    fn note(&mut self, touch: Touch) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(touch);
        }
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Entity content for a handle; a stub is loaded with exactly one row fetch
    pub fn get<T: Entity>(&mut self, handle: Handle<T>) -> Result<Rc<T>> {
        let slot = self.live_slot(handle);
        if let Some(entity) = &self.slots[slot].entity {
            return downcast(Rc::clone(entity));
        }

        let schema = self.registry.entity(T::KIND)?;
        let row = self.store()?.select_by_key(schema, handle.key())?;
        self.stats.row_fetches += 1;
        let row = row.ok_or_else(|| RecordError::not_found(T::KIND.name(), format!("key {}", handle.key())))?;
        debug!(kind = %T::KIND, key = handle.key(), "loaded row");

        let entity = Rc::new(T::decode(&row)?);
        let cached: Rc<dyn Any> = entity.clone();
        self.slots[slot].entity = Some(cached);
        Ok(entity)
    }

    /// `find` followed by a load, so a missing row surfaces as NotFound here
    pub fn load<T: Entity>(&mut self, key: Key) -> Result<Handle<T>> {
        let handle = self.find::<T>(key);
        self.get(handle)?;
        Ok(handle)
    }

    /// Lookup by the type's unique name column
    pub fn find_by_name<T: Named>(&mut self, name: &str) -> Result<Handle<T>> {
        let schema = self.registry.entity(T::KIND)?;
        let lookup = schema.lookup_field()?;
        let rows = self
            .store()?
            .select_where(schema, &[(lookup.column, Value::from(name))])?;
        self.stats.predicate_fetches += 1;
        match rows.into_iter().next() {
            Some(row) => self.adopt(row),
            None => Err(RecordError::not_found(T::KIND.name(), format!("name {:?}", name))),
        }
    }

    /// Every stored `T` whose fields equal the given values (`report` names the
    /// owning report). An empty filter list returns the whole table.
    pub fn find_all<T: Entity>(&mut self, filters: &[(&str, Value)]) -> Result<Vec<Handle<T>>> {
        let schema = self.registry.entity(T::KIND)?;
        let mut columns = Vec::with_capacity(filters.len());
        for (field, value) in filters {
            let filter = match (*field, schema.report_column) {
                ("report", Some(report)) => (report, self.ref_filter(EntityKind::Report, value)?),
                _ => {
                    let declared = schema.field(field).ok_or_else(|| {
                        RecordError::Schema(format!("{} has no field named {:?}", T::KIND, field))
                    })?;
                    match declared.kind {
                        FieldKind::Ref(target) => (declared.column, self.ref_filter(target, value)?),
                        _ => (declared.column, value.clone()),
                    }
                }
            };
            columns.push(filter);
        }

        let rows = self.store()?.select_where(schema, &columns)?;
        self.stats.predicate_fetches += 1;
        rows.into_iter().map(|row| self.adopt(row)).collect()
    }

    /// Key value for a filter on a reference column. Text is taken as the
    /// target's name and looked up through its lookup column.
    fn ref_filter(&mut self, target: EntityKind, value: &Value) -> Result<Value> {
        let name = match value {
            Value::Integer(_) | Value::Null => return Ok(value.clone()),
            Value::Text(name) => name,
            other => {
                return Err(RecordError::Schema(format!(
                    "cannot match a {} reference against {:?}",
                    target, other
                )))
            }
        };
        let schema = self.registry.entity(target)?;
        let lookup = schema.lookup_field()?;
        let rows = self
            .store()?
            .select_where(schema, &[(lookup.column, Value::from(name.as_str()))])?;
        self.stats.predicate_fetches += 1;
        match rows.into_iter().next() {
            Some(row) => Ok(Value::Integer(row.key())),
            None => Err(RecordError::not_found(target.name(), format!("name {:?}", name))),
        }
    }

    /// Owning report of a stored entity
    pub fn report_of<T: Owned>(&mut self, handle: Handle<T>) -> Result<Handle<Report>> {
        let entity = self.get(handle)?;
        let report = entity.meta().report().ok_or_else(|| {
            RecordError::invalid(T::KIND.name(), format!("row {} has no owning report", handle.key()))
        })?;
        Ok(self.find(report))
    }

    /// Name of the entity a reference field points at
    pub fn name_of<T: Named>(&mut self, field: &RefField<T>) -> Result<String> {
        let handle = field.resolve(self)?;
        let entity = self.get(handle)?;
        Ok(entity.name()?.to_string())
    }

    /// Place a fetched row in the identity map, keeping an already loaded instance
    fn adopt<T: Entity>(&mut self, row: RowReader) -> Result<Handle<T>> {
        let slot = self.slot_for(T::KIND, row.key());
        if self.slots[slot].entity.is_none() {
            let entity: Rc<dyn Any> = Rc::new(T::decode(&row)?);
            self.slots[slot].entity = Some(entity);
        }
        Ok(Handle::new(slot, row.key()))
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Append a report. Reports are never updated; an already written one is returned as is.
    pub fn create_report(&mut self, mut report: Report) -> Result<Handle<Report>> {
        if let Some(key) = report.key() {
            return Ok(self.find(key));
        }
        let schema = self.registry.entity(EntityKind::Report)?;
        let values = self.encode_row(&report)?;
        let key = self.store()?.insert(schema, &values, None)?;
        self.stats.inserts += 1;
        info!(key, category = report.category()?, "created report");
        report.meta_mut().assign(key, None);
        self.install(report, true)
    }

    /// Insert an unsaved entity under `report` (or return its natural-key duplicate);
    /// a keyed entity is updated instead
    pub fn write<T: Owned>(&mut self, entity: T, report: Handle<Report>) -> Result<Handle<T>> {
        Ok(self.write_with_status(entity, report)?.0)
    }

    pub fn write_with_status<T: Owned>(
        &mut self,
        mut entity: T,
        report: Handle<Report>,
    ) -> Result<(Handle<T>, WriteStatus)> {
        if entity.is_saved() {
            let handle = self.update_existing(entity, report)?;
            return Ok((handle, WriteStatus::Updated));
        }

        let values = self.encode_row(&entity)?;
        if let Some(existing) = self.probe_duplicate::<T>(&values)? {
            self.stats.deduplicated += 1;
            debug!(kind = %T::KIND, key = existing.key(), "natural key matched stored row");
            let (tags, links) = entity.meta_mut().take_pending();
            self.flush_pending(T::KIND, existing.key(), tags, links, report.key())?;
            return Ok((existing, WriteStatus::Deduplicated));
        }

        let handle = self.insert_values(entity, values, report)?;
        Ok((handle, WriteStatus::Inserted))
    }

    /// Stored row sharing the natural key of an unsaved entity, without writing anything
    pub fn find_duplicate<T: Owned>(&mut self, entity: &T) -> Result<Option<Handle<T>>> {
        let values = self.encode_row(entity)?;
        self.probe_duplicate::<T>(&values)
    }

    /// Full-row rewrite of a keyed entity, now owned by `report`; an unsaved one is inserted
    pub fn update<T: Owned>(&mut self, entity: T, report: Handle<Report>) -> Result<Handle<T>> {
        if entity.is_saved() {
            self.update_existing(entity, report)
        } else {
            let values = self.encode_row(&entity)?;
            self.insert_values(entity, values, report)
        }
    }

    fn insert_values<T: Owned>(
        &mut self,
        mut entity: T,
        values: Vec<Value>,
        report: Handle<Report>,
    ) -> Result<Handle<T>> {
        let schema = self.registry.entity(T::KIND)?;
        let key = self.store()?.insert(schema, &values, Some(report.key()))?;
        self.stats.inserts += 1;

        let (tags, links) = entity.meta_mut().take_pending();
        entity.meta_mut().assign(key, Some(report.key()));
        let handle = self.install(entity, true)?;
        self.flush_pending(T::KIND, key, tags, links, report.key())?;
        Ok(handle)
    }

    fn update_existing<T: Owned>(&mut self, mut entity: T, report: Handle<Report>) -> Result<Handle<T>> {
        let key = entity
            .key()
            .ok_or_else(|| RecordError::invalid(T::KIND.name(), "update requires a stored key"))?;
        let schema = self.registry.entity(T::KIND)?;
        let values = self.encode_row(&entity)?;
        if !self.store()?.update(schema, key, &values, Some(report.key()))? {
            return Err(RecordError::not_found(T::KIND.name(), format!("key {}", key)));
        }
        self.stats.updates += 1;
        debug!(kind = %T::KIND, key, report = report.key(), "updated row");

        let (tags, links) = entity.meta_mut().take_pending();
        entity.meta_mut().assign(key, Some(report.key()));
        let handle = self.install(entity, false)?;
        self.flush_pending(T::KIND, key, tags, links, report.key())?;
        Ok(handle)
    }

    /// Serialize content fields in schema order, checking required fields
    fn encode_row<T: Entity>(&self, entity: &T) -> Result<Vec<Value>> {
        let schema = self.registry.entity(T::KIND)?;
        let mut row = RowWriter::new(T::KIND.name());
        entity.encode(&mut row)?;

        let mut values = Vec::with_capacity(schema.fields.len());
        for field in schema.fields {
            let value = row.take(field.name).ok_or_else(|| {
                RecordError::Schema(format!("{} encoder never wrote field {}", T::KIND, field.name))
            })?;
            if value.is_null() && field.required {
                return Err(RecordError::FieldUnset {
                    entity: T::KIND.name(),
                    field: field.name,
                });
            }
            values.push(value);
        }
        if !row.is_empty() {
            return Err(RecordError::Schema(format!(
                "{} encoder wrote {} undeclared field(s)",
                T::KIND,
                row.len()
            )));
        }
        Ok(values)
    }

    /// Stored row matching the configured natural key, if any
    fn probe_duplicate<T: Entity>(&mut self, values: &[Value]) -> Result<Option<Handle<T>>> {
        let schema = self.registry.entity(T::KIND)?;
        let filters = match self.dedup.fields(T::KIND) {
            Some(fields) => natural_key(schema, fields, values)?,
            None => return Ok(None),
        };
        let rows = self.store()?.select_where(schema, &filters)?;
        self.stats.predicate_fetches += 1;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(self.adopt(row)?)),
            None => Ok(None),
        }
    }

    fn install<T: Entity>(&mut self, entity: T, inserted: bool) -> Result<Handle<T>> {
        let key = entity
            .key()
            .ok_or_else(|| RecordError::invalid(T::KIND.name(), "cannot cache an unsaved entity"))?;
        let slot = self.slot_for(T::KIND, key);
        let entity: Rc<dyn Any> = Rc::new(entity);
        self.slots[slot].entity = Some(entity);
        self.note(if inserted {
            Touch::Inserted(slot)
        } else {
            Touch::Modified(slot)
        });
        Ok(Handle::new(slot, key))
    }

    fn flush_pending(
        &mut self,
        kind: EntityKind,
        key: Key,
        tags: Vec<Key>,
        links: Vec<PendingLink>,
        report: Key,
    ) -> Result<()> {
        if !tags.is_empty() {
            crate::tags::flush(self, kind, key, &tags, report)?;
        }
        if !links.is_empty() {
            crate::links::flush(self, kind, key, links, report)?;
        }
        Ok(())
    }

    // ========================================================================
    // TRANSACTIONS & BATCHES
    // ========================================================================

    /// Run `work` inside one store transaction. On error the transaction is
    /// rolled back and every slot written meanwhile is evicted. Nested calls
    /// join the outer transaction.
    pub fn in_transaction<R, F>(&mut self, work: F) -> Result<R>
    where
        F: FnOnce(&mut Session) -> Result<R>,
    {
        if self.journal.is_some() || self.store()?.in_transaction() {
            return work(self);
        }

        self.store()?.begin()?;
        self.journal = Some(Vec::new());
        let outcome = work(self);
        let journal = self.journal.take().unwrap_or_default();

        let outcome = outcome.and_then(|value| self.store()?.commit().map(|_| value));
        if outcome.is_err() {
            self.abort(journal);
        }
        outcome
    }

    fn abort(&mut self, journal: Vec<Touch>) {
        if let Ok(store) = self.store() {
            if store.in_transaction() {
                if let Err(err) = store.rollback() {
                    warn!(error = %err, "rollback failed");
                }
            }
        }

        let touched = journal.len();
        for touch in journal.into_iter().rev() {
            match touch {
                Touch::Inserted(slot) => {
                    let (kind, key) = (self.slots[slot].kind, self.slots[slot].key);
                    if self.index.get(&(kind, key)) == Some(&slot) {
                        self.index.remove(&(kind, key));
                        self.free.push(slot);
                    }
                    self.slots[slot].reset();
                }
                Touch::Modified(slot) => self.slots[slot].reset(),
            }
        }
        warn!(touched, "rolled back; evicted entities written in the transaction");
    }

    /// Write a report and every entity of the batch in one store transaction
    pub fn commit(&mut self, batch: Batch) -> Result<BatchSummary> {
        let Batch { report, items } = batch;
        let total = items.len();

        let summary = self.in_transaction(move |session| {
            let report = session.create_report(report)?;
            let mut summary = BatchSummary {
                report,
                inserted: 0,
                updated: 0,
                deduplicated: 0,
            };
            for item in items {
                match item.write_into(session, report)? {
                    WriteStatus::Inserted => summary.inserted += 1,
                    WriteStatus::Updated => summary.updated += 1,
                    WriteStatus::Deduplicated => summary.deduplicated += 1,
                }
            }
            Ok(summary)
        })?;

        info!(
            report = summary.report.key(),
            total,
            inserted = summary.inserted,
            updated = summary.updated,
            deduplicated = summary.deduplicated,
            "committed batch"
        );
        Ok(summary)
    }

    // ========================================================================
    // PRESENTATION
    // ========================================================================

    /// Stored entity as a JSON object keyed by field name (plus `id`, `report`)
    pub fn describe<T: Entity>(&mut self, handle: Handle<T>) -> Result<serde_json::Value> {
        let entity = self.get(handle)?;
        let schema = self.registry.entity(T::KIND)?;
        let mut row = RowWriter::new(T::KIND.name());
        entity.encode(&mut row)?;

        let mut object = serde_json::Map::new();
        object.insert("id".to_string(), serde_json::Value::from(handle.key()));
        for field in schema.fields {
            let value = row.take(field.name).unwrap_or(Value::Null);
            object.insert(field.name.to_string(), to_json(value));
        }
        if let Some(report) = entity.meta().report() {
            object.insert("report".to_string(), serde_json::Value::from(report));
        }
        Ok(serde_json::Value::Object(object))
    }
}

fn downcast<T: Entity>(entity: Rc<dyn Any>) -> Result<Rc<T>> {
    entity
        .downcast::<T>()
        .map_err(|_| RecordError::Schema(format!("cached instance is not a {}", T::KIND)))
}

fn natural_key(
    schema: &'static EntitySchema,
    fields: &[String],
    values: &[Value],
) -> Result<Vec<(&'static str, Value)>> {
    fields
        .iter()
        .map(|name| {
            let position = schema
                .fields
                .iter()
                .position(|f| f.name == name.as_str())
                .ok_or_else(|| RecordError::Schema(format!("{} has no field {}", schema.kind, name)))?;
            let field = &schema.fields[position];
            Ok((field.column, values[position].clone()))
        })
        .collect()
}

fn to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(i),
        Value::Real(r) => serde_json::Value::from(r),
        Value::Text(s) => serde_json::Value::from(s),
        Value::Date(d) => serde_json::Value::from(d.format(DATE_FORMAT).to_string()),
        Value::Timestamp(t) => serde_json::Value::from(t.to_rfc3339()),
    }
}

// ============================================================================
// BATCH
// ============================================================================

trait PendingWrite {
    fn kind(&self) -> EntityKind;

    fn write_into(self: Box<Self>, session: &mut Session, report: Handle<Report>) -> Result<WriteStatus>;
}

impl<T: Owned> PendingWrite for T {
    fn kind(&self) -> EntityKind {
        T::KIND
    }

    fn write_into(self: Box<Self>, session: &mut Session, report: Handle<Report>) -> Result<WriteStatus> {
        Ok(session.write_with_status(*self, report)?.1)
    }
}

/// Unsaved entities (of any owned type) waiting to be committed under one Report
pub struct Batch {
    report: Report,
    items: Vec<Box<dyn PendingWrite>>,
}

impl Batch {
    pub fn new(report: Report) -> Self {
        Batch {
            report,
            items: Vec::new(),
        }
    }

    pub fn push<T: Owned>(&mut self, entity: T) {
        self.items.push(Box::new(entity));
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Queued entity count for `kind`
    pub fn count(&self, kind: EntityKind) -> usize {
        self.items.iter().filter(|item| item.kind() == kind).count()
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("report", &self.report)
            .field("items", &self.items.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub report: Handle<Report>,
    pub inserted: usize,
    pub updated: usize,
    pub deduplicated: usize,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Account, Asset, Statement, Transaction};
    use crate::record::Taggable;
    use chrono::NaiveDate;

    struct Fixture {
        session: Session,
        report: Handle<Report>,
        cash: Handle<Account>,
        merchant: Handle<Account>,
        usd: Handle<Asset>,
    }

    fn fixture() -> Fixture {
        let mut session = Session::open_in_memory().unwrap();
        let report = session.create_report(Report::new("setup")).unwrap();
        let cash = session
            .write(Account::new("cash", "wallet", "me"), report)
            .unwrap();
        let merchant = session
            .write(Account::new("merchant", "shop", "them"), report)
            .unwrap();
        let usd = session.write(Asset::new("usd", "currency"), report).unwrap();
        Fixture {
            session,
            report,
            cash,
            merchant,
            usd,
        }
    }

    fn march(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn test_unbound_session_reports_missing_connection() {
        let mut session = Session::unbound().unwrap();
        let handle = session.find::<Account>(1);
        assert!(matches!(
            session.get(handle),
            Err(RecordError::ConnectionNotConfigured)
        ));
        assert!(matches!(
            session.create_report(Report::new("x")),
            Err(RecordError::ConnectionNotConfigured)
        ));
    }

    #[test]
    fn test_find_returns_same_handle() {
        let mut fx = fixture();
        let key = fx.cash.key();
        let a = fx.session.find::<Account>(key);
        let b = fx.session.find::<Account>(key);
        assert_eq!(a, b);
        assert_eq!(a, fx.cash);

        let stub = fx.session.find::<Account>(999);
        assert_eq!(stub, fx.session.find::<Account>(999));
        assert_ne!(stub, a);
    }

    #[test]
    fn test_stub_loads_exactly_once() {
        let mut fx = fixture();
        let key = fx.cash.key();
        fx.session.clear_cache(EntityKind::Account);
        fx.session.reset_stats();

        let handle = fx.session.find::<Account>(key);
        assert!(!fx.session.is_loaded(handle));
        assert_eq!(fx.session.stats().row_fetches, 0);

        let first = fx.session.get(handle).unwrap();
        assert_eq!(first.name().unwrap(), "cash");
        assert_eq!(fx.session.stats().row_fetches, 1);

        let second = fx.session.get(handle).unwrap();
        assert_eq!(second.owner().unwrap(), "me");
        assert_eq!(fx.session.stats().row_fetches, 1);
        assert!(Rc::ptr_eq(&first, &second));
        println!("✅ Lazy load once test PASSED");
    }

    #[test]
    fn test_missing_row_is_not_found() {
        let mut fx = fixture();
        let handle = fx.session.find::<Account>(404);
        assert!(matches!(
            fx.session.get(handle),
            Err(RecordError::NotFound { entity: "Account", .. })
        ));
        assert!(fx.session.load::<Asset>(404).is_err());
    }

    #[test]
    fn test_loaded_entity_is_immutable() {
        let mut fx = fixture();
        let loaded = fx.session.get(fx.cash).unwrap();
        let mut copy = (*loaded).clone();
        assert!(matches!(
            copy.set_owner("someone"),
            Err(RecordError::AlreadyLoadedImmutable { entity: "Account", field: "owner", .. })
        ));

        let mut fresh = Account::new("savings", "bank", "me");
        assert!(fresh.set_owner("us").is_ok());
    }

    #[test]
    fn test_write_then_reload_round_trips() {
        let mut fx = fixture();
        let mut txn = Transaction::new(march(2), fx.cash, 19.99, fx.usd, fx.merchant);
        txn.set_location("Boston").unwrap();
        txn.set_reference("R-1").unwrap();
        let handle = fx.session.write(txn, fx.report).unwrap();

        fx.session.clear_all_caches();
        let reloaded = fx.session.load::<Transaction>(handle.key()).unwrap();
        let txn = fx.session.get(reloaded).unwrap();
        assert_eq!(txn.date().unwrap(), march(2));
        assert_eq!(txn.amount().unwrap(), 19.99);
        assert_eq!(txn.location(), Some("Boston"));
        assert_eq!(txn.reference(), Some("R-1"));
        assert!(txn.description().is_none());

        let sender = txn.sender().resolve(&mut fx.session).unwrap();
        assert_eq!(sender, fx.session.find_by_name::<Account>("cash").unwrap());
        assert_eq!(fx.session.name_of(txn.unit()).unwrap(), "usd");
        assert_eq!(fx.session.report_of(reloaded).unwrap().key(), fx.report.key());
    }

    #[test]
    fn test_resolve_memoizes_handle() {
        let mut fx = fixture();
        let statement = Statement::new(march(31), fx.cash, 250.0, fx.usd);
        let handle = fx.session.write(statement, fx.report).unwrap();
        fx.session.clear_all_caches();

        let stub = fx.session.find::<Statement>(handle.key());
        let statement = fx.session.get(stub).unwrap();
        assert!(!statement.account().is_resolved());
        let first = statement.account().resolve(&mut fx.session).unwrap();
        assert!(statement.account().is_resolved());
        let second = statement.account().resolve(&mut fx.session).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_draft_with_unset_field_is_rejected() {
        let mut fx = fixture();
        let mut txn = Transaction::draft();
        txn.set_date(march(5)).unwrap();
        txn.set_sender(fx.cash).unwrap();
        let err = fx.session.write(txn, fx.report).unwrap_err();
        assert!(matches!(err, RecordError::FieldUnset { entity: "Transaction", field: "amount" }));
    }

    #[test]
    fn test_same_natural_key_under_two_reports_stores_one_row() {
        let mut fx = fixture();
        let first_report = fx.session.create_report(Report::new("import")).unwrap();
        let second_report = fx.session.create_report(Report::new("import")).unwrap();

        let txn = Transaction::new(march(1), fx.cash, 42.5, fx.usd, fx.merchant);
        let (first, status) = fx.session.write_with_status(txn.clone(), first_report).unwrap();
        assert_eq!(status, WriteStatus::Inserted);
        let (second, status) = fx.session.write_with_status(txn, second_report).unwrap();
        assert_eq!(status, WriteStatus::Deduplicated);

        assert_eq!(first, second);
        assert_eq!(fx.session.store().unwrap().count("transactions").unwrap(), 1);
        assert_eq!(fx.session.report_of(second).unwrap(), first_report);
        assert_eq!(fx.session.stats().deduplicated, 1);
    }

    #[test]
    fn test_dedup_can_be_disabled() {
        let fx = fixture();
        let mut session = fx.session.with_dedup(DedupPolicy::disabled()).unwrap();
        let txn = Transaction::new(march(1), fx.cash, 1.0, fx.usd, fx.merchant);
        session.write(txn.clone(), fx.report).unwrap();
        session.write(txn, fx.report).unwrap();
        assert_eq!(session.store().unwrap().count("transactions").unwrap(), 2);
    }

    #[test]
    fn test_find_all_by_receiver() {
        let mut fx = fixture();
        let import = fx.session.create_report(Report::new("import")).unwrap();
        let txn = Transaction::new(march(1), fx.cash, 42.50, fx.usd, fx.merchant);
        let written = fx.session.write(txn, import).unwrap();

        let merchant = fx.session.find_by_name::<Account>("merchant").unwrap();
        let found = fx
            .session
            .find_all::<Transaction>(&[("receiver", Value::from(merchant))])
            .unwrap();
        assert!(found.contains(&written));
        let txn = fx.session.get(written).unwrap();
        assert_eq!(txn.amount().unwrap(), 42.50);

        let by_report = fx
            .session
            .find_all::<Transaction>(&[("report", Value::from(import))])
            .unwrap();
        assert_eq!(by_report, vec![written]);
        assert!(fx
            .session
            .find_all::<Transaction>(&[("merchant", Value::from("x"))])
            .is_err());
    }

    #[test]
    fn test_find_all_by_receiver_name() {
        let mut fx = fixture();
        let import = fx.session.create_report(Report::new("import")).unwrap();
        let txn = Transaction::new(march(1), fx.cash, 42.50, fx.usd, fx.merchant);
        let written = fx.session.write(txn, import).unwrap();

        let found = fx
            .session
            .find_all::<Transaction>(&[("receiver", Value::from("merchant"))])
            .unwrap();
        assert_eq!(found, vec![written]);
        assert_eq!(fx.session.get(found[0]).unwrap().amount().unwrap(), 42.50);

        assert!(matches!(
            fx.session.find_all::<Transaction>(&[("receiver", Value::from("nobody"))]),
            Err(RecordError::NotFound { entity: "Account", .. })
        ));
        assert!(matches!(
            fx.session.find_all::<Transaction>(&[("unit", Value::Real(1.0))]),
            Err(RecordError::Schema(_))
        ));
        assert!(matches!(
            fx.session.find_all::<Transaction>(&[("report", Value::from("import"))]),
            Err(RecordError::Schema(_))
        ));
        println!("✅ find_all by receiver name test PASSED");
    }

    #[test]
    fn test_update_with_revision() {
        let mut fx = fixture();
        let correction = fx.session.create_report(Report::new("correction")).unwrap();
        let loaded = fx.session.get(fx.cash).unwrap();
        let revised = loaded
            .revise(|draft| draft.set_description("petty cash"))
            .unwrap();
        let handle = fx.session.update(revised, correction).unwrap();
        assert_eq!(handle, fx.cash);

        fx.session.clear_all_caches();
        let stub = fx.session.find::<Account>(fx.cash.key());
        let account = fx.session.get(stub).unwrap();
        assert_eq!(account.description(), Some("petty cash"));
        assert_eq!(account.meta().report(), Some(correction.key()));
        assert_eq!(fx.session.stats().updates, 1);
    }

    #[test]
    fn test_batch_commit_summary() {
        let mut fx = fixture();
        let tag = fx.session.write(crate::entities::Tag::new("food"), fx.report).unwrap();

        let mut batch = Batch::new(Report::new("import"));
        let mut lunch = Transaction::new(march(3), fx.cash, 12.0, fx.usd, fx.merchant);
        lunch.add_tag(&tag).unwrap();
        batch.push(lunch.clone());
        batch.push(lunch);
        batch.push(Statement::new(march(31), fx.cash, 88.0, fx.usd));
        assert_eq!(batch.count(EntityKind::Transaction), 2);

        let summary = fx.session.commit(batch).unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.deduplicated, 1);
        assert_eq!(summary.updated, 0);
        assert_eq!(fx.session.get(summary.report).unwrap().category().unwrap(), "import");
        assert_eq!(fx.session.store().unwrap().count("transaction_tags").unwrap(), 1);
    }

    #[test]
    fn test_failed_transaction_evicts_written_entities() {
        let mut fx = fixture();
        let mut written = None;
        let result: Result<()> = fx.session.in_transaction(|session| {
            written = Some(session.write(Account::new("ghost", "bank", "me"), fx.report)?);
            Err(RecordError::Config("abort".to_string()))
        });
        assert!(result.is_err());

        let ghost = written.unwrap();
        assert!(!fx.session.is_loaded(ghost));
        assert!(matches!(
            fx.session.get(ghost),
            Err(RecordError::NotFound { .. })
        ));
        assert!(fx.session.find_by_name::<Account>("ghost").is_err());
        assert!(!fx.session.store().unwrap().in_transaction());
    }

    #[test]
    fn test_clear_cache_reuses_slots() {
        let mut fx = fixture();
        let before = fx.session.find::<Asset>(fx.usd.key());
        assert_eq!(fx.session.cached(EntityKind::Asset), 1);
        let arena = fx.session.slots.len();

        for _ in 0..5 {
            fx.session.clear_cache(EntityKind::Asset);
            assert_eq!(fx.session.cached(EntityKind::Asset), 0);
            let usd = fx.session.find::<Asset>(fx.usd.key());
            assert_eq!(fx.session.get(usd).unwrap().name().unwrap(), "usd");
        }
        assert_eq!(fx.session.slots.len(), arena);

        // a stale handle still loads by key
        assert_eq!(fx.session.get(before).unwrap().name().unwrap(), "usd");
        assert_eq!(fx.session.cached(EntityKind::Asset), 1);
    }

    #[test]
    fn test_clear_all_caches_empties_arena() {
        let mut fx = fixture();
        fx.session.clear_all_caches();
        assert!(fx.session.slots.is_empty());
        assert_eq!(fx.session.get(fx.cash).unwrap().name().unwrap(), "cash");
        assert_eq!(fx.session.slots.len(), 1);
    }

    #[test]
    fn test_describe_renders_fields() {
        let mut fx = fixture();
        let mut txn = Transaction::new(march(1), fx.cash, 42.5, fx.usd, fx.merchant);
        txn.set_description("lunch").unwrap();
        let handle = fx.session.write(txn, fx.report).unwrap();

        let json = fx.session.describe(handle).unwrap();
        assert_eq!(json["id"], serde_json::json!(handle.key()));
        assert_eq!(json["date"], serde_json::json!("2024-03-01"));
        assert_eq!(json["amount"], serde_json::json!(42.5));
        assert_eq!(json["receiver"], serde_json::json!(fx.merchant.key()));
        assert_eq!(json["description"], serde_json::json!("lunch"));
        assert!(json["reference"].is_null());
        assert_eq!(json["report"], serde_json::json!(fx.report.key()));
    }
}

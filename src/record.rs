// 🔑 Record capabilities - handles, lazy references, per-record metadata
//
// Capabilities are independent traits composed per entity type:
// - Entity:   codec + metadata (every type)
// - Owned:    written under an owning Report (everything but Report)
// - Named:    unique name, find-by-name
// - Taggable: many-to-many with Tag
// - Linkable: undirected same-type links

use crate::entities::Tag;
use crate::error::{RecordError, Result};
use crate::schema::EntityKind;
use crate::session::Session;
use crate::value::{Key, RowReader, RowWriter, Value};
use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

// ============================================================================
// HANDLE
// ============================================================================

/// Identity of one live cached instance inside a `Session`
///
/// Two handles compare equal exactly when they point at the same cache slot,
/// so `session.find::<T>(k) == session.find::<T>(k)` holds for any key.
pub struct Handle<T> {
    slot: usize,
    key: Key,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(slot: usize, key: Key) -> Self {
        Handle {
            slot,
            key,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.key == other.key
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.key.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle(#{} @{})", self.key, self.slot)
    }
}

impl<T> From<Handle<T>> for Value {
    fn from(handle: Handle<T>) -> Self {
        Value::Integer(handle.key)
    }
}

impl<T> From<&Handle<T>> for Value {
    fn from(handle: &Handle<T>) -> Self {
        Value::Integer(handle.key)
    }
}

// ============================================================================
// LAZY REFERENCE FIELD
// ============================================================================

/// Reference-typed field: raw foreign key until first `resolve`, then a
/// memoized handle into the session's identity cache
pub struct RefField<T> {
    owner: &'static str,
    field: &'static str,
    key: Option<Key>,
    resolved: Cell<Option<Handle<T>>>,
}

impl<T: Entity> RefField<T> {
    pub fn unset(owner: &'static str, field: &'static str) -> Self {
        RefField {
            owner,
            field,
            key: None,
            resolved: Cell::new(None),
        }
    }

    pub fn from_key(owner: &'static str, field: &'static str, key: Option<Key>) -> Self {
        RefField {
            owner,
            field,
            key,
            resolved: Cell::new(None),
        }
    }

    pub fn from_handle(owner: &'static str, field: &'static str, handle: Handle<T>) -> Self {
        RefField {
            owner,
            field,
            key: Some(handle.key()),
            resolved: Cell::new(Some(handle)),
        }
    }

    pub fn key(&self) -> Option<Key> {
        self.key
    }

    pub fn is_set(&self) -> bool {
        self.key.is_some()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// Handle for the referenced entity, reusing the cached instance when present
    pub fn resolve(&self, session: &mut Session) -> Result<Handle<T>> {
        self.try_resolve(session).ok_or(RecordError::FieldUnset {
            entity: self.owner,
            field: self.field,
        })
    }

    /// Like `resolve`, but `None` for an unset optional reference
    pub fn try_resolve(&self, session: &mut Session) -> Option<Handle<T>> {
        if let Some(handle) = self.resolved.get() {
            return Some(handle);
        }
        let handle = session.find::<T>(self.key?);
        self.resolved.set(Some(handle));
        Some(handle)
    }
}

impl<T> Clone for RefField<T> {
    fn clone(&self) -> Self {
        RefField {
            owner: self.owner,
            field: self.field,
            key: self.key,
            resolved: Cell::new(self.resolved.get()),
        }
    }
}

impl<T> fmt::Debug for RefField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            Some(key) => write!(f, "#{}", key),
            None => write!(f, "-"),
        }
    }
}

impl<T> PartialEq for RefField<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

// ============================================================================
// RECORD METADATA
// ============================================================================

/// Link requested on an entity before it is written
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLink {
    pub other: Key,
    pub category: Option<String>,
}

/// Storage state carried by every entity value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordMeta {
    key: Option<Key>,
    report: Option<Key>,
    pending_tags: Vec<Key>,
    pending_links: Vec<PendingLink>,
}

impl RecordMeta {
    pub fn unsaved() -> Self {
        RecordMeta::default()
    }

    pub fn stored(key: Key, report: Option<Key>) -> Self {
        RecordMeta {
            key: Some(key),
            report,
            ..RecordMeta::default()
        }
    }

    pub fn key(&self) -> Option<Key> {
        self.key
    }

    /// Key of the owning report (None for unsaved entities and for reports)
    pub fn report(&self) -> Option<Key> {
        self.report
    }

    pub fn is_saved(&self) -> bool {
        self.key.is_some()
    }

    pub fn pending_tags(&self) -> &[Key] {
        &self.pending_tags
    }

    pub fn pending_links(&self) -> &[PendingLink] {
        &self.pending_links
    }

    /// Content fields are only settable while the entity has no key
    pub fn ensure_mutable(&self, entity: &'static str, field: &'static str) -> Result<()> {
        match self.key {
            Some(key) => Err(RecordError::AlreadyLoadedImmutable { entity, field, key }),
            None => Ok(()),
        }
    }

    pub(crate) fn assign(&mut self, key: Key, report: Option<Key>) {
        self.key = Some(key);
        self.report = report;
    }

    pub(crate) fn take_key(&mut self) -> Option<Key> {
        self.key.take()
    }

    pub(crate) fn restore_key(&mut self, key: Option<Key>) {
        self.key = key;
    }

    pub(crate) fn take_pending(&mut self) -> (Vec<Key>, Vec<PendingLink>) {
        (
            std::mem::take(&mut self.pending_tags),
            std::mem::take(&mut self.pending_links),
        )
    }

    fn push_tag(&mut self, tag: Key) {
        if !self.pending_tags.contains(&tag) {
            self.pending_tags.push(tag);
        }
    }

    fn push_link(&mut self, link: PendingLink) {
        if !self.pending_links.contains(&link) {
            self.pending_links.push(link);
        }
    }
}

// ============================================================================
// CAPABILITIES
// ============================================================================

pub trait Entity: Clone + fmt::Debug + 'static {
    const KIND: EntityKind;

    fn meta(&self) -> &RecordMeta;

    fn meta_mut(&mut self) -> &mut RecordMeta;

    /// Write every declared content field (keys substituted for references)
    fn encode(&self, row: &mut RowWriter) -> Result<()>;

    fn decode(row: &RowReader) -> Result<Self>;

    fn key(&self) -> Option<Key> {
        self.meta().key()
    }

    fn is_saved(&self) -> bool {
        self.meta().is_saved()
    }

    /// Copy with changed content that keeps the key, for `Session::update`
    fn revise<F>(&self, change: F) -> Result<Self>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let mut draft = self.clone();
        let key = draft.meta_mut().take_key();
        change(&mut draft)?;
        draft.meta_mut().restore_key(key);
        Ok(draft)
    }
}

/// Entities written under an owning Report
pub trait Owned: Entity {}

pub trait Named: Entity {
    fn name(&self) -> Result<&str>;
}

/// Anything that may stand in for a stored `T`
pub trait Persisted<T: Entity> {
    fn persisted_key(&self) -> Option<Key>;
}

impl<T: Entity> Persisted<T> for T {
    fn persisted_key(&self) -> Option<Key> {
        self.key()
    }
}

impl<T: Entity> Persisted<T> for Handle<T> {
    fn persisted_key(&self) -> Option<Key> {
        Some(self.key())
    }
}

pub trait Taggable: Owned {
    /// Queue a tag; flushed as a join row when the entity is written
    fn add_tag<R: Persisted<Tag>>(&mut self, tag: &R) -> Result<()> {
        let key = tag.persisted_key().ok_or_else(|| {
            RecordError::AssociationPrecondition(format!(
                "cannot tag {} with an unsaved Tag",
                Self::KIND
            ))
        })?;
        self.meta_mut().push_tag(key);
        Ok(())
    }

    fn pending_tags(&self) -> &[Key] {
        self.meta().pending_tags()
    }
}

pub trait Linkable: Owned {
    /// Queue a link to a stored entity of the same type
    fn link_to<R: Persisted<Self>>(&mut self, other: &R, category: Option<&str>) -> Result<()> {
        let other = other.persisted_key().ok_or_else(|| {
            RecordError::AssociationPrecondition(format!(
                "cannot link {} to an unsaved record",
                Self::KIND
            ))
        })?;
        self.meta_mut().push_link(PendingLink {
            other,
            category: category.map(str::to_string),
        });
        Ok(())
    }

    fn pending_links(&self) -> &[PendingLink] {
        self.meta().pending_links()
    }
}

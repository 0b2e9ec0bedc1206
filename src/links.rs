// 🔗 Link Graph Manager
//
// Undirected links between two entities of the same type (e.g. both sides of
// a transfer seen on two account exports). Each link row stores its
// endpoints in ascending key order, so a pair has one row no matter which
// side asked for it. A cluster is the connected component reachable from an
// entity, walked breadth-first with an explicit visited set.

use crate::entities::Report;
use crate::error::{RecordError, Result};
use crate::record::{Handle, Linkable, PendingLink, Persisted};
use crate::schema::EntityKind;
use crate::session::Session;
use crate::value::Key;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// One stored link, endpoints in ascending key order
#[derive(Debug, Clone)]
pub struct Link<T> {
    pub id: Key,
    pub left: Handle<T>,
    pub right: Handle<T>,
    pub category: Option<String>,
    pub report: Handle<Report>,
}

impl<T> Link<T> {
    /// Endpoint opposite to `from`
    pub fn other(&self, from: Handle<T>) -> Handle<T> {
        if self.left.key() == from.key() {
            self.right
        } else {
            self.left
        }
    }

    pub fn touches(&self, handle: Handle<T>) -> bool {
        self.left.key() == handle.key() || self.right.key() == handle.key()
    }
}

impl Session {
    /// Every link touching `handle`, optionally limited to one category
    pub fn links_of<T: Linkable>(
        &mut self,
        handle: Handle<T>,
        category: Option<&str>,
    ) -> Result<Vec<Link<T>>> {
        let link = self.registry().link(T::KIND)?;
        let rows = self.store()?.select_links(link, handle.key(), category)?;
        self.count_predicate_fetch();
        Ok(rows
            .into_iter()
            .map(|row| Link {
                id: row.id,
                left: self.find(row.left),
                right: self.find(row.right),
                category: row.category,
                report: self.find(row.report),
            })
            .collect())
    }

    /// Connected component containing `handle` (itself first, each member once).
    /// `None` follows links of every category.
    pub fn cluster<T: Linkable>(
        &mut self,
        handle: Handle<T>,
        category: Option<&str>,
    ) -> Result<Vec<Handle<T>>> {
        let keys = cluster_keys(self, T::KIND, handle.key(), category)?;
        Ok(keys.into_iter().map(|key| self.find(key)).collect())
    }

    /// Link `handle` to each of `others` under `report`, skipping members of
    /// its current cluster. Returns the newly linked entities.
    pub fn add_links<T, R>(
        &mut self,
        report: Handle<Report>,
        handle: Handle<T>,
        others: &[R],
        category: Option<&str>,
    ) -> Result<Vec<Handle<T>>>
    where
        T: Linkable,
        R: Persisted<T>,
    {
        let keys = others
            .iter()
            .map(|other| {
                other.persisted_key().ok_or_else(|| {
                    RecordError::AssociationPrecondition(format!(
                        "cannot link {} #{} to an unsaved record",
                        T::KIND,
                        handle.key()
                    ))
                })
            })
            .collect::<Result<Vec<Key>>>()?;

        let added = self.in_transaction(|session| {
            connect(session, T::KIND, handle.key(), &keys, category, report.key())
        })?;
        Ok(added.into_iter().map(|key| self.find(key)).collect())
    }
}

impl Session {
    /// Write `report` and add the links under it in one store transaction;
    /// a rejected endpoint leaves no report behind
    pub fn link_in_report<T, R>(
        &mut self,
        report: Report,
        handle: Handle<T>,
        others: &[R],
        category: Option<&str>,
    ) -> Result<(Handle<Report>, Vec<Handle<T>>)>
    where
        T: Linkable,
        R: Persisted<T>,
    {
        self.in_transaction(|session| {
            let report = session.create_report(report)?;
            let added = session.add_links(report, handle, others, category)?;
            Ok((report, added))
        })
    }
}

fn cluster_keys(
    session: &Session,
    kind: EntityKind,
    start: Key,
    category: Option<&str>,
) -> Result<Vec<Key>> {
    let link = session.registry().link(kind)?;
    let store = session.store()?;

    let mut visited = HashSet::from([start]);
    let mut members = vec![start];
    let mut queue = VecDeque::from([start]);

    while let Some(current) = queue.pop_front() {
        for row in store.select_links(link, current, category)? {
            let other = if row.left == current { row.right } else { row.left };
            if visited.insert(other) {
                members.push(other);
                queue.push_back(other);
            }
        }
    }
    Ok(members)
}

fn connect(
    session: &mut Session,
    kind: EntityKind,
    key: Key,
    others: &[Key],
    category: Option<&str>,
    report: Key,
) -> Result<Vec<Key>> {
    let link = session.registry().link(kind)?;
    let mut members: HashSet<Key> = cluster_keys(session, kind, key, category)?
        .into_iter()
        .collect();

    let mut added = Vec::new();
    for &other in others {
        if !members.insert(other) {
            continue;
        }
        session.store()?.insert_link(link, key, other, category, report)?;
        added.push(other);
    }
    if !added.is_empty() {
        debug!(kind = %kind, key, added = added.len(), category, "linked");
    }
    Ok(added)
}

/// Store links queued on an entity before it was written, grouped by category
pub(crate) fn flush(
    session: &mut Session,
    kind: EntityKind,
    key: Key,
    links: Vec<PendingLink>,
    report: Key,
) -> Result<()> {
    let mut groups: Vec<(Option<String>, Vec<Key>)> = Vec::new();
    for link in links {
        match groups.iter_mut().find(|(category, _)| *category == link.category) {
            Some((_, others)) => others.push(link.other),
            None => groups.push((link.category, vec![link.other])),
        }
    }
    for (category, others) in groups {
        connect(session, kind, key, &others, category.as_deref(), report)?;
    }
    Ok(())
}

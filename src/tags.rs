// 🏷️ Tag Association Manager
//
// Many-to-many rows between a taggable entity and Tag, each owned by the
// report that added it. Persisted tag keys are fetched once per entity and
// kept in its identity-map slot; later additions extend that list in place.

use crate::entities::{Report, Tag};
use crate::error::{RecordError, Result};
use crate::record::{Entity, Handle, Persisted, Taggable};
use crate::schema::EntityKind;
use crate::session::Session;
use crate::value::Key;
use tracing::debug;

impl Session {
    /// Persisted tags of `entity` followed by its pending (unflushed) ones
    pub fn tags<T: Taggable>(&mut self, entity: &T) -> Result<Vec<Handle<Tag>>> {
        let mut keys = match entity.key() {
            Some(key) => persisted_tags(self, T::KIND, key)?,
            None => Vec::new(),
        };
        for tag in entity.pending_tags() {
            if !keys.contains(tag) {
                keys.push(*tag);
            }
        }
        Ok(keys.into_iter().map(|key| self.find::<Tag>(key)).collect())
    }

    /// Tags stored for a handle
    pub fn tags_of<T: Taggable>(&mut self, handle: Handle<T>) -> Result<Vec<Handle<Tag>>> {
        let keys = persisted_tags(self, T::KIND, handle.key())?;
        Ok(keys.into_iter().map(|key| self.find::<Tag>(key)).collect())
    }

    /// Associate stored tags with a stored entity under `report`.
    /// Tags already present are skipped; returns the ones actually added.
    pub fn add_tags<T, R>(
        &mut self,
        report: Handle<Report>,
        handle: Handle<T>,
        tags: &[R],
    ) -> Result<Vec<Handle<Tag>>>
    where
        T: Taggable,
        R: Persisted<Tag>,
    {
        let keys = tags
            .iter()
            .map(|tag| {
                tag.persisted_key().ok_or_else(|| {
                    RecordError::AssociationPrecondition(format!(
                        "cannot tag {} #{} with an unsaved Tag",
                        T::KIND,
                        handle.key()
                    ))
                })
            })
            .collect::<Result<Vec<Key>>>()?;

        let added = self.in_transaction(|session| {
            flush(session, T::KIND, handle.key(), &keys, report.key())
        })?;
        Ok(added.into_iter().map(|key| self.find::<Tag>(key)).collect())
    }
}

impl Session {
    /// Write `report` and add the tags under it in one store transaction;
    /// a rejected tag leaves no report behind
    pub fn tag_in_report<T, R>(
        &mut self,
        report: Report,
        handle: Handle<T>,
        tags: &[R],
    ) -> Result<(Handle<Report>, Vec<Handle<Tag>>)>
    where
        T: Taggable,
        R: Persisted<Tag>,
    {
        self.in_transaction(|session| {
            let report = session.create_report(report)?;
            let added = session.add_tags(report, handle, tags)?;
            Ok((report, added))
        })
    }
}

fn persisted_tags(session: &mut Session, kind: EntityKind, key: Key) -> Result<Vec<Key>> {
    let slot = session.slot_for(kind, key);
    if let Some(tags) = session.cached_tags(slot) {
        return Ok(tags.to_vec());
    }
    let join = session.registry().tag_join(kind)?;
    let tags = session.store()?.select_tag_keys(join, key)?;
    session.count_predicate_fetch();
    session.cache_tags(slot, tags.clone(), false);
    Ok(tags)
}

/// Insert join rows for tags not yet associated; returns the added tag keys
pub(crate) fn flush(
    session: &mut Session,
    kind: EntityKind,
    key: Key,
    tags: &[Key],
    report: Key,
) -> Result<Vec<Key>> {
    let join = session.registry().tag_join(kind)?;
    let mut current = persisted_tags(session, kind, key)?;
    let mut added = Vec::new();

    for &tag in tags {
        if current.contains(&tag) {
            continue;
        }
        if session.store()?.insert_tag(join, key, tag, report)? {
            added.push(tag);
        }
        current.push(tag);
    }

    if !added.is_empty() {
        let slot = session.slot_for(kind, key);
        session.cache_tags(slot, current, true);
        debug!(kind = %kind, key, added = added.len(), "tagged");
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Account, Asset, Transaction};
    use chrono::NaiveDate;

    fn setup() -> (Session, Handle<Report>, Handle<Transaction>, Handle<Tag>, Handle<Tag>) {
        let mut session = Session::open_in_memory().unwrap();
        let report = session.create_report(Report::new("setup")).unwrap();
        let cash = session.write(Account::new("cash", "wallet", "me"), report).unwrap();
        let shop = session.write(Account::new("shop", "merchant", "them"), report).unwrap();
        let usd = session.write(Asset::new("usd", "currency"), report).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let txn = session
            .write(Transaction::new(date, cash, 5.0, usd, shop), report)
            .unwrap();
        let food = session.write(Tag::new("food"), report).unwrap();
        let travel = session.write(Tag::new("travel"), report).unwrap();
        (session, report, txn, food, travel)
    }

    #[test]
    fn test_add_tags_is_idempotent() {
        let (mut session, report, txn, food, _) = setup();
        let added = session.add_tags(report, txn, &[food]).unwrap();
        assert_eq!(added, vec![food]);
        let again = session.add_tags(report, txn, &[food]).unwrap();
        assert!(again.is_empty());

        assert_eq!(session.store().unwrap().count("transaction_tags").unwrap(), 1);
        assert_eq!(session.tags_of(txn).unwrap(), vec![food]);
        println!("✅ Tag idempotence test PASSED");
    }

    #[test]
    fn test_persisted_tags_fetched_once() {
        let (mut session, report, txn, food, travel) = setup();
        session.add_tags(report, txn, &[food, travel]).unwrap();
        session.clear_all_caches();
        session.reset_stats();

        let first = session.tags_of(txn).unwrap();
        let second = session.tags_of(txn).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(session.stats().predicate_fetches, 1);
    }

    #[test]
    fn test_tags_union_persisted_and_pending() {
        let (mut session, report, txn, food, travel) = setup();
        session.add_tags(report, txn, &[food]).unwrap();

        let stored = session.get(txn).unwrap();
        let mut draft = stored.revise(|draft| draft.add_tag(&travel)).unwrap();
        draft.add_tag(&food).unwrap();
        let tags = session.tags(&draft).unwrap();
        assert_eq!(tags, vec![food, travel]);
    }

    #[test]
    fn test_unsaved_tag_is_rejected() {
        let (mut session, report, txn, _, _) = setup();
        let result = session.add_tags(report, txn, &[Tag::new("unsaved")]);
        assert!(matches!(result, Err(RecordError::AssociationPrecondition(_))));
        assert_eq!(session.store().unwrap().count("transaction_tags").unwrap(), 0);
    }

    #[test]
    fn test_untaggable_kind_has_no_join() {
        let (mut session, _, _, _, _) = setup();
        assert!(session.registry().tag_join(EntityKind::Asset).is_err());
        assert!(flush(&mut session, EntityKind::Asset, 1, &[1], 1).is_err());
    }

    #[test]
    fn test_tag_in_report_rolls_back_report() {
        let (mut session, _, txn, food, _) = setup();
        let reports = session.store().unwrap().count("reports").unwrap();

        let (report, added) = session.tag_in_report(Report::new("tag"), txn, &[food]).unwrap();
        assert_eq!(added, vec![food]);
        assert_eq!(session.get(report).unwrap().category().unwrap(), "tag");

        let err = session
            .tag_in_report(Report::new("tag"), txn, &[Tag::new("unsaved")])
            .unwrap_err();
        assert!(matches!(err, RecordError::AssociationPrecondition(_)));
        assert_eq!(session.store().unwrap().count("reports").unwrap(), reports + 1);
    }
}

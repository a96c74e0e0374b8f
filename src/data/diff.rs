//! Full-snapshot set difference.

use super::models::AssetRecord;
use std::collections::{HashMap, HashSet};

/// How an incoming snapshot differs from persisted rows.
#[derive(Debug)]
pub struct SnapshotDiff<'a> {
    /// Persisted ids absent from the snapshot, sorted.
    pub deleted: Vec<String>,
    /// Snapshot rows that are new or whose content changed, in snapshot order.
    pub changed: Vec<&'a AssetRecord>,
    pub unchanged: usize,
}

impl SnapshotDiff<'_> {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.changed.is_empty()
    }
}

/// Compare `incoming` against `persisted` on every column but the watermark.
///
/// Persisted rows whose id is in `retained` are never deleted, even when
/// absent from `incoming`. Upstream still lists them but their record could
/// not be validated.
///
/// `incoming` is expected to hold unique ids; see
/// [`dedupe_by_id`](crate::sync::normalize::dedupe_by_id).
pub fn diff_snapshot<'a>(
    persisted: &[AssetRecord],
    incoming: &'a [AssetRecord],
    retained: &[String],
) -> SnapshotDiff<'a> {
    let by_id: HashMap<&str, &AssetRecord> =
        persisted.iter().map(|row| (row.id.as_str(), row)).collect();
    let keep: HashSet<&str> = incoming
        .iter()
        .map(|row| row.id.as_str())
        .chain(retained.iter().map(String::as_str))
        .collect();

    let mut deleted: Vec<String> = persisted
        .iter()
        .filter(|row| !keep.contains(row.id.as_str()))
        .map(|row| row.id.clone())
        .collect();
    deleted.sort();

    let mut changed = Vec::new();
    let mut unchanged = 0;
    for row in incoming {
        match by_id.get(row.id.as_str()) {
            Some(existing) if existing.content() == row.content() => unchanged += 1,
            _ => changed.push(row),
        }
    }

    SnapshotDiff {
        deleted,
        changed,
        unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};

    fn asset(id: &str, a: &str) -> AssetRecord {
        AssetRecord {
            id: id.to_owned(),
            itemname: Some(a.to_owned()),
            description: None,
            serial: None,
            manufacturer: None,
            model: None,
            itemclass: None,
            itemtype: None,
            owner: None,
            lastseenlocation: None,
            lastseenperson: None,
            lastseentime: None,
            precinct: None,
            updated_on: Utc::now(),
        }
    }

    fn ids(rows: &[&AssetRecord]) -> Vec<String> {
        rows.iter().map(|r| r.id.clone()).collect()
    }

    /// Apply a diff the way the store does: delete, then upsert changed rows.
    fn apply(persisted: &[AssetRecord], diff: &SnapshotDiff<'_>) -> Vec<AssetRecord> {
        let mut rows: HashMap<String, AssetRecord> = persisted
            .iter()
            .filter(|r| !diff.deleted.contains(&r.id))
            .map(|r| (r.id.clone(), r.clone()))
            .collect();
        for row in &diff.changed {
            rows.insert(row.id.clone(), (*row).clone());
        }
        let mut out: Vec<_> = rows.into_values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    #[test]
    fn deletes_missing_upserts_new_leaves_unchanged() {
        let old_stamp = Utc::now() - TimeDelta::days(1);
        let mut persisted = vec![asset("id1", "1"), asset("id2", "2")];
        for row in &mut persisted {
            row.updated_on = old_stamp;
        }
        let incoming = vec![asset("id1", "1"), asset("id3", "3")];

        let diff = diff_snapshot(&persisted, &incoming, &[]);
        assert_eq!(diff.deleted, vec!["id2"]);
        assert_eq!(ids(&diff.changed), vec!["id3"]);
        assert_eq!(diff.unchanged, 1);

        let result = apply(&persisted, &diff);
        assert_eq!(
            result.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["id1", "id3"]
        );
        // id1 kept its old watermark
        assert_eq!(result[0].updated_on, old_stamp);
    }

    #[test]
    fn changed_content_is_upserted() {
        let persisted = vec![asset("id1", "before")];
        let incoming = vec![asset("id1", "after")];
        let diff = diff_snapshot(&persisted, &incoming, &[]);
        assert!(diff.deleted.is_empty());
        assert_eq!(ids(&diff.changed), vec!["id1"]);
    }

    #[test]
    fn second_pass_with_same_snapshot_is_empty() {
        let persisted = vec![asset("a", "1"), asset("b", "2"), asset("c", "3")];
        let incoming = vec![asset("b", "2"), asset("c", "changed"), asset("d", "4")];

        let first = diff_snapshot(&persisted, &incoming, &[]);
        assert!(!first.is_empty());
        let after_first = apply(&persisted, &first);

        let second = diff_snapshot(&after_first, &incoming, &[]);
        assert!(second.is_empty(), "{second:?}");
        assert_eq!(second.unchanged, incoming.len());
    }

    #[test]
    fn round_trip_matches_snapshot_for_generated_sets() {
        // Sweep persisted/incoming overlaps: result must equal the snapshot
        // (ignoring watermark) and deletions must equal |P - S|.
        for n_persisted in 0..6usize {
            for n_incoming in 0..6usize {
                for shift in 0..3usize {
                    let persisted: Vec<_> = (0..n_persisted)
                        .map(|i| asset(&format!("id{i}"), &format!("v{i}")))
                        .collect();
                    let incoming: Vec<_> = (shift..shift + n_incoming)
                        .map(|i| asset(&format!("id{i}"), &format!("v{}", i % 2 + i)))
                        .collect();

                    let diff = diff_snapshot(&persisted, &incoming, &[]);
                    let expected_deleted = persisted
                        .iter()
                        .filter(|p| !incoming.iter().any(|s| s.id == p.id))
                        .count();
                    assert_eq!(diff.deleted.len(), expected_deleted);

                    let result = apply(&persisted, &diff);
                    let mut expected: Vec<_> =
                        incoming.iter().map(|r| r.content()).collect();
                    expected.sort_by(|a, b| a.id.cmp(b.id));
                    let got: Vec<_> = result.iter().map(|r| r.content()).collect();
                    assert_eq!(got, expected);

                    // Only rows whose content differed were rewritten
                    for row in &diff.changed {
                        let before = persisted.iter().find(|p| p.id == row.id);
                        assert!(before.is_none_or(|p| p.content() != row.content()));
                    }
                }
            }
        }
    }

    #[test]
    fn empty_snapshot_deletes_everything() {
        let persisted = vec![asset("b", "2"), asset("a", "1")];
        let diff = diff_snapshot(&persisted, &[], &[]);
        assert_eq!(diff.deleted, vec!["a", "b"]);
        assert!(diff.changed.is_empty());
    }

    #[test]
    fn retained_ids_are_not_deleted() {
        let persisted = vec![asset("a", "1"), asset("b", "2"), asset("c", "3")];
        let incoming = vec![asset("a", "1")];
        let diff = diff_snapshot(&persisted, &incoming, &["b".to_owned()]);
        assert_eq!(diff.deleted, vec!["c"]);
        assert!(diff.changed.is_empty());
        assert_eq!(diff.unchanged, 1);
    }

    #[test]
    fn retained_id_without_persisted_row_is_ignored() {
        let diff = diff_snapshot(&[], &[], &["ghost".to_owned()]);
        assert!(diff.is_empty());
    }
}

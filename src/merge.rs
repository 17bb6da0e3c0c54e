//! Combines two consecutive deltas into one.

use std::collections::BTreeMap;

use crate::block::{Block, DeltaHeader};
use crate::delta::Delta;
use crate::error::{FeedError, Result};
use crate::ids::{IdStore, Namespace};
use crate::model::{merge_replace, Change, Patchable};
use crate::strings::StringRemap;

/// Checks that `second` starts exactly where `first` ends.
pub fn check_contiguous(first: &DeltaHeader, second: &DeltaHeader) -> Result<()> {
    let reason = if first.version < second.old_version {
        "versions in between are not covered"
    } else if first.old_version >= second.old_version {
        "the second delta already covers the first"
    } else if first.version > second.old_version {
        "the deltas overlap"
    } else {
        return Ok(());
    };
    Err(FeedError::NonContiguousMerge {
        first_old: first.old_version,
        first_new: first.version,
        second_old: second.old_version,
        second_new: second.version,
        reason,
    })
}

/// Returns a delta from `first`'s old version to `second`'s version.
pub fn merge(first: &mut Delta, second: &mut Delta) -> Result<Delta> {
    check_contiguous(&first.header, &second.header)?;
    if first.header.schema_version != second.header.schema_version {
        return Err(FeedError::SchemaMismatch {
            expected: first.header.schema_version,
            found: second.header.schema_version,
        });
    }
    log::info!(
        "Merging deltas {} -> {} and {} -> {}...",
        first.header.old_version,
        first.header.version,
        second.header.old_version,
        second.header.version
    );

    let mut header = DeltaHeader::new(
        first.header.old_version,
        second.header.version,
        second.header.date,
    );
    header.schema_version = first.header.schema_version;
    header.compressed = second.header.compressed;
    let mut merged = Delta::new(header);
    merged.strings = first.strings.clone();
    let mut remap = StringRemap::append(&second.strings, &mut merged.strings);
    merged.ids = merge_ids(&first.ids, &second.ids);

    let mut agencies = second.agencies()?.clone();
    remap.remap(Block::Agency, &mut agencies)?;
    merged.set_agencies(merge_changes(first.agencies()?.clone(), agencies));

    let calendar = match (first.calendar()?.clone(), second.calendar()?.clone()) {
        (Some(earlier), Some(later)) => Some(earlier.merge(later)),
        (earlier, None) => earlier,
        (None, later) => later,
    };
    merged.set_calendar(calendar);

    merged.set_shapes(merge_replace(
        first.shapes()?.clone(),
        second.shapes()?.clone(),
    ));

    let mut stops = second.stops()?.clone();
    remap.remap(Block::Stops, &mut stops)?;
    merged.set_stops(merge_changes(first.stops()?.clone(), stops));

    let mut routes = second.routes()?.clone();
    remap.remap(Block::Routes, &mut routes)?;
    merged.set_routes(merge_changes(first.routes()?.clone(), routes));

    merged.set_trips(merge_changes(
        first.trips()?.clone(),
        second.trips()?.clone(),
    ));
    merged.set_transfers(merge_replace(
        first.transfers()?.clone(),
        second.transfers()?.clone(),
    ));
    merged.set_networks(merge_replace(
        first.networks()?.clone(),
        second.networks()?.clone(),
    ));
    merged.set_areas(merge_replace(
        first.areas()?.clone(),
        second.areas()?.clone(),
    ));
    merged.set_fare_links(
        first
            .fare_links()?
            .clone()
            .merge(second.fare_links()?.clone()),
    );
    Ok(merged)
}

/// Ids introduced by either delta, above the first delta's base.
fn merge_ids(first: &IdStore, second: &IdStore) -> IdStore {
    let mut ids = first.clone();
    for namespace in Namespace::ALL {
        let (earlier, later) = (&first[namespace], &second[namespace]);
        // A table the first delta did not store introduced nothing, so its
        // base is the second delta's base.
        if earlier.last_id() <= earlier.delta_skip() && later.delta_skip() > earlier.delta_skip() {
            ids[namespace].set_delta_skip(later.delta_skip());
        }
    }
    ids.extend_from(second);
    ids
}

/// Folds `later` into `earlier` per id. Full records and tombstones in
/// `later` win; a later patch is applied to an earlier record or merged into
/// an earlier patch.
pub fn merge_changes<T: Patchable>(
    earlier: Vec<Change<T, T::Patch>>,
    later: Vec<Change<T, T::Patch>>,
) -> Vec<Change<T, T::Patch>> {
    let mut merged: BTreeMap<u32, Change<T, T::Patch>> =
        earlier.into_iter().map(|c| (c.key(), c)).collect();
    for change in later {
        let id = change.key();
        let combined = match (merged.remove(&id), change) {
            (Some(Change::Put(mut record)), Change::Patch(patch)) => {
                record.apply(&patch);
                Change::Put(record)
            }
            (Some(Change::Patch(mut patch)), Change::Patch(later_patch)) => {
                T::merge_patches(&mut patch, later_patch);
                Change::Patch(patch)
            }
            (Some(Change::Delete(_)), Change::Patch(_)) => {
                log::warn!("Dropping patch for deleted id {}", id);
                Change::Delete(id)
            }
            (_, change) => change,
        };
        merged.insert(id, combined);
    }
    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Replace, Stop, StopPatch, Transfer, TransferKey};

    fn header(old_version: u32, version: u32) -> DeltaHeader {
        DeltaHeader::new(old_version, version, 20240301 + version)
    }

    #[test]
    fn test_contiguity() {
        assert!(check_contiguous(&header(1, 2), &header(2, 3)).is_ok());
        for (first, second, reason) in [
            (header(1, 2), header(3, 4), "versions in between are not covered"),
            (header(2, 3), header(1, 4), "the second delta already covers the first"),
            (header(2, 3), header(2, 4), "the second delta already covers the first"),
            (header(1, 3), header(2, 4), "the deltas overlap"),
        ] {
            match check_contiguous(&first, &second) {
                Err(FeedError::NonContiguousMerge { reason: found, .. }) => assert_eq!(found, reason),
                other => panic!("expected a contiguity error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_change_precedence() {
        let stop = |stop_id: u32, code: &str| Stop {
            stop_id,
            code: code.into(),
            ..Stop::default()
        };
        let patch = |stop_id: u32, code: Option<&str>, desc: Option<&str>| StopPatch {
            stop_id,
            code: code.map(str::to_string),
            desc: desc.map(str::to_string),
            ..StopPatch::default()
        };
        let earlier = vec![
            Change::Put(stop(1, "a")),
            Change::Patch(patch(2, Some("b"), Some("old"))),
            Change::Delete(3),
            Change::Patch(patch(4, Some("d"), None)),
            Change::Put(stop(6, "f")),
        ];
        let later = vec![
            Change::Patch(patch(1, Some("a2"), None)),
            Change::Patch(patch(2, None, Some("new"))),
            Change::Patch(patch(3, Some("c"), None)),
            Change::Delete(4),
            Change::Put(stop(5, "e")),
        ];
        let merged = merge_changes(earlier, later);
        assert_eq!(
            merged,
            vec![
                Change::Put(stop(1, "a2")),
                Change::Patch(patch(2, Some("b"), Some("new"))),
                Change::Delete(3),
                Change::Delete(4),
                Change::Put(stop(5, "e")),
                Change::Put(stop(6, "f")),
            ]
        );
    }

    #[test]
    fn test_second_delta_ids_are_carried() {
        let mut first = Delta::new(header(1, 2));
        first.ids[Namespace::Stop].insert(4, "S4");
        first.ids[Namespace::Stop].set_delta_skip(3);
        let mut second = Delta::new(header(2, 3));
        second.ids[Namespace::Stop].insert(5, "S5");
        second.ids[Namespace::Stop].set_delta_skip(4);
        second.ids[Namespace::Trip].insert(8, "T8");
        second.ids[Namespace::Trip].set_delta_skip(7);

        let merged = merge(&mut first, &mut second).unwrap();
        let stops = &merged.ids[Namespace::Stop];
        assert_eq!(stops.delta_skip(), 3);
        assert_eq!(stops.to_list(), vec!["S4".to_string(), "S5".to_string()]);
        let trips = &merged.ids[Namespace::Trip];
        assert_eq!(trips.delta_skip(), 7);
        assert_eq!(trips.get("T8").unwrap(), 8);
        assert_eq!(merged.header.old_version, 1);
        assert_eq!(merged.header.version, 3);
    }

    #[test]
    fn test_second_strings_are_rehomed() {
        let mut first = Delta::new(header(1, 2));
        first.strings.add("Depot");
        let mut second = Delta::new(header(2, 3));
        let name = second.strings.add("Harbour");
        second.set_stops(vec![Change::Patch(StopPatch {
            stop_id: 2,
            name: Some(name),
            ..StopPatch::default()
        })]);
        let key = TransferKey {
            from_stop: 1,
            to_stop: 2,
            ..TransferKey::default()
        };
        first.set_transfers(vec![Replace::Put(Transfer {
            key,
            ..Transfer::default()
        })]);
        second.set_transfers(vec![Replace::Delete(key)]);

        let mut merged = merge(&mut first, &mut second).unwrap();
        let Change::Patch(patch) = &merged.stops().unwrap()[0] else {
            panic!("expected a patch");
        };
        let name = patch.name.unwrap();
        assert_eq!(merged.strings.resolve(name), "Harbour");
        assert_eq!(merged.strings.index_of("Depot"), Some(1));
        assert_eq!(merged.transfers().unwrap(), &vec![Replace::Delete(key)]);
    }
}

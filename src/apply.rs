//! Applies a [`Delta`] to the snapshot it was computed against.

use std::collections::BTreeMap;

use crate::block::{Block, Header};
use crate::delta::Delta;
use crate::error::{FeedError, Result};
use crate::ids::Namespace;
use crate::model::{
    apply_replace, names_to_records, records_to_names, Change, Keyed, Patchable,
};
use crate::snapshot::Snapshot;
use crate::strings::StringRemap;

/// Returns the snapshot `delta` describes. `base` must be the snapshot at the
/// delta's `old_version`.
pub fn apply(base: &mut Snapshot, delta: &mut Delta) -> Result<Snapshot> {
    if base.header.schema_version != delta.header.schema_version {
        return Err(FeedError::SchemaMismatch {
            expected: base.header.schema_version,
            found: delta.header.schema_version,
        });
    }
    if base.header.version != delta.header.old_version {
        return Err(FeedError::BaseVersionMismatch {
            expected: delta.header.old_version,
            found: base.header.version,
        });
    }
    for namespace in Namespace::ALL {
        let added = &delta.ids[namespace];
        let last_id = base.ids[namespace].last_id();
        if added.last_id() > added.delta_skip() && added.delta_skip() != last_id {
            return Err(FeedError::IdBaseMismatch {
                namespace,
                delta_skip: added.delta_skip(),
                last_id,
            });
        }
    }
    log::info!(
        "Applying delta {} -> {}...",
        delta.header.old_version,
        delta.header.version
    );

    let mut header = Header::new(delta.header.version, delta.header.date);
    header.schema_version = base.header.schema_version;
    header.original_url = base.header.original_url.clone();
    header.compressed = delta.header.compressed;
    let mut result = Snapshot::new(header);
    result.strings = base.strings.clone();
    let mut remap = StringRemap::append(&delta.strings, &mut result.strings);
    result.ids = base.ids.clone();
    result.ids.extend_from(&delta.ids);

    let mut agencies = delta.agencies()?.clone();
    remap.remap(Block::Agency, &mut agencies)?;
    result.set_agencies(apply_changes(base.agencies()?, &agencies));

    let calendar = match delta.calendar()? {
        Some(changes) => changes.apply_to(base.calendar()?)?,
        None => base.calendar()?.clone(),
    };
    result.set_calendar(calendar);

    result.set_shapes(apply_replace(base.shapes()?.clone(), delta.shapes()?));

    let mut stops = delta.stops()?.clone();
    remap.remap(Block::Stops, &mut stops)?;
    result.set_stops(apply_changes(base.stops()?, &stops));

    let mut routes = delta.routes()?.clone();
    remap.remap(Block::Routes, &mut routes)?;
    result.set_routes(apply_changes(base.routes()?, &routes));

    result.set_trips(apply_changes(base.trips()?, delta.trips()?));
    result.set_transfers(apply_replace(base.transfers()?.clone(), delta.transfers()?));
    result.set_networks(records_to_names(apply_replace(
        names_to_records(base.networks()?),
        delta.networks()?,
    )));
    result.set_areas(records_to_names(apply_replace(
        names_to_records(base.areas()?),
        delta.areas()?,
    )));

    let mut fare_links = base.fare_links()?.clone();
    delta.fare_links()?.apply_to(&mut fare_links);
    result.set_fare_links(fare_links);
    Ok(result)
}

/// Applies changes to records sorted by id, returning them sorted by id.
/// Patches for ids the records lack are skipped.
pub fn apply_changes<T: Patchable>(records: &[T], changes: &[Change<T, T::Patch>]) -> Vec<T> {
    let mut by_id: BTreeMap<u32, T> = records.iter().map(|r| (r.key(), r.clone())).collect();
    for change in changes {
        match change {
            Change::Put(record) => {
                by_id.insert(record.key(), record.clone());
            }
            Change::Patch(patch) => match by_id.get_mut(&patch.key()) {
                Some(record) => record.apply(patch),
                None => log::warn!("Skipping patch for unknown id {}", patch.key()),
            },
            Change::Delete(id) => {
                by_id.remove(id);
            }
        }
    }
    by_id.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DeltaHeader;
    use crate::model::{Agency, AgencyPatch, Names, Replace, Stop, StopPatch};

    #[test]
    fn test_apply_changes() {
        let records = vec![
            Agency {
                agency_id: 1,
                name: "Buses".into(),
                ..Agency::default()
            },
            Agency {
                agency_id: 2,
                name: "Trams".into(),
                ..Agency::default()
            },
        ];
        let changes = vec![
            Change::Delete(1),
            Change::Patch(AgencyPatch {
                agency_id: 2,
                phone: Some("555".into()),
                ..AgencyPatch::default()
            }),
            Change::Patch(AgencyPatch {
                agency_id: 9,
                ..AgencyPatch::default()
            }),
            Change::Put(Agency {
                agency_id: 3,
                name: "Ferries".into(),
                ..Agency::default()
            }),
        ];
        let result = apply_changes(&records, &changes);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].name, "Trams");
        assert_eq!(result[0].phone, "555");
        assert_eq!(result[1].agency_id, 3);
    }

    #[test]
    fn test_delta_strings_are_resolved() {
        let mut base = Snapshot::new(Header::new(1, 20240310));
        let name = base.strings.add("Central");
        base.set_stops(vec![Stop {
            stop_id: 1,
            name,
            ..Stop::default()
        }]);
        let mut networks = Names::new();
        networks.insert(1, "City".into());
        base.set_networks(networks);

        let mut delta = Delta::new(DeltaHeader::new(1, 2, 20240311));
        let renamed = delta.strings.add("Central Station");
        delta.set_stops(vec![Change::Patch(StopPatch {
            stop_id: 1,
            name: Some(renamed),
            ..StopPatch::default()
        })]);
        delta.set_networks(vec![Replace::Delete(1)]);

        let mut result = apply(&mut base, &mut delta).unwrap();
        assert_eq!(result.header.version, 2);
        let stop_name = result.stops().unwrap()[0].name;
        assert_eq!(result.strings.resolve(stop_name), "Central Station");
        assert_eq!(result.strings.index_of("Central"), Some(name));
        assert!(result.networks().unwrap().is_empty());
    }

    #[test]
    fn test_wrong_base_version() {
        let mut base = Snapshot::new(Header::new(3, 20240310));
        let mut delta = Delta::new(DeltaHeader::new(1, 2, 20240311));
        assert!(matches!(
            apply(&mut base, &mut delta),
            Err(FeedError::BaseVersionMismatch {
                expected: 1,
                found: 3
            })
        ));
    }

    #[test]
    fn test_delta_ids_must_continue_the_base() {
        let mut base = Snapshot::new(Header::new(1, 20240310));
        base.ids[Namespace::Stop].add("S1");
        let mut delta = Delta::new(DeltaHeader::new(1, 2, 20240311));
        let stops = &mut delta.ids[Namespace::Stop];
        stops.set_delta_skip(40_000);
        stops.add("S9");
        assert!(matches!(
            apply(&mut base, &mut delta),
            Err(FeedError::IdBaseMismatch {
                delta_skip: 40_000,
                last_id: 1,
                ..
            })
        ));
    }
}

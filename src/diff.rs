//! Computes the [`Delta`] that turns one snapshot into the next.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::block::{Block, DeltaHeader};
use crate::codec::calendar::CalendarChanges;
use crate::delta::Delta;
use crate::error::{FeedError, Result};
use crate::ids::Namespace;
use crate::model::{
    diff_replace, names_to_records, Change, FareLinkChanges, Patchable, StringRefs,
};
use crate::snapshot::Snapshot;
use crate::strings::StringTable;

#[derive(Debug, Clone, Copy)]
pub struct DiffOptions {
    /// Calendar differences before yesterday relative to this date are ignored.
    pub today: NaiveDate,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            today: chrono::Local::now().date_naive(),
        }
    }
}

/// Translates string references for a delta.
///
/// Old records are compared against new ones in the new snapshot's string
/// space. Emitted records reference the delta's own table, which starts with
/// every string the new snapshot added, in the new snapshot's order.
struct DeltaStrings {
    old: StringTable,
    new: StringTable,
    out: StringTable,
    /// The new table extends the old one, so old references are valid as-is.
    shared_prefix: bool,
}

impl DeltaStrings {
    fn new(old: &StringTable, new: &StringTable) -> Self {
        let mut out = StringTable::new();
        for s in new.iter().filter(|s| old.index_of(s).is_none()) {
            out.add(s);
        }
        let shared_prefix = new.as_slice().starts_with(old.as_slice());
        Self {
            old: old.clone(),
            new: new.clone(),
            out,
            shared_prefix,
        }
    }

    fn rehome<T: StringRefs>(&self, records: &mut [T]) {
        if self.shared_prefix {
            return;
        }
        for record in records {
            // Strings the new table lacks cannot match any new record.
            record.map_strings(&mut |index| {
                self.new
                    .index_of(self.old.resolve(index))
                    .unwrap_or(u32::MAX)
            });
        }
    }

    fn export<T: StringRefs>(&mut self, records: &mut [T]) {
        let (new, out) = (&self.new, &mut self.out);
        for record in records {
            record.map_strings(&mut |index| out.add(new.resolve(index)));
        }
    }

    /// Patch-or-replace changes, keyed by id, referencing the delta's strings.
    fn changes<T: Patchable>(&mut self, old: &[T], new: &[T]) -> Vec<Change<T, T::Patch>> {
        let mut old = old.to_vec();
        self.rehome(&mut old);
        let mut changes = diff_changes(old, new);
        self.export(&mut changes);
        changes
    }
}

/// Deleted ids become tombstones, new ids full records and changed ones
/// sparse patches. Output is in id order.
pub fn diff_changes<T: Patchable>(old: Vec<T>, new: &[T]) -> Vec<Change<T, T::Patch>> {
    let mut old_by_id: BTreeMap<u32, T> = old.into_iter().map(|r| (r.key(), r)).collect();
    let mut changes: BTreeMap<u32, Change<T, T::Patch>> = BTreeMap::new();
    for record in new {
        let id = record.key();
        match old_by_id.remove(&id) {
            None => {
                changes.insert(id, Change::Put(record.clone()));
            }
            Some(previous) => {
                if let Some(patch) = previous.diff(record) {
                    changes.insert(id, Change::Patch(patch));
                }
            }
        }
    }
    for id in old_by_id.into_keys() {
        changes.insert(id, Change::Delete(id));
    }
    changes.into_values().collect()
}

/// Builds the delta from `old` to `new`.
///
/// Both snapshots must come from the same id chain: ids that `new` shares
/// with `old` must mean the same thing, which holds when `new` was built
/// continuing from `old`.
pub fn diff(old: &mut Snapshot, new: &mut Snapshot, options: &DiffOptions) -> Result<Delta> {
    if old.header.schema_version != new.header.schema_version {
        return Err(FeedError::SchemaMismatch {
            expected: old.header.schema_version,
            found: new.header.schema_version,
        });
    }
    for namespace in Namespace::ALL {
        if let Some((id, original)) = old.ids[namespace].first_conflict(&new.ids[namespace]) {
            return Err(FeedError::IdChainMismatch {
                namespace,
                id,
                old: original.to_string(),
                new: new.ids[namespace].original(id).map(str::to_string),
            });
        }
    }
    log::info!(
        "Diffing version {} against version {}...",
        new.header.version,
        old.header.version
    );

    let mut header = DeltaHeader::new(old.header.version, new.header.version, new.header.date);
    header.schema_version = new.header.schema_version;
    header.compressed = new.header.compressed;
    let mut delta = Delta::new(header);
    let mut strings = DeltaStrings::new(&old.strings, &new.strings);

    let agencies = strings.changes(old.agencies()?, new.agencies()?);
    log_changes(Block::Agency, agencies.len());
    delta.set_agencies(agencies);

    let calendar = CalendarChanges::between(old.calendar()?, new.calendar()?, options.today);
    if let Some(changes) = &calendar {
        log::debug!(
            "{}: {} services changed, {} removed",
            Block::Calendar.name(),
            changes.services.len(),
            changes.removed.len()
        );
    }
    delta.set_calendar(calendar);

    let shapes = diff_replace(old.shapes()?, new.shapes()?);
    log_changes(Block::Shapes, shapes.len());
    delta.set_shapes(shapes);

    let stops = strings.changes(old.stops()?, new.stops()?);
    log_changes(Block::Stops, stops.len());
    delta.set_stops(stops);

    let routes = strings.changes(old.routes()?, new.routes()?);
    log_changes(Block::Routes, routes.len());
    delta.set_routes(routes);

    let trips = strings.changes(old.trips()?, new.trips()?);
    log_changes(Block::Trips, trips.len());
    delta.set_trips(trips);

    let transfers = diff_replace(old.transfers()?, new.transfers()?);
    log_changes(Block::Transfers, transfers.len());
    delta.set_transfers(transfers);

    let networks = diff_replace(
        &names_to_records(old.networks()?),
        &names_to_records(new.networks()?),
    );
    log_changes(Block::Networks, networks.len());
    delta.set_networks(networks);

    let areas = diff_replace(
        &names_to_records(old.areas()?),
        &names_to_records(new.areas()?),
    );
    log_changes(Block::Areas, areas.len());
    delta.set_areas(areas);

    delta.set_fare_links(FareLinkChanges::between(old.fare_links()?, new.fare_links()?));

    delta.strings = strings.out;
    delta.ids = new.ids.clone();
    delta.ids.skip_base(&old.ids);
    log::info!(
        "Delta {} -> {} has {} new strings",
        delta.header.old_version,
        delta.header.version,
        delta.strings.len() - 1
    );
    Ok(delta)
}

fn log_changes(block: Block, count: usize) {
    log::debug!("{}: {} changes", block.name(), count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Header, WriteOptions};
    use crate::ids::Namespace;
    use crate::model::{Itinerary, Replace, Route, RoutePatch, Stop};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn options() -> DiffOptions {
        DiffOptions { today: today() }
    }

    fn stop(snapshot: &mut Snapshot, source_id: &str, name: &str) -> Stop {
        Stop {
            stop_id: snapshot.ids[Namespace::Stop].add(source_id),
            name: snapshot.strings.add(name),
            ..Stop::default()
        }
    }

    fn route(snapshot: &mut Snapshot, stops: &[u32]) -> Route {
        let key = crate::codec::itinerary::itinerary_key("R", stops);
        Route {
            route_id: snapshot.ids[Namespace::Route].add("R"),
            itineraries: vec![Itinerary {
                itinerary_id: snapshot.ids[Namespace::Itinerary].add(&key),
                stops: stops.to_vec(),
                ..Itinerary::default()
            }],
            ..Route::default()
        }
    }

    #[test]
    fn test_replaced_stop_scenario() {
        let mut v1 = Snapshot::new(Header::new(1, 20240310));
        let a = stop(&mut v1, "A", "Alpha");
        let r1 = route(&mut v1, &[a.stop_id]);
        v1.set_stops(vec![a.clone()]);
        v1.set_routes(vec![r1.clone()]);

        let mut v2 = Snapshot::new(Header::new(2, 20240311));
        v2.strings = v1.strings.clone();
        v2.ids = v1.ids.clone();
        let b = stop(&mut v2, "B", "Beta");
        let r2 = route(&mut v2, &[b.stop_id]);
        v2.set_stops(vec![b.clone()]);
        v2.set_routes(vec![r2.clone()]);

        let mut delta = diff(&mut v1, &mut v2, &options()).unwrap();
        assert_eq!(a.stop_id, 1);
        assert_eq!(b.stop_id, 2);

        let stops = delta.stops().unwrap().clone();
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0], Change::Delete(1));
        let Change::Put(added) = &stops[1] else {
            panic!("expected a full record, got {:?}", stops[1]);
        };
        assert_eq!(added.stop_id, 2);
        assert_eq!(delta.strings.resolve(added.name), "Beta");

        let routes = delta.routes().unwrap().clone();
        assert_eq!(
            routes,
            vec![Change::Patch(RoutePatch {
                route_id: 1,
                itineraries: vec![
                    Replace::Delete(r1.itineraries[0].itinerary_id),
                    Replace::Put(r2.itineraries[0].clone()),
                ],
                ..RoutePatch::default()
            })]
        );
        assert_eq!(delta.ids[Namespace::Stop].to_list(), vec!["B".to_string()]);
    }

    #[test]
    fn test_diff_with_itself_is_empty() {
        let mut snapshot = Snapshot::new(Header::new(1, 20240310));
        let a = stop(&mut snapshot, "A", "Alpha");
        let r = route(&mut snapshot, &[a.stop_id]);
        snapshot.set_stops(vec![a]);
        snapshot.set_routes(vec![r]);
        let bytes = snapshot.encode(&WriteOptions::default()).unwrap();

        let mut old = Snapshot::from_bytes(bytes.clone()).unwrap();
        let mut new = Snapshot::from_bytes(bytes).unwrap();
        let mut delta = diff(&mut old, &mut new, &options()).unwrap();
        assert!(delta.is_empty().unwrap());
        assert!(delta.strings.is_empty());
        assert!(delta.ids.iter().all(|t| t.to_list().is_empty()));
    }

    #[test]
    fn test_strings_compare_by_value() {
        let mut old = Snapshot::new(Header::new(1, 20240310));
        let a = stop(&mut old, "A", "Alpha");
        old.set_stops(vec![a]);

        // Same stop, but the name sits at a different index.
        let mut new = Snapshot::new(Header::new(2, 20240311));
        new.ids = old.ids.clone();
        new.strings.add("Unrelated");
        let a = stop(&mut new, "A", "Alpha");
        new.set_stops(vec![a]);

        let mut delta = diff(&mut old, &mut new, &options()).unwrap();
        assert!(delta.stops().unwrap().is_empty());
    }

    #[test]
    fn test_schema_mismatch() {
        let mut old = Snapshot::new(Header::new(1, 20240310));
        let mut new = Snapshot::new(Header::new(2, 20240311));
        new.header.schema_version += 1;
        assert!(matches!(
            diff(&mut old, &mut new, &options()),
            Err(FeedError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_unrelated_id_chains_are_rejected() {
        let mut old = Snapshot::new(Header::new(1, 20240310));
        let first = stop(&mut old, "S1", "Alpha");
        let second = stop(&mut old, "S2", "Beta");
        old.set_stops(vec![first, second]);

        // Packed from scratch in another order, so S1 and S2 swap ids.
        let mut new = Snapshot::new(Header::new(2, 20240311));
        let second = stop(&mut new, "S2", "Beta");
        let first = stop(&mut new, "S1", "Alpha");
        new.set_stops(vec![first, second]);

        match diff(&mut old, &mut new, &options()) {
            Err(FeedError::IdChainMismatch {
                namespace,
                id,
                old,
                new,
            }) => {
                assert_eq!(namespace, Namespace::Stop);
                assert_eq!(id, 1);
                assert_eq!(old, "S1");
                assert_eq!(new.as_deref(), Some("S2"));
            }
            Err(other) => panic!("expected an id chain error, got {other}"),
            Ok(_) => panic!("expected an id chain error"),
        }
    }
}

//! Itinerary deduplication.
//!
//! Trips of a route that visit the same stop sequence share one itinerary.
//! An itinerary's identity is [`itinerary_key`], registered in the
//! [`Namespace::Itinerary`](crate::ids::Namespace) id table, so the same
//! sequence keeps its id across feed versions. The key format is part of the
//! stored data and must not change: lowercase hex of the 128-bit XXH3 of
//!
//! ```text
//! u32 LE byte length of the route's source id | route source id bytes
//! | u32 LE dense stop id, for every stop in order
//! ```

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_128;

use crate::ids::IdTable;
use crate::model::Itinerary;
use crate::strings::StringTable;

pub fn itinerary_key(route_source_id: &str, stops: &[u32]) -> String {
    let mut buffer = Vec::with_capacity(4 + route_source_id.len() + 4 * stops.len());
    buffer.extend_from_slice(&(route_source_id.len() as u32).to_le_bytes());
    buffer.extend_from_slice(route_source_id.as_bytes());
    for stop in stops {
        buffer.extend_from_slice(&stop.to_le_bytes());
    }
    format!("{:032x}", xxh3_128(&buffer))
}

/// The stop sequence of one trip, as read from the source tables.
#[derive(Debug, Clone, Default)]
pub struct TripStops {
    pub trip_id: u32,
    pub route_source_id: String,
    pub headsign: Option<String>,
    pub opposite_direction: bool,
    pub shape_id: u32,
    pub stops: Vec<u32>,
    pub stop_headsigns: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct Itineraries {
    /// Route source id to its itineraries, in first-seen order.
    pub by_route: BTreeMap<String, Vec<Itinerary>>,
    pub trip_itineraries: FxHashMap<u32, u32>,
}

/// Groups trips by stop sequence. The first trip seen for a sequence
/// supplies the itinerary's headsign, direction and shape.
pub fn dedup_itineraries(
    trips: &[TripStops],
    ids: &mut IdTable,
    strings: &mut StringTable,
) -> Itineraries {
    let mut result = Itineraries::default();
    let mut seen: FxHashMap<String, u32> = FxHashMap::default();
    for trip in trips.iter().filter(|t| !t.stops.is_empty()) {
        let key = itinerary_key(&trip.route_source_id, &trip.stops);
        let itinerary_id = match seen.get(&key) {
            Some(&id) => id,
            None => {
                let id = ids.add(&key);
                seen.insert(key, id);
                let mut stop_headsigns = trip.stop_headsigns.clone();
                while stop_headsigns.last() == Some(&0) {
                    stop_headsigns.pop();
                }
                result
                    .by_route
                    .entry(trip.route_source_id.clone())
                    .or_default()
                    .push(Itinerary {
                        itinerary_id: id,
                        headsign: strings.add_opt(trip.headsign.as_deref()),
                        opposite_direction: trip.opposite_direction,
                        stops: trip.stops.clone(),
                        stop_headsigns,
                        shape_id: trip.shape_id,
                    });
                id
            }
        };
        result.trip_itineraries.insert(trip.trip_id, itinerary_id);
    }
    for itineraries in result.by_route.values_mut() {
        itineraries.sort_by_key(|i| i.itinerary_id);
    }
    result
}

//! Entity records shared by snapshots and deltas.
//!
//! Every string-valued field that repeats across a feed (names, headsigns,
//! time zones) is a `u32` index into the document's string table, 0 meaning
//! absent. Entity references are dense ids from the id tables.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

pub use crate::codec::coords::{Coord, Shape};

/// Records addressed by a stable key.
pub trait Keyed {
    type Key: Ord + Copy + fmt::Debug;

    fn key(&self) -> Self::Key;
}

/// Records that hold string-table references.
pub trait StringRefs {
    /// Rewrites every non-zero string reference through `f`.
    fn map_strings<F: FnMut(u32) -> u32>(&mut self, _f: &mut F) {}
}

/// Records that can be described by a sparse patch against an older version.
pub trait Patchable: Keyed<Key = u32> + StringRefs + Clone + PartialEq {
    type Patch: Keyed<Key = u32> + StringRefs + Clone + PartialEq + fmt::Debug;

    /// Fields of `new` that differ from `self`, or `None` when nothing
    /// observable changed. Both records must use the same string table.
    fn diff(&self, new: &Self) -> Option<Self::Patch>;

    fn apply(&mut self, patch: &Self::Patch);

    /// Folds a later patch into an earlier one; fields present in `later` win.
    fn merge_patches(earlier: &mut Self::Patch, later: Self::Patch);
}

fn changed<T: PartialEq + Clone>(old: &T, new: &T) -> Option<T> {
    (old != new).then(|| new.clone())
}

fn assign<T: Clone>(field: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        *field = value.clone();
    }
}

fn overlay<T>(slot: &mut Option<T>, later: Option<T>) {
    if later.is_some() {
        *slot = later;
    }
}

fn map_ref<F: FnMut(u32) -> u32>(index: &mut u32, f: &mut F) {
    if *index != 0 {
        *index = f(*index);
    }
}

fn map_refs<F: FnMut(u32) -> u32>(indices: &mut [u32], f: &mut F) {
    for index in indices {
        map_ref(index, f);
    }
}

/// A delta entry for entity kinds that support sparse patches.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Change<T, P> {
    /// A new entity, or a full replacement.
    Put(T),
    Patch(P),
    Delete(u32),
}

impl<T: Keyed<Key = u32>, P: Keyed<Key = u32>> Change<T, P> {
    pub fn key(&self) -> u32 {
        match self {
            Change::Put(record) => record.key(),
            Change::Patch(patch) => patch.key(),
            Change::Delete(id) => *id,
        }
    }
}

impl<T: StringRefs, P: StringRefs> StringRefs for Change<T, P> {
    fn map_strings<F: FnMut(u32) -> u32>(&mut self, f: &mut F) {
        match self {
            Change::Put(record) => record.map_strings(f),
            Change::Patch(patch) => patch.map_strings(f),
            Change::Delete(_) => {}
        }
    }
}

/// A delta entry for entity kinds that are only ever replaced whole.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Replace<K, T> {
    Put(T),
    Delete(K),
}

impl<T: Keyed> Replace<T::Key, T> {
    pub fn key(&self) -> T::Key {
        match self {
            Replace::Put(record) => record.key(),
            Replace::Delete(key) => *key,
        }
    }
}

impl<K, T: StringRefs> StringRefs for Replace<K, T> {
    fn map_strings<F: FnMut(u32) -> u32>(&mut self, f: &mut F) {
        if let Replace::Put(record) = self {
            record.map_strings(f);
        }
    }
}

/// Whole-record comparison keyed by [`Keyed::key`]: removed keys become
/// tombstones, new or different records are put. Output is in key order.
pub fn diff_replace<T>(old: &[T], new: &[T]) -> Vec<Replace<T::Key, T>>
where
    T: Keyed + Clone + PartialEq,
{
    let old_by_key: BTreeMap<T::Key, &T> = old.iter().map(|r| (r.key(), r)).collect();
    let new_by_key: BTreeMap<T::Key, &T> = new.iter().map(|r| (r.key(), r)).collect();
    let mut changes: BTreeMap<T::Key, Replace<T::Key, T>> = BTreeMap::new();
    for key in old_by_key.keys() {
        if !new_by_key.contains_key(key) {
            changes.insert(*key, Replace::Delete(*key));
        }
    }
    for (key, record) in new_by_key {
        if old_by_key.get(&key) != Some(&record) {
            changes.insert(key, Replace::Put(record.clone()));
        }
    }
    changes.into_values().collect()
}

/// Applies whole-record changes, returning the records in key order.
pub fn apply_replace<T>(records: Vec<T>, changes: &[Replace<T::Key, T>]) -> Vec<T>
where
    T: Keyed + Clone,
{
    let mut by_key: BTreeMap<T::Key, T> = records.into_iter().map(|r| (r.key(), r)).collect();
    for change in changes {
        match change {
            Replace::Put(record) => {
                by_key.insert(record.key(), record.clone());
            }
            Replace::Delete(key) => {
                by_key.remove(key);
            }
        }
    }
    by_key.into_values().collect()
}

/// Later entries win per key.
pub fn merge_replace<T>(
    earlier: Vec<Replace<T::Key, T>>,
    later: Vec<Replace<T::Key, T>>,
) -> Vec<Replace<T::Key, T>>
where
    T: Keyed,
{
    let mut merged: BTreeMap<T::Key, Replace<T::Key, T>> =
        earlier.into_iter().map(|c| (c.key(), c)).collect();
    for change in later {
        merged.insert(change.key(), change);
    }
    merged.into_values().collect()
}

#[derive(
    rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Accessibility {
    #[default]
    Unknown,
    Accessible,
    NotAccessible,
}

impl Accessibility {
    pub fn from_gtfs(value: &str) -> Option<Self> {
        match value {
            "" | "0" => Some(Accessibility::Unknown),
            "1" => Some(Accessibility::Accessible),
            "2" => Some(Accessibility::NotAccessible),
            _ => None,
        }
    }
}

#[derive(
    rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    #[default]
    Stop,
    Station,
    Exit,
    Node,
    Boarding,
}

impl LocationType {
    pub fn from_gtfs(value: &str) -> Option<Self> {
        match value {
            "" | "0" => Some(LocationType::Stop),
            "1" => Some(LocationType::Station),
            "2" => Some(LocationType::Exit),
            "3" => Some(LocationType::Node),
            "4" => Some(LocationType::Boarding),
            _ => None,
        }
    }
}

#[derive(
    rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum PickupDropoff {
    #[default]
    No,
    Yes,
    PhoneAgency,
    TellDriver,
}

impl PickupDropoff {
    /// GTFS codes: 0 regular, 1 none, 2 phone the agency, 3 ask the driver.
    pub fn from_gtfs(value: &str) -> Option<Self> {
        match value {
            "0" => Some(PickupDropoff::Yes),
            "1" => Some(PickupDropoff::No),
            "2" => Some(PickupDropoff::PhoneAgency),
            "3" => Some(PickupDropoff::TellDriver),
            _ => None,
        }
    }
}

#[derive(
    rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    #[default]
    Bus,
    Tram,
    Subway,
    Rail,
    Ferry,
    CableTram,
    Aerial,
    Funicular,
    CommunalTaxi,
    Coach,
    Trolleybus,
    Monorail,
    UrbanRail,
    Water,
    Air,
    Taxi,
    Misc,
}

impl RouteType {
    /// Maps basic and extended GTFS route types.
    pub fn from_gtfs(code: u32) -> Option<Self> {
        let family = code / 100;
        let route_type = match code {
            0 => RouteType::Tram,
            1 | 401 | 402 => RouteType::Subway,
            2 => RouteType::Rail,
            3 => RouteType::Bus,
            4 | 1200 => RouteType::Ferry,
            5 | 1302 => RouteType::CableTram,
            6 => RouteType::Aerial,
            7 | 1400 => RouteType::Funicular,
            11 | 800 => RouteType::Trolleybus,
            12 | 405 => RouteType::Monorail,
            400 | 403 | 404 => RouteType::UrbanRail,
            1000 => RouteType::Water,
            1100 => RouteType::Air,
            1501 => RouteType::CommunalTaxi,
            _ => match family {
                1 => RouteType::Rail,
                2 => RouteType::Coach,
                7 => RouteType::Bus,
                9 => RouteType::Tram,
                13 => RouteType::Aerial,
                15 => RouteType::Taxi,
                17 => RouteType::Misc,
                _ => return None,
            },
        };
        Some(route_type)
    }
}

#[derive(
    rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    #[default]
    Possible,
    DepartureWaits,
    NeedsTime,
    NotPossible,
    InSeat,
    InSeatForbidden,
}

impl TransferType {
    pub fn from_gtfs(value: &str) -> Option<Self> {
        match value {
            "" | "0" => Some(TransferType::Possible),
            "1" => Some(TransferType::DepartureWaits),
            "2" => Some(TransferType::NeedsTime),
            "3" => Some(TransferType::NotPossible),
            "4" => Some(TransferType::InSeat),
            "5" => Some(TransferType::InSeatForbidden),
            _ => None,
        }
    }
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Agency {
    pub agency_id: u32,
    pub name: String,
    pub url: String,
    /// String table reference.
    pub timezone: u32,
    pub lang: String,
    pub phone: String,
    pub fare_url: String,
    pub email: String,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct AgencyPatch {
    pub agency_id: u32,
    pub name: Option<String>,
    pub url: Option<String>,
    pub timezone: Option<u32>,
    pub lang: Option<String>,
    pub phone: Option<String>,
    pub fare_url: Option<String>,
    pub email: Option<String>,
}

impl Keyed for Agency {
    type Key = u32;

    fn key(&self) -> u32 {
        self.agency_id
    }
}

impl Keyed for AgencyPatch {
    type Key = u32;

    fn key(&self) -> u32 {
        self.agency_id
    }
}

impl StringRefs for Agency {
    fn map_strings<F: FnMut(u32) -> u32>(&mut self, f: &mut F) {
        map_ref(&mut self.timezone, f);
    }
}

impl StringRefs for AgencyPatch {
    fn map_strings<F: FnMut(u32) -> u32>(&mut self, f: &mut F) {
        if let Some(timezone) = self.timezone.as_mut() {
            map_ref(timezone, f);
        }
    }
}

impl Patchable for Agency {
    type Patch = AgencyPatch;

    fn diff(&self, new: &Self) -> Option<AgencyPatch> {
        if self == new {
            return None;
        }
        Some(AgencyPatch {
            agency_id: new.agency_id,
            name: changed(&self.name, &new.name),
            url: changed(&self.url, &new.url),
            timezone: changed(&self.timezone, &new.timezone),
            lang: changed(&self.lang, &new.lang),
            phone: changed(&self.phone, &new.phone),
            fare_url: changed(&self.fare_url, &new.fare_url),
            email: changed(&self.email, &new.email),
        })
    }

    fn apply(&mut self, patch: &AgencyPatch) {
        assign(&mut self.name, &patch.name);
        assign(&mut self.url, &patch.url);
        assign(&mut self.timezone, &patch.timezone);
        assign(&mut self.lang, &patch.lang);
        assign(&mut self.phone, &patch.phone);
        assign(&mut self.fare_url, &patch.fare_url);
        assign(&mut self.email, &patch.email);
    }

    fn merge_patches(earlier: &mut AgencyPatch, later: AgencyPatch) {
        overlay(&mut earlier.name, later.name);
        overlay(&mut earlier.url, later.url);
        overlay(&mut earlier.timezone, later.timezone);
        overlay(&mut earlier.lang, later.lang);
        overlay(&mut earlier.phone, later.phone);
        overlay(&mut earlier.fare_url, later.fare_url);
        overlay(&mut earlier.email, later.email);
    }
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Stop {
    pub stop_id: u32,
    pub code: String,
    pub name: u32,
    pub desc: String,
    pub position: Option<Coord>,
    pub location_type: LocationType,
    pub parent_id: u32,
    pub wheelchair: Accessibility,
    pub platform_code: String,
    pub external_str_id: String,
    pub external_int_id: u32,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct StopPatch {
    pub stop_id: u32,
    pub code: Option<String>,
    pub name: Option<u32>,
    pub desc: Option<String>,
    /// `Some(None)` clears the position.
    pub position: Option<Option<Coord>>,
    pub location_type: Option<LocationType>,
    pub parent_id: Option<u32>,
    pub wheelchair: Option<Accessibility>,
    pub platform_code: Option<String>,
    pub external_str_id: Option<String>,
    pub external_int_id: Option<u32>,
}

impl Keyed for Stop {
    type Key = u32;

    fn key(&self) -> u32 {
        self.stop_id
    }
}

impl Keyed for StopPatch {
    type Key = u32;

    fn key(&self) -> u32 {
        self.stop_id
    }
}

impl StringRefs for Stop {
    fn map_strings<F: FnMut(u32) -> u32>(&mut self, f: &mut F) {
        map_ref(&mut self.name, f);
    }
}

impl StringRefs for StopPatch {
    fn map_strings<F: FnMut(u32) -> u32>(&mut self, f: &mut F) {
        if let Some(name) = self.name.as_mut() {
            map_ref(name, f);
        }
    }
}

impl Patchable for Stop {
    type Patch = StopPatch;

    fn diff(&self, new: &Self) -> Option<StopPatch> {
        if self == new {
            return None;
        }
        Some(StopPatch {
            stop_id: new.stop_id,
            code: changed(&self.code, &new.code),
            name: changed(&self.name, &new.name),
            desc: changed(&self.desc, &new.desc),
            position: changed(&self.position, &new.position),
            location_type: changed(&self.location_type, &new.location_type),
            parent_id: changed(&self.parent_id, &new.parent_id),
            wheelchair: changed(&self.wheelchair, &new.wheelchair),
            platform_code: changed(&self.platform_code, &new.platform_code),
            external_str_id: changed(&self.external_str_id, &new.external_str_id),
            external_int_id: changed(&self.external_int_id, &new.external_int_id),
        })
    }

    fn apply(&mut self, patch: &StopPatch) {
        assign(&mut self.code, &patch.code);
        assign(&mut self.name, &patch.name);
        assign(&mut self.desc, &patch.desc);
        assign(&mut self.position, &patch.position);
        assign(&mut self.location_type, &patch.location_type);
        assign(&mut self.parent_id, &patch.parent_id);
        assign(&mut self.wheelchair, &patch.wheelchair);
        assign(&mut self.platform_code, &patch.platform_code);
        assign(&mut self.external_str_id, &patch.external_str_id);
        assign(&mut self.external_int_id, &patch.external_int_id);
    }

    fn merge_patches(earlier: &mut StopPatch, later: StopPatch) {
        overlay(&mut earlier.code, later.code);
        overlay(&mut earlier.name, later.name);
        overlay(&mut earlier.desc, later.desc);
        overlay(&mut earlier.position, later.position);
        overlay(&mut earlier.location_type, later.location_type);
        overlay(&mut earlier.parent_id, later.parent_id);
        overlay(&mut earlier.wheelchair, later.wheelchair);
        overlay(&mut earlier.platform_code, later.platform_code);
        overlay(&mut earlier.external_str_id, later.external_str_id);
        overlay(&mut earlier.external_int_id, later.external_int_id);
    }
}

/// A distinct stop sequence of a route, shared by every trip that follows it.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Itinerary {
    pub itinerary_id: u32,
    pub headsign: u32,
    pub opposite_direction: bool,
    pub stops: Vec<u32>,
    /// Per-stop headsign overrides; trailing absent entries are dropped.
    pub stop_headsigns: Vec<u32>,
    pub shape_id: u32,
}

impl Keyed for Itinerary {
    type Key = u32;

    fn key(&self) -> u32 {
        self.itinerary_id
    }
}

impl StringRefs for Itinerary {
    fn map_strings<F: FnMut(u32) -> u32>(&mut self, f: &mut F) {
        map_ref(&mut self.headsign, f);
        map_refs(&mut self.stop_headsigns, f);
    }
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Route {
    pub route_id: u32,
    pub agency_id: u32,
    pub short_name: String,
    /// Long name split on " - " into string references.
    pub long_name: Vec<u32>,
    pub desc: String,
    pub route_type: RouteType,
    pub color: u32,
    pub text_color: u32,
    pub continuous_pickup: PickupDropoff,
    pub continuous_dropoff: PickupDropoff,
    pub itineraries: Vec<Itinerary>,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct RoutePatch {
    pub route_id: u32,
    pub agency_id: Option<u32>,
    pub short_name: Option<String>,
    pub long_name: Option<Vec<u32>>,
    pub desc: Option<String>,
    pub route_type: Option<RouteType>,
    pub color: Option<u32>,
    pub text_color: Option<u32>,
    pub continuous_pickup: Option<PickupDropoff>,
    pub continuous_dropoff: Option<PickupDropoff>,
    pub itineraries: Vec<Replace<u32, Itinerary>>,
}

impl Keyed for Route {
    type Key = u32;

    fn key(&self) -> u32 {
        self.route_id
    }
}

impl Keyed for RoutePatch {
    type Key = u32;

    fn key(&self) -> u32 {
        self.route_id
    }
}

impl StringRefs for Route {
    fn map_strings<F: FnMut(u32) -> u32>(&mut self, f: &mut F) {
        map_refs(&mut self.long_name, f);
        for itinerary in &mut self.itineraries {
            itinerary.map_strings(f);
        }
    }
}

impl StringRefs for RoutePatch {
    fn map_strings<F: FnMut(u32) -> u32>(&mut self, f: &mut F) {
        if let Some(long_name) = self.long_name.as_mut() {
            map_refs(long_name, f);
        }
        for change in &mut self.itineraries {
            change.map_strings(f);
        }
    }
}

impl Patchable for Route {
    type Patch = RoutePatch;

    fn diff(&self, new: &Self) -> Option<RoutePatch> {
        if self == new {
            return None;
        }
        let patch = RoutePatch {
            route_id: new.route_id,
            agency_id: changed(&self.agency_id, &new.agency_id),
            short_name: changed(&self.short_name, &new.short_name),
            long_name: changed(&self.long_name, &new.long_name),
            desc: changed(&self.desc, &new.desc),
            route_type: changed(&self.route_type, &new.route_type),
            color: changed(&self.color, &new.color),
            text_color: changed(&self.text_color, &new.text_color),
            continuous_pickup: changed(&self.continuous_pickup, &new.continuous_pickup),
            continuous_dropoff: changed(&self.continuous_dropoff, &new.continuous_dropoff),
            itineraries: diff_replace(&self.itineraries, &new.itineraries),
        };
        // Reordered itineraries alone are not a change.
        let empty = RoutePatch {
            route_id: new.route_id,
            ..RoutePatch::default()
        };
        (patch != empty).then_some(patch)
    }

    fn apply(&mut self, patch: &RoutePatch) {
        assign(&mut self.agency_id, &patch.agency_id);
        assign(&mut self.short_name, &patch.short_name);
        assign(&mut self.long_name, &patch.long_name);
        assign(&mut self.desc, &patch.desc);
        assign(&mut self.route_type, &patch.route_type);
        assign(&mut self.color, &patch.color);
        assign(&mut self.text_color, &patch.text_color);
        assign(&mut self.continuous_pickup, &patch.continuous_pickup);
        assign(&mut self.continuous_dropoff, &patch.continuous_dropoff);
        if !patch.itineraries.is_empty() {
            let itineraries = std::mem::take(&mut self.itineraries);
            self.itineraries = apply_replace(itineraries, &patch.itineraries);
        }
    }

    fn merge_patches(earlier: &mut RoutePatch, later: RoutePatch) {
        overlay(&mut earlier.agency_id, later.agency_id);
        overlay(&mut earlier.short_name, later.short_name);
        overlay(&mut earlier.long_name, later.long_name);
        overlay(&mut earlier.desc, later.desc);
        overlay(&mut earlier.route_type, later.route_type);
        overlay(&mut earlier.color, later.color);
        overlay(&mut earlier.text_color, later.text_color);
        overlay(&mut earlier.continuous_pickup, later.continuous_pickup);
        overlay(&mut earlier.continuous_dropoff, later.continuous_dropoff);
        let itineraries = std::mem::take(&mut earlier.itineraries);
        earlier.itineraries = merge_replace(itineraries, later.itineraries);
    }
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Trip {
    pub trip_id: u32,
    pub service_id: u32,
    pub itinerary_id: u32,
    pub short_name: String,
    pub wheelchair: Accessibility,
    pub bikes: Accessibility,
    pub approximate: bool,
    /// In 5 second units; the first is absolute, the rest are offsets from
    /// the previous departure. 0 marks a stop without a time.
    pub departures: Vec<u32>,
    /// Dwell time before each departure, in 5 second units.
    pub arrivals: Vec<u32>,
    /// Missing trailing entries mean regular pickup.
    pub pickup_types: Vec<PickupDropoff>,
    pub dropoff_types: Vec<PickupDropoff>,
    /// Frequency-based trips: minutes after midnight.
    pub start_time: u32,
    pub end_time: u32,
    /// Headway in seconds.
    pub interval: u32,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct TripPatch {
    pub trip_id: u32,
    pub service_id: Option<u32>,
    pub itinerary_id: Option<u32>,
    pub short_name: Option<String>,
    pub wheelchair: Option<Accessibility>,
    pub bikes: Option<Accessibility>,
    pub approximate: Option<bool>,
    /// Departures and arrivals always travel together.
    pub departures: Option<Vec<u32>>,
    pub arrivals: Option<Vec<u32>>,
    pub pickup_types: Option<Vec<PickupDropoff>>,
    pub dropoff_types: Option<Vec<PickupDropoff>>,
    pub start_time: Option<u32>,
    pub end_time: Option<u32>,
    pub interval: Option<u32>,
}

impl Keyed for Trip {
    type Key = u32;

    fn key(&self) -> u32 {
        self.trip_id
    }
}

impl Keyed for TripPatch {
    type Key = u32;

    fn key(&self) -> u32 {
        self.trip_id
    }
}

impl StringRefs for Trip {}
impl StringRefs for TripPatch {}

impl Patchable for Trip {
    type Patch = TripPatch;

    fn diff(&self, new: &Self) -> Option<TripPatch> {
        if self == new {
            return None;
        }
        let times_changed = self.departures != new.departures || self.arrivals != new.arrivals;
        Some(TripPatch {
            trip_id: new.trip_id,
            service_id: changed(&self.service_id, &new.service_id),
            itinerary_id: changed(&self.itinerary_id, &new.itinerary_id),
            short_name: changed(&self.short_name, &new.short_name),
            wheelchair: changed(&self.wheelchair, &new.wheelchair),
            bikes: changed(&self.bikes, &new.bikes),
            approximate: changed(&self.approximate, &new.approximate),
            departures: times_changed.then(|| new.departures.clone()),
            arrivals: times_changed.then(|| new.arrivals.clone()),
            pickup_types: changed(&self.pickup_types, &new.pickup_types),
            dropoff_types: changed(&self.dropoff_types, &new.dropoff_types),
            start_time: changed(&self.start_time, &new.start_time),
            end_time: changed(&self.end_time, &new.end_time),
            interval: changed(&self.interval, &new.interval),
        })
    }

    fn apply(&mut self, patch: &TripPatch) {
        assign(&mut self.service_id, &patch.service_id);
        assign(&mut self.itinerary_id, &patch.itinerary_id);
        assign(&mut self.short_name, &patch.short_name);
        assign(&mut self.wheelchair, &patch.wheelchair);
        assign(&mut self.bikes, &patch.bikes);
        assign(&mut self.approximate, &patch.approximate);
        assign(&mut self.departures, &patch.departures);
        assign(&mut self.arrivals, &patch.arrivals);
        assign(&mut self.pickup_types, &patch.pickup_types);
        assign(&mut self.dropoff_types, &patch.dropoff_types);
        assign(&mut self.start_time, &patch.start_time);
        assign(&mut self.end_time, &patch.end_time);
        assign(&mut self.interval, &patch.interval);
    }

    fn merge_patches(earlier: &mut TripPatch, later: TripPatch) {
        overlay(&mut earlier.service_id, later.service_id);
        overlay(&mut earlier.itinerary_id, later.itinerary_id);
        overlay(&mut earlier.short_name, later.short_name);
        overlay(&mut earlier.wheelchair, later.wheelchair);
        overlay(&mut earlier.bikes, later.bikes);
        overlay(&mut earlier.approximate, later.approximate);
        overlay(&mut earlier.departures, later.departures);
        overlay(&mut earlier.arrivals, later.arrivals);
        overlay(&mut earlier.pickup_types, later.pickup_types);
        overlay(&mut earlier.dropoff_types, later.dropoff_types);
        overlay(&mut earlier.start_time, later.start_time);
        overlay(&mut earlier.end_time, later.end_time);
        overlay(&mut earlier.interval, later.interval);
    }
}

#[derive(
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
)]
pub struct TransferKey {
    pub from_stop: u32,
    pub to_stop: u32,
    pub from_route: u32,
    pub to_route: u32,
    pub from_trip: u32,
    pub to_trip: u32,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Transfer {
    pub key: TransferKey,
    pub transfer_type: TransferType,
    /// In 5 second units, rounded up.
    pub min_transfer_time: u32,
}

impl Keyed for Transfer {
    type Key = TransferKey;

    fn key(&self) -> TransferKey {
        self.key
    }
}

impl StringRefs for Transfer {}

/// Networks and fare areas: id to display name.
pub type Names = BTreeMap<u32, String>;

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Named {
    pub id: u32,
    pub name: String,
}

impl Keyed for Named {
    type Key = u32;

    fn key(&self) -> u32 {
        self.id
    }
}

impl StringRefs for Named {}

pub fn names_to_records(names: &Names) -> Vec<Named> {
    names
        .iter()
        .map(|(&id, name)| Named {
            id,
            name: name.clone(),
        })
        .collect()
}

pub fn records_to_names(records: Vec<Named>) -> Names {
    records.into_iter().map(|r| (r.id, r.name)).collect()
}

/// Links from stops to fare zones and areas, and from routes to networks.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FareLinks {
    pub stop_zones: BTreeMap<u32, u32>,
    pub stop_areas: BTreeMap<u32, u32>,
    pub route_networks: BTreeMap<u32, u32>,
}

impl FareLinks {
    pub fn is_empty(&self) -> bool {
        self.stop_zones.is_empty() && self.stop_areas.is_empty() && self.route_networks.is_empty()
    }
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkUpdate {
    pub id: u32,
    /// `None` removes the link.
    pub target: Option<u32>,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct FareLinkChanges {
    pub stop_zones: Vec<LinkUpdate>,
    pub stop_areas: Vec<LinkUpdate>,
    pub route_networks: Vec<LinkUpdate>,
}

impl FareLinkChanges {
    pub fn is_empty(&self) -> bool {
        self.stop_zones.is_empty() && self.stop_areas.is_empty() && self.route_networks.is_empty()
    }

    pub fn between(old: &FareLinks, new: &FareLinks) -> Self {
        Self {
            stop_zones: link_updates(&old.stop_zones, &new.stop_zones),
            stop_areas: link_updates(&old.stop_areas, &new.stop_areas),
            route_networks: link_updates(&old.route_networks, &new.route_networks),
        }
    }

    pub fn apply_to(&self, links: &mut FareLinks) {
        apply_links(&mut links.stop_zones, &self.stop_zones);
        apply_links(&mut links.stop_areas, &self.stop_areas);
        apply_links(&mut links.route_networks, &self.route_networks);
    }

    pub fn merge(self, later: FareLinkChanges) -> Self {
        Self {
            stop_zones: merge_links(self.stop_zones, later.stop_zones),
            stop_areas: merge_links(self.stop_areas, later.stop_areas),
            route_networks: merge_links(self.route_networks, later.route_networks),
        }
    }
}

fn link_updates(old: &BTreeMap<u32, u32>, new: &BTreeMap<u32, u32>) -> Vec<LinkUpdate> {
    let mut updates: BTreeMap<u32, Option<u32>> = BTreeMap::new();
    for id in old.keys().filter(|id| !new.contains_key(id)) {
        updates.insert(*id, None);
    }
    for (&id, &target) in new {
        if old.get(&id) != Some(&target) {
            updates.insert(id, Some(target));
        }
    }
    updates
        .into_iter()
        .map(|(id, target)| LinkUpdate { id, target })
        .collect()
}

fn apply_links(links: &mut BTreeMap<u32, u32>, updates: &[LinkUpdate]) {
    for update in updates {
        match update.target {
            Some(target) => links.insert(update.id, target),
            None => links.remove(&update.id),
        };
    }
}

fn merge_links(earlier: Vec<LinkUpdate>, later: Vec<LinkUpdate>) -> Vec<LinkUpdate> {
    let mut merged: BTreeMap<u32, Option<u32>> =
        earlier.into_iter().map(|u| (u.id, u.target)).collect();
    merged.extend(later.into_iter().map(|u| (u.id, u.target)));
    merged
        .into_iter()
        .map(|(id, target)| LinkUpdate { id, target })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(stop_id: u32, name: u32) -> Stop {
        Stop {
            stop_id,
            name,
            position: Some(Coord::from_degrees(24.75, 59.43)),
            ..Stop::default()
        }
    }

    fn itinerary(itinerary_id: u32, stops: &[u32]) -> Itinerary {
        Itinerary {
            itinerary_id,
            stops: stops.to_vec(),
            ..Itinerary::default()
        }
    }

    #[test]
    fn test_stop_patch_carries_only_changes() {
        let old = stop(4, 1);
        let mut new = stop(4, 2);
        new.platform_code = "B".into();
        let patch = old.diff(&new).unwrap();
        assert_eq!(patch.name, Some(2));
        assert_eq!(patch.platform_code, Some("B".into()));
        assert_eq!(patch.position, None);
        assert_eq!(patch.desc, None);

        let mut patched = old.clone();
        patched.apply(&patch);
        assert_eq!(patched, new);
        assert!(new.diff(&new).is_none());
    }

    #[test]
    fn test_patch_can_reset_to_default() {
        let mut old = stop(1, 5);
        old.external_int_id = 77;
        let mut new = old.clone();
        new.external_int_id = 0;
        new.position = None;
        let patch = old.diff(&new).unwrap();
        assert_eq!(patch.external_int_id, Some(0));
        assert_eq!(patch.position, Some(None));
        old.apply(&patch);
        assert_eq!(old, new);
    }

    #[test]
    fn test_reordered_itineraries_are_not_a_change() {
        let old = Route {
            route_id: 1,
            itineraries: vec![itinerary(1, &[1, 2]), itinerary(2, &[2, 1])],
            ..Route::default()
        };
        let mut new = old.clone();
        new.itineraries.reverse();
        assert_eq!(old.diff(&new), None);
    }

    #[test]
    fn test_route_itinerary_changes() {
        let old = Route {
            route_id: 1,
            itineraries: vec![itinerary(1, &[1])],
            ..Route::default()
        };
        let new = Route {
            route_id: 1,
            itineraries: vec![itinerary(2, &[2])],
            ..Route::default()
        };
        let patch = old.diff(&new).unwrap();
        assert_eq!(patch.agency_id, None);
        assert_eq!(
            patch.itineraries,
            vec![Replace::Delete(1), Replace::Put(itinerary(2, &[2]))]
        );
        let mut patched = old.clone();
        patched.apply(&patch);
        assert_eq!(patched, new);
    }

    #[test]
    fn test_trip_times_travel_together() {
        let old = Trip {
            trip_id: 3,
            departures: vec![100, 12],
            arrivals: vec![0, 2],
            ..Trip::default()
        };
        let mut new = old.clone();
        new.arrivals = vec![0, 3];
        let patch = old.diff(&new).unwrap();
        assert_eq!(patch.departures, Some(vec![100, 12]));
        assert_eq!(patch.arrivals, Some(vec![0, 3]));
        assert_eq!(patch.service_id, None);
    }

    #[test]
    fn test_merge_patches_later_wins() {
        let mut earlier = AgencyPatch {
            agency_id: 1,
            name: Some("Old".into()),
            phone: Some("123".into()),
            ..AgencyPatch::default()
        };
        let later = AgencyPatch {
            agency_id: 1,
            name: Some("New".into()),
            ..AgencyPatch::default()
        };
        Agency::merge_patches(&mut earlier, later);
        assert_eq!(earlier.name, Some("New".into()));
        assert_eq!(earlier.phone, Some("123".into()));
    }

    #[test]
    fn test_map_strings_skips_absent() {
        let mut route = Route {
            route_id: 1,
            long_name: vec![3, 0],
            itineraries: vec![Itinerary {
                headsign: 0,
                stop_headsigns: vec![0, 4],
                ..itinerary(1, &[1, 2])
            }],
            ..Route::default()
        };
        route.map_strings(&mut |i| i * 10);
        assert_eq!(route.long_name, vec![30, 0]);
        assert_eq!(route.itineraries[0].headsign, 0);
        assert_eq!(route.itineraries[0].stop_headsigns, vec![0, 40]);
    }

    #[test]
    fn test_fare_link_updates() {
        let mut old = FareLinks::default();
        old.stop_zones.insert(1, 10);
        old.stop_zones.insert(2, 10);
        let mut new = FareLinks::default();
        new.stop_zones.insert(2, 11);
        new.stop_zones.insert(3, 12);
        let changes = FareLinkChanges::between(&old, &new);
        assert_eq!(
            changes.stop_zones,
            vec![
                LinkUpdate { id: 1, target: None },
                LinkUpdate { id: 2, target: Some(11) },
                LinkUpdate { id: 3, target: Some(12) },
            ]
        );
        changes.apply_to(&mut old);
        assert_eq!(old, new);
    }

    #[test]
    fn test_route_type_mapping() {
        assert_eq!(RouteType::from_gtfs(3), Some(RouteType::Bus));
        assert_eq!(RouteType::from_gtfs(0), Some(RouteType::Tram));
        assert_eq!(RouteType::from_gtfs(109), Some(RouteType::Rail));
        assert_eq!(RouteType::from_gtfs(715), Some(RouteType::Bus));
        assert_eq!(RouteType::from_gtfs(402), Some(RouteType::Subway));
        assert_eq!(RouteType::from_gtfs(99), None);
    }
}

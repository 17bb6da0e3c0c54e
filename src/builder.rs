//! Builds a [`Snapshot`] from GTFS-style tables.
//!
//! Continuing from a previous snapshot reuses its string and id tables, so
//! every identifier keeps its id and new ones continue the numbering.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressFinish, ProgressIterator, ProgressStyle};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::block::Header;
use crate::codec::calendar::{weekday_bit, Calendar, CalendarService};
use crate::codec::itinerary::{dedup_itineraries, TripStops};
use crate::error::{FeedError, Result};
use crate::ids::{IdStore, Namespace};
use crate::model::{
    Accessibility, Agency, Coord, FareLinks, LocationType, Names, PickupDropoff, Route, RouteType,
    Shape, Stop, Transfer, TransferKey, TransferType, Trip,
};
use crate::snapshot::Snapshot;
use crate::source::{field, required, Row, TableSource};
use crate::strings::StringTable;

const WEEKDAY_COLUMNS: [(&str, chrono::Weekday); 7] = [
    ("monday", chrono::Weekday::Mon),
    ("tuesday", chrono::Weekday::Tue),
    ("wednesday", chrono::Weekday::Wed),
    ("thursday", chrono::Weekday::Thu),
    ("friday", chrono::Weekday::Fri),
    ("saturday", chrono::Weekday::Sat),
    ("sunday", chrono::Weekday::Sun),
];

const DEFAULT_COLOR: u32 = 0xFFFFFF;
const DEFAULT_TEXT_COLOR: u32 = 0x000000;

pub struct SnapshotBuilder {
    header: Header,
    strings: StringTable,
    ids: IdStore,
    today: NaiveDate,
    fare_links: FareLinks,
    progress: bool,
}

/// One row of `stop_times`, resolved.
struct StopTime {
    sequence: u32,
    stop_id: u32,
    headsign: u32,
    /// 5 second units, 0 when absent.
    arrival: u32,
    departure: u32,
    pickup: PickupDropoff,
    dropoff: PickupDropoff,
    approximate: bool,
}

impl SnapshotBuilder {
    pub fn new(version: u32, date: u32) -> Self {
        Self {
            header: Header::new(version, date),
            strings: StringTable::new(),
            ids: IdStore::new(),
            today: chrono::Local::now().date_naive(),
            fare_links: FareLinks::default(),
            progress: false,
        }
    }

    /// Starts the next version after `previous`, keeping its symbol tables.
    pub fn continue_from(previous: &Snapshot, date: u32) -> Self {
        let mut builder = Self::new(previous.header.version + 1, date);
        builder.header.original_url = previous.header.original_url.clone();
        builder.header.compressed = previous.header.compressed;
        builder.strings = previous.strings.clone();
        builder.ids = previous.ids.clone();
        builder
    }

    pub fn original_url(mut self, url: &str) -> Self {
        self.header.original_url = url.to_string();
        self
    }

    pub fn compressed(mut self, compressed: bool) -> Self {
        self.header.compressed = compressed;
        self
    }

    /// The date used to pick the calendar's base date.
    pub fn today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Draws a progress bar while reading `stop_times`.
    pub fn show_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn build(mut self, source: &mut dyn TableSource) -> Result<Snapshot> {
        log::info!("Preparing agencies...");
        let agencies = self.pack_agencies(source)?;
        log::info!("Preparing calendar...");
        let calendar = self.pack_calendar(source)?;
        log::info!("Preparing shapes...");
        let shapes = self.pack_shapes(source)?;
        let networks = self.pack_names(source, "networks", "network_id", "network_name", Namespace::Network)?;
        let areas = self.pack_names(source, "areas", "area_id", "area_name", Namespace::Area)?;
        log::info!("Preparing stops...");
        let stops = self.pack_stops(source)?;

        let trip_rows = table(source, "trips")?;
        let stop_times = self.read_stop_times(source)?;
        log::info!("Preparing routes...");
        let (routes, trip_itineraries) = self.pack_routes(source, &trip_rows, &stop_times)?;
        log::info!("Preparing trips...");
        let trips = self.pack_trips(source, &trip_rows, stop_times, &trip_itineraries)?;
        log::info!("Preparing transfers...");
        let transfers = self.pack_transfers(source)?;

        log::info!(
            "Built version {}: {} stops, {} routes, {} trips, {} strings",
            self.header.version,
            stops.len(),
            routes.len(),
            trips.len(),
            self.strings.len()
        );
        let mut snapshot = Snapshot::new(self.header);
        snapshot.strings = self.strings;
        snapshot.ids = self.ids;
        snapshot.set_agencies(agencies);
        snapshot.set_calendar(calendar);
        snapshot.set_shapes(shapes);
        snapshot.set_stops(stops);
        snapshot.set_routes(routes);
        snapshot.set_trips(trips);
        snapshot.set_transfers(transfers);
        snapshot.set_networks(networks);
        snapshot.set_areas(areas);
        snapshot.set_fare_links(self.fare_links);
        Ok(snapshot)
    }

    fn pack_agencies(&mut self, source: &mut dyn TableSource) -> Result<Vec<Agency>> {
        let mut agencies = Vec::new();
        for row in table(source, "agency")? {
            let name = required(&row, "agency", "agency_name")?;
            // Single-agency feeds may leave the id out.
            let source_id = match field(&row, "agency_id") {
                "" => name,
                id => id,
            };
            agencies.push(Agency {
                agency_id: self.ids[Namespace::Agency].add(source_id),
                name: name.to_string(),
                url: field(&row, "agency_url").to_string(),
                timezone: self.strings.add(field(&row, "agency_timezone")),
                lang: field(&row, "agency_lang").to_string(),
                phone: field(&row, "agency_phone").to_string(),
                fare_url: field(&row, "agency_fare_url").to_string(),
                email: field(&row, "agency_email").to_string(),
            });
        }
        agencies.sort_by_key(|a| a.agency_id);
        Ok(agencies)
    }

    fn pack_calendar(&mut self, source: &mut dyn TableSource) -> Result<Calendar> {
        let calendar_rows = source.open_table("calendar")?;
        let date_rows = source.open_table("calendar_dates")?;
        if calendar_rows.is_none() && date_rows.is_none() {
            return Err(FeedError::MissingTable("calendar".into()));
        }

        let mut added: BTreeMap<u32, Vec<NaiveDate>> = BTreeMap::new();
        let mut removed: BTreeMap<u32, Vec<NaiveDate>> = BTreeMap::new();
        for row in date_rows.unwrap_or_default() {
            let service_id = self.service_id(&row, "calendar_dates")?;
            let date = parse_date("calendar_dates", "date", required(&row, "calendar_dates", "date")?)?;
            match field(&row, "exception_type") {
                "1" => added.entry(service_id).or_default().push(date),
                "2" => removed.entry(service_id).or_default().push(date),
                other => return Err(FeedError::invalid_value("calendar_dates", "exception_type", other)),
            }
        }

        let mut services = Vec::new();
        let mut seen = FxHashSet::default();
        for row in calendar_rows.unwrap_or_default() {
            let service_id = self.service_id(&row, "calendar")?;
            let optional_date = |column: &str| match field(&row, column) {
                "" => Ok(None),
                value => parse_date("calendar", column, value).map(Some),
            };
            let weekdays = WEEKDAY_COLUMNS
                .iter()
                .filter(|(column, _)| field(&row, column) == "1")
                .fold(0, |mask, (_, weekday)| mask | weekday_bit(*weekday));
            services.push(CalendarService {
                service_id,
                start_date: optional_date("start_date")?,
                end_date: optional_date("end_date")?,
                weekdays,
                added_days: added.get(&service_id).cloned().unwrap_or_default(),
                removed_days: removed.get(&service_id).cloned().unwrap_or_default(),
            });
            seen.insert(service_id);
        }
        // Services defined only through calendar_dates.
        for (service_id, dates) in added {
            if seen.contains(&service_id) {
                continue;
            }
            services.push(CalendarService {
                service_id,
                added_days: dates,
                removed_days: removed.remove(&service_id).unwrap_or_default(),
                ..CalendarService::default()
            });
        }
        Calendar::build(services, self.today)
    }

    fn service_id(&mut self, row: &Row, table: &str) -> Result<u32> {
        Ok(self.ids[Namespace::Service].add(required(row, table, "service_id")?))
    }

    fn pack_shapes(&mut self, source: &mut dyn TableSource) -> Result<Vec<Shape>> {
        let mut order: Vec<String> = Vec::new();
        let mut points: FxHashMap<String, Vec<(u32, f64, f64)>> = FxHashMap::default();
        for row in optional_table(source, "shapes")? {
            let shape_id = required(&row, "shapes", "shape_id")?;
            let point = (
                parse_number("shapes", "shape_pt_sequence", field(&row, "shape_pt_sequence"))?,
                parse_number("shapes", "shape_pt_lon", field(&row, "shape_pt_lon"))?,
                parse_number("shapes", "shape_pt_lat", field(&row, "shape_pt_lat"))?,
            );
            if !points.contains_key(shape_id) {
                order.push(shape_id.to_string());
            }
            points.entry(shape_id.to_string()).or_default().push(point);
        }

        let mut shapes = Vec::new();
        for source_id in order {
            let mut shape_points = points.remove(&source_id).unwrap_or_default();
            if shape_points.len() < 2 {
                log::warn!("Skipping shape {} with {} point(s)", source_id, shape_points.len());
                continue;
            }
            shape_points.sort_by_key(|(sequence, _, _)| *sequence);
            let coords: Vec<(f64, f64)> = shape_points.iter().map(|&(_, lon, lat)| (lon, lat)).collect();
            let shape_id = self.ids[Namespace::Shape].add(&source_id);
            shapes.push(Shape::from_degrees(shape_id, &coords)?);
        }
        shapes.sort_by_key(|s| s.shape_id);
        Ok(shapes)
    }

    fn pack_names(
        &mut self,
        source: &mut dyn TableSource,
        table_name: &str,
        id_column: &str,
        name_column: &str,
        namespace: Namespace,
    ) -> Result<Names> {
        let mut names = Names::new();
        for row in optional_table(source, table_name)? {
            let id = self.ids[namespace].add(required(&row, table_name, id_column)?);
            names.insert(id, field(&row, name_column).to_string());
        }
        Ok(names)
    }

    fn pack_stops(&mut self, source: &mut dyn TableSource) -> Result<Vec<Stop>> {
        let mut stop_areas: FxHashMap<String, u32> = FxHashMap::default();
        for row in optional_table(source, "stop_areas")? {
            let area_id = self.ids[Namespace::Area].add(required(&row, "stop_areas", "area_id")?);
            stop_areas.insert(required(&row, "stop_areas", "stop_id")?.to_string(), area_id);
        }

        let mut stops = Vec::new();
        for row in table(source, "stops")? {
            let source_id = required(&row, "stops", "stop_id")?;
            let stop_id = self.ids[Namespace::Stop].add(source_id);
            let position = match (field(&row, "stop_lon"), field(&row, "stop_lat")) {
                ("", _) | (_, "") => None,
                (lon, lat) => Some(Coord::from_degrees(
                    parse_number("stops", "stop_lon", lon)?,
                    parse_number("stops", "stop_lat", lat)?,
                )),
            };
            let zone = field(&row, "zone_id");
            if !zone.is_empty() {
                let zone_id = self.ids[Namespace::Zone].add(zone);
                self.fare_links.stop_zones.insert(stop_id, zone_id);
            }
            if let Some(&area_id) = stop_areas.get(source_id) {
                self.fare_links.stop_areas.insert(stop_id, area_id);
            }
            stops.push(Stop {
                stop_id,
                code: field(&row, "stop_code").to_string(),
                name: self.strings.add(field(&row, "stop_name")),
                desc: field(&row, "stop_desc").to_string(),
                position,
                location_type: parse_enum("stops", "location_type", &row, LocationType::from_gtfs)?,
                parent_id: self.ids[Namespace::Stop].add(field(&row, "parent_station")),
                wheelchair: parse_enum("stops", "wheelchair_boarding", &row, Accessibility::from_gtfs)?,
                platform_code: field(&row, "platform_code").to_string(),
                external_str_id: String::new(),
                external_int_id: 0,
            });
        }
        stops.sort_by_key(|s| s.stop_id);
        Ok(stops)
    }

    /// Groups `stop_times` by trip, each group sorted by stop sequence.
    fn read_stop_times(&mut self, source: &mut dyn TableSource) -> Result<FxHashMap<u32, Vec<StopTime>>> {
        let rows = table(source, "stop_times")?;
        let bar = if self.progress {
            ProgressBar::new(rows.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(progress_style());
        let mut by_trip: FxHashMap<u32, Vec<StopTime>> = FxHashMap::default();
        for row in rows
            .into_iter()
            .progress_with(bar)
            .with_message("Group stop times by trip.")
            .with_finish(ProgressFinish::AndLeave)
        {
            let trip_id = self.ids[Namespace::Trip].add(required(&row, "stop_times", "trip_id")?);
            let arrival = parse_time("stop_times", "arrival_time", field(&row, "arrival_time"))?
                .map_or(0, to_five_seconds);
            let departure = parse_time("stop_times", "departure_time", field(&row, "departure_time"))?
                .map_or(arrival, to_five_seconds);
            let stop_time = StopTime {
                sequence: parse_number("stop_times", "stop_sequence", field(&row, "stop_sequence"))?,
                stop_id: self.ids[Namespace::Stop].get(required(&row, "stop_times", "stop_id")?)?,
                headsign: self.strings.add(field(&row, "stop_headsign")),
                arrival,
                departure,
                pickup: parse_stop_pickup("pickup_type", &row)?,
                dropoff: parse_stop_pickup("drop_off_type", &row)?,
                approximate: field(&row, "timepoint") == "0",
            };
            by_trip.entry(trip_id).or_default().push(stop_time);
        }
        for times in by_trip.values_mut() {
            times.sort_by_key(|t| t.sequence);
        }
        Ok(by_trip)
    }

    fn pack_routes(
        &mut self,
        source: &mut dyn TableSource,
        trip_rows: &[Row],
        stop_times: &FxHashMap<u32, Vec<StopTime>>,
    ) -> Result<(Vec<Route>, FxHashMap<u32, u32>)> {
        let mut trip_stops = Vec::new();
        for row in trip_rows {
            let trip_id = self.ids[Namespace::Trip].add(required(row, "trips", "trip_id")?);
            let Some(times) = stop_times.get(&trip_id) else {
                continue;
            };
            let headsign = field(row, "trip_headsign");
            trip_stops.push(TripStops {
                trip_id,
                route_source_id: required(row, "trips", "route_id")?.to_string(),
                headsign: (!headsign.is_empty()).then(|| headsign.to_string()),
                opposite_direction: field(row, "direction_id") == "1",
                shape_id: self.ids[Namespace::Shape].find(field(row, "shape_id")).unwrap_or(0),
                stops: times.iter().map(|t| t.stop_id).collect(),
                stop_headsigns: times.iter().map(|t| t.headsign).collect(),
            });
        }
        let mut itineraries = dedup_itineraries(
            &trip_stops,
            &mut self.ids[Namespace::Itinerary],
            &mut self.strings,
        );

        let mut routes = Vec::new();
        for row in table(source, "routes")? {
            let source_id = required(&row, "routes", "route_id")?;
            let route_id = self.ids[Namespace::Route].add(source_id);
            let Some(route_itineraries) = itineraries.by_route.remove(source_id) else {
                log::debug!("Skipping route {} without trips", source_id);
                continue;
            };
            let agency_id = match field(&row, "agency_id") {
                "" => 0,
                id => self.ids[Namespace::Agency].get(id)?,
            };
            let network = field(&row, "network_id");
            if !network.is_empty() {
                let network_id = self.ids[Namespace::Network].add(network);
                self.fare_links.route_networks.insert(route_id, network_id);
            }
            let route_type_code: u32 = parse_number("routes", "route_type", field(&row, "route_type"))?;
            routes.push(Route {
                route_id,
                agency_id,
                short_name: field(&row, "route_short_name").to_string(),
                long_name: self.split_long_name(field(&row, "route_long_name")),
                desc: field(&row, "route_desc").to_string(),
                route_type: RouteType::from_gtfs(route_type_code).ok_or_else(|| {
                    FeedError::invalid_value("routes", "route_type", field(&row, "route_type"))
                })?,
                color: parse_color("route_color", &row, DEFAULT_COLOR)?,
                text_color: parse_color("route_text_color", &row, DEFAULT_TEXT_COLOR)?,
                continuous_pickup: parse_route_pickup("continuous_pickup", &row)?,
                continuous_dropoff: parse_route_pickup("continuous_drop_off", &row)?,
                itineraries: route_itineraries,
            });
        }

        for row in optional_table(source, "route_networks")? {
            let network_id =
                self.ids[Namespace::Network].add(required(&row, "route_networks", "network_id")?);
            let route_id = self.ids[Namespace::Route].add(required(&row, "route_networks", "route_id")?);
            self.fare_links.route_networks.insert(route_id, network_id);
        }
        routes.sort_by_key(|r| r.route_id);
        Ok((routes, itineraries.trip_itineraries))
    }

    /// Splits "A - B - C" into parts, reusing strings already known. Names
    /// with one part or no known part are kept whole.
    fn split_long_name(&mut self, name: &str) -> Vec<u32> {
        if name.is_empty() {
            return Vec::new();
        }
        let normalized = name.replace(['\u{2014}', '\u{2013}'], "-");
        let parts: Vec<&str> = normalized
            .split(" - ")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        let known: Vec<Option<u32>> = parts.iter().map(|p| self.strings.search(p)).collect();
        if parts.len() < 2 || known.iter().all(Option::is_none) {
            return vec![self.strings.add(name)];
        }
        parts
            .iter()
            .zip(known)
            .map(|(part, index)| index.unwrap_or_else(|| self.strings.add(part)))
            .collect()
    }

    fn pack_trips(
        &mut self,
        source: &mut dyn TableSource,
        trip_rows: &[Row],
        mut stop_times: FxHashMap<u32, Vec<StopTime>>,
        trip_itineraries: &FxHashMap<u32, u32>,
    ) -> Result<Vec<Trip>> {
        let mut trips: BTreeMap<u32, Trip> = BTreeMap::new();
        for row in trip_rows {
            let trip_id = self.ids[Namespace::Trip].get(required(row, "trips", "trip_id")?)?;
            // Trips without stops have no itinerary.
            let Some(&itinerary_id) = trip_itineraries.get(&trip_id) else {
                continue;
            };
            trips.insert(
                trip_id,
                Trip {
                    trip_id,
                    service_id: self.ids[Namespace::Service].get(required(row, "trips", "service_id")?)?,
                    itinerary_id,
                    short_name: field(row, "trip_short_name").to_string(),
                    wheelchair: parse_enum("trips", "wheelchair_accessible", row, Accessibility::from_gtfs)?,
                    bikes: parse_enum("trips", "bikes_allowed", row, Accessibility::from_gtfs)?,
                    ..Trip::default()
                },
            );
        }

        for row in optional_table(source, "frequencies")? {
            let Some(trip) = self.ids[Namespace::Trip]
                .find(field(&row, "trip_id"))
                .and_then(|id| trips.get_mut(&id))
            else {
                continue;
            };
            let minutes = |column: &str| -> Result<u32> {
                Ok(parse_time("frequencies", column, field(&row, column))?.map_or(0, |s| (s + 30) / 60))
            };
            trip.start_time = minutes("start_time")?;
            trip.end_time = minutes("end_time")?;
            trip.interval = parse_number("frequencies", "headway_secs", field(&row, "headway_secs"))?;
            trip.approximate = field(&row, "exact_times") != "1";
        }

        for (trip_id, trip) in trips.iter_mut() {
            if let Some(times) = stop_times.remove(trip_id) {
                fill_trip(trip, &times);
            }
        }
        Ok(trips.into_values().collect())
    }

    fn pack_transfers(&mut self, source: &mut dyn TableSource) -> Result<Vec<Transfer>> {
        let mut transfers: BTreeMap<TransferKey, Transfer> = BTreeMap::new();
        for row in optional_table(source, "transfers")? {
            let reference = |namespace: Namespace, column: &str| match field(&row, column) {
                "" => Ok(0),
                id => self.ids[namespace].get(id),
            };
            let key = TransferKey {
                from_stop: reference(Namespace::Stop, "from_stop_id")?,
                to_stop: reference(Namespace::Stop, "to_stop_id")?,
                from_route: reference(Namespace::Route, "from_route_id")?,
                to_route: reference(Namespace::Route, "to_route_id")?,
                from_trip: reference(Namespace::Trip, "from_trip_id")?,
                to_trip: reference(Namespace::Trip, "to_trip_id")?,
            };
            let min_transfer_time = match field(&row, "min_transfer_time") {
                "" => 0,
                value => {
                    let seconds: f64 = parse_number("transfers", "min_transfer_time", value)?;
                    (seconds / 5.0).ceil() as u32
                }
            };
            transfers.insert(
                key,
                Transfer {
                    key,
                    transfer_type: parse_enum("transfers", "transfer_type", &row, TransferType::from_gtfs)?,
                    min_transfer_time,
                },
            );
        }
        Ok(transfers.into_values().collect())
    }
}

/// Departures are the main list: the first is absolute, later ones are
/// offsets from the previous stop. Arrivals hold the dwell before each
/// departure.
fn fill_trip(trip: &mut Trip, times: &[StopTime]) {
    let mut previous = 0;
    trip.departures = times
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let value = if i == 0 || t.departure == 0 {
                t.departure
            } else {
                t.departure.saturating_sub(previous)
            };
            previous = t.departure;
            value
        })
        .collect();
    trip.arrivals = trim_trailing(
        times
            .iter()
            .map(|t| match t.arrival {
                0 => 0,
                arrival => t.departure.saturating_sub(arrival),
            })
            .collect(),
        &0,
    );
    trip.pickup_types = trim_trailing(times.iter().map(|t| t.pickup).collect(), &PickupDropoff::Yes);
    trip.dropoff_types = trim_trailing(times.iter().map(|t| t.dropoff).collect(), &PickupDropoff::Yes);
    trip.approximate |= times.iter().any(|t| t.approximate);
}

fn trim_trailing<T: PartialEq>(mut values: Vec<T>, default: &T) -> Vec<T> {
    while values.last() == Some(default) {
        values.pop();
    }
    values
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {human_pos:>7}/{human_len:7} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn table(source: &mut dyn TableSource, name: &str) -> Result<Vec<Row>> {
    source
        .open_table(name)?
        .ok_or_else(|| FeedError::MissingTable(name.to_string()))
}

fn optional_table(source: &mut dyn TableSource, name: &str) -> Result<Vec<Row>> {
    Ok(source.open_table(name)?.unwrap_or_default())
}

fn parse_number<T: FromStr>(table: &str, column: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| FeedError::invalid_value(table, column, value))
}

fn parse_enum<T>(table: &str, column: &str, row: &Row, parse: fn(&str) -> Option<T>) -> Result<T> {
    let value = field(row, column);
    parse(value).ok_or_else(|| FeedError::invalid_value(table, column, value))
}

fn parse_date(table: &str, column: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y%m%d").map_err(|_| FeedError::invalid_value(table, column, value))
}

/// "H:MM:SS" or "HH:MM:SS" to seconds after midnight; hours may exceed 23.
fn parse_time(table: &str, column: &str, value: &str) -> Result<Option<u32>> {
    if value.is_empty() {
        return Ok(None);
    }
    let invalid = || FeedError::invalid_value(table, column, value);
    let parts: Vec<&str> = value.split(':').collect();
    let [hours, minutes, seconds] = parts.as_slice() else {
        return Err(invalid());
    };
    if minutes.len() != 2 || seconds.len() != 2 || hours.is_empty() || hours.len() > 2 {
        return Err(invalid());
    }
    let number = |part: &str| part.parse::<u32>().map_err(|_| invalid());
    Ok(Some(number(*hours)? * 3600 + number(*minutes)? * 60 + number(*seconds)?))
}

fn to_five_seconds(seconds: u32) -> u32 {
    (seconds + 2) / 5
}

fn parse_color(column: &str, row: &Row, default: u32) -> Result<u32> {
    match field(row, column) {
        "" => Ok(default),
        value => u32::from_str_radix(value, 16)
            .ok()
            .filter(|color| *color <= 0xFFFFFF)
            .ok_or_else(|| FeedError::invalid_value("routes", column, value)),
    }
}

/// Stop-level pickup and drop-off: empty means regular service.
fn parse_stop_pickup(column: &str, row: &Row) -> Result<PickupDropoff> {
    match field(row, column) {
        "" => Ok(PickupDropoff::Yes),
        _ => parse_enum("stop_times", column, row, PickupDropoff::from_gtfs),
    }
}

/// Route-level continuous pickup and drop-off: empty means none.
fn parse_route_pickup(column: &str, row: &Row) -> Result<PickupDropoff> {
    match field(row, column) {
        "" => Ok(PickupDropoff::No),
        _ => parse_enum("routes", column, row, PickupDropoff::from_gtfs),
    }
}

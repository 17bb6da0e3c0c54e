#![allow(dead_code)]

use chrono::NaiveDate;
use transit_feed_pack::{MemoryTables, Snapshot, SnapshotBuilder};

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
}

const AGENCY: &str = "agency_id,agency_name,agency_url,agency_timezone,agency_phone\n\
A1,City Lines,https://example.com,Europe/Tallinn,\n";

const CALENDAR: &str = "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
WK,1,1,1,1,1,0,0,20240301,20241231\n\
WE,0,0,0,0,0,1,1,20240301,20241231\n";

const CALENDAR_DATES: &str = "service_id,date,exception_type\nHOL,20240501,1\n";

const STOPS: &str = "stop_id,stop_name,stop_lat,stop_lon,zone_id\n\
S1,Central,59.43,24.75,Z1\n\
S2,Harbour,59.44,24.76,Z1\n\
S3,Airport,59.42,24.80,Z2\n";

const ROUTES: &str = "route_id,agency_id,route_short_name,route_long_name,route_type,route_color,network_id\n\
R1,A1,1,Central - Airport,3,FF0000,N1\n";

const NETWORKS: &str = "network_id,network_name\nN1,City\n";

const AREAS: &str = "area_id,area_name\nAR1,Centre\n";

const STOP_AREAS: &str = "area_id,stop_id\nAR1,S1\n";

const SHAPES: &str = "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
SH1,59.43,24.75,1\nSH1,59.44,24.76,2\nSH1,59.42,24.80,3\n";

const TRIPS: &str = "route_id,service_id,trip_id,trip_headsign,direction_id,shape_id\n\
R1,WK,T1,Airport,0,SH1\nR1,WK,T2,Airport,0,SH1\nR1,WE,T3,Central,1,\n";

const STOP_TIMES: &str = "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
T1,08:00:00,08:00:00,S1,1\nT1,08:10:00,08:11:00,S2,2\nT1,08:20:00,08:20:00,S3,3\n\
T2,09:00:00,09:00:00,S1,1\nT2,09:10:00,09:10:00,S2,2\nT2,09:20:00,09:20:00,S3,3\n\
T3,10:00:00,10:00:00,S3,1\nT3,10:20:00,10:20:00,S1,2\n";

const TRANSFERS: &str = "from_stop_id,to_stop_id,transfer_type,min_transfer_time\nS1,S2,2,61\n";

fn tables(overrides: &[(&str, &str)]) -> MemoryTables {
    let mut tables = MemoryTables::new();
    for (name, text) in [
        ("agency", AGENCY),
        ("calendar", CALENDAR),
        ("calendar_dates", CALENDAR_DATES),
        ("stops", STOPS),
        ("routes", ROUTES),
        ("networks", NETWORKS),
        ("areas", AREAS),
        ("stop_areas", STOP_AREAS),
        ("shapes", SHAPES),
        ("trips", TRIPS),
        ("stop_times", STOP_TIMES),
        ("transfers", TRANSFERS),
    ] {
        tables.add_csv(name, text).unwrap();
    }
    for (name, text) in overrides {
        tables.add_csv(name, text).unwrap();
    }
    tables
}

pub fn feed_v1() -> MemoryTables {
    tables(&[])
}

/// Renames a stop, adds a stop with its own route and trip, retimes a trip,
/// drops another and touches the calendar, shapes, transfers and networks.
pub fn feed_v2() -> MemoryTables {
    tables(&[
        ("calendar_dates", "service_id,date,exception_type\nHOL,20240501,1\nHOL,20240502,1\n"),
        (
            "stops",
            "stop_id,stop_name,stop_lat,stop_lon,zone_id\n\
             S1,Central,59.43,24.75,Z1\n\
             S2,Harbour Terminal,59.44,24.76,Z1\n\
             S3,Airport,59.42,24.80,Z2\n\
             S4,Depot,59.40,24.70,Z2\n",
        ),
        (
            "routes",
            "route_id,agency_id,route_short_name,route_long_name,route_type,route_color,network_id\n\
             R1,A1,1,Central - Airport,3,FF0000,N1\n\
             R2,A1,2,Central - Depot,3,,N1\n",
        ),
        ("networks", "network_id,network_name\nN1,City Transit\n"),
        (
            "shapes",
            "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
             SH1,59.43,24.75,1\nSH1,59.445,24.765,2\nSH1,59.42,24.80,3\n",
        ),
        (
            "trips",
            "route_id,service_id,trip_id,trip_headsign,direction_id,shape_id\n\
             R1,WK,T1,Airport,0,SH1\nR1,WK,T2,Airport,0,SH1\nR2,WK,T4,Depot,0,\n",
        ),
        (
            "stop_times",
            "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
             T1,08:00:00,08:00:00,S1,1\nT1,08:10:00,08:11:00,S2,2\nT1,08:20:00,08:20:00,S3,3\n\
             T2,09:05:00,09:05:00,S1,1\nT2,09:15:00,09:15:00,S2,2\nT2,09:25:00,09:25:00,S3,3\n\
             T4,11:00:00,11:00:00,S1,1\nT4,11:30:00,11:30:00,S4,2\n",
        ),
        (
            "transfers",
            "from_stop_id,to_stop_id,transfer_type,min_transfer_time\nS1,S2,2,120\nS1,S4,0,\n",
        ),
    ])
}

/// Removes what the second version added, brings back the dropped trip on
/// another service, retires the weekend service and adds an area.
pub fn feed_v3() -> MemoryTables {
    tables(&[
        (
            "agency",
            "agency_id,agency_name,agency_url,agency_timezone,agency_phone\n\
             A1,City Lines,https://example.com,Europe/Tallinn,+372 600 0000\n",
        ),
        (
            "calendar",
            "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
             WK,1,1,1,1,1,0,0,20240301,20241231\n",
        ),
        ("calendar_dates", "service_id,date,exception_type\nHOL,20240501,1\nHOL,20240502,1\n"),
        (
            "stops",
            "stop_id,stop_name,stop_lat,stop_lon,zone_id\n\
             S1,Central,59.43,24.75,Z1\n\
             S2,Harbour Terminal,59.44,24.76,Z1\n\
             S3,Airport,59.42,24.80,Z2\n",
        ),
        ("networks", "network_id,network_name\nN1,City Transit\n"),
        ("areas", "area_id,area_name\nAR1,Centre\nAR2,Port\n"),
        ("stop_areas", "area_id,stop_id\nAR1,S1\nAR2,S2\n"),
        (
            "trips",
            "route_id,service_id,trip_id,trip_headsign,direction_id,shape_id\n\
             R1,WK,T1,Airport,0,SH1\nR1,WK,T2,Airport,0,SH1\nR1,WK,T3,Central,1,\n",
        ),
        (
            "stop_times",
            "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
             T1,08:00:00,08:00:00,S1,1\nT1,08:10:00,08:11:00,S2,2\nT1,08:20:00,08:20:00,S3,3\n\
             T2,09:05:00,09:05:00,S1,1\nT2,09:15:00,09:15:00,S2,2\nT2,09:25:00,09:25:00,S3,3\n\
             T3,10:00:00,10:00:00,S3,1\nT3,10:20:00,10:20:00,S1,2\n",
        ),
    ])
}

pub fn build_v1() -> Snapshot {
    SnapshotBuilder::new(1, 20240310)
        .original_url("https://example.com/gtfs.zip")
        .today(today())
        .build(&mut feed_v1())
        .unwrap()
}

pub fn build_next(previous: &Snapshot, date: u32, mut tables: MemoryTables) -> Snapshot {
    SnapshotBuilder::continue_from(previous, date)
        .today(today())
        .build(&mut tables)
        .unwrap()
}

/// Versions 1, 2 and 3 of the test feed, each continuing the previous one.
pub fn build_chain() -> (Snapshot, Snapshot, Snapshot) {
    let v1 = build_v1();
    let v2 = build_next(&v1, 20240311, feed_v2());
    let v3 = build_next(&v2, 20240312, feed_v3());
    (v1, v2, v3)
}

/// Compares everything a snapshot holds except the header's block table.
pub fn assert_same_snapshot(actual: &mut Snapshot, expected: &mut Snapshot) {
    assert_eq!(actual.header.version, expected.header.version);
    assert_eq!(actual.header.date, expected.header.date);
    assert_eq!(actual.header.schema_version, expected.header.schema_version);
    assert_eq!(actual.header.original_url, expected.header.original_url);
    assert_eq!(actual.strings, expected.strings);
    assert_eq!(actual.ids, expected.ids);
    assert_eq!(actual.agencies().unwrap(), expected.agencies().unwrap());
    assert_eq!(actual.calendar().unwrap(), expected.calendar().unwrap());
    assert_eq!(actual.shapes().unwrap(), expected.shapes().unwrap());
    assert_eq!(actual.stops().unwrap(), expected.stops().unwrap());
    assert_eq!(actual.routes().unwrap(), expected.routes().unwrap());
    assert_eq!(actual.trips().unwrap(), expected.trips().unwrap());
    assert_eq!(actual.transfers().unwrap(), expected.transfers().unwrap());
    assert_eq!(actual.networks().unwrap(), expected.networks().unwrap());
    assert_eq!(actual.areas().unwrap(), expected.areas().unwrap());
    assert_eq!(actual.fare_links().unwrap(), expected.fare_links().unwrap());
}

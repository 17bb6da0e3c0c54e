use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::block::{
    document_blocks, pack_payload, write_document, Block, BlockCodec, BlockSource, BlockState,
    Container, DeltaHeader, DocumentHeader, WriteOptions, SCHEMA_VERSION,
};
use crate::codec::calendar::CalendarChanges;
use crate::error::Result;
use crate::ids::IdStore;
use crate::model::{
    Agency, AgencyPatch, Change, FareLinkChanges, Named, Replace, Route, RoutePatch, Shape, Stop,
    StopPatch, Transfer, TransferKey, Trip, TripPatch,
};
use crate::strings::StringTable;

/// Changes that turn the snapshot at `old_version` into the one at `version`.
///
/// String references inside a delta point into the delta's own string
/// table. Its id tables list only the ids above each table's `delta_skip`,
/// which is the base snapshot's last id.
pub struct Delta {
    pub header: DeltaHeader,
    pub strings: StringTable,
    pub ids: IdStore,
    source: Option<Container<DeltaHeader>>,
    agencies: BlockState<Vec<Change<Agency, AgencyPatch>>>,
    calendar: BlockState<Option<CalendarChanges>>,
    shapes: BlockState<Vec<Replace<u32, Shape>>>,
    stops: BlockState<Vec<Change<Stop, StopPatch>>>,
    routes: BlockState<Vec<Change<Route, RoutePatch>>>,
    trips: BlockState<Vec<Change<Trip, TripPatch>>>,
    transfers: BlockState<Vec<Replace<TransferKey, Transfer>>>,
    networks: BlockState<Vec<Replace<u32, Named>>>,
    areas: BlockState<Vec<Replace<u32, Named>>>,
    fare_links: BlockState<FareLinkChanges>,
}

document_blocks!(Delta {
    agencies, agencies_mut, set_agencies: Vec<Change<Agency, AgencyPatch>> => Block::Agency;
    calendar, calendar_mut, set_calendar: Option<CalendarChanges> => Block::Calendar;
    shapes, shapes_mut, set_shapes: Vec<Replace<u32, Shape>> => Block::Shapes;
    stops, stops_mut, set_stops: Vec<Change<Stop, StopPatch>> => Block::Stops;
    routes, routes_mut, set_routes: Vec<Change<Route, RoutePatch>> => Block::Routes;
    trips, trips_mut, set_trips: Vec<Change<Trip, TripPatch>> => Block::Trips;
    transfers, transfers_mut, set_transfers: Vec<Replace<TransferKey, Transfer>> => Block::Transfers;
    networks, networks_mut, set_networks: Vec<Replace<u32, Named>> => Block::Networks;
    areas, areas_mut, set_areas: Vec<Replace<u32, Named>> => Block::Areas;
    fare_links, fare_links_mut, set_fare_links: FareLinkChanges => Block::FareLinks;
});

impl DeltaHeader {
    pub fn new(old_version: u32, version: u32, date: u32) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            old_version,
            version,
            date,
            compressed: true,
            blocks: Vec::new(),
        }
    }
}

impl Delta {
    pub fn new(header: DeltaHeader) -> Self {
        Self {
            header,
            strings: StringTable::new(),
            ids: IdStore::new(),
            source: None,
            agencies: BlockState::NotLoaded,
            calendar: BlockState::NotLoaded,
            shapes: BlockState::NotLoaded,
            stops: BlockState::NotLoaded,
            routes: BlockState::NotLoaded,
            trips: BlockState::NotLoaded,
            transfers: BlockState::NotLoaded,
            networks: BlockState::NotLoaded,
            areas: BlockState::NotLoaded,
            fare_links: BlockState::NotLoaded,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Self::from_source(BlockSource::open(path)?)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_source(BlockSource::Owned(bytes))
    }

    pub fn from_source(source: BlockSource) -> Result<Self> {
        let container = Container::<DeltaHeader>::read(source)?;
        let strings = match container.block_bytes(Block::Strings)? {
            Some(bytes) => StringTable::decode_block(Block::Strings, &bytes)?,
            None => StringTable::new(),
        };
        let ids = match container.block_bytes(Block::Ids)? {
            Some(bytes) => IdStore::decode_block(Block::Ids, &bytes)?,
            None => IdStore::new(),
        };
        let mut delta = Self::new(container.header().clone());
        delta.strings = strings;
        delta.ids = ids;
        delta.source = Some(container);
        Ok(delta)
    }

    /// True when no entity block carries any change.
    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.agencies()?.is_empty()
            && self.calendar()?.is_none()
            && self.shapes()?.is_empty()
            && self.stops()?.is_empty()
            && self.routes()?.is_empty()
            && self.trips()?.is_empty()
            && self.transfers()?.is_empty()
            && self.networks()?.is_empty()
            && self.areas()?.is_empty()
            && self.fare_links()?.is_empty())
    }

    pub fn encode(&self, options: &WriteOptions) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out, options)?;
        Ok(out)
    }

    pub fn write_to<W: Write>(&self, out: &mut W, options: &WriteOptions) -> Result<()> {
        let mut header = self.header.clone();
        if let Some(compress) = options.compress {
            header.set_compressed(compress);
        }
        let compressed = header.compressed();
        let mut payloads = BTreeMap::new();
        if !self.ids.is_empty() {
            payloads.insert(
                Block::Ids,
                pack_payload(self.ids.encode_block()?, compressed, options.level)?,
            );
        }
        payloads.insert(
            Block::Strings,
            pack_payload(self.strings.encode_block()?, compressed, options.level)?,
        );
        payloads.extend(self.entity_payloads(compressed, options.level)?);
        write_document(out, &mut header, &payloads)
    }

    pub fn save(&self, path: &Path, options: &WriteOptions) -> Result<()> {
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        self.write_to(&mut file, options)?;
        file.flush()?;
        Ok(())
    }
}

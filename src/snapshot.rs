use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::block::{
    document_blocks, pack_payload, write_document, Block, BlockCodec, BlockSource, BlockState,
    Container, DocumentHeader, Header, WriteOptions,
};
use crate::codec::calendar::Calendar;
use crate::error::{FeedError, Result};
use crate::ids::IdStore;
use crate::model::{Agency, FareLinks, Names, Route, Shape, Stop, Transfer, Trip};
use crate::strings::StringTable;

/// A complete feed version.
///
/// Strings and ids are decoded when the snapshot is opened; every other
/// block is decoded on first access. Writing re-encodes only the blocks that
/// were modified and copies the rest from the source bytes.
pub struct Snapshot {
    pub header: Header,
    pub strings: StringTable,
    pub ids: IdStore,
    source: Option<Container<Header>>,
    agencies: BlockState<Vec<Agency>>,
    calendar: BlockState<Calendar>,
    shapes: BlockState<Vec<Shape>>,
    stops: BlockState<Vec<Stop>>,
    routes: BlockState<Vec<Route>>,
    trips: BlockState<Vec<Trip>>,
    transfers: BlockState<Vec<Transfer>>,
    networks: BlockState<Names>,
    areas: BlockState<Names>,
    fare_links: BlockState<FareLinks>,
}

document_blocks!(Snapshot {
    agencies, agencies_mut, set_agencies: Vec<Agency> => Block::Agency;
    calendar, calendar_mut, set_calendar: Calendar => Block::Calendar;
    shapes, shapes_mut, set_shapes: Vec<Shape> => Block::Shapes;
    stops, stops_mut, set_stops: Vec<Stop> => Block::Stops;
    routes, routes_mut, set_routes: Vec<Route> => Block::Routes;
    trips, trips_mut, set_trips: Vec<Trip> => Block::Trips;
    transfers, transfers_mut, set_transfers: Vec<Transfer> => Block::Transfers;
    networks, networks_mut, set_networks: Names => Block::Networks;
    areas, areas_mut, set_areas: Names => Block::Areas;
    fare_links, fare_links_mut, set_fare_links: FareLinks => Block::FareLinks;
});

impl Snapshot {
    /// An empty snapshot; every block reads as empty until set.
    pub fn new(header: Header) -> Self {
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
        let container = Container::<Header>::read(source)?;
        let strings = match container.block_bytes(Block::Strings)? {
            Some(bytes) => StringTable::decode_block(Block::Strings, &bytes)?,
            None => StringTable::new(),
        };
        let ids = match container.block_bytes(Block::Ids)? {
            Some(bytes) => IdStore::decode_block(Block::Ids, &bytes)?,
            None => IdStore::new(),
        };
        if let Some(table) = ids.iter().find(|t| t.delta_skip() != 0) {
            return Err(FeedError::malformed_block(
                Block::Ids,
                format!("{} ids of a snapshot must start at 1", table.namespace().name()),
            ));
        }
        log::debug!(
            "Opened snapshot version {} with {} strings",
            container.header().version,
            strings.len()
        );
        let mut snapshot = Self::new(container.header().clone());
        snapshot.strings = strings;
        snapshot.ids = ids;
        snapshot.source = Some(container);
        Ok(snapshot)
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
        payloads.insert(
            Block::Ids,
            pack_payload(self.ids.encode_block()?, compressed, options.level)?,
        );
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

//! Read-only summary of a document: header fields and per-block sizes and
//! record counts.
//!
//! Counts are taken from the validated archives directly, so no block is
//! deserialized into its in-memory form.

use std::path::Path;

use rkyv::api::high::HighValidator;
use rkyv::bytecheck::CheckBytes;
use rkyv::rancor;
use rkyv::vec::ArchivedVec;
use rkyv::Archive;
use serde::Serialize;

use crate::block::{
    aligned, Block, BlockSource, Container, DeltaHeader, DocumentHeader, DocumentKind, Header,
};
use crate::codec::calendar::{CalendarBlock, CalendarChangesBlock};
use crate::codec::coords::PackedShape;
use crate::codec::FareLinksBlock;
use crate::error::{FeedError, Result};
use crate::ids::IdList;
use crate::model::{
    Agency, AgencyPatch, Change, FareLinkChanges, Named, Replace, Route, RoutePatch, Stop,
    StopPatch, Transfer, TransferKey, Trip, TripPatch,
};

#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub kind: DocumentKind,
    pub schema_version: u32,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_version: Option<u32>,
    pub date: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    pub compressed: bool,
    pub blocks: Vec<BlockInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockInfo {
    pub block: &'static str,
    /// Bytes as stored, compressed or not.
    pub stored_size: u64,
    pub size: u64,
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub itineraries: Option<usize>,
    /// Entries in the calendar's shared exception-date pool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dates: Option<usize>,
}

impl DocumentInfo {
    pub fn block(&self, block: Block) -> Option<&BlockInfo> {
        self.blocks.iter().find(|b| b.block == block.name())
    }
}

pub fn inspect_path(path: &Path) -> Result<DocumentInfo> {
    inspect(BlockSource::open(path)?)
}

pub fn inspect(source: BlockSource) -> Result<DocumentInfo> {
    match DocumentKind::detect(&source)? {
        DocumentKind::Snapshot => {
            let container = Container::<Header>::read(source)?;
            let header = container.header();
            Ok(DocumentInfo {
                kind: DocumentKind::Snapshot,
                schema_version: header.schema_version,
                version: header.version,
                old_version: None,
                date: header.date,
                original_url: Some(header.original_url.clone()).filter(|url| !url.is_empty()),
                compressed: header.compressed,
                blocks: block_infos(&container)?,
            })
        }
        DocumentKind::Delta => {
            let container = Container::<DeltaHeader>::read(source)?;
            let header = container.header();
            Ok(DocumentInfo {
                kind: DocumentKind::Delta,
                schema_version: header.schema_version,
                version: header.version,
                old_version: Some(header.old_version),
                date: header.date,
                original_url: None,
                compressed: header.compressed,
                blocks: block_infos(&container)?,
            })
        }
    }
}

fn block_infos<H: DocumentHeader>(container: &Container<H>) -> Result<Vec<BlockInfo>> {
    let mut infos = Vec::new();
    for block in container.blocks() {
        let stored_size = container.stored(block).map_or(0, |s| s.len() as u64);
        let Some(bytes) = container.block_bytes(block)? else {
            continue;
        };
        let counts = match H::KIND {
            DocumentKind::Snapshot => snapshot_counts(block, &bytes)?,
            DocumentKind::Delta => delta_counts(block, &bytes)?,
        };
        infos.push(BlockInfo {
            block: block.name(),
            stored_size,
            size: bytes.len() as u64,
            records: counts.records,
            itineraries: counts.itineraries,
            dates: counts.dates,
        });
    }
    Ok(infos)
}

#[derive(Default)]
struct Counts {
    records: usize,
    itineraries: Option<usize>,
    dates: Option<usize>,
}

impl Counts {
    fn records(records: usize) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }
}

fn with_archived<T, R>(block: Block, bytes: &[u8], f: impl FnOnce(&T::Archived) -> R) -> Result<R>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>,
{
    let buffer = aligned(bytes);
    let archived = rkyv::access::<T::Archived, rancor::Error>(&buffer)
        .map_err(|e| FeedError::malformed_block(block, e))?;
    Ok(f(archived))
}

fn archived_len<T: Archive>(block: Block, bytes: &[u8]) -> Result<usize>
where
    ArchivedVec<T::Archived>: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>,
{
    with_archived::<Vec<T>, usize>(block, bytes, |records| records.len())
}

fn shared_counts(block: Block, bytes: &[u8]) -> Result<Option<Counts>> {
    Ok(match block {
        Block::Strings => Some(Counts::records(archived_len::<String>(block, bytes)?)),
        Block::Ids => Some(Counts::records(with_archived::<Vec<IdList>, usize>(
            block,
            bytes,
            |lists| lists.iter().map(|list| list.ids.len()).sum(),
        )?)),
        _ => None,
    })
}

fn snapshot_counts(block: Block, bytes: &[u8]) -> Result<Counts> {
    if let Some(counts) = shared_counts(block, bytes)? {
        return Ok(counts);
    }
    let records = match block {
        Block::Agency => archived_len::<Agency>(block, bytes)?,
        Block::Calendar => {
            return with_archived::<CalendarBlock, Counts>(block, bytes, |calendar| Counts {
                records: calendar.services.len(),
                dates: Some(calendar.dates.len()),
                ..Counts::default()
            })
        }
        Block::Shapes => archived_len::<PackedShape>(block, bytes)?,
        Block::Stops => archived_len::<Stop>(block, bytes)?,
        Block::Routes => {
            return with_archived::<Vec<Route>, Counts>(block, bytes, |routes| Counts {
                records: routes.len(),
                itineraries: Some(routes.iter().map(|r| r.itineraries.len()).sum()),
                ..Counts::default()
            })
        }
        Block::Trips => archived_len::<Trip>(block, bytes)?,
        Block::Transfers => archived_len::<Transfer>(block, bytes)?,
        Block::Networks | Block::Areas => archived_len::<Named>(block, bytes)?,
        Block::FareLinks => with_archived::<FareLinksBlock, usize>(block, bytes, |links| {
            links.stop_zones.len() + links.stop_areas.len() + links.route_networks.len()
        })?,
        Block::Header | Block::Ids | Block::Strings => 0,
    };
    Ok(Counts::records(records))
}

fn delta_counts(block: Block, bytes: &[u8]) -> Result<Counts> {
    if let Some(counts) = shared_counts(block, bytes)? {
        return Ok(counts);
    }
    let records = match block {
        Block::Agency => archived_len::<Change<Agency, AgencyPatch>>(block, bytes)?,
        Block::Calendar => {
            return with_archived::<CalendarChangesBlock, Counts>(block, bytes, |changes| Counts {
                records: changes.calendar.services.len() + changes.removed.len(),
                dates: Some(changes.calendar.dates.len()),
                ..Counts::default()
            })
        }
        Block::Shapes => archived_len::<Replace<u32, PackedShape>>(block, bytes)?,
        Block::Stops => archived_len::<Change<Stop, StopPatch>>(block, bytes)?,
        Block::Routes => archived_len::<Change<Route, RoutePatch>>(block, bytes)?,
        Block::Trips => archived_len::<Change<Trip, TripPatch>>(block, bytes)?,
        Block::Transfers => archived_len::<Replace<TransferKey, Transfer>>(block, bytes)?,
        Block::Networks | Block::Areas => archived_len::<Replace<u32, Named>>(block, bytes)?,
        Block::FareLinks => with_archived::<FareLinkChanges, usize>(block, bytes, |links| {
            links.stop_zones.len() + links.stop_areas.len() + links.route_networks.len()
        })?,
        Block::Header | Block::Ids | Block::Strings => 0,
    };
    Ok(Counts::records(records))
}

//! Block container shared by snapshots and deltas.
//!
//! Layout: a little-endian `u16` header length (bit 15 set for deltas), the
//! rkyv-archived header, then every populated block in [`Block::PAYLOAD`]
//! order. Each block is an independent rkyv archive, zstd-compressed when
//! the header says so. The header lists the stored size of every payload
//! block; absent blocks have size 0.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::ops::{Deref, Range};
use std::path::Path;

use rkyv::api::high::{HighDeserializer, HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::rancor;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use serde::Serialize;

use crate::error::{FeedError, Result};

pub const SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 10;

const DELTA_FLAG: u16 = 0x8000;
const HEADER_LENGTH_MASK: u16 = 0x7FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Block {
    Header,
    Ids,
    Strings,
    Agency,
    Calendar,
    Shapes,
    Stops,
    Routes,
    Trips,
    Transfers,
    Networks,
    Areas,
    FareLinks,
}

impl Block {
    /// Blocks that follow the header, in stored order.
    pub const PAYLOAD: [Block; 12] = [
        Block::Ids,
        Block::Strings,
        Block::Agency,
        Block::Calendar,
        Block::Shapes,
        Block::Stops,
        Block::Routes,
        Block::Trips,
        Block::Transfers,
        Block::Networks,
        Block::Areas,
        Block::FareLinks,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Block::Header => "header",
            Block::Ids => "ids",
            Block::Strings => "strings",
            Block::Agency => "agency",
            Block::Calendar => "calendar",
            Block::Shapes => "shapes",
            Block::Stops => "stops",
            Block::Routes => "routes",
            Block::Trips => "trips",
            Block::Transfers => "transfers",
            Block::Networks => "networks",
            Block::Areas => "areas",
            Block::FareLinks => "fare_links",
        }
    }

    pub fn from_name(name: &str) -> Option<Block> {
        Self::PAYLOAD.into_iter().find(|b| b.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DocumentKind {
    Snapshot,
    Delta,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Snapshot => write!(f, "snapshot"),
            DocumentKind::Delta => write!(f, "delta"),
        }
    }
}

impl DocumentKind {
    /// Reads the kind from the length prefix without decoding anything else.
    pub fn detect(data: &[u8]) -> Result<DocumentKind> {
        let prefix = data
            .get(..2)
            .ok_or_else(|| FeedError::MalformedHeader("missing length prefix".into()))?;
        let raw = u16::from_le_bytes([prefix[0], prefix[1]]);
        Ok(if raw & DELTA_FLAG != 0 {
            DocumentKind::Delta
        } else {
            DocumentKind::Snapshot
        })
    }
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub struct Header {
    pub schema_version: u32,
    pub version: u32,
    /// Publication date as YYYYMMDD.
    pub date: u32,
    pub original_url: String,
    pub compressed: bool,
    pub blocks: Vec<u64>,
}

impl Header {
    pub fn new(version: u32, date: u32) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            version,
            date,
            original_url: String::new(),
            compressed: true,
            blocks: Vec::new(),
        }
    }
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub struct DeltaHeader {
    pub schema_version: u32,
    pub old_version: u32,
    pub version: u32,
    pub date: u32,
    pub compressed: bool,
    pub blocks: Vec<u64>,
}

pub trait DocumentHeader: Clone + Sized {
    const KIND: DocumentKind;

    fn compressed(&self) -> bool;
    fn set_compressed(&mut self, compressed: bool);
    fn block_sizes(&self) -> &[u64];
    fn set_block_sizes(&mut self, sizes: Vec<u64>);
    /// Checks the fields a document must carry before it is written.
    fn validate(&self) -> Result<()>;
    fn to_bytes(&self) -> Result<Vec<u8>>;
    fn from_bytes(bytes: &[u8]) -> Result<Self>;
}

impl DocumentHeader for Header {
    const KIND: DocumentKind = DocumentKind::Snapshot;

    fn compressed(&self) -> bool {
        self.compressed
    }

    fn set_compressed(&mut self, compressed: bool) {
        self.compressed = compressed;
    }

    fn block_sizes(&self) -> &[u64] {
        &self.blocks
    }

    fn set_block_sizes(&mut self, sizes: Vec<u64>) {
        self.blocks = sizes;
    }

    fn validate(&self) -> Result<()> {
        if self.version == 0 {
            return Err(FeedError::MissingVersion);
        }
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        to_wire(self)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        from_wire(bytes).map_err(|e| FeedError::MalformedHeader(e.to_string()))
    }
}

impl DocumentHeader for DeltaHeader {
    const KIND: DocumentKind = DocumentKind::Delta;

    fn compressed(&self) -> bool {
        self.compressed
    }

    fn set_compressed(&mut self, compressed: bool) {
        self.compressed = compressed;
    }

    fn block_sizes(&self) -> &[u64] {
        &self.blocks
    }

    fn set_block_sizes(&mut self, sizes: Vec<u64>) {
        self.blocks = sizes;
    }

    fn validate(&self) -> Result<()> {
        if self.version == 0 || self.old_version == 0 {
            return Err(FeedError::MissingVersion);
        }
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        to_wire(self)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        from_wire(bytes).map_err(|e| FeedError::MalformedHeader(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Overrides the header's compression flag when set.
    pub compress: Option<bool>,
    pub level: i32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compress: None,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

pub(crate) fn to_wire<T>(value: &T) -> Result<Vec<u8>>
where
    T: for<'a> rkyv::Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, rancor::Error>>,
{
    rkyv::to_bytes::<rancor::Error>(value)
        .map(|bytes| bytes.to_vec())
        .map_err(|e| FeedError::Serialization(e.to_string()))
}

pub(crate) fn from_wire<T>(bytes: &[u8]) -> std::result::Result<T, rancor::Error>
where
    T: rkyv::Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>
        + rkyv::Deserialize<T, HighDeserializer<rancor::Error>>,
{
    rkyv::from_bytes::<T, rancor::Error>(&aligned(bytes))
}

/// Archives must start on an aligned address; block slices inside a file do not.
pub(crate) fn aligned(bytes: &[u8]) -> AlignedVec {
    let mut buffer: AlignedVec = AlignedVec::with_capacity(bytes.len());
    buffer.extend_from_slice(bytes);
    buffer
}

pub(crate) fn compress(data: &[u8], level: i32) -> Result<Vec<u8>> {
    zstd::encode_all(data, level).map_err(FeedError::CompressionFailure)
}

pub(crate) fn decompress(block: Block, data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data).map_err(|source| FeedError::DecompressionFailure { block, source })
}

/// Encoding of one block's in-memory value.
pub trait BlockCodec: Default + Sized {
    /// Empty values are not stored at all.
    fn is_empty(&self) -> bool;
    fn encode_block(&self) -> Result<Vec<u8>>;
    fn decode_block(block: Block, bytes: &[u8]) -> Result<Self>;
}

/// Implements [`BlockCodec`] for types whose rkyv archive is the stored form.
macro_rules! plain_block_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::block::BlockCodec for $ty {
                fn is_empty(&self) -> bool {
                    <$ty>::is_empty(self)
                }

                fn encode_block(&self) -> $crate::error::Result<Vec<u8>> {
                    $crate::block::to_wire(self)
                }

                fn decode_block(
                    block: $crate::block::Block,
                    bytes: &[u8],
                ) -> $crate::error::Result<Self> {
                    $crate::block::from_wire(bytes)
                        .map_err(|e| $crate::error::FeedError::malformed_block(block, e))
                }
            }
        )*
    };
}
pub(crate) use plain_block_codec;

/// Raw bytes of a document, either memory-mapped or owned.
pub enum BlockSource {
    Mapped(memmap2::Mmap),
    Owned(Vec<u8>),
}

impl BlockSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        // Safety: This is safe for as long as the underlying file is not modified.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(BlockSource::Mapped(mmap))
    }
}

impl Deref for BlockSource {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            BlockSource::Mapped(mmap) => mmap,
            BlockSource::Owned(bytes) => bytes,
        }
    }
}

impl From<Vec<u8>> for BlockSource {
    fn from(bytes: Vec<u8>) -> Self {
        BlockSource::Owned(bytes)
    }
}

/// A parsed header plus the byte ranges of every populated block.
pub struct Container<H> {
    header: H,
    source: BlockSource,
    ranges: BTreeMap<Block, Range<usize>>,
}

impl<H: DocumentHeader> Container<H> {
    pub fn read(source: BlockSource) -> Result<Self> {
        let kind = DocumentKind::detect(&source)?;
        if kind != H::KIND {
            return Err(FeedError::DocumentKindMismatch {
                expected: H::KIND,
                found: kind,
            });
        }
        let raw = u16::from_le_bytes([source[0], source[1]]);
        let header_end = 2 + (raw & HEADER_LENGTH_MASK) as usize;
        if header_end > source.len() {
            return Err(FeedError::MalformedHeader(format!(
                "header needs {} bytes, document has {}",
                header_end,
                source.len()
            )));
        }
        let header = H::from_bytes(&source[2..header_end])?;
        let sizes = header.block_sizes();
        if sizes.len() > Block::PAYLOAD.len() {
            return Err(FeedError::MalformedHeader(format!(
                "{} block sizes listed, at most {} known",
                sizes.len(),
                Block::PAYLOAD.len()
            )));
        }

        let mut ranges = BTreeMap::new();
        let mut offset = header_end;
        for (&block, &size) in Block::PAYLOAD.iter().zip(sizes) {
            if size == 0 {
                continue;
            }
            let available = (source.len() - offset) as u64;
            if size > available {
                return Err(FeedError::TruncatedBlock {
                    block,
                    declared: size,
                    available,
                });
            }
            let end = offset + size as usize;
            ranges.insert(block, offset..end);
            offset = end;
        }
        if offset != source.len() {
            log::warn!(
                "Ignoring {} trailing bytes after the last block",
                source.len() - offset
            );
        }
        Ok(Self {
            header,
            source,
            ranges,
        })
    }

    pub fn header(&self) -> &H {
        &self.header
    }

    pub fn compressed(&self) -> bool {
        self.header.compressed()
    }

    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.ranges.keys().copied()
    }

    /// Block bytes exactly as stored.
    pub fn stored(&self, block: Block) -> Option<&[u8]> {
        self.ranges.get(&block).map(|range| &self.source[range.clone()])
    }

    /// Block bytes with compression undone.
    pub fn block_bytes(&self, block: Block) -> Result<Option<Cow<'_, [u8]>>> {
        let Some(stored) = self.stored(block) else {
            return Ok(None);
        };
        if self.compressed() {
            Ok(Some(Cow::Owned(decompress(block, stored)?)))
        } else {
            Ok(Some(Cow::Borrowed(stored)))
        }
    }
}

/// Stores `raw` block bytes in the requested compression.
pub(crate) fn pack_payload(raw: Vec<u8>, compressed: bool, level: i32) -> Result<Vec<u8>> {
    if compressed {
        compress(&raw, level)
    } else {
        Ok(raw)
    }
}

pub(crate) fn write_document<H: DocumentHeader, W: Write>(
    out: &mut W,
    header: &mut H,
    payloads: &BTreeMap<Block, Vec<u8>>,
) -> Result<()> {
    header.validate()?;
    let sizes = Block::PAYLOAD
        .iter()
        .map(|block| payloads.get(block).map_or(0, |p| p.len() as u64))
        .collect();
    header.set_block_sizes(sizes);
    let header_bytes = header.to_bytes()?;
    if header_bytes.len() > HEADER_LENGTH_MASK as usize {
        return Err(FeedError::MalformedHeader(format!(
            "header is {} bytes, the limit is {}",
            header_bytes.len(),
            HEADER_LENGTH_MASK
        )));
    }
    let mut prefix = header_bytes.len() as u16;
    if H::KIND == DocumentKind::Delta {
        prefix |= DELTA_FLAG;
    }
    out.write_all(&prefix.to_le_bytes())?;
    out.write_all(&header_bytes)?;
    for block in Block::PAYLOAD {
        if let Some(payload) = payloads.get(&block) {
            out.write_all(payload)?;
        }
    }
    Ok(())
}

/// Materialization state of one block of a document.
#[derive(Debug, Clone, Default)]
pub enum BlockState<T> {
    #[default]
    NotLoaded,
    Loaded(T),
    Modified(T),
}

impl<T: BlockCodec> BlockState<T> {
    pub fn is_modified(&self) -> bool {
        matches!(self, BlockState::Modified(_))
    }

    pub fn load<H: DocumentHeader>(
        &mut self,
        source: Option<&Container<H>>,
        block: Block,
    ) -> Result<&T> {
        if let BlockState::NotLoaded = self {
            let value = match source {
                Some(container) => match container.block_bytes(block)? {
                    Some(bytes) => T::decode_block(block, &bytes)?,
                    None => T::default(),
                },
                None => T::default(),
            };
            *self = BlockState::Loaded(value);
        }
        Ok(match self {
            BlockState::Loaded(value) | BlockState::Modified(value) => value,
            BlockState::NotLoaded => unreachable!(),
        })
    }

    /// Loads the block and marks it modified.
    pub fn load_mut<H: DocumentHeader>(
        &mut self,
        source: Option<&Container<H>>,
        block: Block,
    ) -> Result<&mut T> {
        self.load(source, block)?;
        if let BlockState::Loaded(value) = std::mem::take(self) {
            *self = BlockState::Modified(value);
        }
        Ok(match self {
            BlockState::Modified(value) => value,
            BlockState::NotLoaded | BlockState::Loaded(_) => unreachable!(),
        })
    }

    /// Stored bytes for this block: re-encoded when modified, otherwise
    /// the bytes of the source document (recompressed only if the
    /// compression setting changed).
    pub(crate) fn payload<H: DocumentHeader>(
        &self,
        source: Option<&Container<H>>,
        block: Block,
        compressed: bool,
        level: i32,
    ) -> Result<Option<Vec<u8>>> {
        match self {
            BlockState::Modified(value) => {
                if value.is_empty() {
                    return Ok(None);
                }
                pack_payload(value.encode_block()?, compressed, level).map(Some)
            }
            BlockState::Loaded(_) | BlockState::NotLoaded => {
                let Some(container) = source else {
                    return Ok(None);
                };
                let Some(stored) = container.stored(block) else {
                    return Ok(None);
                };
                let bytes = match (container.compressed(), compressed) {
                    (true, false) => decompress(block, stored)?,
                    (false, true) => compress(stored, level)?,
                    _ => stored.to_vec(),
                };
                Ok(Some(bytes))
            }
        }
    }
}

/// Generates lazy accessors for the entity blocks of a document type.
///
/// For each `field, field_mut, set_field: Type => Block;` line this adds a
/// loading getter, a getter that marks the block modified, and a setter.
macro_rules! document_blocks {
    ($doc:ident { $($field:ident, $field_mut:ident, $set:ident: $ty:ty => $block:expr;)* }) => {
        impl $doc {
            $(
                pub fn $field(&mut self) -> $crate::error::Result<&$ty> {
                    self.$field.load(self.source.as_ref(), $block)
                }

                pub fn $field_mut(&mut self) -> $crate::error::Result<&mut $ty> {
                    self.$field.load_mut(self.source.as_ref(), $block)
                }

                pub fn $set(&mut self, value: $ty) {
                    self.$field = $crate::block::BlockState::Modified(value);
                }
            )*

            /// Decodes every block that has not been read yet.
            pub fn read_all(&mut self) -> $crate::error::Result<()> {
                $(self.$field.load(self.source.as_ref(), $block)?;)*
                Ok(())
            }

            /// Blocks whose in-memory value differs from the source bytes.
            pub fn modified_blocks(&self) -> Vec<$crate::block::Block> {
                let mut blocks = Vec::new();
                $(
                    if self.$field.is_modified() {
                        blocks.push($block);
                    }
                )*
                blocks
            }

            fn entity_payloads(
                &self,
                compressed: bool,
                level: i32,
            ) -> $crate::error::Result<Vec<($crate::block::Block, Vec<u8>)>> {
                let mut payloads = Vec::new();
                $(
                    if let Some(payload) =
                        self.$field.payload(self.source.as_ref(), $block, compressed, level)?
                    {
                        payloads.push(($block, payload));
                    }
                )*
                Ok(payloads)
            }
        }
    };
}
pub(crate) use document_blocks;

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        Header::new(3, 20240301)
    }

    fn document(payloads: &BTreeMap<Block, Vec<u8>>) -> Vec<u8> {
        let mut out = Vec::new();
        write_document(&mut out, &mut header(), payloads).unwrap();
        out
    }

    #[test]
    fn test_block_ranges_follow_payload_order() {
        let mut payloads = BTreeMap::new();
        payloads.insert(Block::Stops, vec![7u8; 5]);
        payloads.insert(Block::Strings, vec![1u8; 3]);
        let bytes = document(&payloads);

        let container = Container::<Header>::read(bytes.into()).unwrap();
        assert_eq!(container.header().version, 3);
        assert_eq!(container.stored(Block::Strings), Some(&[1u8; 3][..]));
        assert_eq!(container.stored(Block::Stops), Some(&[7u8; 5][..]));
        assert_eq!(container.stored(Block::Routes), None);
        assert_eq!(
            container.blocks().collect::<Vec<_>>(),
            vec![Block::Strings, Block::Stops]
        );
    }

    #[test]
    fn test_kind_mismatch() {
        let bytes = document(&BTreeMap::new());
        assert_eq!(DocumentKind::detect(&bytes).unwrap(), DocumentKind::Snapshot);
        match Container::<DeltaHeader>::read(bytes.into()) {
            Err(FeedError::DocumentKindMismatch { expected, found }) => {
                assert_eq!(expected, DocumentKind::Delta);
                assert_eq!(found, DocumentKind::Snapshot);
            }
            _ => panic!("expected a kind mismatch"),
        }
    }

    #[test]
    fn test_truncated_block() {
        let mut payloads = BTreeMap::new();
        payloads.insert(Block::Trips, vec![0u8; 64]);
        let mut bytes = document(&payloads);
        bytes.truncate(bytes.len() - 10);
        match Container::<Header>::read(bytes.into()) {
            Err(FeedError::TruncatedBlock {
                block,
                declared,
                available,
            }) => {
                assert_eq!(block, Block::Trips);
                assert_eq!(declared, 64);
                assert_eq!(available, 54);
            }
            _ => panic!("expected a truncated block"),
        }
    }

    #[test]
    fn test_malformed_header() {
        assert!(matches!(
            Container::<Header>::read(vec![9u8].into()),
            Err(FeedError::MalformedHeader(_))
        ));
        assert!(matches!(
            Container::<Header>::read(vec![0xFF, 0x00, 1, 2].into()),
            Err(FeedError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_missing_version_is_rejected() {
        let mut out = Vec::new();
        let result = write_document(&mut out, &mut Header::new(0, 0), &BTreeMap::new());
        assert!(matches!(result, Err(FeedError::MissingVersion)));
    }

    #[test]
    fn test_compressed_block_bytes() {
        let raw = b"route route route route route".to_vec();
        let mut payloads = BTreeMap::new();
        payloads.insert(Block::Routes, compress(&raw, DEFAULT_COMPRESSION_LEVEL).unwrap());
        let bytes = document(&payloads);
        let container = Container::<Header>::read(bytes.into()).unwrap();
        assert_eq!(
            container.block_bytes(Block::Routes).unwrap().unwrap().as_ref(),
            raw.as_slice()
        );
    }

    #[test]
    fn test_decompression_failure() {
        let mut payloads = BTreeMap::new();
        payloads.insert(Block::Agency, vec![1, 2, 3, 4]);
        let bytes = document(&payloads);
        let container = Container::<Header>::read(bytes.into()).unwrap();
        assert!(matches!(
            container.block_bytes(Block::Agency),
            Err(FeedError::DecompressionFailure {
                block: Block::Agency,
                ..
            })
        ));
    }
}

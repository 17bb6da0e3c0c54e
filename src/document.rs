use std::path::Path;

use crate::block::{BlockSource, DocumentKind};
use crate::delta::Delta;
use crate::error::{FeedError, Result};
use crate::snapshot::Snapshot;

/// A document of either kind, as told by its length prefix.
pub enum Document {
    Snapshot(Snapshot),
    Delta(Delta),
}

impl Document {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_source(BlockSource::open(path)?)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_source(BlockSource::Owned(bytes))
    }

    pub fn from_source(source: BlockSource) -> Result<Self> {
        Ok(match DocumentKind::detect(&source)? {
            DocumentKind::Snapshot => Document::Snapshot(Snapshot::from_source(source)?),
            DocumentKind::Delta => Document::Delta(Delta::from_source(source)?),
        })
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Snapshot(_) => DocumentKind::Snapshot,
            Document::Delta(_) => DocumentKind::Delta,
        }
    }

    pub fn into_snapshot(self) -> Result<Snapshot> {
        match self {
            Document::Snapshot(snapshot) => Ok(snapshot),
            Document::Delta(_) => Err(FeedError::DocumentKindMismatch {
                expected: DocumentKind::Snapshot,
                found: DocumentKind::Delta,
            }),
        }
    }

    pub fn into_delta(self) -> Result<Delta> {
        match self {
            Document::Delta(delta) => Ok(delta),
            Document::Snapshot(_) => Err(FeedError::DocumentKindMismatch {
                expected: DocumentKind::Delta,
                found: DocumentKind::Snapshot,
            }),
        }
    }
}

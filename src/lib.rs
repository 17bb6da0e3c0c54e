//! Compact binary snapshots of public transit feeds, and the deltas between
//! consecutive versions.
//!
//! A [`Snapshot`] is built from GTFS-style tables with a [`SnapshotBuilder`],
//! written as a block container and read back lazily. [`diff`] turns two
//! snapshots of one id chain into a [`Delta`], [`merge`] folds consecutive
//! deltas together and [`apply`] replays a delta on its base snapshot.

pub mod apply;
pub mod block;
pub mod builder;
pub mod codec;
pub mod delta;
pub mod diff;
pub mod document;
pub mod error;
pub mod ids;
pub mod info;
pub mod merge;
pub mod model;
pub mod snapshot;
pub mod source;
pub mod strings;
mod varint;

pub use apply::apply;
pub use block::{Block, BlockSource, DeltaHeader, DocumentKind, Header, WriteOptions};
pub use builder::SnapshotBuilder;
pub use delta::Delta;
pub use diff::{diff, DiffOptions};
pub use document::Document;
pub use error::{FeedError, Result};
pub use ids::{IdStore, IdTable, Namespace};
pub use info::{inspect, inspect_path, DocumentInfo};
pub use merge::merge;
pub use snapshot::Snapshot;
pub use source::{DirectorySource, MemoryTables, TableSource};
pub use strings::StringTable;

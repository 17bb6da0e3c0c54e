use std::ops::{Index, IndexMut};

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::block::{from_wire, to_wire, Block, BlockCodec};
use crate::error::{FeedError, Result};

/// Kinds of entities that get dense numeric ids.
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
)]
#[rkyv(derive(Debug))]
pub enum Namespace {
    Agency,
    Service,
    Shape,
    Stop,
    Route,
    Itinerary,
    Trip,
    Network,
    Area,
    Zone,
}

impl Namespace {
    pub const ALL: [Namespace; 10] = [
        Namespace::Agency,
        Namespace::Service,
        Namespace::Shape,
        Namespace::Stop,
        Namespace::Route,
        Namespace::Itinerary,
        Namespace::Trip,
        Namespace::Network,
        Namespace::Area,
        Namespace::Zone,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Namespace::Agency => "agency",
            Namespace::Service => "service",
            Namespace::Shape => "shape",
            Namespace::Stop => "stop",
            Namespace::Route => "route",
            Namespace::Itinerary => "itinerary",
            Namespace::Trip => "trip",
            Namespace::Network => "network",
            Namespace::Area => "area",
            Namespace::Zone => "zone",
        }
    }

    fn position(self) -> usize {
        self as usize
    }
}

/// Bidirectional map between source identifiers and dense ids.
///
/// Ids start at 1 and are never reused. A table read from a delta only knows
/// the ids above `delta_skip`; the lower ones belong to the base snapshot and
/// take no space.
#[derive(Debug, Clone, PartialEq)]
pub struct IdTable {
    namespace: Namespace,
    // originals[i] is id `delta_skip + 1 + i`; unknown slots hold "".
    originals: Vec<String>,
    ids: FxHashMap<String, u32>,
    delta_skip: u32,
}

impl IdTable {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            originals: Vec::new(),
            ids: FxHashMap::default(),
            delta_skip: 0,
        }
    }

    /// Rebuilds a table from a stored list; entry `i` gets id
    /// `delta_skip + 1 + i`.
    pub fn from_list(namespace: Namespace, list: Vec<String>, delta_skip: u32) -> Self {
        let mut table = Self::new(namespace);
        table.delta_skip = delta_skip;
        for original in list {
            let id = table.next_id();
            if !original.is_empty() {
                table.ids.entry(original.clone()).or_insert(id);
            }
            table.originals.push(original);
        }
        table
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    fn next_id(&self) -> u32 {
        self.delta_skip + self.originals.len() as u32 + 1
    }

    fn slot(&self, id: u32) -> Option<usize> {
        id.checked_sub(self.delta_skip + 1).map(|offset| offset as usize)
    }

    /// Returns the id of `original`, allocating `last_id + 1` when unseen.
    /// The empty string is never registered and maps to 0.
    pub fn add(&mut self, original: &str) -> u32 {
        if original.is_empty() {
            return 0;
        }
        if let Some(&id) = self.ids.get(original) {
            return id;
        }
        let id = self.next_id();
        self.ids.insert(original.to_string(), id);
        self.originals.push(original.to_string());
        id
    }

    pub fn get(&self, original: &str) -> Result<u32> {
        self.find(original)
            .ok_or_else(|| FeedError::UnknownIdentifier {
                namespace: self.namespace,
                id: original.to_string(),
            })
    }

    /// Tolerant lookup: unknown identifiers yield `None` instead of an error.
    pub fn find(&self, original: &str) -> Option<u32> {
        self.ids.get(original).copied()
    }

    pub fn original(&self, id: u32) -> Option<&str> {
        self.slot(id)
            .and_then(|slot| self.originals.get(slot))
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn last_id(&self) -> u32 {
        self.delta_skip + self.originals.len() as u32
    }

    pub fn delta_skip(&self) -> u32 {
        self.delta_skip
    }

    /// Moves the table's base. Raising it forgets the ids at or below the
    /// new base.
    pub fn set_delta_skip(&mut self, delta_skip: u32) {
        if delta_skip >= self.delta_skip {
            let dropped = ((delta_skip - self.delta_skip) as usize).min(self.originals.len());
            for original in self.originals.drain(..dropped) {
                if self.ids.get(&original).is_some_and(|&id| id <= delta_skip) {
                    self.ids.remove(&original);
                }
            }
        } else {
            let padding = (self.delta_skip - delta_skip) as usize;
            self.originals
                .splice(0..0, std::iter::repeat(String::new()).take(padding));
        }
        self.delta_skip = delta_skip;
    }

    /// Number of known identifiers.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Source identifiers for ids `delta_skip + 1 ..= last_id`, in id order.
    pub fn to_list(&self) -> Vec<String> {
        self.originals.clone()
    }

    /// Registers `original` under a fixed id, growing the table as needed.
    /// Ids at or below `delta_skip` are ignored.
    pub fn insert(&mut self, id: u32, original: &str) {
        if original.is_empty() {
            return;
        }
        let Some(slot) = self.slot(id) else {
            return;
        };
        if slot >= self.originals.len() {
            self.originals.resize(slot + 1, String::new());
        }
        self.originals[slot] = original.to_string();
        self.ids.entry(original.to_string()).or_insert(id);
    }

    /// Copies every id that `other` knows above its own `delta_skip`.
    pub fn extend_from(&mut self, other: &IdTable) {
        for (id, original) in other.iter() {
            self.insert(id, original);
        }
    }

    /// First id of this table, above `newer`'s own base, that `newer`
    /// lacks or binds to a different source identifier.
    pub fn first_conflict(&self, newer: &IdTable) -> Option<(u32, &str)> {
        self.iter()
            .find(|&(id, original)| id > newer.delta_skip && newer.original(id) != Some(original))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        let first = self.delta_skip + 1;
        self.originals
            .iter()
            .enumerate()
            .filter(|(_, original)| !original.is_empty())
            .map(move |(offset, original)| (first + offset as u32, original.as_str()))
    }
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub struct IdList {
    pub namespace: Namespace,
    pub delta_skip: u32,
    pub ids: Vec<String>,
}

/// One [`IdTable`] per [`Namespace`].
#[derive(Debug, Clone, PartialEq)]
pub struct IdStore {
    tables: Vec<IdTable>,
}

impl Default for IdStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IdStore {
    pub fn new() -> Self {
        Self {
            tables: Namespace::ALL.into_iter().map(IdTable::new).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &IdTable> {
        self.tables.iter()
    }

    /// Marks every table as a delta table on top of `base`.
    pub fn skip_base(&mut self, base: &IdStore) {
        for namespace in Namespace::ALL {
            let skip = base[namespace].last_id();
            self[namespace].set_delta_skip(skip);
        }
    }

    pub fn extend_from(&mut self, other: &IdStore) {
        for namespace in Namespace::ALL {
            self[namespace].extend_from(&other[namespace]);
        }
    }
}

impl Index<Namespace> for IdStore {
    type Output = IdTable;

    fn index(&self, namespace: Namespace) -> &IdTable {
        &self.tables[namespace.position()]
    }
}

impl IndexMut<Namespace> for IdStore {
    fn index_mut(&mut self, namespace: Namespace) -> &mut IdTable {
        &mut self.tables[namespace.position()]
    }
}

impl BlockCodec for IdStore {
    fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.last_id() == t.delta_skip)
    }

    fn encode_block(&self) -> Result<Vec<u8>> {
        let lists: Vec<IdList> = self
            .tables
            .iter()
            .filter(|t| t.last_id() > t.delta_skip)
            .map(|t| IdList {
                namespace: t.namespace,
                delta_skip: t.delta_skip,
                ids: t.to_list(),
            })
            .collect();
        to_wire(&lists)
    }

    fn decode_block(block: Block, bytes: &[u8]) -> Result<Self> {
        let lists: Vec<IdList> = from_wire(bytes).map_err(|e| FeedError::malformed_block(block, e))?;
        let mut store = IdStore::new();
        for list in lists {
            let end = u64::from(list.delta_skip) + list.ids.len() as u64;
            if end >= u64::from(u32::MAX) {
                return Err(FeedError::malformed_block(
                    block,
                    format!("{} ids run past the id range", list.namespace.name()),
                ));
            }
            store[list.namespace] = IdTable::from_list(list.namespace, list.ids, list.delta_skip);
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_allocates_sequentially() {
        let mut stops = IdTable::new(Namespace::Stop);
        assert_eq!(stops.add("A"), 1);
        assert_eq!(stops.add("B"), 2);
        assert_eq!(stops.add("A"), 1);
        assert_eq!(stops.add(""), 0);
        assert_eq!(stops.last_id(), 2);
        assert_eq!(stops.original(2), Some("B"));
    }

    #[test]
    fn test_strict_and_tolerant_lookup() {
        let mut trips = IdTable::new(Namespace::Trip);
        trips.add("t1");
        assert_eq!(trips.get("t1").unwrap(), 1);
        assert_eq!(trips.find("t2"), None);
        match trips.get("t2") {
            Err(FeedError::UnknownIdentifier { namespace, id }) => {
                assert_eq!(namespace, Namespace::Trip);
                assert_eq!(id, "t2");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_delta_skip_list() {
        let mut routes = IdTable::new(Namespace::Route);
        for original in ["r1", "r2", "r3", "r4"] {
            routes.add(original);
        }
        routes.set_delta_skip(2);
        assert_eq!(routes.to_list(), vec!["r3".to_string(), "r4".to_string()]);

        let restored = IdTable::from_list(Namespace::Route, routes.to_list(), 2);
        assert_eq!(restored.get("r3").unwrap(), 3);
        assert_eq!(restored.get("r4").unwrap(), 4);
        assert_eq!(restored.find("r1"), None);
        assert_eq!(restored.last_id(), 4);
    }

    #[test]
    fn test_extend_from_delta_table() {
        let mut base = IdTable::new(Namespace::Stop);
        base.add("A");
        let mut newer = base.clone();
        newer.add("B");
        newer.add("C");
        newer.set_delta_skip(base.last_id());

        base.extend_from(&newer);
        assert_eq!(base.get("B").unwrap(), 2);
        assert_eq!(base.get("C").unwrap(), 3);
        assert_eq!(base.add("D"), 4);
    }

    #[test]
    fn test_store_block_round_trip() {
        let mut store = IdStore::new();
        store[Namespace::Stop].add("S1");
        store[Namespace::Trip].add("T1");
        store[Namespace::Trip].add("T2");
        let bytes = store.encode_block().unwrap();
        let decoded = IdStore::decode_block(Block::Ids, &bytes).unwrap();
        assert_eq!(decoded, store);
    }

    #[test]
    fn test_high_delta_skip_takes_no_space() {
        let lists = vec![IdList {
            namespace: Namespace::Stop,
            delta_skip: 60_000_000,
            ids: vec!["far".to_string()],
        }];
        let decoded = IdStore::decode_block(Block::Ids, &to_wire(&lists).unwrap()).unwrap();
        let stops = &decoded[Namespace::Stop];
        assert_eq!(stops.last_id(), 60_000_001);
        assert_eq!(stops.get("far").unwrap(), 60_000_001);
        assert_eq!(stops.original(5), None);
        assert_eq!(stops.to_list(), vec!["far".to_string()]);
    }

    #[test]
    fn test_id_range_overflow_is_malformed() {
        let lists = vec![IdList {
            namespace: Namespace::Trip,
            delta_skip: u32::MAX - 1,
            ids: vec!["t".to_string()],
        }];
        assert!(matches!(
            IdStore::decode_block(Block::Ids, &to_wire(&lists).unwrap()),
            Err(FeedError::MalformedBlock {
                block: Block::Ids,
                ..
            })
        ));
    }

    #[test]
    fn test_raising_skip_forgets_lower_ids() {
        let mut stops = IdTable::new(Namespace::Stop);
        for original in ["A", "B", "C"] {
            stops.add(original);
        }
        stops.set_delta_skip(2);
        assert_eq!(stops.find("A"), None);
        assert_eq!(stops.get("C").unwrap(), 3);
        assert_eq!(stops.iter().collect::<Vec<_>>(), vec![(3, "C")]);
        assert_eq!(stops.add("D"), 4);
    }

    #[test]
    fn test_first_conflict() {
        let mut old = IdTable::new(Namespace::Stop);
        old.add("S1");
        old.add("S2");
        let mut continued = old.clone();
        continued.add("S3");
        assert_eq!(old.first_conflict(&continued), None);

        let mut fresh = IdTable::new(Namespace::Stop);
        fresh.add("S2");
        fresh.add("S1");
        assert_eq!(old.first_conflict(&fresh), Some((1, "S1")));

        let mut shorter = IdTable::new(Namespace::Stop);
        shorter.add("S1");
        assert_eq!(old.first_conflict(&shorter), Some((2, "S2")));
    }
}

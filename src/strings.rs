use rustc_hash::FxHashMap;

use crate::block::{from_wire, to_wire, Block, BlockCodec};
use crate::error::{FeedError, Result};
use crate::model::StringRefs;

/// Deduplicated string table. Index 0 is always the empty string and stands
/// for "absent" wherever a string reference is optional.
#[derive(Debug, Clone, PartialEq)]
pub struct StringTable {
    strings: Vec<String>,
    index: FxHashMap<String, u32>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    pub fn new() -> Self {
        let mut index = FxHashMap::default();
        index.insert(String::new(), 0);
        Self {
            strings: vec![String::new()],
            index,
        }
    }

    /// Rebuilds a table from its stored list. A list that does not start
    /// with the empty string gets one prepended.
    pub fn from_strings(strings: Vec<String>) -> Self {
        let mut table = Self::new();
        for (position, s) in strings.into_iter().enumerate() {
            if position == 0 && s.is_empty() {
                continue;
            }
            // Duplicates in a stored list keep their slot so that references stay valid.
            let id = table.strings.len() as u32;
            table.index.entry(s.clone()).or_insert(id);
            table.strings.push(s);
        }
        table
    }

    /// Returns the index of `s`, appending it when not yet present.
    pub fn add(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.index.get(s) {
            return id;
        }
        let id = self.strings.len() as u32;
        self.index.insert(s.to_string(), id);
        self.strings.push(s.to_string());
        id
    }

    pub fn add_opt(&mut self, s: Option<&str>) -> u32 {
        s.map_or(0, |s| self.add(s))
    }

    /// The string at `index`, `None` for 0 and for indices past the end.
    pub fn get(&self, index: u32) -> Option<&str> {
        match index {
            0 => None,
            _ => self.strings.get(index as usize).map(String::as_str),
        }
    }

    /// Like [`StringTable::get`] but maps missing entries to "".
    pub fn resolve(&self, index: u32) -> &str {
        self.get(index).unwrap_or("")
    }

    pub fn index_of(&self, s: &str) -> Option<u32> {
        self.index.get(s).copied()
    }

    /// Case-insensitive lookup; returns the first matching index.
    pub fn search(&self, s: &str) -> Option<u32> {
        if s.is_empty() {
            return None;
        }
        if let Some(id) = self.index_of(s) {
            return Some(id);
        }
        let needle = s.to_lowercase();
        self.strings
            .iter()
            .position(|candidate| candidate.to_lowercase() == needle)
            .map(|position| position as u32)
    }

    /// Number of entries, the reserved empty string included.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.strings
    }
}

/// Moves string references from one table into another, by value.
pub(crate) struct StringRemap {
    map: Vec<u32>,
    out_of_range: bool,
}

impl StringRemap {
    /// Appends every string of `from` that `to` lacks, in `from`'s order.
    pub fn append(from: &StringTable, to: &mut StringTable) -> Self {
        Self {
            map: from.iter().map(|s| to.add(s)).collect(),
            out_of_range: false,
        }
    }

    pub fn remap<T: StringRefs>(&mut self, block: Block, records: &mut [T]) -> Result<()> {
        let map = &self.map;
        let out_of_range = &mut self.out_of_range;
        for record in records {
            record.map_strings(&mut |index| match map.get(index as usize) {
                Some(&mapped) => mapped,
                None => {
                    *out_of_range = true;
                    0
                }
            });
        }
        if std::mem::take(out_of_range) {
            return Err(FeedError::malformed_block(block, "string reference out of range"));
        }
        Ok(())
    }
}

impl BlockCodec for StringTable {
    fn is_empty(&self) -> bool {
        StringTable::is_empty(self)
    }

    fn encode_block(&self) -> Result<Vec<u8>> {
        to_wire(&self.strings)
    }

    fn decode_block(block: Block, bytes: &[u8]) -> Result<Self> {
        let strings: Vec<String> =
            from_wire(bytes).map_err(|e| FeedError::malformed_block(block, e))?;
        Ok(Self::from_strings(strings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string_is_zero() {
        let mut table = StringTable::new();
        assert_eq!(table.add(""), 0);
        assert_eq!(table.add_opt(None), 0);
        assert_eq!(table.get(0), None);
        assert_eq!(table.resolve(0), "");
        assert!(table.is_empty());
    }

    #[test]
    fn test_add_deduplicates() {
        let mut table = StringTable::new();
        let harbour = table.add("Harbour");
        let depot = table.add("Depot");
        assert_eq!(harbour, 1);
        assert_eq!(depot, 2);
        assert_eq!(table.add("Harbour"), harbour);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(depot), Some("Depot"));
        assert_eq!(table.get(17), None);
    }

    #[test]
    fn test_search_ignores_case() {
        let mut table = StringTable::new();
        table.add("Old Town");
        table.add("Airport");
        assert_eq!(table.search("old town"), Some(1));
        assert_eq!(table.search("AIRPORT"), Some(2));
        assert_eq!(table.search("Harbour"), None);
        assert_eq!(table.search(""), None);
    }

    #[test]
    fn test_block_round_trip() {
        let mut table = StringTable::new();
        table.add("Tallinn");
        table.add("Tartu");
        let bytes = table.encode_block().unwrap();
        let decoded = StringTable::decode_block(Block::Strings, &bytes).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn test_from_strings_prepends_empty() {
        let table = StringTable::from_strings(vec!["a".into(), "b".into()]);
        assert_eq!(table.index_of("a"), Some(1));
        assert_eq!(table.resolve(2), "b");
    }

    #[test]
    fn test_remap_by_value() {
        let mut from = StringTable::new();
        let depot = from.add("Depot");
        let harbour = from.add("Harbour");
        let mut to = StringTable::new();
        to.add("Harbour");
        let mut remap = StringRemap::append(&from, &mut to);
        let mut stops = vec![crate::model::Stop {
            name: depot,
            ..Default::default()
        }];
        remap.remap(Block::Stops, &mut stops).unwrap();
        assert_eq!(to.resolve(stops[0].name), "Depot");
        assert_eq!(to.index_of("Harbour"), Some(1));
        assert_ne!(harbour, 1);

        stops[0].name = 40;
        assert!(matches!(
            remap.remap(Block::Stops, &mut stops),
            Err(FeedError::MalformedBlock { .. })
        ));
    }
}

pub mod calendar;
pub mod coords;
pub mod itinerary;

use std::collections::BTreeMap;

use crate::block::{from_wire, plain_block_codec, to_wire, Block, BlockCodec};
use crate::error::{FeedError, Result};
use crate::model::{
    names_to_records, records_to_names, Agency, AgencyPatch, Change, FareLinkChanges, FareLinks,
    Named, Names, Replace, Route, RoutePatch, Transfer, TransferKey, Trip, TripPatch,
};

plain_block_codec!(
    Vec<Agency>,
    Vec<Route>,
    Vec<Trip>,
    Vec<Transfer>,
    Vec<Change<Agency, AgencyPatch>>,
    Vec<Change<Route, RoutePatch>>,
    Vec<Change<Trip, TripPatch>>,
    Vec<Replace<TransferKey, Transfer>>,
    Vec<Replace<u32, Named>>,
    FareLinkChanges,
);

impl BlockCodec for Names {
    fn is_empty(&self) -> bool {
        BTreeMap::is_empty(self)
    }

    fn encode_block(&self) -> Result<Vec<u8>> {
        to_wire(&names_to_records(self))
    }

    fn decode_block(block: Block, bytes: &[u8]) -> Result<Self> {
        let records: Vec<Named> =
            from_wire(bytes).map_err(|e| FeedError::malformed_block(block, e))?;
        Ok(records_to_names(records))
    }
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub id: u32,
    pub target: u32,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq, Default)]
pub struct FareLinksBlock {
    pub stop_zones: Vec<Link>,
    pub stop_areas: Vec<Link>,
    pub route_networks: Vec<Link>,
}

fn to_links(map: &BTreeMap<u32, u32>) -> Vec<Link> {
    map.iter()
        .map(|(&id, &target)| Link { id, target })
        .collect()
}

fn from_links(links: Vec<Link>) -> BTreeMap<u32, u32> {
    links.into_iter().map(|l| (l.id, l.target)).collect()
}

impl BlockCodec for FareLinks {
    fn is_empty(&self) -> bool {
        FareLinks::is_empty(self)
    }

    fn encode_block(&self) -> Result<Vec<u8>> {
        to_wire(&FareLinksBlock {
            stop_zones: to_links(&self.stop_zones),
            stop_areas: to_links(&self.stop_areas),
            route_networks: to_links(&self.route_networks),
        })
    }

    fn decode_block(block: Block, bytes: &[u8]) -> Result<Self> {
        let stored: FareLinksBlock =
            from_wire(bytes).map_err(|e| FeedError::malformed_block(block, e))?;
        Ok(FareLinks {
            stop_zones: from_links(stored.stop_zones),
            stop_areas: from_links(stored.stop_areas),
            route_networks: from_links(stored.route_networks),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinkUpdate;

    #[test]
    fn test_names_round_trip() {
        let mut names = Names::new();
        names.insert(1, "City".to_string());
        names.insert(4, "County".to_string());
        let bytes = names.encode_block().unwrap();
        assert_eq!(Names::decode_block(Block::Networks, &bytes).unwrap(), names);
    }

    #[test]
    fn test_fare_links_round_trip() {
        let mut links = FareLinks::default();
        links.stop_zones.insert(3, 1);
        links.route_networks.insert(2, 5);
        let bytes = links.encode_block().unwrap();
        assert_eq!(FareLinks::decode_block(Block::FareLinks, &bytes).unwrap(), links);
    }

    #[test]
    fn test_change_lists_round_trip() {
        let changes: Vec<Change<Agency, AgencyPatch>> = vec![
            Change::Put(Agency {
                agency_id: 2,
                name: "Ferries".into(),
                ..Agency::default()
            }),
            Change::Patch(AgencyPatch {
                agency_id: 3,
                phone: Some(String::new()),
                ..AgencyPatch::default()
            }),
            Change::Delete(4),
        ];
        let bytes = changes.encode_block().unwrap();
        assert_eq!(
            Vec::<Change<Agency, AgencyPatch>>::decode_block(Block::Agency, &bytes).unwrap(),
            changes
        );

        let unlinks = FareLinkChanges {
            stop_areas: vec![LinkUpdate { id: 1, target: None }],
            ..FareLinkChanges::default()
        };
        let bytes = unlinks.encode_block().unwrap();
        assert_eq!(
            FareLinkChanges::decode_block(Block::FareLinks, &bytes).unwrap(),
            unlinks
        );
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            Vec::<Route>::decode_block(Block::Routes, &[1, 2, 3]),
            Err(FeedError::MalformedBlock {
                block: Block::Routes,
                ..
            })
        ));
    }
}

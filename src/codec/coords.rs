//! Fixed-point coordinates, delta-coded along a cursor.
//!
//! Decoding only works on the stored order: each point is an offset from the
//! point decoded before it, across record boundaries.

use serde::Serialize;

use crate::block::{from_wire, to_wire, Block, BlockCodec};
use crate::error::{FeedError, Result};
use crate::model::{Change, Keyed, Replace, Stop, StopPatch, StringRefs};
use crate::varint::{decode_signed, encode_signed};

/// Degrees are stored multiplied by this and rounded.
pub const COORD_SCALE: f64 = 100_000.0;

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
    Hash,
    Default,
)]
#[rkyv(derive(Debug))]
pub struct Coord {
    pub lon: i32,
    pub lat: i32,
}

impl Coord {
    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self {
            lon: (lon * COORD_SCALE).round() as i32,
            lat: (lat * COORD_SCALE).round() as i32,
        }
    }

    pub fn to_degrees(self) -> (f64, f64) {
        (self.lon as f64 / COORD_SCALE, self.lat as f64 / COORD_SCALE)
    }
}

/// Running position of a delta-coded coordinate stream.
#[derive(Debug, Default)]
pub struct CoordCursor {
    last: Coord,
}

impl CoordCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, point: Coord) -> Coord {
        let delta = Coord {
            lon: point.lon.wrapping_sub(self.last.lon),
            lat: point.lat.wrapping_sub(self.last.lat),
        };
        self.last = point;
        delta
    }

    pub fn decode(&mut self, delta: Coord) -> Coord {
        let point = Coord {
            lon: self.last.lon.wrapping_add(delta.lon),
            lat: self.last.lat.wrapping_add(delta.lat),
        };
        self.last = point;
        point
    }

    /// Appends `points` as zigzag varint (lon, lat) delta pairs.
    pub fn pack(&mut self, points: &[Coord], out: &mut Vec<u8>) {
        for &point in points {
            let delta = self.encode(point);
            encode_signed(i64::from(delta.lon), out);
            encode_signed(i64::from(delta.lat), out);
        }
    }

    pub fn unpack(&mut self, data: &[u8]) -> Option<Vec<Coord>> {
        let mut points = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let lon = decode_signed(data, &mut pos)? as i32;
            let lat = decode_signed(data, &mut pos)? as i32;
            points.push(self.decode(Coord { lon, lat }));
        }
        Some(points)
    }
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Shape {
    pub shape_id: u32,
    pub points: Vec<Coord>,
}

impl Shape {
    /// Builds a shape from (lon, lat) degree pairs; at least two are required.
    pub fn from_degrees(shape_id: u32, coords: &[(f64, f64)]) -> Result<Self> {
        let shape = Self {
            shape_id,
            points: coords
                .iter()
                .map(|&(lon, lat)| Coord::from_degrees(lon, lat))
                .collect(),
        };
        shape.validate()?;
        Ok(shape)
    }

    pub fn to_degrees(&self) -> Vec<(f64, f64)> {
        self.points.iter().map(|p| p.to_degrees()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.points.len() < 2 {
            return Err(FeedError::InvalidShape {
                shape_id: self.shape_id,
                points: self.points.len(),
            });
        }
        Ok(())
    }
}

impl Keyed for Shape {
    type Key = u32;

    fn key(&self) -> u32 {
        self.shape_id
    }
}

impl StringRefs for Shape {}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub struct PackedShape {
    pub shape_id: u32,
    pub points: Vec<u8>,
}

fn pack_shape(cursor: &mut CoordCursor, shape: &Shape) -> Result<PackedShape> {
    shape.validate()?;
    let mut points = Vec::with_capacity(shape.points.len() * 4);
    cursor.pack(&shape.points, &mut points);
    Ok(PackedShape {
        shape_id: shape.shape_id,
        points,
    })
}

fn unpack_shape(cursor: &mut CoordCursor, block: Block, packed: &PackedShape) -> Result<Shape> {
    let points = cursor.unpack(&packed.points).ok_or_else(|| {
        FeedError::malformed_block(block, format!("bad point stream in shape {}", packed.shape_id))
    })?;
    Ok(Shape {
        shape_id: packed.shape_id,
        points,
    })
}

/// Shapes are chained in ascending id order: the first point of a shape is
/// an offset from the last point of the previous one.
pub fn pack_shapes(shapes: &[Shape]) -> Result<Vec<PackedShape>> {
    let mut sorted: Vec<&Shape> = shapes.iter().collect();
    sorted.sort_by_key(|s| s.shape_id);
    let mut cursor = CoordCursor::new();
    sorted
        .into_iter()
        .map(|shape| pack_shape(&mut cursor, shape))
        .collect()
}

pub fn unpack_shapes(block: Block, packed: &[PackedShape]) -> Result<Vec<Shape>> {
    let mut cursor = CoordCursor::new();
    packed
        .iter()
        .map(|p| unpack_shape(&mut cursor, block, p))
        .collect()
}

/// Stops are delta-coded in ascending id order; stops without a position
/// are skipped by the cursor.
pub fn pack_stops(stops: &[Stop]) -> Vec<Stop> {
    let mut sorted = stops.to_vec();
    sorted.sort_by_key(|s| s.stop_id);
    let mut cursor = CoordCursor::new();
    for stop in &mut sorted {
        stop.position = stop.position.map(|p| cursor.encode(p));
    }
    sorted
}

pub fn unpack_stops(mut stops: Vec<Stop>) -> Vec<Stop> {
    let mut cursor = CoordCursor::new();
    for stop in &mut stops {
        stop.position = stop.position.map(|d| cursor.decode(d));
    }
    stops
}

/// Stop changes chain their positions like snapshot stops, in id order.
/// Tombstones and patches that leave the position alone skip the cursor.
pub fn pack_stop_changes(changes: &[Change<Stop, StopPatch>]) -> Vec<Change<Stop, StopPatch>> {
    let mut sorted = changes.to_vec();
    sorted.sort_by_key(|c| c.key());
    let mut cursor = CoordCursor::new();
    for change in &mut sorted {
        if let Some(point) = change_position(change) {
            *point = cursor.encode(*point);
        }
    }
    sorted
}

pub fn unpack_stop_changes(
    mut changes: Vec<Change<Stop, StopPatch>>,
) -> Vec<Change<Stop, StopPatch>> {
    let mut cursor = CoordCursor::new();
    for change in &mut changes {
        if let Some(point) = change_position(change) {
            *point = cursor.decode(*point);
        }
    }
    changes
}

fn change_position(change: &mut Change<Stop, StopPatch>) -> Option<&mut Coord> {
    match change {
        Change::Put(stop) => stop.position.as_mut(),
        Change::Patch(patch) => patch.position.as_mut().and_then(Option::as_mut),
        Change::Delete(_) => None,
    }
}

impl BlockCodec for Vec<Change<Stop, StopPatch>> {
    fn is_empty(&self) -> bool {
        <[Change<Stop, StopPatch>]>::is_empty(self)
    }

    fn encode_block(&self) -> Result<Vec<u8>> {
        to_wire(&pack_stop_changes(self))
    }

    fn decode_block(block: Block, bytes: &[u8]) -> Result<Self> {
        let changes: Vec<Change<Stop, StopPatch>> =
            from_wire(bytes).map_err(|e| FeedError::malformed_block(block, e))?;
        Ok(unpack_stop_changes(changes))
    }
}

impl BlockCodec for Vec<Shape> {
    fn is_empty(&self) -> bool {
        <[Shape]>::is_empty(self)
    }

    fn encode_block(&self) -> Result<Vec<u8>> {
        to_wire(&pack_shapes(self)?)
    }

    fn decode_block(block: Block, bytes: &[u8]) -> Result<Self> {
        let packed: Vec<PackedShape> =
            from_wire(bytes).map_err(|e| FeedError::malformed_block(block, e))?;
        unpack_shapes(block, &packed)
    }
}

impl BlockCodec for Vec<Stop> {
    fn is_empty(&self) -> bool {
        <[Stop]>::is_empty(self)
    }

    fn encode_block(&self) -> Result<Vec<u8>> {
        to_wire(&pack_stops(self))
    }

    fn decode_block(block: Block, bytes: &[u8]) -> Result<Self> {
        let stops: Vec<Stop> = from_wire(bytes).map_err(|e| FeedError::malformed_block(block, e))?;
        Ok(unpack_stops(stops))
    }
}

/// Shape changes keep the chained encoding for the replacements they carry.
impl BlockCodec for Vec<Replace<u32, Shape>> {
    fn is_empty(&self) -> bool {
        <[Replace<u32, Shape>]>::is_empty(self)
    }

    fn encode_block(&self) -> Result<Vec<u8>> {
        let mut sorted: Vec<&Replace<u32, Shape>> = self.iter().collect();
        sorted.sort_by_key(|c| c.key());
        let mut cursor = CoordCursor::new();
        let packed = sorted
            .into_iter()
            .map(|change| match change {
                Replace::Put(shape) => pack_shape(&mut cursor, shape).map(Replace::Put),
                Replace::Delete(id) => Ok(Replace::Delete(*id)),
            })
            .collect::<Result<Vec<Replace<u32, PackedShape>>>>()?;
        to_wire(&packed)
    }

    fn decode_block(block: Block, bytes: &[u8]) -> Result<Self> {
        let packed: Vec<Replace<u32, PackedShape>> =
            from_wire(bytes).map_err(|e| FeedError::malformed_block(block, e))?;
        let mut cursor = CoordCursor::new();
        packed
            .iter()
            .map(|change| match change {
                Replace::Put(p) => unpack_shape(&mut cursor, block, p).map(Replace::Put),
                Replace::Delete(id) => Ok(Replace::Delete(*id)),
            })
            .collect()
    }
}

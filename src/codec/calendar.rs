//! Service calendars relative to a base date.
//!
//! Every date is stored as a day offset from the calendar's base date. Added
//! and removed exception dates live in a shared pool of offset lists (entry
//! 0 is the empty list) so services with the same exceptions share storage.
//! Within a list, the first offset counts from the base date and each next
//! one from the date before it. Dates on or before the base date are dropped.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::block::{from_wire, to_wire, Block, BlockCodec};
use crate::error::{FeedError, Result};

pub const ALL_WEEKDAYS: u8 = 0x7F;

pub fn date_to_int(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

pub fn int_to_date(value: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt((value / 10_000) as i32, (value / 100) % 100, value % 100)
}

/// Bit for `weekday` in [`CalendarService::weekdays`]; Monday is bit 0.
pub fn weekday_bit(weekday: Weekday) -> u8 {
    1 << weekday.num_days_from_monday()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CalendarService {
    pub service_id: u32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub weekdays: u8,
    pub added_days: Vec<NaiveDate>,
    pub removed_days: Vec<NaiveDate>,
}

impl CalendarService {
    pub fn operates(&self, on: NaiveDate) -> bool {
        if self.start_date.is_some_and(|start| start > on) {
            return false;
        }
        if self.end_date.is_some_and(|end| end < on) {
            return false;
        }
        if self.removed_days.contains(&on) {
            return false;
        }
        if self.added_days.contains(&on) {
            return true;
        }
        self.weekdays & weekday_bit(on.weekday()) != 0
    }

    /// Days in `from..=to` on which the service operates.
    pub fn active_days(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        from.iter_days()
            .take_while(|day| *day <= to)
            .filter(|day| self.operates(*day))
            .collect()
    }

    /// Compares two versions of a service, ignoring everything on or before
    /// `cutoff`.
    pub fn same_after(&self, other: &CalendarService, cutoff: NaiveDate) -> bool {
        let start = |d: Option<NaiveDate>| d.filter(|d| *d > cutoff);
        let end = |d: Option<NaiveDate>| d.map(|d| d.max(cutoff));
        let cut = |dates: &[NaiveDate]| {
            let mut kept: Vec<NaiveDate> = dates.iter().copied().filter(|d| *d > cutoff).collect();
            kept.sort();
            kept.dedup();
            kept
        };
        self.service_id == other.service_id
            && self.weekdays & ALL_WEEKDAYS == other.weekdays & ALL_WEEKDAYS
            && start(self.start_date) == start(other.start_date)
            && end(self.end_date) == end(other.end_date)
            && cut(&self.added_days) == cut(&other.added_days)
            && cut(&self.removed_days) == cut(&other.removed_days)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Calendar {
    pub base_date: NaiveDate,
    pub services: Vec<CalendarService>,
}

impl Calendar {
    /// Picks a base date for `services`, sorts them by id and normalizes them
    /// to what survives an encode/decode round trip.
    pub fn build(mut services: Vec<CalendarService>, today: NaiveDate) -> Result<Self> {
        services.sort_by_key(|s| s.service_id);
        let calendar = Calendar {
            base_date: pick_base_date(&services, today),
            services,
        };
        calendar.normalized()
    }

    pub fn normalized(&self) -> Result<Self> {
        decode(&encode(self))
    }

    pub fn service(&self, service_id: u32) -> Option<&CalendarService> {
        self.services.iter().find(|s| s.service_id == service_id)
    }
}

/// The day before the earliest start date, but never before yesterday.
pub fn pick_base_date(services: &[CalendarService], today: NaiveDate) -> NaiveDate {
    let yesterday = today.pred_opt().unwrap_or(today);
    services
        .iter()
        .filter_map(|s| s.start_date)
        .min()
        .and_then(|start| start.pred_opt())
        .map_or(yesterday, |base| base.max(yesterday))
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq, Default)]
#[rkyv(derive(Debug))]
pub struct ServiceRecord {
    pub service_id: u32,
    /// Offset from the base date, 0 when open.
    pub start_date: u32,
    pub end_date: u32,
    pub weekdays: u8,
    /// Index into the date pool.
    pub added_days: u32,
    pub removed_days: u32,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CalendarBlock {
    /// YYYYMMDD.
    pub base_date: u32,
    pub dates: Vec<Vec<u32>>,
    pub services: Vec<ServiceRecord>,
}

struct DatePool {
    lists: Vec<Vec<u32>>,
    index: FxHashMap<Vec<u32>, u32>,
}

impl DatePool {
    fn new() -> Self {
        let mut index = FxHashMap::default();
        index.insert(Vec::new(), 0);
        Self {
            lists: vec![Vec::new()],
            index,
        }
    }

    fn intern(&mut self, offsets: Vec<u32>) -> u32 {
        if let Some(&position) = self.index.get(&offsets) {
            return position;
        }
        let position = self.lists.len() as u32;
        self.index.insert(offsets.clone(), position);
        self.lists.push(offsets);
        position
    }
}

fn offset(from: NaiveDate, to: NaiveDate) -> u32 {
    u32::try_from((to - from).num_days()).unwrap_or(0)
}

fn pack_dates(dates: &[NaiveDate], base: NaiveDate) -> Vec<u32> {
    let mut kept: Vec<NaiveDate> = dates.iter().copied().filter(|d| *d > base).collect();
    kept.sort();
    kept.dedup();
    let mut previous = base;
    kept.into_iter()
        .map(|date| {
            let delta = offset(previous, date);
            previous = date;
            delta
        })
        .collect()
}

fn unpack_dates(base: NaiveDate, offsets: &[u32]) -> Option<Vec<NaiveDate>> {
    let mut current = base;
    offsets
        .iter()
        .map(|&delta| {
            current = current.checked_add_days(Days::new(u64::from(delta)))?;
            Some(current)
        })
        .collect()
}

fn encode_service(service: &CalendarService, base: NaiveDate, pool: &mut DatePool) -> ServiceRecord {
    // An expired service keeps only its id and decodes as never operating.
    if service.end_date.is_some_and(|end| end <= base) {
        return ServiceRecord {
            service_id: service.service_id,
            ..ServiceRecord::default()
        };
    }
    let relative = |date: Option<NaiveDate>| date.filter(|d| *d > base).map_or(0, |d| offset(base, d));
    ServiceRecord {
        service_id: service.service_id,
        start_date: relative(service.start_date),
        end_date: relative(service.end_date),
        weekdays: service.weekdays & ALL_WEEKDAYS,
        added_days: pool.intern(pack_dates(&service.added_days, base)),
        removed_days: pool.intern(pack_dates(&service.removed_days, base)),
    }
}

pub fn encode(calendar: &Calendar) -> CalendarBlock {
    let mut pool = DatePool::new();
    let services = calendar
        .services
        .iter()
        .map(|s| encode_service(s, calendar.base_date, &mut pool))
        .collect();
    CalendarBlock {
        base_date: date_to_int(calendar.base_date),
        dates: pool.lists,
        services,
    }
}

pub fn decode(block: &CalendarBlock) -> Result<Calendar> {
    let malformed = |message: String| FeedError::malformed_block(Block::Calendar, message);
    let base = int_to_date(block.base_date)
        .ok_or_else(|| malformed(format!("invalid base date {}", block.base_date)))?;
    let pool = block
        .dates
        .iter()
        .map(|offsets| unpack_dates(base, offsets))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| malformed("date offsets overflow".into()))?;
    let dates = |index: u32| {
        pool.get(index as usize)
            .cloned()
            .ok_or_else(|| malformed(format!("date list {index} is not in the pool")))
    };
    let relative = |days: u32| {
        (days > 0)
            .then(|| base.checked_add_days(Days::new(u64::from(days))))
            .flatten()
    };

    let services = block
        .services
        .iter()
        .map(|record| -> Result<CalendarService> {
            Ok(CalendarService {
                service_id: record.service_id,
                start_date: relative(record.start_date),
                end_date: relative(record.end_date),
                weekdays: record.weekdays,
                added_days: dates(record.added_days)?,
                removed_days: dates(record.removed_days)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Calendar {
        base_date: base,
        services,
    })
}

/// Services that changed between two snapshots, re-encoded against the new
/// base date, plus ids of services that disappeared.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CalendarChanges {
    pub base_date: NaiveDate,
    pub services: Vec<CalendarService>,
    pub removed: Vec<u32>,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CalendarChangesBlock {
    pub calendar: CalendarBlock,
    pub removed: Vec<u32>,
}

impl CalendarChanges {
    pub fn between(old: &Calendar, new: &Calendar, today: NaiveDate) -> Option<Self> {
        let cutoff = today.pred_opt().unwrap_or(today);
        let services: Vec<CalendarService> = new
            .services
            .iter()
            .filter(|service| {
                old.service(service.service_id)
                    .map_or(true, |previous| !previous.same_after(service, cutoff))
            })
            .cloned()
            .collect();
        let removed: Vec<u32> = old
            .services
            .iter()
            .map(|s| s.service_id)
            .filter(|id| new.service(*id).is_none())
            .collect();
        if services.is_empty() && removed.is_empty() && old.base_date == new.base_date {
            return None;
        }
        Some(Self {
            base_date: new.base_date,
            services,
            removed,
        })
    }

    /// Result of applying `self` to `calendar`, normalized to the new base date.
    pub fn apply_to(&self, calendar: &Calendar) -> Result<Calendar> {
        let mut services: Vec<CalendarService> = calendar
            .services
            .iter()
            .filter(|s| {
                !self.removed.contains(&s.service_id)
                    && !self.services.iter().any(|n| n.service_id == s.service_id)
            })
            .cloned()
            .collect();
        services.extend(self.services.iter().cloned());
        services.sort_by_key(|s| s.service_id);
        Calendar {
            base_date: self.base_date,
            services,
        }
        .normalized()
    }

    pub fn merge(self, later: CalendarChanges) -> Self {
        let mut services: Vec<CalendarService> = self
            .services
            .into_iter()
            .filter(|s| {
                !later.removed.contains(&s.service_id)
                    && !later.services.iter().any(|n| n.service_id == s.service_id)
            })
            .collect();
        services.extend(later.services.iter().cloned());
        services.sort_by_key(|s| s.service_id);
        let mut removed: Vec<u32> = self
            .removed
            .into_iter()
            .chain(later.removed)
            .filter(|id| !later.services.iter().any(|s| s.service_id == *id))
            .collect();
        removed.sort_unstable();
        removed.dedup();
        Self {
            base_date: later.base_date,
            services,
            removed,
        }
    }
}

impl BlockCodec for Calendar {
    fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    fn encode_block(&self) -> Result<Vec<u8>> {
        to_wire(&encode(self))
    }

    fn decode_block(block: Block, bytes: &[u8]) -> Result<Self> {
        let stored: CalendarBlock =
            from_wire(bytes).map_err(|e| FeedError::malformed_block(block, e))?;
        decode(&stored)
    }
}

impl BlockCodec for Option<CalendarChanges> {
    fn is_empty(&self) -> bool {
        self.is_none()
    }

    fn encode_block(&self) -> Result<Vec<u8>> {
        let stored = self.as_ref().map_or_else(CalendarChangesBlock::default, |changes| {
            CalendarChangesBlock {
                calendar: encode(&Calendar {
                    base_date: changes.base_date,
                    services: changes.services.clone(),
                }),
                removed: changes.removed.clone(),
            }
        });
        to_wire(&stored)
    }

    fn decode_block(block: Block, bytes: &[u8]) -> Result<Self> {
        let stored: CalendarChangesBlock =
            from_wire(bytes).map_err(|e| FeedError::malformed_block(block, e))?;
        let calendar = decode(&stored.calendar)?;
        Ok(Some(CalendarChanges {
            base_date: calendar.base_date,
            services: calendar.services,
            removed: stored.removed,
        }))
    }
}

//! Event assembly: section reservation, staging and parsing
//!
//! Probes never write to the output channel directly. Sections are reserved
//! in a [`StagedEvent`] backed by per-CPU scratch storage, and the staged
//! bytes are sent only when the probe decides to keep the event. A discarded
//! event leaves no trace: its scratch slot is simply reused by the next
//! firing on that CPU.

use crate::{constants::*, types::*};

/// Section reservation API used by the probe hooks.
pub trait EventAssembler {
    /// Reserve a zeroed, writable region of exactly `size` bytes for a
    /// section of the given owner and kind.
    ///
    /// Returns `None` when the event is full, or the owner is disabled or
    /// filtered out.
    fn reserve(&mut self, owner: u8, kind: u8, size: usize) -> Option<&mut [u8]>;
}

/// Reserve a typed section, zero-initialized.
#[inline(always)]
pub fn reserve_section<S: Section, A: EventAssembler + ?Sized>(event: &mut A) -> Option<&mut S> {
    let bytes = event.reserve(S::OWNER, S::KIND, core::mem::size_of::<S>())?;
    if bytes.len() != core::mem::size_of::<S>() {
        return None;
    }
    // SAFETY: `Section` types are packed plain data with alignment 1 and the
    // region is exactly `size_of::<S>()` bytes long.
    Some(unsafe { &mut *(bytes.as_mut_ptr() as *mut S) })
}

/// An event being staged in a [`RawEvent`] scratch slot.
pub struct StagedEvent<'a> {
    raw: &'a mut RawEvent,
    categories: u64,
}

impl<'a> StagedEvent<'a> {
    /// Start staging a new event, dropping whatever the slot held before.
    ///
    /// `categories` is a bitmask of enabled section owners.
    #[inline(always)]
    pub fn new(raw: &'a mut RawEvent, categories: u64) -> Self {
        raw.size = 0;
        Self { raw, categories }
    }

    /// Number of section bytes staged so far.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.raw.size as usize
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.raw.size == 0
    }

    /// Finish staging; the returned event is ready to be sent.
    #[inline(always)]
    pub fn commit(self) -> &'a RawEvent {
        self.raw
    }

    #[inline(always)]
    fn owner_enabled(&self, owner: u8) -> bool {
        owner < 64 && self.categories & (1u64 << owner) != 0
    }
}

impl EventAssembler for StagedEvent<'_> {
    #[inline(always)]
    fn reserve(&mut self, owner: u8, kind: u8, size: usize) -> Option<&mut [u8]> {
        if !self.owner_enabled(owner) || size > u16::MAX as usize {
            return None;
        }

        let start = self.raw.size as usize;
        let end = start + SECTION_HEADER_SIZE + size;
        if end > RAW_EVENT_DATA_SIZE {
            return None;
        }

        let region = self.raw.data.get_mut(start..end)?;
        self.raw.size = end as u16;

        let (header, payload) = region.split_at_mut(SECTION_HEADER_SIZE);
        header[0] = owner;
        header[1] = kind;
        header[2..].copy_from_slice(&(size as u16).to_ne_bytes());
        payload.fill(0);

        Some(payload)
    }
}

/// A section as found in a raw event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawSection<'a> {
    pub owner: u8,
    pub kind: u8,
    pub payload: &'a [u8],
}

impl<'a> RawSection<'a> {
    /// Read the payload as a typed section, if owner, kind and size match.
    pub fn parse<S: Section + Copy>(&self) -> Option<S> {
        if self.owner != S::OWNER
            || self.kind != S::KIND
            || self.payload.len() != core::mem::size_of::<S>()
        {
            return None;
        }
        // SAFETY: `Section` types are plain data valid for any bit pattern and
        // the payload is exactly `size_of::<S>()` bytes.
        Some(unsafe { core::ptr::read_unaligned(self.payload.as_ptr() as *const S) })
    }
}

/// A section header announcing more bytes than the event holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TruncatedSection {
    pub offset: usize,
}

/// Iterator over the sections of a raw event.
pub struct Sections<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Sections<'a> {
    /// Iterate over `data`, the `size` first bytes of a raw event's data.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl<'a> Iterator for Sections<'a> {
    type Item = Result<RawSection<'a>, TruncatedSection>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.data.get(self.offset..)?;
        if rest.is_empty() {
            return None;
        }

        let offset = self.offset;
        let truncated = TruncatedSection { offset };
        if rest.len() < SECTION_HEADER_SIZE {
            self.offset = self.data.len();
            return Some(Err(truncated));
        }

        let size = u16::from_ne_bytes([rest[2], rest[3]]) as usize;
        let Some(payload) = rest.get(SECTION_HEADER_SIZE..SECTION_HEADER_SIZE + size) else {
            self.offset = self.data.len();
            return Some(Err(truncated));
        };

        self.offset += SECTION_HEADER_SIZE + size;
        Some(Ok(RawSection {
            owner: rest[0],
            kind: rest[1],
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_is_zeroed_and_sized() {
        let mut raw = RawEvent::zeroed();
        raw.data.fill(0xff);
        raw.size = 40;

        let mut event = StagedEvent::new(&mut raw, ALL_CATEGORIES);
        assert!(event.is_empty());

        let region = event.reserve(OWNER_OVS, OVS_KIND_ACTION_EXEC, 5).unwrap();
        assert_eq!(region, &[0u8; 5]);
        assert_eq!(event.len(), SECTION_HEADER_SIZE + 5);
    }

    #[test]
    fn test_disabled_category() {
        let mut raw = RawEvent::zeroed();
        let mut event = StagedEvent::new(&mut raw, 1 << OWNER_OVS);

        assert!(reserve_section::<CommonRecord, _>(&mut event).is_none());
        assert!(reserve_section::<ActionRecord, _>(&mut event).is_some());
    }

    #[test]
    fn test_exhausted_event() {
        let mut raw = RawEvent::zeroed();
        let mut event = StagedEvent::new(&mut raw, ALL_CATEGORIES);

        // 16 + 4 bytes per common section: 6 fit in the data area.
        for _ in 0..6 {
            assert!(reserve_section::<CommonRecord, _>(&mut event).is_some());
        }
        assert!(reserve_section::<CommonRecord, _>(&mut event).is_none());
        // A smaller section still fits in what is left.
        assert!(reserve_section::<OutputRecord, _>(&mut event).is_none());
        assert!(event.reserve(OWNER_OVS, OVS_KIND_ACTION_OUTPUT, 2).is_some());
    }

    #[test]
    fn test_sections_roundtrip() {
        let mut raw = RawEvent::zeroed();
        let mut event = StagedEvent::new(&mut raw, ALL_CATEGORIES);

        let action = reserve_section::<ActionRecord, _>(&mut event).unwrap();
        action.action_type = OVS_ACTION_ATTR_OUTPUT;
        action.recirc_id = 9;
        let output = reserve_section::<OutputRecord, _>(&mut event).unwrap();
        output.port = 5;

        let raw = event.commit();
        let sections: Vec<_> = Sections::new(raw.sections())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(
            sections[0].parse::<ActionRecord>(),
            Some(ActionRecord {
                action_type: OVS_ACTION_ATTR_OUTPUT,
                recirc_id: 9,
            })
        );
        assert_eq!(sections[1].parse::<OutputRecord>(), Some(OutputRecord { port: 5 }));
        assert_eq!(sections[1].parse::<TrackingRecord>(), None);
    }

    #[test]
    fn test_truncated_section() {
        let data = [OWNER_OVS, OVS_KIND_ACTION_TRACK, 8, 0, 1, 2];
        let mut sections = Sections::new(&data);
        assert_eq!(sections.next(), Some(Err(TruncatedSection { offset: 0 })));
        assert_eq!(sections.next(), None);
    }
}

//! Capsule locator
//!
//! Scans the handoff list produced by the pre-boot stage and builds the
//! ordered capsule sequence for this boot attempt. Entries whose header fails
//! structural validation are dropped silently. The sequence and its status
//! array are allocated together; if either allocation fails the boot carries
//! on as if no capsule had been staged.

use alloc::vec::Vec;

use crate::image::CapsuleImage;
use crate::platform::HeaderValidator;
use crate::status::StatusTracker;

/// One capsule entry from the handoff list
///
/// `bytes` spans the handoff region: base address and declared length.
#[derive(Debug, Clone, Copy)]
pub struct HandoffCapsule<'a> {
    pub bytes: &'a [u8],
}

impl<'a> HandoffCapsule<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn declared_size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// A validated capsule and its position in the discovery sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapsuleRecord<'a> {
    position: usize,
    image: CapsuleImage<'a>,
}

impl<'a> CapsuleRecord<'a> {
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn image(&self) -> &CapsuleImage<'a> {
        &self.image
    }
}

/// Result of scanning the handoff list
#[derive(Debug, Default)]
pub struct Discovery<'a> {
    records: Vec<CapsuleRecord<'a>>,
    status: StatusTracker,
    allocation_failed: bool,
}

impl<'a> Discovery<'a> {
    /// Empty discovery standing in for a failed allocation
    pub fn degraded() -> Self {
        Self {
            allocation_failed: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> &[CapsuleRecord<'a>] {
        &self.records
    }

    pub fn status(&self) -> &StatusTracker {
        &self.status
    }

    /// Records alongside the mutable status array
    pub(crate) fn parts_mut(&mut self) -> (&[CapsuleRecord<'a>], &mut StatusTracker) {
        (&self.records, &mut self.status)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn allocation_failed(&self) -> bool {
        self.allocation_failed
    }
}

fn validate<'a>(
    entry: &HandoffCapsule<'a>,
    validator: &dyn HeaderValidator,
) -> Option<CapsuleImage<'a>> {
    let image = CapsuleImage::new(entry.bytes).ok()?;
    validator
        .is_valid(&image, entry.declared_size())
        .then_some(image)
}

/// Build the capsule sequence from the handoff list
///
/// Single-shot per boot attempt; the caller guards re-invocation.
pub fn discover<'a>(handoff: &[HandoffCapsule<'a>], validator: &dyn HeaderValidator) -> Discovery<'a> {
    let count = handoff
        .iter()
        .filter(|entry| validate(entry, validator).is_some())
        .count();

    log::debug!(
        "Capsule handoff entries: {}, valid capsules: {}",
        handoff.len(),
        count
    );

    if count == 0 {
        return Discovery::default();
    }

    let mut records = Vec::new();
    if records.try_reserve_exact(count).is_err() {
        log::error!("Allocate capsule sequence failed ({} capsules)", count);
        return Discovery::degraded();
    }

    let status = match StatusTracker::with_len(count) {
        Ok(status) => status,
        Err(_) => {
            log::error!("Allocate capsule status array failed ({} capsules)", count);
            return Discovery::degraded();
        }
    };

    for entry in handoff {
        match validate(entry, validator) {
            Some(image) => records.push(CapsuleRecord {
                position: records.len(),
                image,
            }),
            None => log::debug!(
                "Dropping invalid capsule at {:#x} ({} bytes)",
                entry.bytes.as_ptr() as usize,
                entry.bytes.len()
            ),
        }
    }

    Discovery {
        records,
        status,
        allocation_failed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{CapsuleFlags, CapsuleHeader, FMP_CAPSULE_GUID};
    use crate::platform::StandardHeaderValidator;

    fn capsule(image_size: u32, len: usize) -> Vec<u8> {
        let header = CapsuleHeader {
            guid: FMP_CAPSULE_GUID,
            header_size: CapsuleHeader::SIZE as u32,
            flags: CapsuleFlags::empty(),
            image_size,
        };
        let mut bytes = header.to_bytes().to_vec();
        bytes.resize(len, 0);
        bytes
    }

    #[test]
    fn test_invalid_entries_are_dropped() {
        let first = capsule(64, 64);
        let bad_size = capsule(64, 48);
        let too_short = [0u8; 8];
        let last = capsule(32, 32);

        let handoff = [
            HandoffCapsule::new(&first),
            HandoffCapsule::new(&bad_size),
            HandoffCapsule::new(&too_short),
            HandoffCapsule::new(&last),
        ];
        let discovery = discover(&handoff, &StandardHeaderValidator);

        assert_eq!(discovery.len(), 2);
        assert_eq!(discovery.status().len(), discovery.len());
        assert!(!discovery.allocation_failed());

        let positions: Vec<usize> = discovery.records().iter().map(|r| r.position()).collect();
        assert_eq!(positions, [0, 1]);
        assert_eq!(discovery.records()[0].image().bytes().as_ptr(), first.as_ptr());
        assert_eq!(discovery.records()[1].image().bytes().as_ptr(), last.as_ptr());
        assert!(!discovery.status().all_processed());
    }

    #[test]
    fn test_empty_handoff() {
        let discovery = discover(&[], &StandardHeaderValidator);
        assert!(discovery.is_empty());
        assert!(discovery.status().all_processed());
    }

    #[test]
    fn test_degraded_discovery_is_empty() {
        let discovery = Discovery::degraded();
        assert!(discovery.allocation_failed());
        assert!(discovery.is_empty());
        assert_eq!(discovery.status().len(), 0);
    }
}

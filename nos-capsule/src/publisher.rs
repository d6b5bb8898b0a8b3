//! Capsule system table publication
//!
//! Capsules selected for publication stay readable by the operating system
//! after boot. For every distinct capsule GUID among them one table is
//! installed under that GUID, holding the addresses of all capsules sharing
//! it, in discovery order.

use alloc::vec::Vec;

use uefi_raw::Guid;

use crate::config::CapsuleConfig;
use crate::error::{CapsuleError, Result};
use crate::locator::CapsuleRecord;
use crate::platform::ConfigurationTable;

/// Array of capsules sharing one GUID: `{count, pointer[count]}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsuleTable {
    addresses: Vec<u64>,
}

impl CapsuleTable {
    /// Offset of the first capsule pointer in the encoded table
    pub const POINTERS_OFFSET: usize = 8;

    pub fn count(&self) -> u32 {
        self.addresses.len() as u32
    }

    pub fn addresses(&self) -> &[u64] {
        &self.addresses
    }

    /// Size of the encoded table in bytes
    pub fn encoded_len(&self) -> usize {
        Self::POINTERS_OFFSET + 8 * self.addresses.len()
    }

    /// Encode the table as the operating system reads it
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.try_reserve_exact(self.encoded_len())
            .map_err(|_| CapsuleError::OutOfResources)?;

        out.extend_from_slice(&self.count().to_le_bytes());
        out.resize(Self::POINTERS_OFFSET, 0);
        for address in &self.addresses {
            out.extend_from_slice(&address.to_le_bytes());
        }
        Ok(out)
    }
}

/// Distinct GUIDs among published capsules, in first-seen order
fn distinct_guids(records: &[CapsuleRecord<'_>], config: &CapsuleConfig) -> Result<Vec<Guid>> {
    let mut guids: Vec<Guid> = Vec::new();
    guids
        .try_reserve_exact(records.len())
        .map_err(|_| CapsuleError::OutOfResources)?;

    for record in records {
        let image = record.image();
        if config.is_published(image.flags()) && !guids.contains(&image.guid()) {
            guids.push(image.guid());
        }
    }
    Ok(guids)
}

fn build_table(records: &[CapsuleRecord<'_>], guid: Guid, config: &CapsuleConfig) -> Result<CapsuleTable> {
    let members = records
        .iter()
        .map(CapsuleRecord::image)
        .filter(|image| config.is_published(image.flags()) && image.guid() == guid);

    let mut addresses = Vec::new();
    addresses
        .try_reserve_exact(members.clone().count())
        .map_err(|_| CapsuleError::OutOfResources)?;
    addresses.extend(members.map(|image| image.address()));

    Ok(CapsuleTable { addresses })
}

/// Install one capsule table per published GUID
///
/// Failures are logged per group and never abort the remaining groups.
/// Returns the number of tables installed.
pub fn publish(
    records: &[CapsuleRecord<'_>],
    config: &CapsuleConfig,
    table: &mut dyn ConfigurationTable,
) -> usize {
    if records.is_empty() {
        return 0;
    }

    let guids = match distinct_guids(records, config) {
        Ok(guids) => guids,
        Err(error) => {
            log::error!("Allocate capsule GUID cache failed: {}", error);
            return 0;
        }
    };

    let mut installed = 0;
    for guid in guids {
        let capsule_table = match build_table(records, guid, config) {
            Ok(capsule_table) => capsule_table,
            Err(error) => {
                log::error!("Allocate capsule table ({}) failed: {}", guid, error);
                continue;
            }
        };

        log::debug!(
            "Publishing {} capsule(s) under {}",
            capsule_table.count(),
            guid
        );
        match table.install(guid, capsule_table) {
            Ok(()) => installed += 1,
            Err(error) => log::error!("Install capsule table ({}) failed: {}", guid, error),
        }
    }

    installed
}

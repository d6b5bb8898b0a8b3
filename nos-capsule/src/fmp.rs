//! Firmware management capsule layout
//!
//! The payload of an FMP capsule starts with the FMP capsule header:
//!
//! ```text
//! offset  size        field
//! 0       4           Version
//! 4       2           EmbeddedDriverCount
//! 6       2           PayloadItemCount
//! 8       8 * items   ItemOffsetList
//! ```
//!
//! Offsets are relative to the FMP capsule header. Embedded drivers come
//! first, followed by payload items that each start with an FMP image header.
//! The capsule is untrusted input, so every offset and size is checked before
//! use.

use crate::error::{CapsuleError, Result};
use crate::image::{read_u16, read_u32, read_u64, CapsuleImage, FMP_CAPSULE_GUID};
use crate::platform::FmpInspector;

/// Highest FMP capsule header version understood
pub const FMP_CAPSULE_HEADER_VERSION: u32 = 1;

/// Highest FMP image header version understood
pub const FMP_IMAGE_HEADER_VERSION: u32 = 3;

const CAPSULE_HEADER_SIZE: usize = 8;

// Image header size for versions 1, 2 and 3
const IMAGE_HEADER_V1_SIZE: usize = 32;
const IMAGE_HEADER_V2_SIZE: usize = 40;
const IMAGE_HEADER_V3_SIZE: usize = 48;

/// Summary of a validated FMP capsule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FmpCapsuleLayout {
    pub version: u32,
    pub embedded_driver_count: u16,
    pub payload_item_count: u16,
}

impl FmpCapsuleLayout {
    /// Validate the FMP structures in `payload`
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let size = payload.len();
        if size < CAPSULE_HEADER_SIZE {
            return Err(CapsuleError::InvalidLayout("FMP capsule header truncated"));
        }

        let version = read_u32(payload, 0);
        if version > FMP_CAPSULE_HEADER_VERSION {
            return Err(CapsuleError::InvalidLayout("Unknown FMP capsule header version"));
        }

        let embedded_driver_count = read_u16(payload, 4);
        let payload_item_count = read_u16(payload, 6);
        let item_count = embedded_driver_count as usize + payload_item_count as usize;

        if (size - CAPSULE_HEADER_SIZE) / 8 < item_count {
            return Err(CapsuleError::InvalidLayout("FMP item offset list truncated"));
        }
        let header_size = CAPSULE_HEADER_SIZE + 8 * item_count;

        let offset_at = |index: usize| read_u64(payload, CAPSULE_HEADER_SIZE + 8 * index);

        let mut previous = 0u64;
        for index in 0..item_count {
            let offset = offset_at(index);
            if offset >= size as u64 {
                return Err(CapsuleError::InvalidLayout("FMP item offset out of range"));
            }
            if offset < header_size as u64 {
                return Err(CapsuleError::InvalidLayout("FMP item overlaps offset list"));
            }
            if index > 0 && offset <= previous {
                return Err(CapsuleError::InvalidLayout("FMP item offsets not ascending"));
            }
            previous = offset;
        }

        for index in embedded_driver_count as usize..item_count {
            let start = offset_at(index) as usize;
            let end = if index + 1 == item_count {
                size
            } else {
                offset_at(index + 1) as usize
            };
            check_image_header(&payload[start..end])?;
        }

        if item_count == 0 && size != header_size {
            return Err(CapsuleError::InvalidLayout("Trailing data in empty FMP capsule"));
        }

        Ok(Self {
            version,
            embedded_driver_count,
            payload_item_count,
        })
    }
}

fn check_image_header(item: &[u8]) -> Result<()> {
    if item.len() < IMAGE_HEADER_V1_SIZE {
        return Err(CapsuleError::InvalidLayout("FMP image header truncated"));
    }

    let header_size = match read_u32(item, 0) {
        0 | 1 => IMAGE_HEADER_V1_SIZE,
        2 => IMAGE_HEADER_V2_SIZE,
        FMP_IMAGE_HEADER_VERSION => IMAGE_HEADER_V3_SIZE,
        _ => return Err(CapsuleError::InvalidLayout("Unknown FMP image header version")),
    };
    if item.len() < header_size {
        return Err(CapsuleError::InvalidLayout("FMP image header truncated"));
    }

    let image_size = read_u32(item, 24) as u64;
    let vendor_code_size = read_u32(item, 28) as u64;
    if header_size as u64 + image_size + vendor_code_size != item.len() as u64 {
        return Err(CapsuleError::InvalidLayout("FMP image size mismatch"));
    }

    Ok(())
}

/// FMP inspector following the UEFI firmware management capsule format
#[derive(Debug, Default, Clone, Copy)]
pub struct FmpCapsuleInspector;

impl FmpInspector for FmpCapsuleInspector {
    fn is_fmp_capsule(&self, image: &CapsuleImage<'_>) -> bool {
        image.guid() == FMP_CAPSULE_GUID
    }

    fn validate(&self, image: &CapsuleImage<'_>) -> Result<u16> {
        FmpCapsuleLayout::parse(image.payload()).map(|layout| layout.embedded_driver_count)
    }
}

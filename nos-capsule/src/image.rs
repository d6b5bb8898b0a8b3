//! Capsule image header
//!
//! A capsule image starts with the UEFI capsule header:
//!
//! ```text
//! offset  size  field
//! 0       16    CapsuleGuid
//! 16      4     HeaderSize
//! 20      4     Flags
//! 24      4     CapsuleImageSize
//! ```
//!
//! The header is followed by the payload; `HeaderSize` may exceed the
//! structure size when a vendor extends it.

use core::fmt;

use bitflags::bitflags;
use uefi_raw::{guid, Guid};

use crate::error::{CapsuleError, Result};

/// Firmware management capsule (EFI_FIRMWARE_MANAGEMENT_CAPSULE_ID_GUID)
pub const FMP_CAPSULE_GUID: Guid = guid!("6dcbd5ed-e82d-4c44-bda1-7194199ad92a");

/// Display/branding capsule rendered while updates run
pub const DISPLAY_CAPSULE_GUID: Guid = guid!("3b8c8162-188c-46a4-aec9-be43f1d65697");

bitflags! {
    /// Capsule header flags
    ///
    /// Bits 0..15 are platform defined; bits 16..18 are defined by UEFI.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CapsuleFlags: u32 {
        /// Platform bit requesting a reset once the capsule is processed
        const ALWAYS_RESET = 0x0000_0001;
        const PERSIST_ACROSS_RESET = 0x0001_0000;
        const POPULATE_SYSTEM_TABLE = 0x0002_0000;
        const INITIATE_RESET = 0x0004_0000;
    }
}

/// Parsed capsule header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapsuleHeader {
    pub guid: Guid,
    pub header_size: u32,
    pub flags: CapsuleFlags,
    pub image_size: u32,
}

impl CapsuleHeader {
    /// Size of the fixed header structure
    pub const SIZE: usize = 28;

    /// Read the header from the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(CapsuleError::InvalidHeader);
        }

        let mut guid = [0u8; 16];
        guid.copy_from_slice(&bytes[..16]);

        Ok(Self {
            guid: Guid::from_bytes(guid),
            header_size: read_u32(bytes, 16),
            flags: CapsuleFlags::from_bits_retain(read_u32(bytes, 20)),
            image_size: read_u32(bytes, 24),
        })
    }

    /// Serialize the header into its on-disk layout
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..16].copy_from_slice(&self.guid.to_bytes());
        out[16..20].copy_from_slice(&self.header_size.to_le_bytes());
        out[20..24].copy_from_slice(&self.flags.bits().to_le_bytes());
        out[24..28].copy_from_slice(&self.image_size.to_le_bytes());
        out
    }
}

/// A capsule image staged in memory by the pre-boot stage
///
/// Borrowed for the whole boot attempt; the bytes are never copied.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CapsuleImage<'a> {
    header: CapsuleHeader,
    bytes: &'a [u8],
}

impl<'a> CapsuleImage<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        let header = CapsuleHeader::parse(bytes)?;
        Ok(Self { header, bytes })
    }

    pub fn header(&self) -> &CapsuleHeader {
        &self.header
    }

    pub fn guid(&self) -> Guid {
        self.header.guid
    }

    pub fn flags(&self) -> CapsuleFlags {
        self.header.flags
    }

    /// Whole image, header included
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Bytes following the capsule header, bounded by `CapsuleImageSize`
    ///
    /// Empty when the header fields do not fit the buffer.
    pub fn payload(&self) -> &'a [u8] {
        let start = self.header.header_size as usize;
        let end = (self.header.image_size as usize).min(self.bytes.len());
        self.bytes.get(start..end).unwrap_or(&[])
    }

    /// Physical address of the image as seen by the operating system
    pub fn address(&self) -> u64 {
        self.bytes.as_ptr() as usize as u64
    }
}

impl fmt::Debug for CapsuleImage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapsuleImage")
            .field("guid", &self.header.guid)
            .field("flags", &self.header.flags)
            .field("image_size", &self.header.image_size)
            .field("address", &format_args!("{:#x}", self.address()))
            .finish()
    }
}

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

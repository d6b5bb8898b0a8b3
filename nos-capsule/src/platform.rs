//! Platform delegate traits
//!
//! The capsule pipeline never touches firmware services directly. Everything
//! it needs from the platform is expressed here, injected by the caller for
//! one boot attempt through [`CapsuleServices`].

use uefi_raw::table::runtime::ResetType;
use uefi_raw::Guid;

use crate::error::Result;
use crate::image::{CapsuleHeader, CapsuleImage};
use crate::publisher::CapsuleTable;

/// Structural validation of a capsule header against its handoff size
pub trait HeaderValidator {
    fn is_valid(&self, image: &CapsuleImage<'_>, declared_size: u64) -> bool;
}

/// Firmware management capsule probe and layout validation
pub trait FmpInspector {
    /// Does the image have the shape of an FMP capsule
    fn is_fmp_capsule(&self, image: &CapsuleImage<'_>) -> bool;

    /// Validate the FMP layout and return its embedded driver count
    fn validate(&self, image: &CapsuleImage<'_>) -> Result<u16>;
}

/// Outcome of handing a capsule to its update agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Succeeded,
    Unsupported,
    ResourceExhausted,
    VolumeCorrupted,
    /// The agent cannot take the capsule yet; retry on a later pass
    NotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyResult {
    pub outcome: ApplyOutcome,
    pub reset_required: bool,
}

impl ApplyResult {
    pub fn new(outcome: ApplyOutcome) -> Self {
        Self {
            outcome,
            reset_required: false,
        }
    }

    pub fn with_reset(outcome: ApplyOutcome) -> Self {
        Self {
            outcome,
            reset_required: true,
        }
    }
}

/// Update agent applying one capsule image
pub trait CapsuleProcessor {
    fn process(&mut self, image: &CapsuleImage<'_>) -> ApplyResult;
}

/// Device-update registry (ESRT) refresh
#[cfg_attr(test, mockall::automock)]
pub trait RegistrySync {
    fn sync(&mut self) -> Result;
}

/// Globally readable configuration table
pub trait ConfigurationTable {
    fn install(&mut self, guid: Guid, table: CapsuleTable) -> Result;
}

/// Capsule progress and error codes for platform telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapsuleStatusCode {
    ProcessCapsulesBegin,
    UpdatingFirmware,
    UpdateFirmwareSuccess,
    UpdateFirmwareFailed,
    ProcessCapsulesEnd,
    ResettingSystem,
}

impl CapsuleStatusCode {
    pub fn is_error(&self) -> bool {
        matches!(self, CapsuleStatusCode::UpdateFirmwareFailed)
    }
}

pub trait StatusCodeReporter {
    fn report(&mut self, code: CapsuleStatusCode);
}

/// Status code sink that forwards to the log facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusCodeReporter;

impl StatusCodeReporter for LogStatusCodeReporter {
    fn report(&mut self, code: CapsuleStatusCode) {
        if code.is_error() {
            log::error!("Capsule status code: {:?}", code);
        } else {
            log::debug!("Capsule status code: {:?}", code);
        }
    }
}

/// Why the platform is being reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    CapsuleUpdateComplete,
}

/// Platform restart primitive
pub trait PlatformReset {
    /// Reset the platform; never returns
    fn reset_system(&mut self, reset_type: ResetType, reason: ResetReason) -> !;
}

/// Platform watchdog timer; a timeout of zero disarms it
#[cfg_attr(test, mockall::automock)]
pub trait Watchdog {
    fn set_timeout(&mut self, seconds: usize);
}

/// Progress bar colour as 0x00RRGGBB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressColor(pub u32);

impl ProgressColor {
    pub fn from_packed(raw: u32) -> Self {
        Self(raw & 0x00FF_FFFF)
    }

    pub fn red(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub fn green(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn blue(&self) -> u8 {
        self.0 as u8
    }
}

/// Progress display sink
#[cfg_attr(test, mockall::automock)]
pub trait ProgressDisplay {
    fn show(&mut self, percentage: u8, color: Option<ProgressColor>) -> Result;
}

/// Settings published by the firmware management progress protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FmpProgress {
    pub watchdog_seconds: usize,
    pub foreground: ProgressColor,
}

/// Header validator accepting exactly what UEFI allows in a capsule header
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardHeaderValidator;

impl HeaderValidator for StandardHeaderValidator {
    fn is_valid(&self, image: &CapsuleImage<'_>, declared_size: u64) -> bool {
        let header = image.header();
        if header.image_size as u64 != declared_size {
            return false;
        }
        if (header.header_size as usize) < CapsuleHeader::SIZE {
            return false;
        }
        header.header_size <= header.image_size
            && header.image_size as usize <= image.bytes().len()
    }
}

/// Platform services used for one boot attempt
pub struct CapsuleServices<'s> {
    pub header_validator: &'s dyn HeaderValidator,
    pub fmp: &'s dyn FmpInspector,
    pub processor: &'s mut dyn CapsuleProcessor,
    /// Absent when the registry protocol is not installed
    pub registry: Option<&'s mut dyn RegistrySync>,
    pub config_table: &'s mut dyn ConfigurationTable,
    pub status_codes: &'s mut dyn StatusCodeReporter,
    pub reset: &'s mut dyn PlatformReset,
}

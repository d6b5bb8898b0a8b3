//! UEFI boot and runtime service bindings
//!
//! Adapters from the platform traits to the firmware services exposed by the
//! `uefi` crate. Only built with the `uefi_support` feature.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ffi::c_void;

use uefi::boot::{self, MemoryType};
use uefi::runtime::{self, ResetType};
use uefi::{Guid, Status};

use crate::error::{CapsuleError, Result};
use crate::platform::{ConfigurationTable, PlatformReset, ResetReason, Watchdog};
use crate::publisher::CapsuleTable;

impl From<uefi::Error> for CapsuleError {
    fn from(error: uefi::Error) -> Self {
        CapsuleError::from(error.status())
    }
}

/// Watchdog backed by `SetWatchdogTimer`
#[derive(Debug, Default, Clone, Copy)]
pub struct UefiWatchdog;

impl Watchdog for UefiWatchdog {
    fn set_timeout(&mut self, seconds: usize) {
        if let Err(error) = boot::set_watchdog_timer(seconds, 0, None) {
            log::warn!("Set watchdog timer to {} seconds failed: {:?}", seconds, error.status());
        }
    }
}

/// Installs capsule tables into the system configuration table
///
/// Tables live in runtime services data so the OS can read them after exit
/// boot services.
#[derive(Debug, Default)]
pub struct UefiConfigurationTable {
    /// GUIDs handed to the firmware, kept for the rest of the boot
    guids: Vec<&'static Guid>,
}

impl UefiConfigurationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn static_guid(&mut self, guid: Guid) -> Result<&'static Guid> {
        if let Some(existing) = self.guids.iter().find(|known| ***known == guid) {
            return Ok(*existing);
        }
        self.guids
            .try_reserve(1)
            .map_err(|_| CapsuleError::OutOfResources)?;
        let leaked: &'static Guid = Box::leak(Box::new(guid));
        self.guids.push(leaked);
        Ok(leaked)
    }
}

impl ConfigurationTable for UefiConfigurationTable {
    fn install(&mut self, guid: Guid, table: CapsuleTable) -> Result {
        let guid = self.static_guid(guid)?;
        let bytes = table.to_bytes()?;
        let buffer = boot::allocate_pool(MemoryType::RUNTIME_SERVICES_DATA, bytes.len())?;

        // SAFETY: the pool buffer was just allocated with `bytes.len()` bytes.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer.as_ptr(), bytes.len());
        }

        // SAFETY: the buffer stays allocated and is never freed by this crate.
        let installed =
            unsafe { boot::install_configuration_table(guid, buffer.as_ptr() as *const c_void) };
        if let Err(error) = installed {
            // SAFETY: the buffer was not handed to the firmware.
            let _ = unsafe { boot::free_pool(buffer) };
            return Err(error.into());
        }

        log::debug!("Installed capsule table {} ({} entries)", guid, table.count());
        Ok(())
    }
}

/// Cold reset through `ResetSystem`
///
/// The reset data carries an empty description followed by `subtype`, the
/// platform-defined reset subtype for a completed capsule update.
#[derive(Debug, Clone, Copy)]
pub struct UefiReset {
    subtype: Guid,
}

impl UefiReset {
    pub fn new(subtype: Guid) -> Self {
        Self { subtype }
    }
}

impl PlatformReset for UefiReset {
    fn reset_system(&mut self, reset_type: ResetType, reason: ResetReason) -> ! {
        log::info!("Resetting system ({:?})", reason);

        let mut data = [0u8; 2 + 16];
        data[2..].copy_from_slice(&self.subtype.to_bytes());
        runtime::reset(reset_type, Status::SUCCESS, Some(&data))
    }
}

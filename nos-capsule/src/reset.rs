//! Reset coordinator
//!
//! Turns the reset flag accumulated by the dispatcher into a cold reset.
//! The reset never returns, so nothing may be sequenced after it.

use uefi_raw::table::runtime::ResetType;

use crate::platform::{CapsuleServices, CapsuleStatusCode, ResetReason};

/// Cold-reset the platform after capsule processing
pub fn reset_system(services: &mut CapsuleServices<'_>) -> ! {
    log::info!("Capsule Request Cold Reboot");
    services
        .status_codes
        .report(CapsuleStatusCode::ResettingSystem);
    services
        .reset
        .reset_system(ResetType::COLD, ResetReason::CapsuleUpdateComplete)
}

/// Reset if `reset_required`; returns only when no reset is needed
pub fn reset_if_required(services: &mut CapsuleServices<'_>, reset_required: bool) {
    if reset_required {
        reset_system(services);
    }
    log::debug!("No capsule requested a reset");
}

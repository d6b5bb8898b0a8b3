//! NOS Capsule Library
//!
//! Processes firmware update capsules handed off by the pre-boot stage:
//! discovery, system table publication, dispatch to update agents, per-capsule
//! status accounting and the final reset decision.
//!
//! All platform services are reached through the delegate traits in
//! [`platform`], so the orchestration pipeline runs unchanged under firmware
//! and under host-side tests.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

// ============================================================================
// MODULE HIERARCHY
// ============================================================================

/// Crate error type and UEFI status mapping
pub mod error;

/// Capsule configuration and flag parsing
pub mod config;

/// Capsule header parsing, flags and well-known capsule GUIDs
pub mod image;

/// Firmware management (FMP) capsule layout inspection
pub mod fmp;

/// Delegate traits for platform services
pub mod platform;

/// Handoff list scanning
pub mod locator;

/// Per-capsule processing status
pub mod status;

/// Capsule system table publication
pub mod publisher;

/// Capsule dispatch state machine
pub mod dispatcher;

/// Terminal reset decision
pub mod reset;

/// Update progress reporting
pub mod progress;

/// Round policy driver
pub mod orchestrator;

/// UEFI service bindings for the delegate traits
#[cfg(feature = "uefi_support")]
pub mod uefi;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::{CapsuleConfig, RoundPolicy};
pub use dispatcher::{CapsuleContext, CapsuleDispatcher};
pub use error::{CapsuleError, Result};
pub use image::{CapsuleFlags, CapsuleHeader, CapsuleImage};
pub use locator::{CapsuleRecord, Discovery, HandoffCapsule};
pub use orchestrator::CapsuleOrchestrator;
pub use platform::CapsuleServices;
pub use progress::ProgressReporter;
pub use status::{ProcessingStatus, StatusTracker};

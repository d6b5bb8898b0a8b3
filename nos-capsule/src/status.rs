//! Per-capsule processing status
//!
//! One entry per discovered capsule, indexed by discovery position. Entries
//! start out [`ProcessingStatus::Pending`] and are written only by the
//! dispatcher.

use alloc::collections::TryReserveError;
use alloc::vec::Vec;

use uefi_raw::Status;

/// Why a capsule was rejected without reaching its update agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Not a capsule type this platform processes
    Unsupported,
    /// FMP layout validation failed
    InvalidLayout,
    /// A second display capsule; only the first one is shown
    DuplicateDisplay,
}

/// Terminal failure reported by the update agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Unsupported,
    ResourceExhausted,
    VolumeCorrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Pending,
    Succeeded,
    Failed(FailureKind),
    Aborted(AbortReason),
}

impl ProcessingStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, ProcessingStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    /// UEFI status recorded for this outcome in the capsule result
    pub fn as_status(&self) -> Status {
        match self {
            ProcessingStatus::Pending => Status::NOT_READY,
            ProcessingStatus::Succeeded => Status::SUCCESS,
            ProcessingStatus::Aborted(_) => Status::ABORTED,
            ProcessingStatus::Failed(FailureKind::Unsupported) => Status::UNSUPPORTED,
            ProcessingStatus::Failed(FailureKind::ResourceExhausted) => Status::OUT_OF_RESOURCES,
            ProcessingStatus::Failed(FailureKind::VolumeCorrupted) => Status::VOLUME_CORRUPTED,
        }
    }
}

/// Status array running parallel to the discovered capsule sequence
///
/// The length is fixed at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusTracker {
    entries: Vec<ProcessingStatus>,
}

impl StatusTracker {
    /// Allocate `len` entries, all pending
    pub fn with_len(len: usize) -> Result<Self, TryReserveError> {
        let mut entries = Vec::new();
        entries.try_reserve_exact(len)?;
        entries.resize(len, ProcessingStatus::Pending);
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<ProcessingStatus> {
        self.entries.get(position).copied()
    }

    /// Record the status of the capsule at `position`
    ///
    /// Terminal entries are never overwritten.
    pub fn set(&mut self, position: usize, status: ProcessingStatus) {
        match self.entries.get_mut(position) {
            Some(entry) if entry.is_pending() => *entry = status,
            Some(entry) => {
                log::warn!(
                    "Capsule {} already terminal ({:?}), ignoring {:?}",
                    position,
                    entry,
                    status
                );
            }
            None => log::error!("Capsule status index {} out of range", position),
        }
    }

    /// True when no entry is pending; vacuously true when empty
    pub fn all_processed(&self) -> bool {
        self.entries.iter().all(ProcessingStatus::is_terminal)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|s| s.is_pending()).count()
    }
}

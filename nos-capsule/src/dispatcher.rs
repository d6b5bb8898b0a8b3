//! Capsule dispatcher
//!
//! One pass over the discovered capsules:
//!
//! 1. the display capsule, if any, is shown first and always counts as
//!    succeeded;
//! 2. every other pending capsule is classified, validated and either
//!    deferred or handed to its update agent;
//! 3. the device-update registry is refreshed on a best-effort basis.
//!
//! Per-capsule outcomes only ever land in the status array. A capsule leaves
//! `Pending` at most once; capsules with embedded drivers wait for the second
//! round, and agents answering `NotReady` keep their capsule pending.

use crate::config::CapsuleConfig;
use crate::error::{CapsuleError, Result};
use crate::image::{CapsuleImage, DISPLAY_CAPSULE_GUID};
use crate::locator::{self, CapsuleRecord, Discovery, HandoffCapsule};
use crate::platform::{ApplyOutcome, CapsuleServices, CapsuleStatusCode, HeaderValidator};
use crate::publisher;
use crate::status::{AbortReason, FailureKind, ProcessingStatus, StatusTracker};

/// State carried across the passes of one boot attempt
#[derive(Debug, Default)]
pub struct CapsuleContext<'a> {
    discovery: Option<Discovery<'a>>,
    published: bool,
    reset_required: bool,
    passes: u32,
}

impl<'a> CapsuleContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context over an already scanned handoff list
    pub fn with_discovery(discovery: Discovery<'a>) -> Self {
        Self {
            discovery: Some(discovery),
            ..Self::default()
        }
    }

    /// Scan the handoff list unless an earlier pass already did
    pub fn discover(
        &mut self,
        handoff: &[HandoffCapsule<'a>],
        validator: &dyn HeaderValidator,
    ) -> &Discovery<'a> {
        self.discovery
            .get_or_insert_with(|| locator::discover(handoff, validator))
    }

    /// True once the system table has been published for this boot
    pub fn is_published(&self) -> bool {
        self.published
    }

    pub fn records(&self) -> &[CapsuleRecord<'a>] {
        self.discovery.as_ref().map(Discovery::records).unwrap_or(&[])
    }

    pub fn status(&self) -> Option<&StatusTracker> {
        self.discovery.as_ref().map(Discovery::status)
    }

    /// Status of the capsule at `position`
    pub fn status_of(&self, position: usize) -> Option<ProcessingStatus> {
        self.status().and_then(|status| status.get(position))
    }

    pub fn all_processed(&self) -> bool {
        self.status().is_none_or(StatusTracker::all_processed)
    }

    pub fn reset_required(&self) -> bool {
        self.reset_required
    }

    /// Number of dispatcher passes run so far
    pub fn passes(&self) -> u32 {
        self.passes
    }
}

/// Capsule classification by GUID and FMP shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapsuleKind {
    Display,
    FirmwareManagement,
    Unrecognized,
}

/// Runs dispatcher passes against the platform services
pub struct CapsuleDispatcher<'r, 's> {
    config: &'r CapsuleConfig,
    services: &'r mut CapsuleServices<'s>,
}

impl<'r, 's> CapsuleDispatcher<'r, 's> {
    pub fn new(config: &'r CapsuleConfig, services: &'r mut CapsuleServices<'s>) -> Self {
        Self { config, services }
    }

    pub fn classify(&self, image: &CapsuleImage<'_>) -> CapsuleKind {
        if image.guid() == DISPLAY_CAPSULE_GUID {
            CapsuleKind::Display
        } else if self.services.fmp.is_fmp_capsule(image) {
            CapsuleKind::FirmwareManagement
        } else {
            CapsuleKind::Unrecognized
        }
    }

    /// Run one pass
    ///
    /// `first_round` publishes the system table, at most once per boot, and
    /// defers FMP capsules with embedded drivers. Only a discovery allocation failure is reported as
    /// an error; per-capsule failures stay in the status array.
    pub fn process_these_capsules(&mut self, ctx: &mut CapsuleContext<'_>, first_round: bool) -> Result {
        self.report(CapsuleStatusCode::ProcessCapsulesBegin);
        ctx.passes += 1;

        let Some(discovery) = ctx.discovery.as_mut() else {
            log::warn!("Capsule pass requested before discovery");
            return Ok(());
        };

        if discovery.allocation_failed() {
            log::error!("Capsule discovery ran out of resources, nothing processed");
            return Err(CapsuleError::OutOfResources);
        }

        if discovery.is_empty() {
            log::info!("No capsule data found for this boot");
            return Ok(());
        }

        if discovery.status().all_processed() {
            return Ok(());
        }

        if first_round && !ctx.published {
            let installed = publisher::publish(
                discovery.records(),
                self.config,
                &mut *self.services.config_table,
            );
            log::debug!("Capsule tables installed: {}", installed);
            ctx.published = true;
        }

        self.report(CapsuleStatusCode::UpdatingFirmware);

        let (records, status) = discovery.parts_mut();
        self.process_display(records, status);
        if self.sweep(records, status, first_round) {
            ctx.reset_required = true;
        }

        self.sync_registry();
        self.report(CapsuleStatusCode::ProcessCapsulesEnd);

        Ok(())
    }

    /// Show the first display capsule; its outcome never blocks the pass
    fn process_display(&mut self, records: &[CapsuleRecord<'_>], status: &mut StatusTracker) {
        let Some(record) = records
            .iter()
            .find(|record| self.classify(record.image()) == CapsuleKind::Display)
        else {
            return;
        };

        if status.get(record.position()) != Some(ProcessingStatus::Pending) {
            return;
        }

        log::info!("Display capsule found at position {}", record.position());
        let result = self.services.processor.process(record.image());
        log::info!("Display capsule processed: {:?}", result.outcome);
        status.set(record.position(), ProcessingStatus::Succeeded);
    }

    /// Sweep the pending capsules; returns true if any of them needs a reset
    fn sweep(
        &mut self,
        records: &[CapsuleRecord<'_>],
        status: &mut StatusTracker,
        first_round: bool,
    ) -> bool {
        let mut reset_required = false;

        for record in records {
            let position = record.position();
            if status.get(position) != Some(ProcessingStatus::Pending) {
                continue;
            }
            let image = record.image();

            match self.classify(image) {
                CapsuleKind::Display => {
                    log::warn!("Ignoring additional display capsule at position {}", position);
                    status.set(position, ProcessingStatus::Aborted(AbortReason::DuplicateDisplay));
                    continue;
                }
                CapsuleKind::Unrecognized => {
                    log::error!("Capsule {} ({}) is not supported", position, image.guid());
                    status.set(position, ProcessingStatus::Aborted(AbortReason::Unsupported));
                    continue;
                }
                CapsuleKind::FirmwareManagement => {}
            }

            let embedded_drivers = match self.services.fmp.validate(image) {
                Ok(count) => count,
                Err(error) => {
                    log::error!("Capsule {} failed FMP validation: {}", position, error);
                    status.set(position, ProcessingStatus::Aborted(AbortReason::InvalidLayout));
                    continue;
                }
            };

            if first_round && embedded_drivers > 0 {
                log::info!(
                    "Deferring capsule {} with {} embedded driver(s) to the next round",
                    position,
                    embedded_drivers
                );
                continue;
            }

            log::info!("Processing capsule {} at {:#x}", position, image.address());
            let result = self.services.processor.process(image);
            log::info!("Capsule {} processed: {:?}", position, result.outcome);

            let outcome = match result.outcome {
                ApplyOutcome::NotReady => continue,
                ApplyOutcome::Succeeded => ProcessingStatus::Succeeded,
                ApplyOutcome::Unsupported => ProcessingStatus::Failed(FailureKind::Unsupported),
                ApplyOutcome::ResourceExhausted => {
                    ProcessingStatus::Failed(FailureKind::ResourceExhausted)
                }
                ApplyOutcome::VolumeCorrupted => ProcessingStatus::Failed(FailureKind::VolumeCorrupted),
            };
            status.set(position, outcome);

            if outcome == ProcessingStatus::Succeeded {
                self.report(CapsuleStatusCode::UpdateFirmwareSuccess);
            } else {
                log::error!("Capsule {} update failed: {:?}", position, outcome);
                self.report(CapsuleStatusCode::UpdateFirmwareFailed);
            }

            if result.reset_required || self.config.forces_reset(image.flags()) {
                reset_required = true;
            }
        }

        reset_required
    }

    /// Refresh the device-update registry; failures are only logged
    fn sync_registry(&mut self) {
        if !self.config.sync_registry {
            return;
        }
        match self.services.registry.as_deref_mut() {
            Some(registry) => {
                if let Err(error) = registry.sync() {
                    log::warn!("Device-update registry sync failed: {}", error);
                }
            }
            None => log::debug!("Device-update registry not available"),
        }
    }

    fn report(&mut self, code: CapsuleStatusCode) {
        self.services.status_codes.report(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmp::FmpCapsuleInspector;
    use crate::image::{CapsuleFlags, CapsuleHeader, FMP_CAPSULE_GUID};
    use crate::platform::{
        ApplyResult, CapsuleProcessor, ConfigurationTable, LogStatusCodeReporter, MockRegistrySync,
        PlatformReset, ResetReason, StandardHeaderValidator,
    };
    use crate::publisher::CapsuleTable;
    use uefi_raw::table::runtime::ResetType;
    use uefi_raw::{guid, Guid};

    struct FixedProcessor {
        result: ApplyResult,
        calls: usize,
    }

    impl CapsuleProcessor for FixedProcessor {
        fn process(&mut self, _image: &CapsuleImage<'_>) -> ApplyResult {
            self.calls += 1;
            self.result
        }
    }

    #[derive(Default)]
    struct NoTable;

    impl ConfigurationTable for NoTable {
        fn install(&mut self, _guid: Guid, _table: CapsuleTable) -> Result {
            Err(CapsuleError::OutOfResources)
        }
    }

    struct NoReset;

    impl PlatformReset for NoReset {
        fn reset_system(&mut self, _reset_type: ResetType, _reason: ResetReason) -> ! {
            panic!("unexpected reset");
        }
    }

    fn bare_capsule(guid: Guid, flags: CapsuleFlags) -> Vec<u8> {
        let header = CapsuleHeader {
            guid,
            header_size: CapsuleHeader::SIZE as u32,
            flags,
            image_size: CapsuleHeader::SIZE as u32,
        };
        header.to_bytes().to_vec()
    }

    #[test]
    fn test_classify() {
        let fmp = FmpCapsuleInspector;
        let mut processor = FixedProcessor {
            result: ApplyResult::new(ApplyOutcome::Succeeded),
            calls: 0,
        };
        let mut table = NoTable;
        let mut codes = LogStatusCodeReporter;
        let mut reset = NoReset;
        let mut services = CapsuleServices {
            header_validator: &StandardHeaderValidator,
            fmp: &fmp,
            processor: &mut processor,
            registry: None,
            config_table: &mut table,
            status_codes: &mut codes,
            reset: &mut reset,
        };
        let config = CapsuleConfig::new();
        let dispatcher = CapsuleDispatcher::new(&config, &mut services);

        let display = bare_capsule(DISPLAY_CAPSULE_GUID, CapsuleFlags::empty());
        let fmp_capsule = bare_capsule(FMP_CAPSULE_GUID, CapsuleFlags::empty());
        let other = bare_capsule(guid!("11111111-2222-3333-4444-555555555555"), CapsuleFlags::empty());

        assert_eq!(
            dispatcher.classify(&CapsuleImage::new(&display).unwrap()),
            CapsuleKind::Display
        );
        assert_eq!(
            dispatcher.classify(&CapsuleImage::new(&fmp_capsule).unwrap()),
            CapsuleKind::FirmwareManagement
        );
        assert_eq!(
            dispatcher.classify(&CapsuleImage::new(&other).unwrap()),
            CapsuleKind::Unrecognized
        );
    }

    #[test]
    fn test_degraded_discovery_reports_out_of_resources() {
        let fmp = FmpCapsuleInspector;
        let mut processor = FixedProcessor {
            result: ApplyResult::new(ApplyOutcome::Succeeded),
            calls: 0,
        };
        let mut table = NoTable;
        let mut codes = LogStatusCodeReporter;
        let mut reset = NoReset;
        let mut registry = MockRegistrySync::new();
        registry.expect_sync().never();

        let mut services = CapsuleServices {
            header_validator: &StandardHeaderValidator,
            fmp: &fmp,
            processor: &mut processor,
            registry: Some(&mut registry),
            config_table: &mut table,
            status_codes: &mut codes,
            reset: &mut reset,
        };
        let config = CapsuleConfig::new();
        let mut ctx = CapsuleContext::with_discovery(Discovery::degraded());

        let result = CapsuleDispatcher::new(&config, &mut services).process_these_capsules(&mut ctx, true);

        assert_eq!(result, Err(CapsuleError::OutOfResources));
        assert!(!ctx.reset_required());
        assert!(ctx.all_processed());
    }

    #[test]
    fn test_registry_failure_is_ignored() {
        let fmp = FmpCapsuleInspector;
        let mut processor = FixedProcessor {
            result: ApplyResult::new(ApplyOutcome::Succeeded),
            calls: 0,
        };
        let mut table = NoTable;
        let mut codes = LogStatusCodeReporter;
        let mut reset = NoReset;
        let mut registry = MockRegistrySync::new();
        registry
            .expect_sync()
            .times(1)
            .returning(|| Err(CapsuleError::DeviceError));

        // an unrecognized capsule still triggers a full pass
        let bytes = bare_capsule(guid!("11111111-2222-3333-4444-555555555555"), CapsuleFlags::empty());
        let handoff = [HandoffCapsule::new(&bytes)];
        let mut ctx = CapsuleContext::new();
        ctx.discover(&handoff, &StandardHeaderValidator);

        let mut services = CapsuleServices {
            header_validator: &StandardHeaderValidator,
            fmp: &fmp,
            processor: &mut processor,
            registry: Some(&mut registry),
            config_table: &mut table,
            status_codes: &mut codes,
            reset: &mut reset,
        };
        let config = CapsuleConfig::new();

        let result = CapsuleDispatcher::new(&config, &mut services).process_these_capsules(&mut ctx, true);

        assert_eq!(result, Ok(()));
        assert_eq!(
            ctx.status_of(0),
            Some(ProcessingStatus::Aborted(AbortReason::Unsupported))
        );
        assert_eq!(processor.calls, 0);
    }

    #[test]
    fn test_registry_sync_can_be_disabled() {
        let fmp = FmpCapsuleInspector;
        let mut processor = FixedProcessor {
            result: ApplyResult::new(ApplyOutcome::Succeeded),
            calls: 0,
        };
        let mut table = NoTable;
        let mut codes = LogStatusCodeReporter;
        let mut reset = NoReset;
        let mut registry = MockRegistrySync::new();
        registry.expect_sync().never();

        let bytes = bare_capsule(DISPLAY_CAPSULE_GUID, CapsuleFlags::empty());
        let handoff = [HandoffCapsule::new(&bytes)];
        let mut ctx = CapsuleContext::new();
        ctx.discover(&handoff, &StandardHeaderValidator);

        let mut services = CapsuleServices {
            header_validator: &StandardHeaderValidator,
            fmp: &fmp,
            processor: &mut processor,
            registry: Some(&mut registry),
            config_table: &mut table,
            status_codes: &mut codes,
            reset: &mut reset,
        };
        let mut config = CapsuleConfig::new();
        config.apply_flags("no-registry-sync");

        CapsuleDispatcher::new(&config, &mut services)
            .process_these_capsules(&mut ctx, true)
            .unwrap();

        assert_eq!(ctx.status_of(0), Some(ProcessingStatus::Succeeded));
        assert_eq!(processor.calls, 1);
    }
}

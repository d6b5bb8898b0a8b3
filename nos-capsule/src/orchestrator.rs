//! Capsule orchestrator
//!
//! Drives dispatcher passes and the reset decision according to the
//! configured round policy.
//!
//! - `SinglePass`: each call runs a first-round pass and resets right away if
//!   any capsule asked for it.
//! - `TwoPass`: the call before end-of-DXE runs the first round and resets only
//!   when every capsule is already processed; calls after end-of-DXE pick up
//!   the deferred capsules and reset if required.

use crate::config::{CapsuleConfig, RoundPolicy};
use crate::dispatcher::{CapsuleContext, CapsuleDispatcher};
use crate::error::Result;
use crate::locator::HandoffCapsule;
use crate::platform::CapsuleServices;
use crate::reset;

pub struct CapsuleOrchestrator<'a, 's> {
    config: CapsuleConfig,
    services: CapsuleServices<'s>,
    handoff: &'a [HandoffCapsule<'a>],
    ctx: CapsuleContext<'a>,
    end_of_dxe: bool,
}

impl<'a, 's> CapsuleOrchestrator<'a, 's> {
    pub fn new(
        config: CapsuleConfig,
        services: CapsuleServices<'s>,
        handoff: &'a [HandoffCapsule<'a>],
    ) -> Self {
        Self {
            config,
            services,
            handoff,
            ctx: CapsuleContext::new(),
            end_of_dxe: false,
        }
    }

    pub fn config(&self) -> &CapsuleConfig {
        &self.config
    }

    pub fn context(&self) -> &CapsuleContext<'a> {
        &self.ctx
    }

    /// Device enumeration is complete; later calls run the second round
    pub fn signal_end_of_dxe(&mut self) {
        self.end_of_dxe = true;
    }

    /// Release the platform services and keep the per-boot state
    pub fn finish(self) -> CapsuleContext<'a> {
        self.ctx
    }

    /// Process the staged capsules
    ///
    /// Does not return if the platform is reset.
    pub fn process_capsules(&mut self) -> Result {
        match self.config.policy {
            RoundPolicy::SinglePass => {
                let status = self.run_pass(true);
                reset::reset_if_required(&mut self.services, self.ctx.reset_required());
                status
            }
            RoundPolicy::TwoPass if !self.end_of_dxe => {
                let status = self.run_pass(true);
                // defer the reset while capsules still wait for the second round
                if self.ctx.reset_required() && self.ctx.all_processed() {
                    reset::reset_system(&mut self.services);
                }
                status
            }
            RoundPolicy::TwoPass => {
                let status = self.run_pass(false);
                reset::reset_if_required(&mut self.services, self.ctx.reset_required());
                status
            }
        }
    }

    fn run_pass(&mut self, first_round: bool) -> Result {
        self.ctx
            .discover(self.handoff, self.services.header_validator);

        log::debug!(
            "Capsule pass {} (first round: {})",
            self.ctx.passes() + 1,
            first_round
        );
        CapsuleDispatcher::new(&self.config, &mut self.services)
            .process_these_capsules(&mut self.ctx, first_round)
    }
}

//! Update progress reporting
//!
//! Update agents report completion percentages while they flash. Every report
//! pets the platform watchdog: it is disarmed, then re-armed unless the update
//! has finished, and the percentage is forwarded to the progress display.

use crate::config::CapsuleConfig;
use crate::error::{CapsuleError, Result};
use crate::platform::{FmpProgress, ProgressColor, ProgressDisplay, Watchdog};

pub struct ProgressReporter<'p> {
    watchdog: &'p mut dyn Watchdog,
    display: &'p mut dyn ProgressDisplay,
    fmp_progress: Option<FmpProgress>,
    watchdog_seconds: usize,
}

impl<'p> ProgressReporter<'p> {
    pub fn new(
        watchdog: &'p mut dyn Watchdog,
        display: &'p mut dyn ProgressDisplay,
        config: &CapsuleConfig,
    ) -> Self {
        Self {
            watchdog,
            display,
            fmp_progress: None,
            watchdog_seconds: config.watchdog_seconds,
        }
    }

    /// Use the timeout and colour published by the FMP progress protocol
    pub fn with_fmp_progress(mut self, fmp_progress: FmpProgress) -> Self {
        self.fmp_progress = Some(fmp_progress);
        self
    }

    /// Report `percentage` complete
    ///
    /// Without an explicit colour the FMP progress foreground colour is used.
    pub fn report(&mut self, percentage: usize, color: Option<ProgressColor>) -> Result {
        log::info!("Update Progress - {}%", percentage);
        if percentage > 100 {
            return Err(CapsuleError::InvalidParameter);
        }

        let (seconds, foreground) = match self.fmp_progress {
            Some(progress) => (progress.watchdog_seconds, Some(progress.foreground)),
            None => (self.watchdog_seconds, None),
        };

        self.pet_watchdog(percentage, seconds);
        self.display.show(percentage as u8, color.or(foreground))
    }

    /// Report progress packed as `0xRRGGBBPP`: colour above, percentage in the low byte
    pub fn report_packed(&mut self, completion: usize) -> Result {
        let color = ProgressColor::from_packed((completion >> 8) as u32);
        let percentage = completion & 0xFF;

        log::info!("Update Progress - {}%", percentage);
        if percentage > 100 {
            return Err(CapsuleError::InvalidParameter);
        }

        self.pet_watchdog(percentage, self.watchdog_seconds);
        self.display.show(percentage as u8, Some(color))
    }

    fn pet_watchdog(&mut self, percentage: usize, seconds: usize) {
        self.watchdog.set_timeout(0);
        if percentage != 100 && seconds != 0 {
            log::trace!("Arm watchdog timer {} seconds", seconds);
            self.watchdog.set_timeout(seconds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{MockProgressDisplay, MockWatchdog};
    use mockall::predicate::eq;
    use mockall::Sequence;

    #[test]
    fn test_over_100_has_no_side_effect() {
        let mut watchdog = MockWatchdog::new();
        watchdog.expect_set_timeout().never();
        let mut display = MockProgressDisplay::new();
        display.expect_show().never();

        let config = CapsuleConfig::new();
        let mut reporter = ProgressReporter::new(&mut watchdog, &mut display, &config);

        assert_eq!(reporter.report(101, None), Err(CapsuleError::InvalidParameter));
    }

    #[test]
    fn test_partial_progress_rearms_default_watchdog() {
        let mut seq = Sequence::new();
        let mut watchdog = MockWatchdog::new();
        watchdog
            .expect_set_timeout()
            .with(eq(0))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        watchdog
            .expect_set_timeout()
            .with(eq(300))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let mut display = MockProgressDisplay::new();
        display
            .expect_show()
            .with(eq(42u8), eq(None))
            .times(1)
            .returning(|_, _| Ok(()));

        let config = CapsuleConfig::new();
        let mut reporter = ProgressReporter::new(&mut watchdog, &mut display, &config);

        assert_eq!(reporter.report(42, None), Ok(()));
    }

    #[test]
    fn test_completion_disarms_only() {
        let mut watchdog = MockWatchdog::new();
        watchdog
            .expect_set_timeout()
            .with(eq(0))
            .times(1)
            .return_const(());

        let mut display = MockProgressDisplay::new();
        display
            .expect_show()
            .with(eq(100u8), eq(Some(ProgressColor(0x00FF00))))
            .times(1)
            .returning(|_, _| Ok(()));

        let config = CapsuleConfig::new();
        let mut reporter = ProgressReporter::new(&mut watchdog, &mut display, &config);

        assert_eq!(reporter.report(100, Some(ProgressColor(0x00FF00))), Ok(()));
    }

    #[test]
    fn test_fmp_progress_supplies_timeout_and_color() {
        let mut watchdog = MockWatchdog::new();
        watchdog.expect_set_timeout().with(eq(0)).times(1).return_const(());
        watchdog.expect_set_timeout().with(eq(90)).times(1).return_const(());

        let mut display = MockProgressDisplay::new();
        display
            .expect_show()
            .with(eq(10u8), eq(Some(ProgressColor(0x0000FF))))
            .times(1)
            .returning(|_, _| Err(CapsuleError::DeviceError));

        let config = CapsuleConfig::new();
        let mut reporter = ProgressReporter::new(&mut watchdog, &mut display, &config)
            .with_fmp_progress(FmpProgress {
                watchdog_seconds: 90,
                foreground: ProgressColor(0x0000FF),
            });

        // the display result is passed through unchanged
        assert_eq!(reporter.report(10, None), Err(CapsuleError::DeviceError));
    }

    #[test]
    fn test_zero_timeout_is_not_armed() {
        let mut watchdog = MockWatchdog::new();
        watchdog.expect_set_timeout().with(eq(0)).times(1).return_const(());

        let mut display = MockProgressDisplay::new();
        display.expect_show().times(1).returning(|_, _| Ok(()));

        let mut config = CapsuleConfig::new();
        config.apply_flags("watchdog=0");
        let mut reporter = ProgressReporter::new(&mut watchdog, &mut display, &config);

        assert_eq!(reporter.report(50, None), Ok(()));
    }

    #[test]
    fn test_packed_progress() {
        let mut watchdog = MockWatchdog::new();
        watchdog.expect_set_timeout().with(eq(0)).times(1).return_const(());
        watchdog.expect_set_timeout().with(eq(120)).times(1).return_const(());

        let mut display = MockProgressDisplay::new();
        display
            .expect_show()
            .with(eq(75u8), eq(Some(ProgressColor(0x12_3456))))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut config = CapsuleConfig::new();
        config.apply_flags("watchdog=120");
        let mut reporter = ProgressReporter::new(&mut watchdog, &mut display, &config);

        assert_eq!(reporter.report_packed(0x12_3456_4B), Ok(()));
    }

    #[test]
    fn test_packed_progress_rejects_bad_percentage() {
        let mut watchdog = MockWatchdog::new();
        watchdog.expect_set_timeout().never();
        let mut display = MockProgressDisplay::new();
        display.expect_show().never();

        let config = CapsuleConfig::new();
        let mut reporter = ProgressReporter::new(&mut watchdog, &mut display, &config);

        assert_eq!(
            reporter.report_packed(0xFF_FFFF_C8),
            Err(CapsuleError::InvalidParameter)
        );
    }
}

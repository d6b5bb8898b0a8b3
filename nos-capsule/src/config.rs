// Capsule processing configuration and platform policy settings

use crate::image::CapsuleFlags;

/// Default watchdog timeout while an update is in progress (5 minutes)
pub const DEFAULT_WATCHDOG_SECONDS: usize = 5 * 60;

/// How many capsule passes a boot runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPolicy {
    /// One first-round pass per call, reset right after it if required
    SinglePass,
    /// A first-round pass before device enumeration, then a second pass after
    TwoPass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsuleConfig {
    pub policy: RoundPolicy,
    pub watchdog_seconds: usize,
    pub reset_flags: CapsuleFlags,
    pub publish_flags: CapsuleFlags,
    pub sync_registry: bool,
}

impl CapsuleConfig {
    pub fn new() -> Self {
        Self {
            policy: RoundPolicy::SinglePass,
            watchdog_seconds: DEFAULT_WATCHDOG_SECONDS,
            reset_flags: CapsuleFlags::ALWAYS_RESET,
            publish_flags: CapsuleFlags::POPULATE_SYSTEM_TABLE,
            sync_registry: true,
        }
    }

    pub fn with_policy(mut self, policy: RoundPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_two_pass(&self) -> bool {
        self.policy == RoundPolicy::TwoPass
    }

    /// True when a capsule carrying `flags` forces a reset after it is processed
    pub fn forces_reset(&self, flags: CapsuleFlags) -> bool {
        flags.intersects(self.reset_flags)
    }

    /// True when a capsule carrying `flags` belongs in the system table
    pub fn is_published(&self, flags: CapsuleFlags) -> bool {
        flags.intersects(self.publish_flags)
    }

    /// Parse platform flags in a single pass
    ///
    /// Unknown tokens and malformed values are skipped (error-tolerant).
    ///
    /// # Example flag strings
    /// - `two-pass watchdog=120`
    /// - `reset-flags=0x1 publish-flags=0x20000 no-registry-sync`
    pub fn apply_flags(&mut self, flags: &str) {
        for token in flags.split_whitespace() {
            match token.split_once('=') {
                Some((key, value)) => self.apply_value(key, value),
                None => self.apply_switch(token),
            }
        }
    }

    fn apply_switch(&mut self, switch: &str) {
        match switch {
            "single-pass" => self.policy = RoundPolicy::SinglePass,
            "two-pass" => self.policy = RoundPolicy::TwoPass,
            "no-registry-sync" => self.sync_registry = false,
            "registry-sync" => self.sync_registry = true,
            _ => log::trace!("Ignoring unknown capsule flag: {}", switch),
        }
    }

    fn apply_value(&mut self, key: &str, value: &str) {
        match key {
            "watchdog" => {
                if let Ok(seconds) = value.parse::<usize>() {
                    self.watchdog_seconds = seconds;
                }
            }
            "reset-flags" => {
                if let Some(bits) = parse_hex(value) {
                    self.reset_flags = CapsuleFlags::from_bits_retain(bits);
                }
            }
            "publish-flags" => {
                if let Some(bits) = parse_hex(value) {
                    self.publish_flags = CapsuleFlags::from_bits_retain(bits);
                }
            }
            _ => log::trace!("Ignoring unknown capsule setting: {}={}", key, value),
        }
    }
}

impl Default for CapsuleConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_hex(value: &str) -> Option<u32> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16).ok()
}

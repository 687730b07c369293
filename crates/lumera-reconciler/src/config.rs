//! Reconciler tuning.

use std::time::Duration;

use lumera_core::ProviderKind;

/// Default interval between polling sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Default number of migration attempts before a job is forced to fail.
pub const DEFAULT_MIGRATE_RETRY_CAP: u32 = 5;

/// Reconciler configuration.
///
/// Lifetimes bound how long a reservation can be held: any job that has
/// not reached a terminal state within its kind's lifetime is forced to
/// `Expired` and refunded. Training runs for hours; inference does not.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between polling sweeps.
    pub sweep_interval: Duration,

    /// Migration attempts allowed before the job is failed and refunded.
    pub migrate_retry_cap: u32,

    /// Maximum lifetime of an image job.
    pub image_max_lifetime: Duration,

    /// Maximum lifetime of a video job.
    pub video_max_lifetime: Duration,

    /// Maximum lifetime of a training job.
    pub training_max_lifetime: Duration,
}

impl ReconcilerConfig {
    /// The lifetime cap for a job of the given kind.
    #[must_use]
    pub const fn max_lifetime(&self, kind: ProviderKind) -> Duration {
        match kind {
            ProviderKind::Image => self.image_max_lifetime,
            ProviderKind::Video => self.video_max_lifetime,
            ProviderKind::Training => self.training_max_lifetime,
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            migrate_retry_cap: DEFAULT_MIGRATE_RETRY_CAP,
            image_max_lifetime: Duration::from_secs(15 * 60),
            video_max_lifetime: Duration::from_secs(60 * 60),
            training_max_lifetime: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifetimes_ordered_by_kind() {
        let config = ReconcilerConfig::default();
        assert!(config.max_lifetime(ProviderKind::Image) < config.max_lifetime(ProviderKind::Video));
        assert!(
            config.max_lifetime(ProviderKind::Video) < config.max_lifetime(ProviderKind::Training)
        );
    }
}

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::SyncError;

/// One of the independently fetched state slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Public,
    Oracle,
    User,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Public, Tier::Oracle, Tier::User];

    pub fn name(&self) -> &'static str {
        match self {
            Tier::Public => "pool",
            Tier::Oracle => "oracle",
            Tier::User => "wallet",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TierStatus {
    #[default]
    Unloaded,
    Loading,
    Ready,
}

/// Latest value of one tier plus the generation that produced it.
///
/// `begin` opens a new generation; `complete` only lands a result for the
/// generation that is still current, so a superseded fetch cannot overwrite
/// newer state. A failed fetch leaves the previous value in place but marks
/// the tier `Unloaded` so nothing is derived from it.
#[derive(Debug)]
pub struct TierState<T> {
    tier: Tier,
    status: TierStatus,
    generation: u64,
    value: Option<Arc<T>>,
    error: Option<SyncError>,
}

impl<T> TierState<T> {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            status: TierStatus::Unloaded,
            generation: 0,
            value: None,
            error: None,
        }
    }

    pub fn status(&self) -> TierStatus {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn value(&self) -> Option<&Arc<T>> {
        self.value.as_ref()
    }

    /// Value only when the tier is `Ready`.
    pub fn ready_value(&self) -> Option<&Arc<T>> {
        match self.status {
            TierStatus::Ready => self.value.as_ref(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&SyncError> {
        self.error.as_ref()
    }

    pub fn begin(&mut self) -> u64 {
        self.generation += 1;
        self.status = TierStatus::Loading;
        debug!(tier = %self.tier, generation = self.generation, "tier loading");
        self.generation
    }

    /// Returns false when `generation` was superseded and the result dropped.
    pub fn complete(&mut self, generation: u64, result: Result<T, SyncError>) -> bool {
        if generation != self.generation {
            debug!(
                tier = %self.tier,
                generation,
                current = self.generation,
                "dropping superseded tier result"
            );
            return false;
        }
        match result {
            Ok(value) => {
                self.value = Some(Arc::new(value));
                self.error = None;
                self.status = TierStatus::Ready;
                debug!(tier = %self.tier, generation, "tier ready");
            }
            Err(e) => {
                warn!(tier = %self.tier, generation, error = %e, "tier fetch failed");
                self.error = Some(e);
                self.status = TierStatus::Unloaded;
            }
        }
        true
    }

    /// Jump straight to `Ready` with `value` under a new generation.
    pub fn set_ready(&mut self, value: T) {
        self.generation += 1;
        self.value = Some(Arc::new(value));
        self.error = None;
        self.status = TierStatus::Ready;
    }

    /// Drop everything; any in-flight generation becomes stale.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.value = None;
        self.error = None;
        self.status = TierStatus::Unloaded;
    }
}

// libs/scheduling-cell/src/services/fence.rs
//! Change fence for window updates and deletes.
//!
//! A fence is a versioned window write stamping `fenced_at`. It is a lease,
//! not a lock: once it is older than the configured TTL any caller may take
//! it over with its own versioned write, which also makes the stale holder's
//! pending commit fail on the version check.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, error, info, warn};

use shared_config::SchedulerSettings;

use crate::clock::Clock;
use crate::models::{AvailabilityWindow, SchedulingError};
use crate::repository::SchedulingRepository;

pub struct ChangeFence {
    repository: Arc<dyn SchedulingRepository>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ChangeFence {
    pub fn new(
        repository: Arc<dyn SchedulingRepository>,
        clock: Arc<dyn Clock>,
        settings: &SchedulerSettings,
    ) -> Self {
        Self {
            repository,
            clock,
            ttl: Duration::seconds(settings.fence_ttl_secs),
        }
    }

    /// Whether the window's fence is still within its lease.
    pub fn is_live(&self, window: &AvailabilityWindow) -> bool {
        match window.fenced_at {
            Some(raised_at) => self.clock.now() < raised_at + self.ttl,
            None => false,
        }
    }

    /// Reject windows under a live fence. A stale fence passes; the caller's
    /// next versioned write on the window takes it over.
    pub fn check(&self, window: &AvailabilityWindow) -> Result<(), SchedulingError> {
        if self.is_live(window) {
            warn!("Window {} has a change in progress", window.id);
            return Err(SchedulingError::WindowModified(window.id));
        }
        if let Some(raised_at) = window.fenced_at {
            warn!("Window {} carries a stale change fence raised at {}", window.id, raised_at);
        }
        Ok(())
    }

    pub async fn raise(&self, window: &AvailabilityWindow) -> Result<AvailabilityWindow, SchedulingError> {
        let fenced = window.fenced(self.clock.now());
        if !self.repository.replace_window(&fenced, window.version).await? {
            warn!("Window {} changed since it was read (version {})", window.id, window.version);
            return Err(SchedulingError::WindowModified(window.id));
        }
        debug!("Raised change fence on window {} at version {}", window.id, fenced.version);
        Ok(fenced)
    }

    /// Best effort: a fence left up here expires with its lease.
    pub async fn lower(&self, fenced: &AvailabilityWindow) {
        let released = fenced.released(self.clock.now());
        match self.repository.replace_window(&released, fenced.version).await {
            Ok(true) => debug!("Lowered change fence on window {}", fenced.id),
            Ok(false) => warn!("Change fence on window {} was taken over", fenced.id),
            Err(e) => error!("Failed to lower change fence on window {}, it expires in {}s: {}",
                             fenced.id, self.ttl.num_seconds(), e),
        }
    }

    /// Clear a stale fence so the window can be booked against again.
    pub async fn reclaim(&self, window: &AvailabilityWindow) -> Result<AvailabilityWindow, SchedulingError> {
        let released = window.released(self.clock.now());
        if !self.repository.replace_window(&released, window.version).await? {
            warn!("Window {} changed while reclaiming its stale fence", window.id);
            return Err(SchedulingError::WindowModified(window.id));
        }
        info!("Reclaimed stale change fence on window {} (now version {})", window.id, released.version);
        Ok(released)
    }
}

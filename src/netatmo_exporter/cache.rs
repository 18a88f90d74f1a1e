// netatmo_exporter - Prometheus metrics exporter for Netatmo weather stations
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::clock::Clock;
use crate::device::{DeviceCollection, Snapshot};
use std::error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;

/// Error returned by a `ReadFunction`.
pub type ReadError = Box<dyn error::Error + Send + Sync>;

/// Future returned by a `ReadFunction`.
pub type ReadFuture = Pin<Box<dyn Future<Output = Result<DeviceCollection, ReadError>> + Send>>;

/// Fetch the current state of all stations from the Netatmo API.
///
/// Implemented for any `Fn() -> impl Future` closure so that API clients can be
/// plugged in without a wrapper type. Any timeout needs to be applied by the
/// implementation, the cache will wait as long as the read takes.
pub trait ReadFunction: Send + Sync + 'static {
    fn read(&self) -> ReadFuture;
}

impl<F, Fut> ReadFunction for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<DeviceCollection, ReadError>> + Send + 'static,
{
    fn read(&self) -> ReadFuture {
        Box::pin(self())
    }
}

/// Failure of the most recent refresh, kept so it can be reported until the next
/// successful one.
#[derive(Debug, Clone)]
pub struct RefreshError {
    cause: Arc<dyn error::Error + Send + Sync>,
}

impl RefreshError {
    fn new(cause: ReadError) -> Self {
        RefreshError { cause: Arc::from(cause) }
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)
    }
}

impl error::Error for RefreshError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// Results of the most recent refresh attempts.
#[derive(Debug, Clone, Default)]
pub struct RefreshState {
    last_refresh: Option<SystemTime>,
    last_error: Option<RefreshError>,
    last_duration: Duration,
    snapshot: Option<Arc<Snapshot>>,
}

impl RefreshState {
    /// Start of the most recent refresh, successful or not.
    pub fn last_refresh(&self) -> Option<SystemTime> {
        self.last_refresh
    }

    /// Error from the most recent refresh if it failed.
    pub fn last_error(&self) -> Option<&RefreshError> {
        self.last_error.as_ref()
    }

    /// How long the most recent completed refresh took, successful or not.
    pub fn last_duration(&self) -> Duration {
        self.last_duration
    }

    /// Data from the most recent successful refresh.
    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        self.snapshot.as_ref()
    }

    /// True when at least one refresh succeeded and the latest one didn't fail.
    pub fn is_up(&self) -> bool {
        self.snapshot.is_some() && self.last_error.is_none()
    }
}

/// Cache of Netatmo station data that is refreshed in the background.
///
/// Reads never wait for the Netatmo API. Callers ask for a refresh with
/// `maybe_refresh` which starts one in the background when the refresh interval
/// has passed since the last attempt and returns right away. At most one refresh
/// runs at any time. A failed refresh keeps the previous data around so it can
/// still be served.
///
/// Cloning the cache is cheap and clones share the same state.
#[derive(Clone)]
pub struct RefreshCache {
    inner: Arc<Inner>,
}

struct Inner {
    reader: Box<dyn ReadFunction>,
    clock: Arc<dyn Clock>,
    refresh_interval: Duration,
    refreshing: AtomicBool,
    state: RwLock<RefreshState>,
}

impl RefreshCache {
    pub fn new<R>(reader: R, clock: Arc<dyn Clock>, refresh_interval: Duration) -> Self
    where
        R: ReadFunction,
    {
        RefreshCache {
            inner: Arc::new(Inner {
                reader: Box::new(reader),
                clock,
                refresh_interval,
                refreshing: AtomicBool::new(false),
                state: RwLock::new(RefreshState::default()),
            }),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.inner.refresh_interval
    }

    /// True if there has never been a refresh or the last one started at least
    /// one refresh interval before `now`.
    pub fn is_due(&self, now: SystemTime) -> bool {
        self.inner.is_due(now)
    }

    /// True while a refresh is running.
    pub fn is_refreshing(&self) -> bool {
        self.inner.refreshing.load(Ordering::Acquire)
    }

    /// Start a refresh in the background if one is due and none is running.
    ///
    /// Returns `true` if a refresh was started. Must be called from within a Tokio
    /// runtime, otherwise no refresh is started and an error is logged.
    pub fn maybe_refresh(&self, now: SystemTime) -> bool {
        if !self.is_due(now) {
            return false;
        }

        let handle = match Handle::try_current() {
            Ok(h) => h,
            Err(e) => {
                tracing::error!(message = "unable to start refresh outside of runtime", error = %e);
                return false;
            }
        };

        let guard = match InFlight::acquire(&self.inner) {
            Some(g) => g,
            None => {
                tracing::debug!(message = "refresh already in progress, skipping");
                return false;
            }
        };

        // Another refresh may have finished between the due check and acquiring the guard
        if !self.is_due(now) {
            return false;
        }

        handle.spawn(async move {
            guard.inner.refresh(now).await;
            drop(guard);
        });

        true
    }

    /// Refresh cached data now, waiting for the result.
    ///
    /// Does nothing if another refresh is already running. Errors from the read
    /// are recorded in the cache state instead of being returned.
    pub async fn refresh(&self, now: SystemTime) {
        match InFlight::acquire(&self.inner) {
            Some(guard) => guard.inner.refresh(now).await,
            None => tracing::debug!(message = "refresh already in progress, skipping"),
        }
    }

    /// Data from the most recent successful refresh, if any.
    pub fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.read_state().snapshot.clone()
    }

    /// Consistent copy of the current refresh state.
    pub fn state(&self) -> RefreshState {
        self.inner.read_state().clone()
    }
}

impl fmt::Debug for RefreshCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCache")
            .field("refresh_interval", &self.inner.refresh_interval)
            .field("refreshing", &self.inner.refreshing)
            .field("state", &self.inner.state)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn is_due(&self, now: SystemTime) -> bool {
        match self.read_state().last_refresh {
            None => true,
            Some(last) => now
                .duration_since(last)
                .map(|since| since >= self.refresh_interval)
                .unwrap_or(false),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RefreshState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RefreshState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Callers must hold the `InFlight` guard.
    async fn refresh(&self, now: SystemTime) {
        let previous = {
            let mut state = self.write_state();
            state.last_refresh.replace(now)
        };

        let since_last = previous.and_then(|p| now.duration_since(p).ok());
        tracing::debug!(
            message = "refreshing data",
            since_last_refresh_secs = since_last.map(|d| d.as_secs_f64()),
        );

        let start = self.clock.now();
        let res = self.reader.read().await;
        let elapsed = self.clock.now().duration_since(start).unwrap_or_default();

        let result = match res {
            Ok(devices) => {
                tracing::info!(
                    message = "refreshed data",
                    num_devices = devices.devices.len(),
                    duration_secs = elapsed.as_secs_f64(),
                );
                Ok(Arc::new(Snapshot::new(devices, now)))
            }
            Err(e) => {
                tracing::error!(
                    message = "error during refresh",
                    error = %e,
                    duration_secs = elapsed.as_secs_f64(),
                );
                Err(RefreshError::new(e))
            }
        };

        let mut state = self.write_state();
        state.last_duration = elapsed;
        match result {
            Ok(snapshot) => {
                state.last_error = None;
                state.snapshot = Some(snapshot);
            }
            Err(e) => state.last_error = Some(e),
        }
    }
}

/// Marks a refresh as running until dropped, even if the refresh panics.
struct InFlight {
    inner: Arc<Inner>,
}

impl InFlight {
    fn acquire(inner: &Arc<Inner>) -> Option<Self> {
        inner
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight { inner: Arc::clone(inner) })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner.refreshing.store(false, Ordering::Release);
    }
}

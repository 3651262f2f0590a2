//! Driver service lifecycle around a run.
//!
//! [`PrivilegedSession::open`] makes sure the WinIo service is installed and running, opens the
//! device channel and (on legacy addressing) enables direct I/O. Whatever it changed is undone
//! exactly once, either by [`PrivilegedSession::close`] or on drop, including when `open` itself
//! fails part way through.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::physmem::{self, RegisterAccess};
use super::protocol::DriverChannel;
use super::{AccessError, SessionError};
use crate::error::PlatformError;
use crate::WINIO_SERVICE_NAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Running,
    /// Start/stop/pause pending, or paused. Carries the raw `SERVICE_STATUS` state.
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Host service manager operations the session needs.
pub trait ServiceControl {
    /// An open service handle. Dropping it closes the handle.
    type Service;
    type Channel: DriverChannel;

    /// `Ok(None)` when no service of that name is installed.
    fn open_service(&mut self, name: &str) -> Result<Option<Self::Service>, PlatformError>;

    /// Install a demand-start kernel driver service for `image_path`.
    fn create_service(
        &mut self,
        name: &str,
        image_path: &Path,
    ) -> Result<Self::Service, PlatformError>;

    fn query_state(&mut self, service: &Self::Service) -> Result<ServiceState, PlatformError>;

    fn start_service(&mut self, service: &Self::Service) -> Result<StartOutcome, PlatformError>;

    fn stop_service(&mut self, service: &Self::Service) -> Result<(), PlatformError>;

    fn delete_service(&mut self, service: &Self::Service) -> Result<(), PlatformError>;

    fn open_channel(&mut self) -> Result<Self::Channel, PlatformError>;

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// How long teardown waits for the service to report stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopWait {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for StopWait {
    fn default() -> Self {
        Self {
            attempts: 25,
            interval: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub service_name: String,
    /// 32-bit kernel: the driver needs direct I/O enabled for the lifetime of the channel.
    pub legacy_addressing: bool,
    pub stop_wait: StopWait,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            service_name: WINIO_SERVICE_NAME.to_string(),
            legacy_addressing: false,
            stop_wait: StopWait::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopOutcome {
    /// The service was already there and running when the session opened.
    #[default]
    LeftAsFound,
    /// The service could not be reopened for teardown.
    NotFound,
    AlreadyStopped,
    /// Stopped after this many state polls.
    Stopped { polls: u32 },
    /// A state poll failed before the service reported stopped.
    QueryFailed,
    TimedOut,
}

/// What teardown did with the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub stop: StopOutcome,
    pub deleted: bool,
}

/// An open driver session. Dropping it tears everything down, as [`PrivilegedSession::close`]
/// does.
pub struct PrivilegedSession<P: ServiceControl> {
    // Field order is drop order: the channel has to be closed before the service is stopped.
    channel: SessionChannel<P::Channel>,
    service: ServiceGuard<P>,
}

impl<P: ServiceControl> PrivilegedSession<P> {
    pub fn open(
        platform: P,
        image_path: &Path,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let mut service = ServiceGuard {
            platform,
            options,
            created: false,
            started: false,
            torn_down: false,
        };

        // Any early return from here drops the guards, which undo what was done so far.
        service.ensure(image_path)?;

        let channel = service
            .platform
            .open_channel()
            .map_err(SessionError::OpenChannel)?;
        let mut channel = SessionChannel {
            inner: channel,
            legacy_addressing: service.options.legacy_addressing,
        };

        if channel.legacy_addressing {
            channel
                .inner
                .enable_direct_io()
                .map_err(SessionError::EnableDirectIo)?;
            debug!("direct I/O enabled");
        }

        info!(
            service = %service.options.service_name,
            created = service.created,
            started = service.started,
            legacy_addressing = channel.legacy_addressing,
            "driver session open"
        );
        Ok(Self { channel, service })
    }

    pub fn service_created(&self) -> bool {
        self.service.created
    }

    pub fn service_started(&self) -> bool {
        self.service.started
    }

    pub fn legacy_addressing(&self) -> bool {
        self.channel.legacy_addressing
    }

    /// End the session and report what happened to the service.
    pub fn close(self) -> TeardownReport {
        let Self {
            channel,
            mut service,
        } = self;
        drop(channel);
        service.teardown()
    }
}

impl<P: ServiceControl> RegisterAccess for PrivilegedSession<P> {
    fn read_dword(&mut self, address: u64) -> Result<u32, AccessError> {
        physmem::read_dword(&mut self.channel.inner, address)
    }

    fn write_dword(&mut self, address: u64, value: u32) -> Result<(), AccessError> {
        physmem::write_dword(&mut self.channel.inner, address, value)
    }
}

/// The driver channel; direct I/O is disabled again before the handle closes.
struct SessionChannel<C: DriverChannel> {
    inner: C,
    legacy_addressing: bool,
}

impl<C: DriverChannel> Drop for SessionChannel<C> {
    fn drop(&mut self) {
        if self.legacy_addressing {
            if let Err(err) = self.inner.disable_direct_io() {
                warn!(%err, "failed to disable direct I/O");
            }
        }
    }
}

/// Undoes the service changes made by this run, exactly once.
struct ServiceGuard<P: ServiceControl> {
    platform: P,
    options: SessionOptions,
    created: bool,
    started: bool,
    torn_down: bool,
}

impl<P: ServiceControl> ServiceGuard<P> {
    fn ensure(&mut self, image_path: &Path) -> Result<(), SessionError> {
        let name = self.options.service_name.clone();

        let existing = self
            .platform
            .open_service(&name)
            .map_err(|error| SessionError::OpenService {
                name: name.clone(),
                error,
            })?;
        let service = match existing {
            Some(service) => service,
            None => {
                let service = self
                    .platform
                    .create_service(&name, image_path)
                    .map_err(|error| SessionError::CreateService {
                        name: name.clone(),
                        error,
                    })?;
                self.created = true;
                info!(service = %name, image = %image_path.display(), "driver service created");
                service
            }
        };

        let running = match self.platform.query_state(&service) {
            Ok(state) => state == ServiceState::Running,
            Err(err) => {
                debug!(service = %name, %err, "service state query failed; starting anyway");
                false
            }
        };
        if running {
            return Ok(());
        }

        match self.platform.start_service(&service) {
            Ok(StartOutcome::Started) => {
                self.started = true;
                info!(service = %name, "driver service started");
                Ok(())
            }
            Ok(StartOutcome::AlreadyRunning) => Ok(()),
            Err(error) => Err(SessionError::StartService { name, error }),
        }
    }

    fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if std::mem::replace(&mut self.torn_down, true) {
            return report;
        }
        if !self.created && !self.started {
            return report;
        }

        let name = self.options.service_name.clone();
        let service = match self.platform.open_service(&name) {
            Ok(Some(service)) => service,
            Ok(None) => {
                warn!(service = %name, "driver service vanished before teardown");
                report.stop = StopOutcome::NotFound;
                return report;
            }
            Err(err) => {
                warn!(service = %name, %err, "failed to reopen driver service for teardown");
                report.stop = StopOutcome::NotFound;
                return report;
            }
        };

        report.stop = self.stop(&service);

        if self.created {
            match self.platform.delete_service(&service) {
                Ok(()) => {
                    report.deleted = true;
                    info!(service = %name, "driver service deleted");
                }
                Err(err) => warn!(service = %name, %err, "failed to delete driver service"),
            }
        }

        report
    }

    fn stop(&mut self, service: &P::Service) -> StopOutcome {
        if let Ok(ServiceState::Stopped) = self.platform.query_state(service) {
            return StopOutcome::AlreadyStopped;
        }

        if let Err(err) = self.platform.stop_service(service) {
            warn!(service = %self.options.service_name, %err, "failed to send stop");
        }

        let StopWait { attempts, interval } = self.options.stop_wait;
        for poll in 1..=attempts {
            match self.platform.query_state(service) {
                Ok(ServiceState::Stopped) => {
                    info!(
                        service = %self.options.service_name,
                        polls = poll,
                        "driver service stopped"
                    );
                    return StopOutcome::Stopped { polls: poll };
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        service = %self.options.service_name,
                        %err,
                        "service state query failed while stopping"
                    );
                    return StopOutcome::QueryFailed;
                }
            }
            self.platform.sleep(interval);
        }

        warn!(
            service = %self.options.service_name,
            attempts,
            "driver service did not stop in time"
        );
        StopOutcome::TimedOut
    }
}

impl<P: ServiceControl> Drop for ServiceGuard<P> {
    fn drop(&mut self) {
        self.teardown();
    }
}

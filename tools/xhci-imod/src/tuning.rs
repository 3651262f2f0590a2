//! Apply the resolved IMOD interval to every interrupter of every discovered controller.

use std::fmt;

use tracing::{debug, info, warn};

use crate::config::{ImodConfig, ResolvedSettings};
use crate::discovery::{BaseAddressError, ControllerRecord};
use crate::regs;
use crate::winio::{AccessError, RegisterAccess};

/// Capability register read while sizing the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Hcsparams1,
    Rtsoff,
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Register::Hcsparams1 => "HCSPARAMS1",
            Register::Rtsoff => "RTSOFF",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub interrupter: u32,
    /// `None` when the IMOD address overflowed and nothing was written.
    pub address: Option<u64>,
    pub result: Result<(), AccessError>,
}

impl WriteRecord {
    pub fn failed(&self) -> bool {
        self.result.is_err()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Device is disabled in Device Manager; never touched.
    DeviceDisabled,
    MissingBase(BaseAddressError),
    DisabledByConfig(ResolvedSettings),
    ReadFailed {
        settings: ResolvedSettings,
        register: Register,
        address: Option<u64>,
        error: AccessError,
    },
    Applied {
        settings: ResolvedSettings,
        hcsparams: u32,
        rtsoff_value: u32,
        runtime_base: u64,
        interrupters: u32,
        writes: Vec<WriteRecord>,
    },
}

impl Outcome {
    pub fn settings(&self) -> Option<&ResolvedSettings> {
        match self {
            Outcome::DeviceDisabled | Outcome::MissingBase(_) => None,
            Outcome::DisabledByConfig(settings)
            | Outcome::ReadFailed { settings, .. }
            | Outcome::Applied { settings, .. } => Some(settings),
        }
    }

    /// `(attempted, failed)` IMOD writes.
    pub fn write_counts(&self) -> (usize, usize) {
        match self {
            Outcome::Applied { writes, .. } => (
                writes.len(),
                writes.iter().filter(|write| write.failed()).count(),
            ),
            _ => (0, 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerReport {
    pub controller: ControllerRecord,
    pub outcome: Outcome,
}

/// Run totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImodStats {
    pub controllers_found: usize,
    pub skipped_disabled: usize,
    pub missing_base: usize,
    pub disabled_by_config: usize,
    pub read_failures: usize,
    pub controllers_applied: usize,
    pub writes: usize,
    pub write_failures: usize,
}

impl ImodStats {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::DeviceDisabled => self.skipped_disabled += 1,
            Outcome::MissingBase(_) => self.missing_base += 1,
            Outcome::DisabledByConfig(_) => self.disabled_by_config += 1,
            Outcome::ReadFailed { .. } => self.read_failures += 1,
            Outcome::Applied { .. } => {
                let (attempted, failed) = outcome.write_counts();
                self.controllers_applied += 1;
                self.writes += attempted;
                self.write_failures += failed;
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TuningReport {
    pub controllers: Vec<ControllerReport>,
    pub stats: ImodStats,
}

/// Tune each controller in order. A failure on one controller never stops the others.
pub fn tune<R>(controllers: &[ControllerRecord], config: &ImodConfig, regs: &mut R) -> TuningReport
where
    R: RegisterAccess + ?Sized,
{
    let mut report = TuningReport::default();
    report.stats.controllers_found = controllers.len();

    for controller in controllers {
        let outcome = tune_controller(controller, config, regs);
        report.stats.record(&outcome);
        report.controllers.push(ControllerReport {
            controller: controller.clone(),
            outcome,
        });
    }

    info!(stats = ?report.stats, "tuning finished");
    report
}

fn tune_controller<R>(controller: &ControllerRecord, config: &ImodConfig, regs: &mut R) -> Outcome
where
    R: RegisterAccess + ?Sized,
{
    let device_id = controller.device_id.as_str();

    if controller.is_disabled() {
        info!(device_id, "skipping disabled device");
        return Outcome::DeviceDisabled;
    }

    let base = match &controller.base {
        Ok(base) => *base,
        Err(err) => {
            warn!(device_id, %err, "no register base");
            return Outcome::MissingBase(err.clone());
        }
    };

    let settings = config.resolve(device_id);
    if !settings.enabled {
        info!(device_id, "disabled by config");
        return Outcome::DisabledByConfig(settings);
    }

    let hcsparams_address = base.checked_add(u64::from(settings.hcsparams_offset));
    let hcsparams = match read(regs, hcsparams_address) {
        Ok(value) => value,
        Err(error) => {
            return read_failed(device_id, settings, Register::Hcsparams1, hcsparams_address, error)
        }
    };
    let interrupters = regs::max_interrupters(hcsparams);

    let rtsoff_address = base.checked_add(u64::from(settings.rtsoff));
    let rtsoff_value = match read(regs, rtsoff_address) {
        Ok(value) => value,
        Err(error) => {
            return read_failed(device_id, settings, Register::Rtsoff, rtsoff_address, error)
        }
    };
    let Some(runtime_base) = regs::runtime_base(base, rtsoff_value) else {
        return read_failed(
            device_id,
            settings,
            Register::Rtsoff,
            rtsoff_address,
            AccessError::AddressOverflow,
        );
    };

    debug!(
        device_id,
        base = format_args!("{base:#x}"),
        hcsparams = format_args!("{hcsparams:#x}"),
        rtsoff = format_args!("{rtsoff_value:#x}"),
        runtime_base = format_args!("{runtime_base:#x}"),
        interrupters,
        "controller layout"
    );

    let writes: Vec<WriteRecord> = (0..interrupters)
        .map(|interrupter| {
            let address = regs::interrupter_imod_address(runtime_base, interrupter);
            let result = match address {
                Some(address) => regs.write_dword(address, settings.interval),
                None => Err(AccessError::AddressOverflow),
            };
            if let Err(err) = &result {
                warn!(device_id, interrupter, %err, "IMOD write failed");
            }
            WriteRecord {
                interrupter,
                address,
                result,
            }
        })
        .collect();

    let outcome = Outcome::Applied {
        settings,
        hcsparams,
        rtsoff_value,
        runtime_base,
        interrupters,
        writes,
    };
    let (attempted, failed) = outcome.write_counts();
    info!(device_id, attempted, failed, "IMOD applied");
    outcome
}

fn read<R>(regs: &mut R, address: Option<u64>) -> Result<u32, AccessError>
where
    R: RegisterAccess + ?Sized,
{
    regs.read_dword(address.ok_or(AccessError::AddressOverflow)?)
}

fn read_failed(
    device_id: &str,
    settings: ResolvedSettings,
    register: Register,
    address: Option<u64>,
    error: AccessError,
) -> Outcome {
    warn!(device_id, %register, %error, "register read failed");
    Outcome::ReadFailed {
        settings,
        register,
        address,
        error,
    }
}

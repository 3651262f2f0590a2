//! Console report for a tuning run.

use std::fmt;
use std::path::Path;

use crate::tuning::{ControllerReport, Outcome, TuningReport, WriteRecord};
use crate::CONFIG_FILE_NAME;

/// Where the active configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource<'a> {
    File { path: &'a Path, overrides: usize },
    Defaults,
}

/// Render the report printed to stdout after a run.
pub fn render(
    report: &TuningReport,
    config: ConfigSource<'_>,
    driver_path: &Path,
    verbose: bool,
) -> String {
    Report {
        report,
        config,
        driver_path,
        verbose,
    }
    .to_string()
}

struct Report<'a> {
    report: &'a TuningReport,
    config: ConfigSource<'a>,
    driver_path: &'a Path,
    verbose: bool,
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.config {
            ConfigSource::File { path, overrides } => writeln!(
                f,
                "config = {} (overrides: {overrides})",
                path.display()
            )?,
            ConfigSource::Defaults => {
                writeln!(f, "config = defaults (no {CONFIG_FILE_NAME} found)")?
            }
        }
        writeln!(f, "winio.sys = {}", self.driver_path.display())?;
        writeln!(f)?;

        for controller in &self.report.controllers {
            self.controller(f, controller)?;
        }

        let stats = &self.report.stats;
        writeln!(
            f,
            "imod: controllers={} applied={} read_failures={} write_failures={} \
             skipped_disabled={} missing_base={}",
            stats.controllers_found,
            stats.controllers_applied,
            stats.read_failures,
            stats.write_failures,
            stats.skipped_disabled,
            stats.missing_base,
        )
    }
}

impl Report<'_> {
    fn controller(&self, f: &mut fmt::Formatter<'_>, report: &ControllerReport) -> fmt::Result {
        let controller = &report.controller;

        if matches!(report.outcome, Outcome::DeviceDisabled) {
            writeln!(
                f,
                "{} - {}: skipped (device disabled)",
                controller.caption, controller.device_id
            )?;
            return writeln!(f);
        }

        writeln!(f, "{} - {}", controller.caption, controller.device_id)?;
        if controller.problem_code != 0 {
            writeln!(f, "  problem_code = {}", controller.problem_code)?;
        }

        let base = match (&report.outcome, &controller.base) {
            (Outcome::MissingBase(err), _) | (_, Err(err)) => {
                writeln!(f, "  base_address = error: {err}")?;
                return writeln!(f);
            }
            (_, Ok(base)) => *base,
        };

        if let Some(settings) = report.outcome.settings() {
            writeln!(f, "  base_address = {base:#X}")?;
            write!(f, "  interval = {:#X}", settings.interval)?;
            if let Some(pattern) = &settings.matched_override {
                write!(f, " (override: {pattern})")?;
            }
            writeln!(f)?;
            writeln!(
                f,
                "  hcsparams_offset = {:#X}, rtsoff = {:#X}",
                settings.hcsparams_offset, settings.rtsoff
            )?;
        }

        match &report.outcome {
            Outcome::DeviceDisabled | Outcome::MissingBase(_) => {}
            Outcome::DisabledByConfig(settings) => match &settings.matched_override {
                Some(pattern) => writeln!(f, "  skipped (disabled by config: {pattern})")?,
                None => writeln!(f, "  skipped (disabled by config)")?,
            },
            Outcome::ReadFailed {
                register, error, ..
            } => writeln!(f, "error: failed to read XHCI registers: {register}: {error}")?,
            Outcome::Applied {
                settings,
                hcsparams,
                rtsoff_value,
                runtime_base,
                interrupters,
                writes,
            } => {
                writeln!(
                    f,
                    "  max_intrs = {interrupters}, runtime_address = {runtime_base:#X}"
                )?;
                if self.verbose {
                    writeln!(f, "capability_address  = {base:#X}")?;
                    writeln!(
                        f,
                        "HCSPARAMS_value     = capability_address + hcsparams_offset = \
                         {base:#X} + {:#X} = {hcsparams:#X}",
                        settings.hcsparams_offset
                    )?;
                    writeln!(f, "HCSPARAMS_bitmask   = {hcsparams:032b}")?;
                    writeln!(f, "max_intrs           = {interrupters}")?;
                    writeln!(
                        f,
                        "RTSOFF_value        = capability_address + rtsoff = \
                         {base:#X} + {:#X} = {rtsoff_value:#X}",
                        settings.rtsoff
                    )?;
                    writeln!(
                        f,
                        "runtime_address     = capability_address + RTSOFF_value = \
                         {base:#X} + {rtsoff_value:#X} = {runtime_base:#X}"
                    )?;
                }

                for write in writes {
                    self.imod_write(f, *runtime_base, settings.interval, write)?;
                }

                let failures = writes.iter().filter(|write| write.failed()).count();
                writeln!(f, "  writes = {}, failures = {failures}", writes.len())?;
            }
        }
        writeln!(f)
    }

    fn imod_write(
        &self,
        f: &mut fmt::Formatter<'_>,
        runtime_base: u64,
        interval: u32,
        write: &WriteRecord,
    ) -> fmt::Result {
        let address = Hex(write.address);
        if self.verbose {
            writeln!(f)?;
            writeln!(
                f,
                "interrupter_address = runtime_address + 0x24 + (0x20 * index) = \
                 {runtime_base:#X} + 0x24 + (0x20 * {}) = {address}",
                write.interrupter
            )?;
            writeln!(f, "Write DWORD = {interval:#X}")?;
        }
        if let Err(err) = &write.result {
            writeln!(f, "error: failed to write IMOD interval at {address}: {err}")?;
        }
        Ok(())
    }
}

struct Hex(Option<u64>);

impl fmt::Display for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{value:#X}"),
            None => f.write_str("<overflow>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::ResolvedSettings;
    use crate::discovery::{BaseAddressError, ControllerRecord, CM_PROB_DISABLED};
    use crate::error::PlatformError;
    use crate::tuning::{ImodStats, Register};
    use crate::winio::AccessError;

    fn controller(base: Result<u64, BaseAddressError>) -> ControllerRecord {
        ControllerRecord {
            device_id: "PCI\\VEN_8086&DEV_A36D\\3&11583659&0&A0".to_string(),
            caption: "Intel USB 3.1 eXtensible Host Controller".to_string(),
            problem_code: 0,
            base,
        }
    }

    fn settings(matched_override: Option<&str>) -> ResolvedSettings {
        ResolvedSettings {
            interval: 0xFA0,
            hcsparams_offset: 0x4,
            rtsoff: 0x18,
            enabled: true,
            matched_override: matched_override.map(str::to_string),
        }
    }

    fn applied(writes: Vec<WriteRecord>) -> Outcome {
        Outcome::Applied {
            settings: settings(Some("DEV_A36D")),
            hcsparams: 0x0000_0200,
            rtsoff_value: 0x2000,
            runtime_base: 0x9000_2000,
            interrupters: 2,
            writes,
        }
    }

    fn one(outcome: Outcome, record: ControllerRecord, stats: ImodStats) -> TuningReport {
        TuningReport {
            controllers: vec![ControllerReport {
                controller: record,
                outcome,
            }],
            stats,
        }
    }

    fn write_record(
        interrupter: u32,
        address: u64,
        result: Result<(), AccessError>,
    ) -> WriteRecord {
        WriteRecord {
            interrupter,
            address: Some(address),
            result,
        }
    }

    #[test]
    fn applied_controller_lists_layout_and_counts() {
        let report = one(
            applied(vec![
                write_record(0, 0x9000_2024, Ok(())),
                write_record(1, 0x9000_2044, Err(AccessError::NullMapping)),
            ]),
            controller(Ok(0x9000_0000)),
            ImodStats::default(),
        );
        let out = render(
            &report,
            ConfigSource::File {
                path: Path::new("imod-config.ini"),
                overrides: 1,
            },
            Path::new("winio.sys"),
            false,
        );

        assert!(out.starts_with("config = imod-config.ini (overrides: 1)\nwinio.sys = winio.sys\n\n"));
        assert!(out.contains(
            "Intel USB 3.1 eXtensible Host Controller - PCI\\VEN_8086&DEV_A36D\\3&11583659&0&A0\n"
        ));
        assert!(out.contains("  base_address = 0x90000000\n"));
        assert!(out.contains("  interval = 0xFA0 (override: DEV_A36D)\n"));
        assert!(out.contains("  hcsparams_offset = 0x4, rtsoff = 0x18\n"));
        assert!(out.contains("  max_intrs = 2, runtime_address = 0x90002000\n"));
        assert!(out.contains("error: failed to write IMOD interval at 0x90002044: "));
        assert!(out.contains("  writes = 2, failures = 1\n"));
        assert!(!out.contains("HCSPARAMS_bitmask"));
    }

    #[test]
    fn verbose_adds_address_arithmetic() {
        let report = one(
            applied(vec![
                write_record(0, 0x9000_2024, Ok(())),
                write_record(1, 0x9000_2044, Ok(())),
            ]),
            controller(Ok(0x9000_0000)),
            ImodStats::default(),
        );
        let out = render(&report, ConfigSource::Defaults, Path::new("winio.sys"), true);

        assert!(out.starts_with("config = defaults (no imod-config.ini found)\n"));
        assert!(out.contains(
            "HCSPARAMS_value     = capability_address + hcsparams_offset = 0x90000000 + 0x4 = 0x200\n"
        ));
        assert!(out.contains("HCSPARAMS_bitmask   = 00000000000000000000001000000000\n"));
        assert!(out.contains(
            "runtime_address     = capability_address + RTSOFF_value = 0x90000000 + 0x2000 = 0x90002000\n"
        ));
        assert!(out.contains(
            "interrupter_address = runtime_address + 0x24 + (0x20 * index) = 0x90002000 + 0x24 + (0x20 * 1) = 0x90002044\n"
        ));
        assert!(out.contains("Write DWORD = 0xFA0\n"));
    }

    #[test]
    fn skipped_controllers_say_why() {
        let mut disabled = controller(Ok(0x9000_0000));
        disabled.problem_code = CM_PROB_DISABLED;
        let mut config_disabled = settings(Some("DEV_A36D"));
        config_disabled.enabled = false;

        let report = TuningReport {
            controllers: vec![
                ControllerReport {
                    controller: disabled,
                    outcome: Outcome::DeviceDisabled,
                },
                ControllerReport {
                    controller: controller(Err(BaseAddressError::NoMemoryResource)),
                    outcome: Outcome::MissingBase(BaseAddressError::NoMemoryResource),
                },
                ControllerReport {
                    controller: controller(Ok(0x9000_0000)),
                    outcome: Outcome::DisabledByConfig(config_disabled),
                },
                ControllerReport {
                    controller: controller(Ok(0x9000_0000)),
                    outcome: Outcome::ReadFailed {
                        settings: settings(None),
                        register: Register::Rtsoff,
                        address: Some(0x9000_0018),
                        error: AccessError::Map(PlatformError::Win32(5)),
                    },
                },
            ],
            stats: ImodStats {
                controllers_found: 4,
                skipped_disabled: 1,
                missing_base: 1,
                disabled_by_config: 1,
                read_failures: 1,
                ..ImodStats::default()
            },
        };
        let out = render(&report, ConfigSource::Defaults, Path::new("winio.sys"), false);

        assert!(out.contains(": skipped (device disabled)\n"));
        assert!(out.contains("  base_address = error: no memory resource found\n"));
        assert!(out.contains("  skipped (disabled by config: DEV_A36D)\n"));
        assert!(out.contains("error: failed to read XHCI registers: RTSOFF: failed to map"));
        assert!(out.ends_with(
            "imod: controllers=4 applied=0 read_failures=1 write_failures=0 \
             skipped_disabled=1 missing_base=1\n"
        ));
    }
}

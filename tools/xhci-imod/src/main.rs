use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

#[derive(Debug, Parser)]
#[cfg_attr(not(windows), allow(dead_code))]
#[command(name = "xhci-imod")]
#[command(about = "Write the xHCI interrupt moderation interval on every USB host controller")]
struct Cli {
    /// Print the register address arithmetic for each controller.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(windows)]
fn run(cli: &Cli) -> Result<()> {
    use anyhow::{bail, Context};

    use xhci_imod::discovery::windows::discover_system;
    use xhci_imod::report::{self, ConfigSource};
    use xhci_imod::winio::windows::WinIoPlatform;
    use xhci_imod::{
        elevation, locate, tune, ImodConfig, PrivilegedSession, SessionOptions, TuningReport,
        CONFIG_FILE_NAME, DRIVER_FILE_NAME,
    };

    if !elevation::is_elevated() {
        bail!("administrator privileges required");
    }

    let roots = locate::default_search_roots();
    let Some(driver_path) = locate::find_in_roots(&roots, DRIVER_FILE_NAME) else {
        bail!("{DRIVER_FILE_NAME} not found");
    };
    let config_path = locate::find_in_roots(&roots, CONFIG_FILE_NAME);
    let config = ImodConfig::load_or_default(config_path.as_deref())?;

    let controllers = discover_system()?;
    tracing::info!(count = controllers.len(), "discovered xHCI controllers");

    let tuning = if controllers.is_empty() {
        TuningReport::default()
    } else {
        let platform = WinIoPlatform::connect()?;
        let options = SessionOptions {
            legacy_addressing: elevation::legacy_addressing(),
            ..SessionOptions::default()
        };
        let mut session = PrivilegedSession::open(platform, &driver_path, options)
            .context("failed to initialize WinIo")?;
        let tuning = tune(&controllers, &config, &mut session);
        let teardown = session.close();
        tracing::debug!(?teardown, "driver session closed");
        tuning
    };

    let source = match &config_path {
        Some(path) => ConfigSource::File {
            path,
            overrides: config.overrides.len(),
        },
        None => ConfigSource::Defaults,
    };
    print!(
        "{}",
        report::render(&tuning, source, &driver_path, cli.verbose)
    );
    Ok(())
}

#[cfg(not(windows))]
fn run(_cli: &Cli) -> Result<()> {
    anyhow::bail!("this tool only runs on Windows")
}

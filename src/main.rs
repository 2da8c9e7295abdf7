//! wg-provision main entry point
//!
//! This binary parses the command line, sets up logging, and runs the
//! provisioning workflow on a blocking thread while listening for
//! termination signals. The exit code is 1 when a warning was reported,
//! 2 when an error was reported, 3 for both, and `128 + signo` after a
//! trapped signal.

use anyhow::Context as _;
use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::{error, info, warn};

use wg_provision::config::{HubContext, DEFAULT_CONFIG_PATH};
use wg_provision::exec::SystemRunner;
use wg_provision::logging::{self, LogOptions};
use wg_provision::runtime::{Interrupt, LockFile, Tally, Workspace};
use wg_provision::security::check_privileges;
use wg_provision::{Outcome, Provisioner, RequestFlags, APP_NAME, VERSION};

/// Provision and remove WireGuard peers on this hub
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Client FQDN (also the ssh target)
    #[arg(short = 'f', long, required_unless_present = "public_key")]
    fqdn: Option<String>,

    /// Client tunnel address
    #[arg(short = 'i', long = "ip", required_unless_present = "remove")]
    address: Option<Ipv4Addr>,

    /// Only retry the client deployment of an already provisioned client
    #[arg(short = 'I', long, conflicts_with_all = ["no_install", "remove"])]
    install_only: bool,

    /// Configure the hub only, do not deploy to the client
    #[arg(short = 'n', long, conflicts_with = "remove")]
    no_install: bool,

    /// Remove the client from the hub instead of creating it
    #[arg(short = 'r', long, conflicts_with = "address")]
    remove: bool,

    /// Select the peer to remove by public key
    #[arg(short = 'k', long, requires = "remove", conflicts_with = "fqdn")]
    public_key: Option<String>,

    /// Log to the terminal instead of the log file
    #[arg(short = 'l', long)]
    log_terminal: bool,

    /// Only log warnings and errors
    #[arg(short = 'q', long, conflicts_with = "debug")]
    quiet: bool,

    /// Trace every executed command
    #[arg(short = 'd', long)]
    debug: bool,
}

impl Cli {
    fn flags(&self) -> RequestFlags {
        RequestFlags {
            fqdn: self.fqdn.clone(),
            address: self.address,
            public_key: self.public_key.clone(),
            install_only: self.install_only,
            no_install: self.no_install,
            remove: self.remove,
        }
    }

    fn log_options(&self) -> LogOptions {
        LogOptions {
            terminal: self.log_terminal,
            quiet: self.quiet,
            debug: self.debug,
            ..LogOptions::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let tally = Tally::new();
    if let Err(e) = logging::init(&cli.log_options(), &tally) {
        eprintln!("{}: failed to initialize logging: {}", APP_NAME, e);
        tally.error();
    }

    info!("Starting {} v{}", APP_NAME, VERSION);

    let interrupt = Interrupt::new();
    if let Err(e) = run(cli, interrupt.clone()).await {
        error!("{}", e);
    }

    let code = tally.exit_code(interrupt.signal()).code();
    info!(code, "Exiting");
    std::process::exit(code);
}

/// Run the workflow until it finishes, forwarding termination signals to it
async fn run(cli: Cli, interrupt: Interrupt) -> anyhow::Result<()> {
    let worker_interrupt = interrupt.clone();
    let mut worker = tokio::task::spawn_blocking(move || execute(&cli, &worker_interrupt));

    let joined = tokio::select! {
        joined = &mut worker => joined,
        signo = wait_for_signal() => {
            match signo {
                Ok(signo) => {
                    warn!(signal = signo, "Received termination signal, stopping after the current step");
                    interrupt.trigger(signo);
                }
                Err(e) => warn!("Cannot listen for termination signals: {}", e),
            }
            worker.await
        }
    };

    match joined.context("Workflow thread failed")? {
        Ok(outcome) => info!(
            state = %outcome.state,
            client_config = ?outcome.client_config,
            "Finished"
        ),
        Err(e) if e.is_precondition() => error!("{}; nothing was changed", e),
        Err(e) => error!("{}; completed steps are not rolled back", e),
    }
    Ok(())
}

/// Build the request and context, take the scoped resources and run
fn execute(cli: &Cli, interrupt: &Interrupt) -> wg_provision::Result<Outcome> {
    let request = cli.flags().into_request()?;
    let hub = HubContext::load(&cli.config)?;
    check_privileges();

    let _lock = LockFile::acquire(&hub.lock_file)?;
    let workspace = Workspace::create()?;
    let runner = SystemRunner::new();

    Provisioner::new(&hub, &runner, &workspace, interrupt).run(&request)
}

/// Wait for SIGINT, SIGTERM or SIGHUP and return its number
#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<i32> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    let signo = tokio::select! {
        _ = interrupt.recv() => libc::SIGINT,
        _ = terminate.recv() => libc::SIGTERM,
        _ = hangup.recv() => libc::SIGHUP,
    };
    Ok(signo)
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<i32> {
    tokio::signal::ctrl_c().await?;
    Ok(2)
}

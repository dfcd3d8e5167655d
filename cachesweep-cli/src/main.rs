use anyhow::{anyhow, Result};
use cachesweep::{
    relaunch, ChannelReporter, DetachedLauncher, HostRegistry, Installation, Launcher, Locator,
    Progress, RegistrySource, Relaunch, RelaunchPrompt, SweepOutcome, Sweeper, UpdateOutcome,
    Updater, UpdaterBuilder,
};
use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};
use log::{debug, error};
use std::{
    io::{self, BufRead, Write},
    sync::Arc,
};
use thiserror::Error;

// Releases of this tool are published here.
const UPDATE_PROJECT: &str = "houseabsolute/cachesweep";
// The tag of the release this binary was built from.
const CURRENT_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));
const ASSET_NAME: &str = "cachesweep.exe";

#[derive(Debug, Error)]
enum CliError {
    #[error("the cache sweep task stopped unexpectedly: {0}")]
    SweepTaskFailed(String),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cmd = cmd();
    let matches = cmd.get_matches();
    let res = init_logger_from_matches(&matches);
    if let Err(e) = res {
        eprintln!("Error creating logger: {e}");
        std::process::exit(126);
    }

    let updater = match UpdaterBuilder::new()
        .project(UPDATE_PROJECT)
        .current_version(CURRENT_VERSION)
        .asset_name(ASSET_NAME)
        .build()
    {
        Ok(u) => u,
        Err(e) => {
            print_err(&e);
            std::process::exit(127);
        }
    };
    let sweeper = Arc::new(Sweeper::new(Locator::new(HostRegistry)));

    let status = run(&updater, sweeper, &ConsolePrompt, &DetachedLauncher).await;
    std::process::exit(status);
}

// Update if we can, otherwise sweep and offer to relaunch. Returns the process exit status.
async fn run<R: RegistrySource + 'static>(
    updater: &Updater,
    sweeper: Arc<Sweeper<R>>,
    prompt: &dyn RelaunchPrompt,
    launcher: &dyn Launcher,
) -> i32 {
    if self_update(updater).await {
        return 0;
    }

    match run_sweep(sweeper).await {
        Ok(Some(installation)) => match relaunch(&installation, prompt, launcher) {
            Ok(decision) => decision.exit_code(),
            Err(e) => {
                print_err(&anyhow::Error::new(e));
                Relaunch::Declined.exit_code()
            }
        },
        Ok(None) => 1,
        Err(e) => {
            print_err(&e);
            127
        }
    }
}

const MAX_TERM_WIDTH: usize = 100;

fn cmd() -> Command {
    Command::new("cachesweep")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Dave Rolsky <autarch@urth.org>")
        .about(concat!(
            "Clears FiveM's cache folders. Before doing so it updates itself to the latest",
            " release, if there is one. When it is done it offers to start FiveM again.",
        ))
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output."),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Enable debugging output."),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppresses most output."),
        )
        .group(ArgGroup::new("log-level").args(["verbose", "debug", "quiet"]))
        .max_term_width(MAX_TERM_WIDTH)
}

pub(crate) fn init_logger_from_matches(matches: &ArgMatches) -> Result<(), log::SetLoggerError> {
    let level = if matches.get_flag("debug") {
        log::LevelFilter::Debug
    } else if matches.get_flag("verbose") {
        log::LevelFilter::Info
    } else if matches.get_flag("quiet") {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Warn
    };

    cachesweep::init_logger(level)
}

// Returns true if a new version has been staged, in which case we must exit right away so that the
// helper script can replace our executable.
async fn self_update(updater: &Updater) -> bool {
    let reporter = |p: Progress| println!("{p}");
    match updater.run(&reporter).await {
        Ok(UpdateOutcome::Staged(staged)) => {
            debug!("update staged: {staged:?}");
            true
        }
        Ok(UpdateOutcome::UpToDate) => false,
        Err(e) => {
            println!(
                "{}",
                Progress::UpdateFailed {
                    reason: e.to_string(),
                }
            );
            false
        }
    }
}

// The sweep itself runs on a blocking thread. Its progress comes back over a channel and is printed
// here, so all terminal output happens on one thread.
async fn run_sweep<R: RegistrySource + 'static>(
    sweeper: Arc<Sweeper<R>>,
) -> Result<Option<Installation>> {
    let (reporter, mut rx) = ChannelReporter::channel();

    let task = tokio::task::spawn_blocking(move || sweeper.sweep(&reporter));

    while let Some(event) = rx.recv().await {
        print_progress(&event);
    }

    match task
        .await
        .map_err(|e| CliError::SweepTaskFailed(e.to_string()))?
    {
        Ok(SweepOutcome::Cleaned {
            installation,
            report,
        }) => {
            for failure in report.failures() {
                debug!("{failure:?}");
            }
            Ok(Some(installation))
        }
        Ok(SweepOutcome::AlreadyRunning) => Err(anyhow!("a cache sweep is already running")),
        // The reason has already been printed from the InstallNotFound event.
        Err(e) => {
            debug!("{e}");
            Ok(None)
        }
    }
}

fn print_progress(event: &Progress) {
    if *event == Progress::Reset {
        // Clear the screen and move the cursor home.
        print!("\x1B[2J\x1B[H");
        let _ = io::stdout().flush();
        return;
    }
    println!("{event}");
}

struct ConsolePrompt;

impl RelaunchPrompt for ConsolePrompt {
    fn confirm(&self, _installation: &Installation) -> bool {
        print!("\nCache finished! Do you want to run FiveM? [y/N] ");
        if io::stdout().flush().is_err() {
            return false;
        }

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        is_yes(&answer)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn print_err(e: &anyhow::Error) {
    error!("{e}");
    if let Some(ce) = e.downcast_ref::<CliError>() {
        match ce {
            CliError::SweepTaskFailed(_) => {
                println!("❌ {ce}");
            }
        }
    }
}

use std::{
    path::PathBuf,
    sync::{self, LazyLock},
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use colored::Colorize;
use keg::{checksum::sha256sum, fetch::fetch_source, InstallOptions, Installer, KegEnv};
use keg_linter::{
    hash::hash_file,
    logger::{LogManager, LogMessage, TaskLogger},
    Linter,
};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

static CHECK_MARK: LazyLock<colored::ColoredString> = LazyLock::new(|| "✔".bright_green().bold());
static CROSS_MARK: LazyLock<colored::ColoredString> = LazyLock::new(|| "〤".bright_red().bold());
static WARN: LazyLock<colored::ColoredString> = LazyLock::new(|| "⚠️".bright_yellow().bold());

#[derive(Parser)]
#[command(name = "keg")]
#[command(about = "Installs packages from formula files", long_about = None)]
#[command(version)]
struct Cli {
    /// Installation prefix
    #[arg(long, env = "KEG_PREFIX", global = true)]
    prefix: Option<PathBuf>,

    /// Download and log cache (default: <prefix>/cache)
    #[arg(long, env = "KEG_CACHE", global = true)]
    cache: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install one or more formula files
    Install {
        /// Formula files
        #[arg(required = true, num_args = 1..)]
        formulae: Vec<PathBuf>,

        /// Reinstall even when the same version is installed
        #[arg(short, long)]
        force: bool,

        /// Don't run the formula's self-test
        #[arg(long)]
        skip_test: bool,

        /// Replace files in the prefix that keg doesn't manage
        #[arg(long)]
        overwrite: bool,

        /// Self-test timeout in seconds
        #[arg(long, default_value = "30")]
        test_timeout: u64,
    },

    /// Run the self-test of an installed formula
    Test {
        name: String,

        /// Self-test timeout in seconds
        #[arg(long, default_value = "30")]
        test_timeout: u64,
    },

    /// Remove installed formulae
    Uninstall {
        #[arg(required = true, num_args = 1..)]
        names: Vec<String>,
    },

    /// List installed formulae
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show install, upgrade, test and uninstall events
    History {
        /// Only events for this formula
        name: Option<String>,

        /// Number of events to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// Download and verify a formula's source archive
    Fetch { formula: PathBuf },

    /// Lint formula files
    Lint {
        #[arg(required = true, num_args = 1..)]
        formulae: Vec<PathBuf>,

        /// Rewrite valid formulae in canonical form
        #[arg(short, long)]
        inplace: bool,
    },

    /// Print the change-detection hash of a formula
    Hash { formula: PathBuf },

    /// Print the SHA-256 of a file
    Sha256 { file: PathBuf },
}

fn setup_logging(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn keg_env(prefix: Option<PathBuf>, cache: Option<PathBuf>) -> KegEnv {
    let prefix = prefix.unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
            .join(".keg")
    });
    KegEnv::new(prefix, cache)
}

/// Creates a task logger backed by a scratch log file, which the installer
/// moves under `<cache>/logs` once the formula name is known.
fn task_logger(log_manager: &LogManager) -> (TaskLogger, Option<tempfile::NamedTempFile>) {
    let temp_file = tempfile::Builder::new()
        .prefix("keg-")
        .rand_bytes(8)
        .tempfile()
        .ok();
    let logger = log_manager.create_logger(temp_file.as_ref().map(|f| f.path().to_path_buf()));
    logger.write_to_file(format!(
        "keg v{} [{}]",
        env!("CARGO_PKG_VERSION"),
        chrono::Utc::now().format("%A, %B %d, %Y %H:%M:%S")
    ));
    (logger, temp_file)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);
    let env = keg_env(cli.prefix, cli.cache);

    let (tx, rx) = sync::mpsc::channel();
    let log_manager = LogManager::new(tx);

    let logger_handle = thread::spawn(move || {
        while let Ok(log) = rx.recv() {
            match log {
                LogMessage::Info(msg) => {
                    println!("{}", msg);
                }
                LogMessage::Error(msg) => {
                    eprintln!("[{}] {}", &*CROSS_MARK, msg);
                }
                LogMessage::Warn(msg) => {
                    eprintln!("[{}] {}", &*WARN, msg);
                }
                LogMessage::Success(msg) => {
                    println!("[{}] {}", &*CHECK_MARK, msg);
                }
                LogMessage::CustomError(msg) => {
                    eprintln!("{}", msg);
                }
                LogMessage::Done => break,
            }
        }
    });

    let (success, summary) = run(cli.command, env, &log_manager).await;

    log_manager.done();
    let _ = logger_handle.join();

    if let Some(summary) = summary {
        summary.print();
    }

    if !success {
        std::process::exit(1);
    }
}

struct InstallSummary {
    success: usize,
    fail: usize,
    total: usize,
    elapsed: Duration,
}

impl InstallSummary {
    fn print(&self) {
        println!();
        println!(
            "[{}] {} formula(e) installed",
            "+".bright_blue().bold(),
            self.success
        );
        println!(
            "[{}] {} formula(e) failed to install",
            "+".bright_blue().bold(),
            self.fail
        );
        println!(
            "[{}] Processed {}/{} formula(e) in {:#?}",
            "+".bright_blue().bold(),
            self.success + self.fail,
            self.total,
            self.elapsed
        );
    }
}

/// Runs a subcommand. Install also returns a summary, printed once the
/// logger thread has drained.
async fn run(
    command: Commands,
    env: KegEnv,
    log_manager: &LogManager,
) -> (bool, Option<InstallSummary>) {
    let success = match command {
        Commands::Install {
            formulae,
            force,
            skip_test,
            overwrite,
            test_timeout,
        } => {
            let options = InstallOptions {
                force,
                skip_test,
                overwrite,
                test_timeout: Duration::from_secs(test_timeout),
            };
            let summary = cmd_install(formulae, env, options, log_manager).await;
            return (summary.fail == 0, Some(summary));
        }
        Commands::Test { name, test_timeout } => {
            let logger = log_manager.create_logger(None);
            let options = InstallOptions {
                test_timeout: Duration::from_secs(test_timeout),
                ..Default::default()
            };
            let installer = match Installer::new(logger.clone(), env, options) {
                Ok(installer) => installer,
                Err(err) => {
                    logger.error(err.to_string());
                    return (false, None);
                }
            };
            match installer.test(&name).await {
                Ok(Some(outcome)) => outcome.passed(),
                Ok(None) => true,
                Err(err) => {
                    logger.error(err.to_string());
                    false
                }
            }
        }
        Commands::Uninstall { names } => {
            let logger = log_manager.create_logger(None);
            let installer = match Installer::new(logger.clone(), env, InstallOptions::default()) {
                Ok(installer) => installer,
                Err(err) => {
                    logger.error(err.to_string());
                    return (false, None);
                }
            };
            let mut ok = true;
            for name in names {
                if let Err(err) = installer.uninstall(&name) {
                    logger.error(err.to_string());
                    ok = false;
                }
            }
            ok
        }
        Commands::List { json } => cmd_list(env, json, log_manager),
        Commands::History { name, limit } => cmd_history(env, name.as_deref(), limit, log_manager),
        Commands::Fetch { formula } => {
            let logger = log_manager.create_logger(None);
            let Some(parsed) = Linter::new(logger.clone()).lint(&formula.to_string_lossy(), false)
            else {
                return (false, None);
            };
            match fetch_source(&parsed, &env, &logger).await {
                Ok(path) => {
                    logger.success(format!("Downloaded to {}", path.display()));
                    true
                }
                Err(err) => {
                    logger.error(err.to_string());
                    false
                }
            }
        }
        Commands::Lint { formulae, inplace } => {
            let logger = log_manager.create_logger(None);
            let linter = Linter::new(logger);
            let mut ok = true;
            for formula in formulae {
                ok &= linter.lint(&formula.to_string_lossy(), inplace).is_some();
            }
            ok
        }
        Commands::Hash { formula } => match hash_file(&formula) {
            Ok(hash) => {
                println!("{}", hash);
                true
            }
            Err(err) => {
                log_manager.create_logger(None).error(err.to_string());
                false
            }
        },
        Commands::Sha256 { file } => match sha256sum(&file) {
            Ok(hash) => {
                println!("{}  {}", hash, file.display());
                true
            }
            Err(err) => {
                log_manager
                    .create_logger(None)
                    .error(format!("{}: {}", file.display(), err));
                false
            }
        },
    };
    (success, None)
}

async fn cmd_install(
    formulae: Vec<PathBuf>,
    env: KegEnv,
    options: InstallOptions,
    log_manager: &LogManager,
) -> InstallSummary {
    let now = Instant::now();
    let mut success = 0;
    let mut fail = 0;

    for file_path in &formulae {
        let (logger, _temp_file) = task_logger(log_manager);
        let installer = match Installer::new(logger.clone(), env.clone(), options.clone()) {
            Ok(installer) => installer,
            Err(err) => {
                logger.error(err.to_string());
                fail += 1;
                continue;
            }
        };

        // A failed self-test leaves the package installed and is only a warning
        match installer.install(file_path).await {
            Ok(_) => success += 1,
            Err(err) => {
                logger.error(format!("{}: {}", file_path.display(), err));
                fail += 1;
            }
        }
    }

    InstallSummary {
        success,
        fail,
        total: formulae.len(),
        elapsed: now.elapsed(),
    }
}

fn cmd_list(env: KegEnv, json: bool, log_manager: &LogManager) -> bool {
    let logger = log_manager.create_logger(None);
    let installs = keg_cache::KegDatabase::open(&env.db_path()).and_then(|db| db.list_installs());
    let installs = match installs {
        Ok(installs) => installs,
        Err(err) => {
            logger.error(err.to_string());
            return false;
        }
    };

    if json {
        match serde_json::to_string_pretty(&installs) {
            Ok(out) => println!("{}", out),
            Err(err) => {
                logger.error(err.to_string());
                return false;
            }
        }
        return true;
    }

    if installs.is_empty() {
        println!("No formulae installed");
        return true;
    }
    for record in installs {
        let status = match record.test_status {
            keg_cache::TestStatus::Passed => record.test_status.to_string().green(),
            keg_cache::TestStatus::Failed => record.test_status.to_string().red(),
            _ => record.test_status.to_string().dimmed(),
        };
        println!(
            "{} {} [test: {}] {}",
            record.name.bright_cyan(),
            record.version,
            status,
            record.keg_path
        );
    }
    true
}

fn cmd_history(env: KegEnv, name: Option<&str>, limit: i64, log_manager: &LogManager) -> bool {
    let history =
        keg_cache::KegDatabase::open(&env.db_path()).and_then(|db| db.history(name, limit));
    let history = match history {
        Ok(history) => history,
        Err(err) => {
            log_manager.create_logger(None).error(err.to_string());
            return false;
        }
    };

    for entry in history {
        println!(
            "{} {} {} {}{}",
            entry.action_date.format("%Y-%m-%d %H:%M:%S"),
            entry.action.to_string().bold(),
            entry.name.bright_cyan(),
            entry.version,
            entry
                .detail
                .as_deref()
                .map(|detail| format!(" ({})", detail))
                .unwrap_or_default()
        );
    }
    true
}

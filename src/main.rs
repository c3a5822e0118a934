use anyhow::{Context, Error, Result};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use geoipenrich::config::{self, DB_DIR_ENV, SETTINGS_ENV};
use geoipenrich::input::FileOrStdin;
use geoipenrich::logging::init_logging;
use geoipenrich::update::{RunOutcome, Scheduler, ServiceOptions, Trigger};
use geoipenrich::{
    Database, EnrichOptions, Enricher, FileSettingsStore, LogLevel, ReaderCache, SettingsStore,
};

/// Check if the error chain contains a broken pipe error.
#[inline(always)]
fn is_broken_pipe(err: &Error) -> bool {
    for cause in err.chain() {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::BrokenPipe {
                return true;
            }
        }
    }
    false
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Settings file holding the MaxMind account, log level and databases
    #[clap(long, global = true, value_name = "FILE", env = SETTINGS_ENV)]
    settings: Option<Utf8PathBuf>,

    /// Log level (DEBUG, INFO, WARNING, ERROR, CRITICAL). RUST_LOG overrides it
    #[clap(long, global = true, value_name = "LEVEL", value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enrich newline-delimited JSON events with database lookups
    Enrich {
        /// Event field holding the IP address
        #[clap(short, long, default_value = geoipenrich::enrich::DEFAULT_FIELD)]
        field: String,

        /// Prefix for every added field name
        #[clap(short, long, default_value = "")]
        prefix: String,

        /// Comma-separated database names, in precedence order (later wins)
        #[clap(long, value_name = "NAMES")]
        databases: String,

        #[clap(flatten)]
        dir: DatabaseDir,

        /// Input file(s) to process. Leave empty or use "-" to read from stdin
        #[clap(value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
        input: Vec<Utf8PathBuf>,
    },

    /// Download new versions of the configured databases
    Update {
        #[clap(flatten)]
        dir: DatabaseDir,

        #[clap(flatten)]
        service: ServiceArgs,
    },

    /// Run updates at a fixed interval
    Schedule {
        #[clap(flatten)]
        dir: DatabaseDir,

        #[clap(flatten)]
        service: ServiceArgs,

        /// Seconds between runs
        #[clap(long, value_name = "SECS", default_value_t = 86_400)]
        interval: u64,

        /// Stop after this many runs
        #[clap(long)]
        ticks: Option<u64>,
    },

    /// Validate the settings file
    CheckSettings,

    /// Show the databases present in the database directory
    ListDatabases {
        #[clap(flatten)]
        dir: DatabaseDir,
    },
}

#[derive(clap::Args, Debug)]
struct DatabaseDir {
    /// Directory containing <name>.mmdb files
    #[clap(
        short = 'd',
        long = "db-dir",
        value_name = "DIR",
        value_hint = clap::ValueHint::DirPath,
        env = DB_DIR_ENV
    )]
    path: Option<Utf8PathBuf>,
}

impl DatabaseDir {
    fn resolve(&self) -> std::path::PathBuf {
        match &self.path {
            Some(path) => path.clone().into_std_path_buf(),
            None => config::database_directory(),
        }
    }
}

#[derive(clap::Args, Debug)]
struct ServiceArgs {
    /// Update service base URL
    #[clap(
        long,
        value_name = "URL",
        env = "GEOIP_UPDATE_HOST",
        default_value = config::DEFAULT_UPDATE_HOST
    )]
    host: String,

    /// Per-request timeout in seconds
    #[clap(long, value_name = "SECS", default_value_t = config::DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,

    /// Opaque key passed to the settings store
    #[clap(
        long,
        env = "GEOIP_SESSION_KEY",
        default_value = "local",
        hide_env_values = true
    )]
    session_key: String,
}

impl ServiceArgs {
    fn options(&self) -> ServiceOptions {
        ServiceOptions::default()
            .with_host(self.host.clone())
            .with_timeout(Duration::from_secs(self.timeout))
    }
}

fn parse_log_level(value: &str) -> Result<LogLevel, geoipenrich::Error> {
    value.to_ascii_uppercase().parse()
}

fn main() -> ExitCode {
    let err = match run_main() {
        Ok(code) => return code,
        Err(err) => err,
    };

    if is_broken_pipe(&err) {
        return ExitCode::SUCCESS;
    }

    if std::env::var("RUST_BACKTRACE").is_ok_and(|v| v == "1")
        && std::env::var("RUST_LIB_BACKTRACE").map_or(true, |v| v == "1")
    {
        let _ = writeln!(&mut std::io::stderr(), "{:?}", err);
    } else {
        let _ = writeln!(&mut std::io::stderr(), "{:#}", err);
    }

    ExitCode::FAILURE
}

fn run_main() -> Result<ExitCode> {
    let args = Args::parse();

    let store = FileSettingsStore::new(
        args.settings
            .clone()
            .map(Utf8PathBuf::into_std_path_buf)
            .unwrap_or_else(config::default_settings_path),
    );

    // --log-level, then the settings file, then INFO; RUST_LOG beats all.
    let level = args
        .log_level
        .or_else(|| store.log_level("").ok().flatten())
        .unwrap_or_default();
    init_logging(level);

    match args.command {
        Command::Enrich {
            field,
            prefix,
            databases,
            dir,
            mut input,
        } => {
            if input.is_empty() {
                input.push(Utf8PathBuf::from("-"));
            }
            let cache = ReaderCache::new(dir.resolve());
            let options = EnrichOptions::new(field, prefix, &databases);
            let enricher = Enricher::new(&cache, options).with_context(|| {
                format!("failed to load databases from {}", cache.directory().display())
            })?;
            run_enrich(&enricher, input)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Update { dir, service } => {
            let trigger =
                Trigger::new(Arc::new(store), dir.resolve()).with_options(service.options());
            Ok(exit_code(trigger.run_database_update(&service.session_key)))
        }
        Command::Schedule {
            dir,
            service,
            interval,
            ticks,
        } => {
            let trigger =
                Trigger::new(Arc::new(store), dir.resolve()).with_options(service.options());
            let outcomes = Scheduler::new(trigger, Duration::from_secs(interval))
                .run(&service.session_key, ticks);
            Ok(outcomes.last().copied().map_or(ExitCode::SUCCESS, exit_code))
        }
        Command::CheckSettings => check_settings(&store),
        Command::ListDatabases { dir } => {
            list_databases(&dir.resolve())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_code(outcome: RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Completed { failed: 0, .. } => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

fn run_enrich(enricher: &Enricher, input: Vec<Utf8PathBuf>) -> Result<()> {
    let mut out = io::BufWriter::with_capacity(65536, io::stdout());

    for path in input {
        let file = FileOrStdin::from_path(path);
        let mut reader = file.reader()?;
        reader.for_each_event(|event| {
            let event = enricher.process(event)?;
            serde_json::to_writer(&mut out, &event)?;
            out.write_all(b"\n")?;
            Ok(true)
        })?;
        out.flush()?;
    }

    Ok(())
}

fn check_settings(store: &FileSettingsStore) -> Result<ExitCode> {
    let problems = store
        .check()
        .with_context(|| format!("failed to read {}", store.path().display()))?;
    if problems.is_empty() {
        println!("{}: ok", store.path().display());
        return Ok(ExitCode::SUCCESS);
    }
    for problem in &problems {
        eprintln!("{}: {}", store.path().display(), problem);
    }
    Ok(ExitCode::FAILURE)
}

fn list_databases(dir: &std::path::Path) -> Result<()> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext == geoipenrich::cache::DATABASE_EXTENSION)
        })
        .collect();
    paths.sort();

    let mut out = io::BufWriter::new(io::stdout());
    for path in paths {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        match Database::open(&path) {
            Ok(db) => writeln!(
                out,
                "{}\t{}\tIPv{}\t{}",
                name,
                db.database_type(),
                db.ip_version(),
                db.build_epoch()
            )?,
            Err(err) => writeln!(out, "{}\t<unreadable: {}>", name, err)?,
        }
    }
    out.flush()?;
    Ok(())
}

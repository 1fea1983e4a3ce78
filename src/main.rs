pub mod audit;
pub mod config;
pub mod db {
    pub mod models;
    pub mod store;
}
pub mod parser;
pub mod schema;
pub mod source;
pub mod transport {
    pub mod serial;
    pub mod simulated;
}
pub mod utils;
pub mod services {
    pub mod import;
    pub mod logger;
    pub mod scheduler;
}

use crate::audit::AuditLog;
use crate::config::{Config, SourceMode};
use crate::db::store::{Field, Store};
use crate::parser::ReadingParser;
use crate::services::logger::DataLogger;
use crate::services::scheduler::StopHandle;
use crate::source::SensorSource;
use crate::transport::serial::SerialSource;
use crate::transport::simulated::SimulatedSource;
use crate::utils::{format_timestamp, parse_timestamp_prefix};
use log::{error, info, warn};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Debug, PartialEq)]
enum Command {
    Run,
    Import(PathBuf),
    Query {
        sensor_id: i32,
        start: String,
        end: String,
        field: Field,
    },
    Sensors,
    SetEnabled {
        sensor_id: i32,
        enabled: bool,
    },
}

#[derive(Debug, PartialEq)]
struct Cli {
    env_file: Option<PathBuf>,
    command: Command,
}

const USAGE: &str = "usage: climate-logger [--env-file PATH] [run | import FILE | query SENSOR_ID START END [temperature|rh] | sensors | enable SENSOR_ID | disable SENSOR_ID]";

fn parse_cli<I>(args: I) -> Result<Cli, String>
where
    I: IntoIterator<Item = String>,
{
    let mut env_file: Option<PathBuf> = None;
    let mut positional = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        if arg == "--env-file" {
            let value = args.next().ok_or("`--env-file` requires a path argument")?;
            if env_file.replace(PathBuf::from(value)).is_some() {
                return Err("`--env-file` provided more than once".to_string());
            }
        } else if let Some(path) = arg.strip_prefix("--env-file=") {
            if path.is_empty() {
                return Err("`--env-file` requires a path argument".to_string());
            }
            if env_file.replace(PathBuf::from(path)).is_some() {
                return Err("`--env-file` provided more than once".to_string());
            }
        } else if arg == "-h" || arg == "--help" {
            return Err(USAGE.to_string());
        } else if arg.starts_with("--") {
            return Err(format!("unrecognised argument: {}\n{}", arg, USAGE));
        } else {
            positional.push(arg);
        }
    }

    let sensor_id = |raw: &str| {
        raw.parse::<i32>()
            .map_err(|_| format!("invalid sensor id '{}'", raw))
    };
    let words: Vec<&str> = positional.iter().map(String::as_str).collect();
    let command = match words.as_slice() {
        [] | ["run"] => Command::Run,
        ["import", file] => Command::Import(PathBuf::from(*file)),
        ["query", id, start, end] => Command::Query {
            sensor_id: sensor_id(*id)?,
            start: start.to_string(),
            end: end.to_string(),
            field: Field::Temperature,
        },
        ["query", id, start, end, field] => Command::Query {
            sensor_id: sensor_id(*id)?,
            start: start.to_string(),
            end: end.to_string(),
            field: field.parse()?,
        },
        ["sensors"] => Command::Sensors,
        ["enable", id] => Command::SetEnabled {
            sensor_id: sensor_id(*id)?,
            enabled: true,
        },
        ["disable", id] => Command::SetEnabled {
            sensor_id: sensor_id(*id)?,
            enabled: false,
        },
        _ => return Err(USAGE.to_string()),
    };

    Ok(Cli { env_file, command })
}

/// Load `KEY=VALUE` lines into the process environment. Variables that are
/// already set win over the file.
fn load_env_file(path: &Path) -> Result<(), String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    for (index, line) in content.lines().enumerate() {
        let Some((key, value)) = parse_env_assignment(line)
            .map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        if std::env::var_os(&key).is_none() {
            // single-threaded at this point; nothing else reads the environment yet
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let assignment = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, value) = assignment.split_once('=').ok_or("missing '=' in assignment")?;
    let key = key.trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(format!("invalid variable name '{}'", key));
    }

    let value = value.trim();
    let value = match value.chars().next() {
        Some(q @ ('"' | '\'')) => value
            .strip_prefix(q)
            .and_then(|v| v.strip_suffix(q))
            .ok_or_else(|| format!("unterminated quoted value for {}", key))?,
        _ => value.split(" #").next().unwrap_or_default().trim_end(),
    };
    Ok(Some((key.to_string(), value.to_string())))
}

fn open_source(cfg: &Config) -> Result<Box<dyn SensorSource>, String> {
    Ok(match cfg.mode {
        SourceMode::Serial => Box::new(
            SerialSource::open(&cfg.serial_port, cfg.baud_rate, cfg.read_timeout).map_err(|e| e.to_string())?,
        ),
        SourceMode::Simulated => Box::new(SimulatedSource::new(
            cfg.sensor_names.len(),
            cfg.simulator_seed,
            cfg.simulator_error_rate,
            cfg.simulator_dropout_rate,
        )),
    })
}

fn parser_for(store: &mut Store) -> Result<ReadingParser, String> {
    let sensors = store.sensors().map_err(|e| e.to_string())?;
    let parser = ReadingParser::from_registry(sensors.iter().map(|s| (s.id, s.enabled)));
    info!(
        "Accepting readings from {} of {} sensor(s)",
        sensors.iter().filter(|s| s.enabled).count(),
        parser.sensor_count()
    );
    Ok(parser)
}

fn run_logger(cfg: &Config, mut store: Store) -> Result<(), String> {
    let parser = parser_for(&mut store)?;
    match store.last_measurement().map_err(|e| e.to_string())? {
        Some((m, values)) => info!(
            "Store holds {} measurement(s); last at {} with {} value(s)",
            store.measurement_count().map_err(|e| e.to_string())?,
            format_timestamp(&m.ts),
            values.len()
        ),
        None => info!("Store is empty"),
    }

    let audit = AuditLog::open(&cfg.audit_log_file)
        .map_err(|e| format!("cannot open audit log {}: {}", cfg.audit_log_file.display(), e))?;
    let source = open_source(cfg)?;
    info!("Sensor source ready: {}", source.describe());

    let stop = StopHandle::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        info!("Received stop signal, finishing current tick");
        handler_stop.stop();
    })
    .map_err(|e| format!("installing signal handler failed: {}", e))?;

    let mut logger = DataLogger::new(source, parser, store, audit);
    logger.run(cfg.sample_interval, &stop);
    Ok(())
}

fn run(cli: Cli) -> Result<(), String> {
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (database={}, mode={:?}, port={}, interval={}s, timeout={}s, sensors={})",
        cfg.database_url,
        cfg.mode,
        cfg.serial_port,
        cfg.sample_interval.as_secs(),
        cfg.read_timeout.as_secs(),
        cfg.sensor_names.len()
    );

    let mut store = Store::open(&cfg.database_url, &cfg.sensor_seeds()).map_err(|e| e.to_string())?;
    info!("Opened database {}", cfg.database_url);

    match cli.command {
        Command::Run => run_logger(&cfg, store),
        Command::Import(path) => {
            let file = File::open(&path).map_err(|e| format!("failed to open {}: {}", path.display(), e))?;
            let parser = parser_for(&mut store)?;
            let summary = services::import::bulk_import(&mut store, &parser, BufReader::new(file))
                .map_err(|e| format!("reading {} failed: {}", path.display(), e))?;
            if summary.skipped + summary.failed > 0 {
                warn!(
                    "{} line(s) of {} were not imported",
                    summary.skipped + summary.failed,
                    path.display()
                );
            }
            Ok(())
        }
        Command::Query {
            sensor_id,
            start,
            end,
            field,
        } => {
            let start = parse_timestamp_prefix(&start).ok_or_else(|| format!("invalid start time '{}'", start))?;
            let end = parse_timestamp_prefix(&end).ok_or_else(|| format!("invalid end time '{}'", end))?;
            let points = store
                .query(sensor_id, field, start, end)
                .map_err(|e| e.to_string())?;
            for point in points {
                let value = point.value.map(|v| v.to_string()).unwrap_or_default();
                println!("{};{}", format_timestamp(&point.ts), value);
            }
            Ok(())
        }
        Command::Sensors => {
            for s in store.sensors().map_err(|e| e.to_string())? {
                println!(
                    "{};{};{};{}",
                    s.id,
                    s.name,
                    s.description,
                    if s.enabled { "enabled" } else { "disabled" }
                );
            }
            Ok(())
        }
        Command::SetEnabled { sensor_id, enabled } => {
            if !store
                .set_sensor_enabled(sensor_id, enabled)
                .map_err(|e| e.to_string())?
            {
                return Err(format!("no sensor with id {}", sensor_id));
            }
            info!("Sensor {} {}", sensor_id, if enabled { "enabled" } else { "disabled" });
            Ok(())
        }
    }
}

fn main() {
    let cli = match parse_cli(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(2);
        }
    };

    let env_result = match cli.env_file.as_deref() {
        Some(path) => load_env_file(path).map(|_| Some(path.to_path_buf())),
        None => {
            let default_path = PathBuf::from(".env");
            if default_path.is_file() {
                load_env_file(&default_path).map(|_| Some(default_path))
            } else {
                Ok(None)
            }
        }
    };
    let loaded_env = match env_result {
        Ok(path) => path,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(path) = loaded_env {
        info!("Environment loaded from {}", path.display());
    }
    info!(
        "climate-logger {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );

    if let Err(e) = run(cli) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Result<Cli, String> {
        parse_cli(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn defaults_to_run() {
        assert_eq!(
            cli(&[]).unwrap(),
            Cli {
                env_file: None,
                command: Command::Run
            }
        );
    }

    #[test]
    fn parses_commands_and_env_file() {
        let parsed = cli(&["--env-file=prod.env", "import", "room.log"]).unwrap();
        assert_eq!(parsed.env_file, Some(PathBuf::from("prod.env")));
        assert_eq!(parsed.command, Command::Import(PathBuf::from("room.log")));

        let parsed = cli(&["query", "1", "2024-01-01 00:00:00", "2024-01-02 00:00:00", "rh"]).unwrap();
        assert_eq!(
            parsed.command,
            Command::Query {
                sensor_id: 1,
                start: "2024-01-01 00:00:00".into(),
                end: "2024-01-02 00:00:00".into(),
                field: Field::RelativeHumidity,
            }
        );

        assert_eq!(
            cli(&["disable", "2"]).unwrap().command,
            Command::SetEnabled {
                sensor_id: 2,
                enabled: false
            }
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(cli(&["--env-file"]).is_err());
        assert!(cli(&["--env-file", "a", "--env-file", "b"]).is_err());
        assert!(cli(&["--verbose"]).is_err());
        assert!(cli(&["query", "x", "a", "b"]).is_err());
        assert!(cli(&["import"]).is_err());
    }

    #[test]
    fn parses_env_assignments() {
        assert_eq!(parse_env_assignment("  # comment").unwrap(), None);
        assert_eq!(parse_env_assignment("").unwrap(), None);
        assert_eq!(
            parse_env_assignment("export SENSOR_MODE=simulated # dev box").unwrap(),
            Some(("SENSOR_MODE".into(), "simulated".into()))
        );
        assert_eq!(
            parse_env_assignment("SENSOR_NAMES=\"desk, window\"").unwrap(),
            Some(("SENSOR_NAMES".into(), "desk, window".into()))
        );
        assert_eq!(
            parse_env_assignment("AUDIT_LOG_FILE='/var/log/room.log'").unwrap(),
            Some(("AUDIT_LOG_FILE".into(), "/var/log/room.log".into()))
        );
        assert!(parse_env_assignment("NO_EQUALS").is_err());
        assert!(parse_env_assignment("BAD KEY=1").is_err());
        assert!(parse_env_assignment("QUOTED=\"open").is_err());
    }
}

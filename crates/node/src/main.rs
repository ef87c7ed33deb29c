use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use coindexd_index::KvIndexStore;
use coindexd_log::{log_error, log_info, log_warn};
use coindexd_primitives::Network;
use coindexd_storage::fjall::FjallStore;
use coindexd_storage::memory::MemoryStore;
use coindexd_storage::KeyValueStore;
use coindexd_sync::{NodeClient, Synchronizer};
use fs2::FileExt;
use tokio::sync::watch;

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_CONF_FILE: &str = "coindexd.conf";
const LOCK_FILE_NAME: &str = "coindexd.lock";
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Backend {
    Memory,
    Fjall,
}

impl Backend {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(Self::Memory),
            "fjall" => Some(Self::Fjall),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum ConfigError {
    UnknownNetwork(String),
    UnknownStorage(String),
    InvalidOption(String),
    Io(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnknownNetwork(value) => write!(f, "unknown network '{value}'"),
            ConfigError::UnknownStorage(value) => write!(f, "unknown storage backend '{value}'"),
            ConfigError::InvalidOption(message) => write!(f, "{message}"),
            ConfigError::Io(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug)]
struct Config {
    network: Network,
    backend: Backend,
    data_dir: PathBuf,
    bitcoind_host: String,
    bitcoind_port: u16,
    bitcoind_user: String,
    bitcoind_password: String,
    log_level: coindexd_log::Level,
    log_format: coindexd_log::Format,
    log_timestamps: bool,
}

#[derive(Debug)]
enum CliAction {
    Run(Config),
    PrintHelp,
    PrintVersion,
}

fn default_rpc_port(network: Network) -> u16 {
    match network {
        Network::Mainnet => 8332,
        Network::Testnet => 18332,
        Network::Regtest => 18443,
    }
}

fn parse_args() -> Result<CliAction, ConfigError> {
    parse_args_from(std::env::args().skip(1))
}

fn parse_args_from<I>(raw_args: I) -> Result<CliAction, ConfigError>
where
    I: IntoIterator<Item = String>,
{
    let mut overrides: HashMap<String, String> = HashMap::new();
    let mut conf_path: Option<PathBuf> = None;

    for arg in raw_args {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" => return Ok(CliAction::PrintVersion),
            _ => {}
        }
        let Some(rest) = arg.strip_prefix("--") else {
            return Err(ConfigError::InvalidOption(format!(
                "unrecognized argument '{arg}'"
            )));
        };
        let (key, value) = match rest.split_once('=') {
            Some((key, value)) => (key, value.to_string()),
            None => (rest, "1".to_string()),
        };
        match key {
            "conf" => conf_path = Some(PathBuf::from(value)),
            "network" => {
                overrides.insert("server.network".to_string(), value);
            }
            "storage" => {
                overrides.insert("server.storage".to_string(), value);
            }
            "datadir" => {
                overrides.insert("datadir".to_string(), value);
            }
            "bitcoind-host" => {
                overrides.insert("bitcoind.host".to_string(), value);
            }
            "bitcoind-port" => {
                overrides.insert("bitcoind.port".to_string(), value);
            }
            "bitcoind-user" => {
                overrides.insert("bitcoind.user".to_string(), value);
            }
            "bitcoind-password" => {
                overrides.insert("bitcoind.password".to_string(), value);
            }
            "log-level" => {
                overrides.insert("log.level".to_string(), value);
            }
            "log-format" => {
                overrides.insert("log.format".to_string(), value);
            }
            "no-log-timestamps" => {
                overrides.insert("log.timestamps".to_string(), "0".to_string());
            }
            other => {
                return Err(ConfigError::InvalidOption(format!(
                    "unrecognized option '--{other}'"
                )));
            }
        }
    }

    let conf_file = conf_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONF_FILE));
    let mut options = load_conf(&conf_file)?.unwrap_or_default();
    for (key, value) in overrides {
        options.insert(key, vec![value]);
    }

    Ok(CliAction::Run(build_config(&options)?))
}

fn option<'a>(options: &'a HashMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
    options
        .get(key)
        .and_then(|values| values.last())
        .map(String::as_str)
}

fn build_config(options: &HashMap<String, Vec<String>>) -> Result<Config, ConfigError> {
    let network = match option(options, "server.network") {
        Some(value) => {
            Network::parse(value).ok_or_else(|| ConfigError::UnknownNetwork(value.to_string()))?
        }
        None => Network::Mainnet,
    };
    let backend = match option(options, "server.storage") {
        Some(value) => {
            Backend::parse(value).ok_or_else(|| ConfigError::UnknownStorage(value.to_string()))?
        }
        None => Backend::Fjall,
    };
    let data_dir = PathBuf::from(option(options, "datadir").unwrap_or(DEFAULT_DATA_DIR));
    let bitcoind_host = option(options, "bitcoind.host")
        .unwrap_or("127.0.0.1")
        .to_string();
    let bitcoind_port = match option(options, "bitcoind.port") {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidOption(format!("invalid bitcoind.port '{value}'")))?,
        None => default_rpc_port(network),
    };
    let bitcoind_user = option(options, "bitcoind.user").unwrap_or("").to_string();
    let bitcoind_password = option(options, "bitcoind.password").unwrap_or("").to_string();

    let log_level = match option(options, "log.level") {
        Some(value) => coindexd_log::Level::parse(value)
            .ok_or_else(|| ConfigError::InvalidOption(format!("invalid log.level '{value}'")))?,
        None => coindexd_log::Level::Info,
    };
    let log_format = match option(options, "log.format") {
        Some(value) => coindexd_log::Format::parse(value)
            .ok_or_else(|| ConfigError::InvalidOption(format!("invalid log.format '{value}'")))?,
        None => coindexd_log::Format::Text,
    };
    let log_timestamps = match option(options, "log.timestamps") {
        Some(value) => parse_conf_bool(value).ok_or_else(|| {
            ConfigError::InvalidOption(format!("invalid log.timestamps '{value}'"))
        })?,
        None => true,
    };

    Ok(Config {
        network,
        backend,
        data_dir,
        bitcoind_host,
        bitcoind_port,
        bitcoind_user,
        bitcoind_password,
        log_level,
        log_format,
        log_timestamps,
    })
}

fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ConfigError::Io(err.to_string())),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(idx) = line.find('#') {
            line = &line[..idx];
        }
        if let Some(idx) = line.find(';') {
            line = &line[..idx];
        }
        line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn print_help() {
    println!("coindexd - address-indexing wallet backend");
    println!();
    println!("Usage: coindexd [options]");
    println!();
    println!("Options:");
    println!("  --conf=<path>              Configuration file (default {DEFAULT_CONF_FILE})");
    println!("  --network=<name>           mainnet, testnet, or regtest");
    println!("  --storage=<name>           fjall or memory");
    println!("  --datadir=<path>           Data directory (default {DEFAULT_DATA_DIR})");
    println!("  --bitcoind-host=<host>     Node RPC host (default 127.0.0.1)");
    println!("  --bitcoind-port=<port>     Node RPC port (default per network)");
    println!("  --bitcoind-user=<user>     Node RPC username");
    println!("  --bitcoind-password=<pw>   Node RPC password");
    println!("  --log-level=<level>        error, warn, info, debug, trace");
    println!("  --log-format=<format>      text or json");
    println!("  --no-log-timestamps        Omit timestamps from text logs");
    println!("  --help                     Show this help");
    println!("  --version                  Show version");
}

/// The storage handle is exclusive per process; a second instance pointed at
/// the same data directory must fail fast instead of corrupting the index.
fn lock_data_dir(data_dir: &Path) -> Result<File, ConfigError> {
    fs::create_dir_all(data_dir).map_err(|err| ConfigError::Io(err.to_string()))?;
    let lock_path = data_dir.join(LOCK_FILE_NAME);
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|err| ConfigError::Io(err.to_string()))?;
    lock_file.try_lock_exclusive().map_err(|_| {
        ConfigError::Io(format!(
            "data directory {} is locked by another process",
            data_dir.display()
        ))
    })?;
    Ok(lock_file)
}

#[tokio::main]
async fn main() {
    let action = match parse_args() {
        Ok(action) => action,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };
    let config = match action {
        CliAction::Run(config) => config,
        CliAction::PrintHelp => {
            print_help();
            return;
        }
        CliAction::PrintVersion => {
            println!("coindexd {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    coindexd_log::init(coindexd_log::LogConfig {
        level: config.log_level,
        format: config.log_format,
        timestamps: config.log_timestamps,
    });

    if let Err(err) = run(config).await {
        log_error!("{err}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), String> {
    let _lock = lock_data_dir(&config.data_dir).map_err(|err| err.to_string())?;

    let client = NodeClient::new(
        &config.bitcoind_host,
        config.bitcoind_port,
        &config.bitcoind_user,
        &config.bitcoind_password,
    )
    .map_err(|err| err.to_string())?;

    log_info!(
        "starting on {} against {}:{} ({:?} storage)",
        config.network.as_str(),
        config.bitcoind_host,
        config.bitcoind_port,
        config.backend,
    );

    match config.backend {
        Backend::Memory => run_sync(config, client, MemoryStore::new()).await,
        Backend::Fjall => {
            let store = FjallStore::open(config.data_dir.join("chain"))
                .map_err(|err| err.to_string())?;
            run_sync(config, client, store).await
        }
    }
}

async fn run_sync<S>(config: Config, client: NodeClient, store: S) -> Result<(), String>
where
    S: KeyValueStore + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        log_info!("signal received; requesting shutdown");
        let _ = shutdown_tx.send(true);
    });

    let index = KvIndexStore::new(store);
    let mut synchronizer =
        Synchronizer::new(client, index, config.network, shutdown_rx.clone());
    synchronizer
        .initialize()
        .await
        .map_err(|err| err.to_string())?;

    // Main iteration: catch up, fold in the mempool, sleep, repeat. Errors
    // are logged and swallowed; the next pass re-evaluates from the new tip.
    let mut shutdown = shutdown_rx;
    loop {
        if *shutdown.borrow() {
            break;
        }
        match synchronizer.catch_up().await {
            Ok(()) => {
                if let Err(err) = synchronizer.update_mempool().await {
                    log_warn!("mempool update failed: {err}");
                }
            }
            Err(err) => log_warn!("catch-up failed: {err}"),
        }
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = shutdown.changed() => {}
        }
    }
    log_info!("shutdown complete at height {}", synchronizer.block_count());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn defaults_without_conf() {
        let action = parse_args_from(args(&["--conf=/nonexistent/coindexd.conf"])).unwrap();
        let config = match action {
            CliAction::Run(config) => config,
            _ => panic!("expected run action"),
        };
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.backend, Backend::Fjall);
        assert_eq!(config.bitcoind_port, 8332);
    }

    #[test]
    fn network_selects_default_port() {
        let action = parse_args_from(args(&[
            "--conf=/nonexistent/coindexd.conf",
            "--network=testnet",
            "--storage=memory",
        ]))
        .unwrap();
        let config = match action {
            CliAction::Run(config) => config,
            _ => panic!("expected run action"),
        };
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.bitcoind_port, 18332);
    }

    #[test]
    fn unknown_selectors_fail() {
        let err = parse_args_from(args(&[
            "--conf=/nonexistent/coindexd.conf",
            "--network=simnet",
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownNetwork(_)));

        let err = parse_args_from(args(&[
            "--conf=/nonexistent/coindexd.conf",
            "--storage=mongo",
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStorage(_)));
    }

    #[test]
    fn conf_lines_parse() {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "coindexd_conf_test_{}",
            std::process::id() as u64 + std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .subsec_nanos() as u64
        ));
        fs::create_dir_all(&dir).unwrap();
        let conf = dir.join("coindexd.conf");
        fs::write(
            &conf,
            "# comment\nserver.network=regtest\nserver.storage=memory\nbitcoind.user=u ; inline\nbitcoind.password=p\n",
        )
        .unwrap();

        let action = parse_args_from(args(&[&format!("--conf={}", conf.display())])).unwrap();
        let config = match action {
            CliAction::Run(config) => config,
            _ => panic!("expected run action"),
        };
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.bitcoind_user, "u");
        assert_eq!(config.bitcoind_port, 18443);
        let _ = fs::remove_dir_all(&dir);
    }
}

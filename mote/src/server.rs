// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Process entry point: argument parsing, config loading, wiring the
//! broker core, persistence writer and listeners, and running them to
//! completion on a single tokio runtime.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::sync::Arc;

use clap::Arg;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::broker::Broker;
use crate::config::{Config, DEFAULT_CONFIG};
use crate::error::{Error, ErrorKind};
use crate::listener::ListenerTask;
use crate::log as mote_log;
use crate::persistence::{self, FileRetainStore};
use crate::session::SessionConfig;

const PERSISTENCE_CHANNEL_CAPACITY: usize = 256;

/// Entry point called from `bin/mote.rs`.
pub fn run_server() -> Result<(), Error> {
    let matches = clap::App::new("Mote")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Lightweight routing and retention broker")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("config_file")
                .takes_value(true)
                .help("Specify config file path"),
        )
        .arg(
            Arg::with_name("reload")
                .short("r")
                .long("reload")
                .takes_value(false)
                .help("Ask a running instance to reload"),
        )
        .arg(
            Arg::with_name("test")
                .short("t")
                .long("test")
                .takes_value(false)
                .help("Test config file and exit"),
        )
        .arg(
            Arg::with_name("override")
                .short("o")
                .long("set")
                .value_name("key=value")
                .takes_value(true)
                .multiple(true)
                .help("Override a config value, e.g. --set tcp_port=1884"),
        )
        .get_matches();

    let config_path = matches.value_of("config").unwrap_or(DEFAULT_CONFIG);
    let mut config = if std::path::Path::new(config_path).exists() {
        Config::load_from_file(config_path)?
    } else {
        log::warn!("server: config file {config_path} not found, using defaults");
        Config::with_defaults()
    };

    let overrides = parse_overrides(matches.values_of("override"));
    config.apply_overrides(&overrides);

    if matches.is_present("test") {
        println!("The configuration file {config_path} syntax is Ok");
        return Ok(());
    }

    mote_log::init_log(&config.log).map_err(|err| {
        Error::from_string(ErrorKind::LoggerError, format!("failed to init logger: {err}"))
    })?;

    if matches.is_present("reload") {
        return send_reload_signal(&config);
    }

    let runtime = Runtime::new()?;
    runtime.block_on(run_async(config))
}

fn parse_overrides<'a>(values: Option<clap::Values<'a>>) -> HashMap<String, String> {
    let mut overrides = HashMap::new();
    for entry in values.into_iter().flatten() {
        if let Some((key, value)) = entry.split_once('=') {
            overrides.insert(key.to_string(), value.to_string());
        }
    }
    overrides
}

fn write_pid_file(path: &str) -> Result<(), Error> {
    let mut file = File::create(path)?;
    write!(file, "{}", std::process::id())?;
    Ok(())
}

fn send_reload_signal(config: &Config) -> Result<(), Error> {
    let mut file = File::open(&config.general.pid_file)?;
    let mut pid_str = String::new();
    file.read_to_string(&mut pid_str)?;
    let pid = pid_str.trim().parse::<i32>().map_err(|err| {
        Error::from_string(
            ErrorKind::ConfigError,
            format!("failed to parse pid from {}: {err}", config.general.pid_file),
        )
    })?;
    nc::kill(pid, nc::SIGUSR1).map_err(|err| {
        Error::from_string(
            ErrorKind::IoError,
            format!("failed to signal pid {pid}: {}", nc::strerror(err)),
        )
    })?;
    Ok(())
}

async fn run_async(config: Config) -> Result<(), Error> {
    write_pid_file(&config.general.pid_file)?;

    let retain_store = Arc::new(FileRetainStore::new(config.storage.retained_path.clone()));
    let loaded = retain_store.load_all().await.unwrap_or_else(|err| {
        log::error!("server: failed to load retained records: {err}");
        Vec::new()
    });

    let (persistence_tx, persistence_rx) = mpsc::channel(PERSISTENCE_CHANNEL_CAPACITY);
    persistence::spawn_writer(retain_store, persistence_rx);

    let broker = Broker::new(Some(persistence_tx));
    broker.load_retained(loaded).await;

    let session_config = SessionConfig::new();

    let mut listener_handles = Vec::new();
    for listener_config in &config.listeners {
        let listener = ListenerTask::bind(listener_config).await?;
        let broker = broker.clone();
        let session_config = session_config.clone();
        listener_handles.push(tokio::spawn(listener.run(broker, session_config)));
    }

    listen_for_reload(config.general.pid_file.clone());

    for handle in listener_handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Watch for `SIGUSR1` the way `--reload` signals it. There is no live
/// config hot-swap: a caller asking to reload is told to restart the
/// process instead, since listeners bind once at startup.
fn listen_for_reload(pid_file: String) {
    #[cfg(unix)]
    {
        tokio::spawn(async move {
            let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1()) else {
                return;
            };
            loop {
                signal.recv().await;
                log::info!("server: received reload signal (pid file {pid_file}), restart the process to apply config changes");
            }
        });
    }
    #[cfg(not(unix))]
    {
        let _ = pid_file;
    }
}

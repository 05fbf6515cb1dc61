//! p6gate - command-line session broker for Primavera P6.
//!
//! Each invocation opens the shared session store, performs one operation
//! and prints the result as JSON on stdout. Errors go to stderr.

mod cli;

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};
use p6gate_core::{
    BrokerError, CallRequest, Config, Credentials, HostGuard, ListOptions, ObsRef, P6Client, Proxy,
    SecretProtection, SessionManager, SessionStore,
};

type P6Proxy = Proxy<P6Client, P6Client>;

/// Log file name prefix inside the configured log directory
const LOG_FILE: &str = "p6gate.log";

/// Initialize the tracing subscriber for logging
///
/// The returned guard flushes the file log and must live until exit.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // RUST_LOG wins over the configured level
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    if !config.enable_session_logging {
        if let Ok(directive) = "p6gate::lifecycle=off".parse() {
            filter = filter.add_directive(directive);
        }
    }

    let (file_layer, guard) = match config.log_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn build_proxy(config: &Config) -> Result<P6Proxy> {
    let store_path = config.session_store_path()?;
    let protector = config
        .secret_protector()
        .context("Failed to set up credential protection")?;
    let store = Arc::new(SessionStore::open(store_path, protector));

    let client = Arc::new(P6Client::new(config).context("Failed to build HTTP client")?);
    let manager = SessionManager::new(store, Arc::clone(&client));
    let guard = HostGuard::new(config.allowed_host()?);

    Ok(Proxy::new(manager, client, guard, config.session_policy()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Repeated keys become JSON arrays so they are sent as repeated parameters.
fn query_map(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                map.insert(key, Value::String(value));
            }
        }
    }
    map
}

fn parse_body(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

async fn run(command: Commands, config: Config) -> Result<()> {
    if let Commands::Config { save } = command {
        if save {
            let path = config.save()?;
            info!(path = %path.display(), "Configuration saved");
        }
        return print_json(&config);
    }

    if !config.verify_ssl && config.base_url.starts_with("https://") {
        warn!("TLS certificate verification is disabled (P6_VERIFY_SSL=false)");
    }
    let proxy = build_proxy(&config)?;

    match command {
        Commands::Login {
            username,
            database,
            remember,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => rpassword::prompt_password("Password: ")?,
            };
            let outcome = proxy
                .login(Credentials::new(username, password, database), remember)
                .await?;
            print_json(&outcome)
        }
        Commands::Call {
            method,
            path,
            session,
            query,
            header,
            body,
        } => {
            let request = CallRequest {
                session_id: session,
                method,
                path,
                query: query_map(query),
                headers: header.into_iter().collect(),
                body: body.map(parse_body),
            };
            print_json(&proxy.call(request).await?)
        }
        Commands::Sessions => print_json(&proxy.sessions()),
        Commands::Active => print_json(&proxy.active_session()?),
        Commands::Logout { session_id } => {
            proxy.logout(&session_id)?;
            print_json(&json!({ "message": format!("Session {} deleted", session_id) }))
        }
        Commands::Clear { forget_key } => {
            let cleared = proxy.logout_all()?;
            if forget_key {
                if config.secret_protection == SecretProtection::Keyring {
                    Config::forget_keychain_passphrase()?;
                } else {
                    warn!("--forget-key has no effect without SECRET_PROTECTION=keyring");
                }
            }
            print_json(&json!({ "message": "All sessions cleared", "cleared": cleared }))
        }
        Commands::Probe { session_id } => {
            let result = proxy.probe(session_id.as_deref()).await?;
            print_json(&json!({ "result": result }))
        }
        Commands::ObsFind {
            query,
            session,
            limit,
        } => {
            let options = ListOptions {
                limit,
                ..ListOptions::default()
            };
            print_json(&proxy.obs_find(session.as_deref(), &query, options).await?)
        }
        Commands::Projects {
            filter,
            fields,
            session,
            limit,
        } => {
            let options = ListOptions {
                fields,
                limit,
                ..ListOptions::default()
            };
            print_json(
                &proxy
                    .projects_list(session.as_deref(), filter.as_deref(), options)
                    .await?,
            )
        }
        Commands::ProjectsByObs {
            name,
            id,
            session,
            limit,
        } => {
            let obs = match (id, name) {
                (Some(id), _) => ObsRef::ObjectId(id),
                (None, Some(name)) => ObsRef::Name(name),
                (None, None) => anyhow::bail!("Provide --name or --id"),
            };
            let options = ListOptions {
                limit,
                ..ListOptions::default()
            };
            print_json(&proxy.projects_by_obs(session.as_deref(), obs, options).await?)
        }
        Commands::Config { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = init_tracing(&config);

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<BrokerError>() {
                Some(broker) => eprintln!("Error ({}): {}", broker.status_code(), broker),
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use chrono::{DateTime, Utc};
use clap::Parser;
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use wallet_ledger::api::{self, AppState};
use wallet_ledger::{
    Config, InMemoryCredentials, LedgerError, LedgerStore, PaystackGateway, Permission, UserId,
    logging,
};

/// Wallet Ledger - Serve the wallet HTTP API
///
/// Loads configuration, seeds users and API keys from CSV files, and serves
/// deposits, transfers, balances, and provider notifications over HTTP.
#[derive(Parser, Debug)]
#[command(name = "wallet-ledger")]
#[command(about = "A wallet ledger service with Paystack deposits and P2P transfers", long_about = None)]
struct Args {
    /// YAML configuration file. Built-in defaults are used when omitted.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.host`
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overrides `server.port`
    #[arg(long)]
    port: Option<u16>,

    /// Users CSV: `user_id,email,token`
    ///
    /// Each row creates the user's wallet and registers the session token.
    #[arg(long, value_name = "FILE")]
    users: Option<PathBuf>,

    /// API keys CSV: `owner,secret,permissions,expires_at,active`
    ///
    /// Permissions are `|`-separated, e.g. `read|transfer`.
    #[arg(long, value_name = "FILE")]
    api_keys: Option<PathBuf>,

    /// Paystack secret key, overrides `paystack.secret_key`
    #[arg(long, env = "PAYSTACK_SECRET_KEY", hide_env_values = true)]
    paystack_secret_key: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };
    logging::init(&config.logging);

    let store = Arc::new(LedgerStore::with_settings(config.store.settings()));
    let credentials = Arc::new(InMemoryCredentials::new());

    if let Some(path) = &args.users {
        match open(path).and_then(|file| Ok(seed_users(file, &store, &credentials)?)) {
            Ok(count) => info!(count, path = %path.display(), "users seeded"),
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to seed users");
                process::exit(1);
            }
        }
    }
    if let Some(path) = &args.api_keys {
        match open(path).and_then(|file| Ok(seed_api_keys(file, &credentials)?)) {
            Ok(count) => info!(count, path = %path.display(), "api keys seeded"),
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to seed api keys");
                process::exit(1);
            }
        }
    }

    let gateway = match PaystackGateway::new(&config.paystack) {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            error!(error = %e, "failed to build payment gateway");
            process::exit(1);
        }
    };

    let state = AppState::new(store, gateway, credentials, &config);
    let app = api::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(addr = %addr, "wallet ledger listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(secret) = &args.paystack_secret_key {
        config.paystack.secret_key = secret.clone();
    }
    config.validate()?;
    Ok(config)
}

fn open(path: &Path) -> Result<BufReader<File>, Box<dyn std::error::Error>> {
    Ok(BufReader::new(File::open(path)?))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// Row of the users seed file.
#[derive(Debug, Deserialize)]
struct UserRow {
    user_id: String,
    email: String,
    token: String,
}

/// Row of the API keys seed file.
#[derive(Debug, Deserialize)]
struct ApiKeyRow {
    owner: String,
    secret: String,
    permissions: String,
    expires_at: DateTime<Utc>,
    active: bool,
}

impl ApiKeyRow {
    fn parse_permissions(&self) -> Result<Vec<Permission>, LedgerError> {
        self.permissions
            .split('|')
            .filter(|p| !p.trim().is_empty())
            .map(str::parse)
            .collect()
    }
}

/// Creates a wallet and a session for every user row.
///
/// Parsing is streaming. Malformed rows and rows the ledger rejects (e.g. a
/// second wallet for the same user) are skipped with a warning.
///
/// # Errors
///
/// Returns a CSV error only if the reader itself fails.
fn seed_users<R: Read>(
    reader: R,
    store: &LedgerStore,
    credentials: &InMemoryCredentials,
) -> Result<usize, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(reader);

    let mut seeded = 0;
    for (line, result) in rdr.deserialize::<UserRow>().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(e) if e.is_io_error() => return Err(e),
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping malformed user row");
                continue;
            }
        };
        let user_id = UserId::new(row.user_id);
        if let Err(e) = store.create_wallet(user_id.clone(), row.email) {
            warn!(user = %user_id, error = %e, "skipping user row");
            continue;
        }
        credentials.register_session(row.token, user_id);
        seeded += 1;
    }
    Ok(seeded)
}

/// Registers every API key row. Same skipping rules as [`seed_users`].
fn seed_api_keys<R: Read>(reader: R, credentials: &InMemoryCredentials) -> Result<usize, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(reader);

    let mut seeded = 0;
    for (line, result) in rdr.deserialize::<ApiKeyRow>().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(e) if e.is_io_error() => return Err(e),
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping malformed api key row");
                continue;
            }
        };
        let permissions = match row.parse_permissions() {
            Ok(permissions) => permissions,
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping api key row");
                continue;
            }
        };
        match credentials.issue_api_key(
            UserId::new(row.owner),
            &row.secret,
            permissions,
            row.expires_at,
            row.active,
        ) {
            Ok(_) => seeded += 1,
            Err(e) => warn!(line = line + 2, error = %e, "skipping api key row"),
        }
    }
    Ok(seeded)
}

use std::error::Error;
use std::io;

use boltadm_adapters::neo4j::Neo4jDriverBackend;
use boltadm_core::catalog::CatalogSnapshot;
use boltadm_core::config::ClientConfig;
use boltadm_core::connection_manager::{AccessMode, ConnectionManager, DriverBackend};
use boltadm_core::credential_store::{CredentialStore, FileKeyValueStore, KeyValueStore};
use boltadm_core::endpoint::Credentials;
use boltadm_core::record::Record;
use boltadm_core::session::SessionFacade;
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "BOLTADM_LOG";
const PASSWORD_ENV: &str = "BOLTADM_PASSWORD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseOutcome {
    Options,
    HelpRequested,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CliOptions {
    url: Option<String>,
    user: Option<String>,
    remember: bool,
    database: Option<String>,
    list_databases: bool,
    query: Option<String>,
    read_only: bool,
    forget: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    uri: Option<String>,
    auto_login: bool,
    element_id: bool,
    active_database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    databases: Option<CatalogSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows: Option<Vec<Record>>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let mut options = CliOptions::default();
    if parse_args_from(std::env::args().skip(1), &mut options)? == ParseOutcome::HelpRequested {
        print_help();
        return Ok(());
    }

    let config = ClientConfig::load_default()?;
    let store_path = config.session_store_path()?;
    debug!(path = %store_path.display(), "loading session store");
    let store = FileKeyValueStore::load_from_path(store_path)?;

    let session = SessionFacade::new(
        ConnectionManager::new(Neo4jDriverBackend),
        CredentialStore::new(store),
    )
    .with_client_config(&config);

    let password = std::env::var(PASSWORD_ENV).unwrap_or_default();
    let outcome = run(&session, &options, &password).await;
    session.logout().await;

    println!("{}", serde_json::to_string_pretty(&outcome?)?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run<B: DriverBackend, S: KeyValueStore>(
    session: &SessionFacade<B, S>,
    options: &CliOptions,
    password: &str,
) -> Result<Report, Box<dyn Error>> {
    if options.forget {
        session.forget_credentials()?;
    }

    // An explicit --url or --user always wins over the remembered login.
    let auto_login =
        options.user.is_none() && options.url.is_none() && session.try_auto_login().await;
    if !auto_login {
        let uri = options
            .url
            .clone()
            .unwrap_or_else(|| session.initial_url());
        let credentials = match &options.user {
            Some(username) => Credentials::basic(username.as_str(), password),
            None => Credentials::None,
        };
        session
            .login(session.endpoint(uri), credentials, options.remember)
            .await?;
    }

    if let Some(database) = &options.database {
        session.set_active_database(database).await?;
    }

    let databases = if options.list_databases {
        Some(session.list_databases().await?)
    } else {
        None
    };

    let rows = match &options.query {
        Some(query) => {
            let access_mode = if options.read_only {
                AccessMode::Read
            } else {
                AccessMode::Write
            };
            Some(session.run_admin_query(query, access_mode).await?)
        }
        None => None,
    };

    let status = session.status();
    Ok(Report {
        uri: status.uri,
        auto_login,
        element_id: status
            .capabilities
            .is_some_and(|capabilities| capabilities.element_id),
        active_database: session.active_database().await,
        databases,
        rows,
    })
}

fn parse_args_from(
    args: impl IntoIterator<Item = String>,
    options: &mut CliOptions,
) -> io::Result<ParseOutcome> {
    let mut args = args.into_iter();

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "-h" | "--help" => return Ok(ParseOutcome::HelpRequested),
            "--url" => options.url = Some(next_value(&mut args, "--url")?),
            "--user" => options.user = Some(next_value(&mut args, "--user")?),
            "--remember" => options.remember = true,
            "--database" => options.database = Some(next_value(&mut args, "--database")?),
            "--list-databases" => options.list_databases = true,
            "--query" => options.query = Some(next_value(&mut args, "--query")?),
            "--read" => options.read_only = true,
            "--forget" => options.forget = true,
            _ => {
                return Err(io_other(format!("unknown argument `{flag}`")));
            }
        }
    }

    Ok(ParseOutcome::Options)
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<String> {
    args.next()
        .ok_or_else(|| io_other(format!("missing value for `{flag}`")))
}

fn print_help() {
    println!(
        "boltadm: log in to a Bolt graph server and run admin queries\n\n\
Usage:\n  boltadm [OPTIONS]\n\n\
Options:\n  --url <uri>          Server URI (default: last host, then config default_url)\n  --user <name>        Log in with basic auth; without it and --url a remembered login is tried first\n  --remember           Remember the login for the next start\n  --database <name>    Select the active database\n  --list-databases     Print the database catalog\n  --query <cypher>     Run a query against the active database\n  --read               Run --query in read access mode\n  --forget             Drop remembered credentials before connecting\n\n\
Environment:\n  BOLTADM_PASSWORD     Password for --user\n  BOLTADM_LOG          Log filter (default: warn)\n  BOLTADM_CONFIG_DIR   Override the config directory\n"
    );
}

fn io_other(error: impl std::fmt::Display) -> io::Error {
    io::Error::other(error.to_string())
}

//! Connector -- command-line front end for the session client.
//!
//! Drives the library the way the web front end does:
//!   - Email login with a verification code
//!   - New-user onboarding (name, username, gender)
//!   - Username availability checks
//!   - Dark-mode preference

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

use connector::auth::{Gender, NewUserDetails};
use connector::config::Config;
use connector::preferences::{DarkMode, PreferenceStore};
use connector::{ApiClient, Error, Session};

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Login { email: String },
    Username { username: String },
    Theme { mode: Option<DarkMode> },
}

#[derive(Debug)]
struct CliArgs {
    config_path: PathBuf,
    command: Command,
}

enum Parsed {
    Run(CliArgs),
    Help,
    Version,
}

fn parse_args() -> CliArgs {
    match parse(std::env::args().skip(1)) {
        Ok(Parsed::Run(args)) => args,
        Ok(Parsed::Help) => {
            print_usage();
            std::process::exit(0);
        }
        Ok(Parsed::Version) => {
            println!("connector {}", env!("CARGO_PKG_VERSION"));
            std::process::exit(0);
        }
        Err(msg) => {
            eprintln!("Error: {msg}");
            eprintln!("Run with --help for usage information.");
            std::process::exit(1);
        }
    }
}

fn parse(args: impl IntoIterator<Item = String>) -> Result<Parsed, String> {
    let mut args = args.into_iter();
    let mut config_path = PathBuf::from("connector.toml");
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().ok_or("--config requires a path argument")?;
                config_path = PathBuf::from(path);
            }
            "--help" | "-h" => return Ok(Parsed::Help),
            "--version" | "-V" => return Ok(Parsed::Version),
            other if other.starts_with('-') => return Err(format!("Unknown argument: {other}")),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("login") => Command::Login {
            email: positional.next().ok_or("login requires an email address")?,
        },
        Some("username") => Command::Username {
            username: positional.next().ok_or("username requires a username")?,
        },
        Some("theme") => Command::Theme {
            mode: positional
                .next()
                .map(|m| m.parse().map_err(|_| format!("Unknown theme: {m}")))
                .transpose()?,
        },
        Some(other) => return Err(format!("Unknown command: {other}")),
        None => return Err("a command is required".into()),
    };

    if let Some(extra) = positional.next() {
        return Err(format!("Unexpected argument: {extra}"));
    }

    Ok(Parsed::Run(CliArgs {
        config_path,
        command,
    }))
}

fn print_usage() {
    println!(
        "\
connector {version} -- Connector session client

USAGE:
    connector [OPTIONS] <COMMAND>

COMMANDS:
    login <EMAIL>                        Sign in with an emailed verification code
    username <USERNAME>                  Check whether a username is available
    theme [enabled|disabled|system]      Show or set the dark-mode preference

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: connector.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    CONNECTOR_CONFIG       Alternative to --config flag
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let cli = parse_args();

    let config_path = std::env::var("CONNECTOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);
    let config = Config::load(&config_path)?;
    init_tracing(&config);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        base_url = %config.api.base_url,
        "Starting connector"
    );

    match cli.command {
        Command::Login { email } => login(&config, &email).await,
        Command::Username { username } => check_username(&config, &username).await,
        Command::Theme { mode } => theme(&config, mode),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn login(config: &Config, email: &str) -> anyhow::Result<()> {
    let session = Session::new(ApiClient::from_config(&config.api)?);
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let login = session.request_login(email).await.map_err(user_facing)?;
    println!("A verification code was sent to {}.", email.trim());

    let code = prompt(&mut input, "Verification code").await?;
    let details = if login.is_new_user {
        println!("Welcome! Tell us a bit about yourself.");
        Some(onboarding_details(&session, &mut input).await?)
    } else {
        None
    };

    let result = session
        .verify_login(&login.login_token, &code, login.is_new_user, details)
        .await
        .map_err(user_facing)?;

    match result.user {
        Some(user) => {
            println!("Signed in as {} (@{})", user.name, user.username);
            Ok(())
        }
        None => anyhow::bail!("Signed in, but the profile could not be loaded."),
    }
}

async fn onboarding_details(
    session: &Session,
    input: &mut Lines<BufReader<Stdin>>,
) -> anyhow::Result<NewUserDetails> {
    let name = prompt(input, "Name").await?;

    let username = loop {
        let username = prompt(input, "Username").await?;
        match session.check_username(&username).await {
            Ok(true) => break username,
            Ok(false) => println!("Username already taken."),
            Err(Error::Validation(e)) => println!("{}", e.message),
            Err(e) => return Err(user_facing(e)),
        }
    };

    let options: Vec<_> = Gender::ALL
        .iter()
        .map(|g| format!("{} ({})", g.as_str(), g.label()))
        .collect();
    println!("Gender: {}", options.join(", "));
    let gender = loop {
        match prompt(input, "Gender").await?.parse::<Gender>() {
            Ok(gender) => break gender,
            Err(e) => println!("{}", e.message),
        }
    };

    Ok(NewUserDetails {
        name,
        username,
        gender,
    })
}

async fn check_username(config: &Config, username: &str) -> anyhow::Result<()> {
    let session = Session::new(ApiClient::from_config(&config.api)?);
    if session.check_username(username).await.map_err(user_facing)? {
        println!("{username} is available.");
    } else {
        println!("Username already taken.");
    }
    Ok(())
}

fn theme(config: &Config, mode: Option<DarkMode>) -> anyhow::Result<()> {
    let store = PreferenceStore::new(&config.preferences.path);
    match mode {
        Some(mode) => {
            store.set_dark_mode(mode)?;
            println!("Dark mode set to {mode}.");
        }
        None => println!("Dark mode: {}", store.dark_mode()),
    }
    Ok(())
}

async fn prompt(input: &mut Lines<BufReader<Stdin>>, label: &str) -> anyhow::Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{label}: ").as_bytes()).await?;
    stdout.flush().await?;

    match input.next_line().await? {
        Some(line) => Ok(line.trim().to_string()),
        None => anyhow::bail!("input closed"),
    }
}

/// Collapse a client error to the message a user should see.
fn user_facing(err: Error) -> anyhow::Error {
    tracing::debug!(error = %err, kind = ?err.kind(), "Command failed");
    anyhow::anyhow!("{}", err.user_message())
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("connector={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tw_auth::{
    AuthClient, AuthStore, EnvSecretProvider, FileStore, RegistrationForm, Route, Storage,
    StoreOptions, hydrate, route_for,
};

use crate::settings::Settings;

/// Environment variable holding the storage passphrase
///
/// Without a persistent keyring backend the passphrase is the only way to
/// reopen the stores on the next run.
const PASSPHRASE_ENV: &str = "TOKENWARD_PASSPHRASE";

#[derive(Debug, Parser)]
#[command(name = "tokenward", version, about = "Sign in to a token API and keep the session alive")]
struct Cli {
    /// Settings file [default: settings.toml in the platform config dir]
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// API base URL, overriding the settings file
    #[arg(long, global = true, env = "TOKENWARD_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show what is stored locally
    Status,
    /// Sign in with username and password
    Login {
        username: String,
        #[arg(long, env = "TOKENWARD_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account that needs OTP verification
    Register {
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long, env = "TOKENWARD_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Confirm a pending registration
    Verify { otp: String },
    /// Fetch the signed-in user's profile from the server
    Whoami,
    /// Sign out here and on the server
    Logout,
    /// Check whether a username is free
    CheckUsername { username: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut settings = match cli.config.or_else(Settings::default_path) {
        Some(path) => Settings::load(&path).await?,
        None => Settings::default(),
    };
    if let Some(base_url) = cli.base_url {
        settings.base_url = base_url;
    }

    let config = settings.auth_config()?;
    let storage = open_storage(&settings.storage_dir()?).await?;
    let store = AuthStore::new(
        storage,
        StoreOptions::default().with_registration_ttl(config.registration_ttl),
    );

    let outcome = hydrate(&store).await;
    debug!(?outcome, "Restored persisted state");

    let client = AuthClient::new(config, store)?;
    run(&client, cli.command).await
}

async fn open_storage(dir: &Path) -> anyhow::Result<Storage> {
    let provider = Arc::new(EnvSecretProvider::new(PASSPHRASE_ENV));

    let secure = FileStore::new(dir.join("secure"), provider.clone())
        .await
        .with_context(|| format!("Failed to open secure storage in {}", dir.display()))?;
    let general = FileStore::new(dir.join("general"), provider)
        .await
        .with_context(|| format!("Failed to open storage in {}", dir.display()))?;

    Ok(Storage::new(Arc::new(secure), Arc::new(general)))
}

async fn run(client: &AuthClient, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status => print_status(client),
        Command::Login { username, password } => {
            let login = client.login(&username, &password).await?;
            println!("Signed in as {}", login.user.username);
        }
        Command::Register {
            username,
            email,
            first_name,
            last_name,
            password,
        } => {
            let user = client
                .register(RegistrationForm {
                    username,
                    email,
                    first_name,
                    last_name,
                    password,
                })
                .await?;
            println!(
                "Registered {}. Enter the code sent to {} with `tokenward verify <code>`.",
                user.username, user.email
            );
        }
        Command::Verify { otp } => {
            let user = client.verify_otp(&otp).await?;
            println!("Verified. Signed in as {}", user.username);
        }
        Command::Whoami => {
            let user = client.sync_profile().await?;
            println!("{} <{}>", user.username, user.email);
            let name = format!("{} {}", user.first_name, user.last_name);
            if !name.trim().is_empty() {
                println!("{}", name.trim());
            }
        }
        Command::Logout => {
            client.logout().await;
            println!("Signed out");
        }
        Command::CheckUsername { username } => {
            let availability = client.check_username(&username).await?;
            let verdict = if availability.available { "available" } else { "taken" };
            match availability.message {
                Some(message) => println!("{username} is {verdict}: {message}"),
                None => println!("{username} is {verdict}"),
            }
        }
    }
    Ok(())
}

fn print_status(client: &AuthClient) {
    let snapshot = client.store().snapshot();
    match route_for(&snapshot) {
        Route::Home => match &snapshot.user {
            Some(user) => println!("Signed in as {}", user.username),
            None => println!("Signed in"),
        },
        Route::VerifyOtp => {
            if let Some(user) = &snapshot.registered_user {
                println!("Registration for {} awaiting verification", user.username);
            }
        }
        Route::SignIn => println!("Signed out"),
        Route::Splash => println!("Loading"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tokenward",
            "check-username",
            "alice",
            "--base-url",
            "https://api.example.com",
        ])
        .unwrap();

        assert_eq!(cli.base_url.as_deref(), Some("https://api.example.com"));
        assert!(matches!(cli.command, Command::CheckUsername { ref username } if username == "alice"));
    }

    #[test]
    fn register_takes_profile_flags() {
        let cli = Cli::try_parse_from([
            "tokenward",
            "register",
            "alice",
            "--email",
            "alice@example.com",
            "--first-name",
            "Alice",
            "--last-name",
            "Liddell",
            "--password",
            "Secret123!",
        ])
        .unwrap();

        match cli.command {
            Command::Register {
                first_name,
                last_name,
                ..
            } => {
                assert_eq!(first_name, "Alice");
                assert_eq!(last_name, "Liddell");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_reads_hydrated_store() {
        let store = AuthStore::in_memory();
        hydrate(&store).await;
        let client = AuthClient::new(
            tw_auth::AuthConfig::parse("http://127.0.0.1:1").unwrap(),
            store,
        )
        .unwrap();

        assert_eq!(route_for(&client.store().snapshot()), Route::SignIn);
        print_status(&client);
    }
}

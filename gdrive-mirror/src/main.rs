use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use gdrive_mirror::config::{ConfigOverrides, MirrorConfig};
use gdrive_mirror::runtime::MirrorRuntime;
use gdrive_mirror::storage::CredentialStore;
use gdrive_mirror::sync::conversion::ConversionMode;
use gdrive_mirror::sync::lock::LockError;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const EXIT_FATAL: u8 = 1;
const EXIT_LOCKED: u8 = 2;

/// Mirror a Google Drive onto a local directory.
#[derive(Debug, Parser)]
#[command(name = "gdrive-mirror", version, about)]
struct Cli {
    /// Directory that receives the mirror [default: $GDRIVE_MIRROR_DIR, then cwd]
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Credential cache file [default: $GDRIVE_CREDENTIALS, then <dir>/.oauth2.json]
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// OAuth client secrets downloaded from the API console [default: $GDRIVE_CLIENT_SECRETS]
    #[arg(long)]
    client_secrets: Option<PathBuf>,

    /// Target format for Google documents
    #[arg(long, value_enum, default_value_t = ConversionMode::OpenDocument)]
    convert: ConversionMode,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Remove saved credentials and exit
    #[arg(long)]
    logout: bool,
}

impl Cli {
    fn overrides(&self, env_file: Option<PathBuf>) -> ConfigOverrides {
        ConfigOverrides {
            work_dir: self.dir.clone(),
            credentials: self.credentials.clone(),
            client_secrets: self.client_secrets.clone(),
            conversion: Some(self.convert),
            env_file,
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "warn,gdrive_mirror=info",
        (false, 1) => "info,gdrive_mirror=debug",
        _ => "debug,gdrive_mirror=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<LockError>() {
        Some(LockError::AlreadyHeld(_)) => EXIT_LOCKED,
        _ => EXIT_FATAL,
    }
}

async fn run(cli: Cli, env_file: Option<PathBuf>) -> anyhow::Result<()> {
    let config = MirrorConfig::from_env(cli.overrides(env_file))?;
    if cli.logout {
        CredentialStore::new(&config.credentials_path).delete()?;
        info!(path = %config.credentials_path.display(), "saved credentials removed");
        return Ok(());
    }
    MirrorRuntime::new(config).run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_file = dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli, env_file).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_defaults() {
        let cli = Cli::try_parse_from(["gdrive-mirror"]).unwrap();
        assert_eq!(cli.convert, ConversionMode::OpenDocument);
        assert_eq!(cli.verbose, 0);
        assert!(!cli.logout);
        // Environment fallbacks belong to MirrorConfig::resolve.
        assert!(cli.dir.is_none());
        assert!(cli.credentials.is_none());
        assert!(cli.client_secrets.is_none());
    }

    #[test]
    fn parses_conversion_and_verbosity() {
        let cli =
            Cli::try_parse_from(["gdrive-mirror", "--convert", "pdf", "-vv", "--dir", "/tmp/m"])
                .unwrap();
        assert_eq!(cli.convert, ConversionMode::Pdf);
        assert_eq!(cli.verbose, 2);
        let overrides = cli.overrides(Some(PathBuf::from("/tmp/m/.env")));
        assert_eq!(overrides.work_dir, Some(PathBuf::from("/tmp/m")));
        assert_eq!(overrides.env_file, Some(PathBuf::from("/tmp/m/.env")));
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["gdrive-mirror", "-q", "-v"]).is_err());
    }

    #[test]
    fn rejects_unknown_conversion() {
        assert!(Cli::try_parse_from(["gdrive-mirror", "--convert", "docx"]).is_err());
    }

    #[test]
    fn held_lock_maps_to_its_own_exit_code() {
        let err = anyhow::Error::new(LockError::AlreadyHeld(PathBuf::from(".lock")));
        assert_eq!(exit_code_for(&err), EXIT_LOCKED);

        let err = anyhow::anyhow!("listing failed");
        assert_eq!(exit_code_for(&err), EXIT_FATAL);
    }
}

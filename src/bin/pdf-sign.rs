use clap::{Args, Parser, Subcommand};
use pdf_signing_backends::{
    CertificateFilter, CertificateSource, Error, KeyUsage, PositionOverride, ProfileStore,
    SettingsStore, SigningRequest, SigningService,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "pdf-sign",
    about = "Sign and verify PDF documents with PKCS#12, PKCS#11 and NSS certificates"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (default: ~/.config/pdf-signing/config.json)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Signature profile directory (default: ~/.config/pdf-signing/profiles)
    #[arg(long, global = true, value_name = "DIR")]
    profiles_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the certificates available for signing
    Certificates(CertificateArgs),
    /// Sign a PDF into `<name>_signed.<ext>`
    Sign(SignArgs),
    /// Verify the signatures of a PDF
    Verify { input: PathBuf },
    /// Manage signature profiles
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Show or change the settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args)]
struct CertificateArgs {
    /// software-store, token or trust-database
    #[arg(long, value_parser = parse_from_str::<CertificateSource>)]
    source: Option<CertificateSource>,
    /// Case-insensitive match on name, subject, issuer or serial
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    valid_only: bool,
    /// e.g. `digital-signature`
    #[arg(long, value_parser = parse_from_str::<KeyUsage>)]
    key_usage: Option<KeyUsage>,
}

#[derive(Args)]
struct SignArgs {
    input: PathBuf,
    /// SHA-256 fingerprint of the signing certificate
    #[arg(long)]
    fingerprint: String,
    /// Password or PIN
    #[arg(long, conflicts_with = "password_env")]
    password: Option<String>,
    /// Environment variable holding the password or PIN
    #[arg(long, value_name = "VAR")]
    password_env: Option<String>,
    /// Signature profile id (default profile when omitted)
    #[arg(long)]
    profile: Option<String>,
    /// Place a visible stamp on this 1-based page
    #[arg(long, requires_all = ["x", "y"])]
    page: Option<u32>,
    #[arg(long)]
    x: Option<f64>,
    #[arg(long)]
    y: Option<f64>,
    #[arg(long, default_value_t = 0.0)]
    width: f64,
    #[arg(long, default_value_t = 0.0)]
    height: f64,
}

#[derive(Subcommand)]
enum ProfileCommands {
    List,
    Show { id: String },
    Delete { id: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    Show,
    AddStore { directory: PathBuf },
    RemoveStore { directory: PathBuf },
    AddToken { library: PathBuf },
    RemoveToken { library: PathBuf },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            if err.is_credential_error() {
                ExitCode::from(3)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let config_path = cli
        .config
        .or_else(SettingsStore::default_path)
        .ok_or_else(|| Error::InvalidConfiguration("no configuration directory".to_owned()))?;
    let profiles_dir = match cli.profiles_dir {
        Some(dir) => dir,
        None => config_path
            .parent()
            .map(|dir| dir.join("profiles"))
            .ok_or_else(|| Error::InvalidConfiguration("no profile directory".to_owned()))?,
    };
    let settings = SettingsStore::open(config_path)?;
    let profiles = ProfileStore::new(profiles_dir);

    match cli.command {
        Commands::Config { command } => config_command(&settings, command),
        Commands::Profiles { command } => profile_command(&profiles, command),
        Commands::Certificates(args) => {
            certificates_command(&SigningService::new(settings.get(), profiles)?, args)
        }
        Commands::Sign(args) => sign_command(&SigningService::new(settings.get(), profiles)?, args),
        Commands::Verify { input } => {
            print_json(&SigningService::new(settings.get(), profiles)?.verify(&input)?)
        }
    }
}

fn certificates_command(service: &SigningService, args: CertificateArgs) -> Result<(), Error> {
    let filter = CertificateFilter {
        source: args.source,
        search: args.search,
        valid_only: args.valid_only,
        required_key_usage: args.key_usage,
    };
    print_json(&service.certificates(&filter)?)
}

fn sign_command(service: &SigningService, args: SignArgs) -> Result<(), Error> {
    let credential = match (args.password, args.password_env) {
        (Some(password), _) => password,
        (None, Some(var)) => std::env::var(&var).map_err(|_| {
            Error::InvalidConfiguration(format!("environment variable `{}` is not set", var))
        })?,
        (None, None) => String::new(),
    };
    let mut request = SigningRequest::new(args.input, &args.fingerprint, &credential);
    if let Some(profile) = args.profile {
        request = request.with_profile(&profile);
    }
    if let (Some(page), Some(x), Some(y)) = (args.page, args.x, args.y) {
        request = request.with_position(PositionOverride {
            page,
            x,
            y,
            width: args.width,
            height: args.height,
        });
    }
    let output = service.sign(&request)?;
    println!("{}", output.display());
    Ok(())
}

fn profile_command(profiles: &ProfileStore, command: ProfileCommands) -> Result<(), Error> {
    match command {
        ProfileCommands::List => print_json(&profiles.list()?),
        ProfileCommands::Show { id } => print_json(&profiles.get(&id)?),
        ProfileCommands::Delete { id } => profiles.delete(&id),
    }
}

fn config_command(settings: &SettingsStore, command: ConfigCommands) -> Result<(), Error> {
    match command {
        ConfigCommands::Show => print_json(&settings.get()),
        ConfigCommands::AddStore { directory } => {
            let added = settings.add_certificate_store(&directory)?;
            println!("{}", added.display());
            Ok(())
        }
        ConfigCommands::RemoveStore { directory } => settings.remove_certificate_store(&directory),
        ConfigCommands::AddToken { library } => {
            let added = settings.add_token_library(&library)?;
            println!("{}", added.display());
            Ok(())
        }
        ConfigCommands::RemoveToken { library } => settings.remove_token_library(&library),
    }
}

fn parse_from_str<T>(value: &str) -> Result<T, String>
where
    T: std::str::FromStr<Err = Error>,
{
    value.parse().map_err(|err: Error| err.to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definitions_are_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sign_arguments_parse_with_a_position() {
        let cli = Cli::try_parse_from([
            "pdf-sign", "sign", "a.pdf", "--fingerprint", "ab", "--page", "2", "--x", "10",
            "--y", "20",
        ])
        .unwrap();
        let Commands::Sign(args) = cli.command else {
            panic!("expected the sign subcommand");
        };
        assert_eq!(args.input, PathBuf::from("a.pdf"));
        assert_eq!((args.page, args.x, args.y), (Some(2), Some(10.0), Some(20.0)));
        assert_eq!((args.width, args.height), (0.0, 0.0));
    }

    #[test]
    fn page_without_coordinates_is_refused() {
        let parsed =
            Cli::try_parse_from(["pdf-sign", "sign", "a.pdf", "--fingerprint", "ab", "--page", "2"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn certificate_filters_parse() {
        let cli = Cli::try_parse_from(["pdf-sign", "certificates", "--valid-only", "--search", "rossi"])
            .unwrap();
        let Commands::Certificates(args) = cli.command else {
            panic!("expected the certificates subcommand");
        };
        assert!(args.valid_only);
        assert_eq!(args.search.as_deref(), Some("rossi"));
        assert!(args.source.is_none());
    }
}

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use profile_importer::config::{ConfigLoader, ImporterConfig};
use profile_importer::error::ProfileError;
use profile_importer::importer::{
    ImportOutput, ImportParams, LegacyImportParams, LegacyUpdateParams, ProfileImporter,
};
use profile_importer::workspace::{
    DataServiceHttpClient, ReportHttpClient, SampleServiceHttpClient,
};

#[derive(Parser)]
#[command(name = "profile-import")]
#[command(about = "Import functional profile tables into the object store")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Import a profile in the current single-category shape")]
    Import(ParamsArgs),
    #[command(about = "Import a nested community/organism batch (legacy shape)")]
    ImportLegacy(ParamsArgs),
    #[command(about = "Merge named profiles into a stored legacy object")]
    Update(ParamsArgs),
}

#[derive(Args)]
struct ParamsArgs {
    /// Path to a JSON file with the call parameters
    params: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(profile) = report.downcast_ref::<ProfileError>() {
            return ExitCode::from(map_exit_code(profile));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ProfileError) -> u8 {
    match error {
        ProfileError::MissingParameter(_)
        | ProfileError::InvalidParameter(_)
        | ProfileError::MissingConfig
        | ProfileError::ConfigRead(_)
        | ProfileError::ConfigParse(_) => 2,
        ProfileError::Workspace(_)
        | ProfileError::WorkspaceStatus { .. }
        | ProfileError::Staging(_)
        | ProfileError::SampleService(_)
        | ProfileError::Report(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;
    let importer = build_importer(&config).into_diagnostic()?;

    let output = match cli.command {
        Commands::Import(args) => {
            let params = read_params(&args.params)?;
            let params = ImportParams::from_value(&params).into_diagnostic()?;
            importer.import_profile(params).into_diagnostic()?
        }
        Commands::ImportLegacy(args) => {
            let params = read_params(&args.params)?;
            let params = LegacyImportParams::from_value(&params).into_diagnostic()?;
            importer.import_legacy(params).into_diagnostic()?
        }
        Commands::Update(args) => {
            let params = read_params(&args.params)?;
            let params = LegacyUpdateParams::from_value(&params).into_diagnostic()?;
            importer.update_legacy(params).into_diagnostic()?
        }
    };

    print_output(&output).into_diagnostic()?;
    Ok(())
}

fn build_importer(
    config: &ImporterConfig,
) -> Result<
    ProfileImporter<DataServiceHttpClient, SampleServiceHttpClient, ReportHttpClient>,
    ProfileError,
> {
    let workspace = DataServiceHttpClient::new(&config.callback_url, &config.token)?;
    let samples = SampleServiceHttpClient::new(&config.callback_url, &config.token)?;
    let report = ReportHttpClient::new(&config.callback_url, &config.token)?;
    Ok(ProfileImporter::new(
        workspace,
        samples,
        report,
        config.scratch.clone(),
    ))
}

fn read_params(path: &str) -> miette::Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| ProfileError::ConfigRead(path.to_string()))
        .into_diagnostic()?;
    serde_json::from_str(&content)
        .map_err(|err| ProfileError::InvalidParameter(err.to_string()))
        .into_diagnostic()
}

fn print_output(output: &ImportOutput) -> std::io::Result<()> {
    use std::io::Write;

    let json = serde_json::to_string_pretty(output)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
    let mut stdout = std::io::stdout();
    stdout.write_all(json.as_bytes())?;
    stdout.write_all(b"\n")?;
    Ok(())
}

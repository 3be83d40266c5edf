use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use xnatc::app::App;
use xnatc::config::{Config, ConfigLoader, DEFAULT_DOWNLOAD_RESOURCE, DEFAULT_XNAT};
use xnatc::domain::{DownloadFormat, MatchType};
use xnatc::error::XnatcError;
use xnatc::output::{ConsoleOutput, JsonOutput};
use xnatc::xnat::XnatHttpClient;

#[derive(Parser)]
#[command(name = "xnatc")]
#[command(about = "Command line interface to XNAT")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = DEFAULT_XNAT, help = "XNAT host URL")]
    xnat: String,

    #[arg(
        long,
        help = "XNAT user name. If not specified will use credentials from $HOME/.netrc"
    )]
    user: Option<String>,

    #[arg(
        long,
        help = "XNAT password. If not specified will use credentials from $HOME/.netrc"
    )]
    password: Option<String>,

    #[arg(long, help = "Project name/ID")]
    project: Option<String>,

    #[arg(long, help = "Subject name/ID")]
    subject: Option<String>,

    #[arg(long, help = "Experiment name/ID")]
    experiment: Option<String>,

    #[arg(long, help = "Scan ID")]
    scan: Option<String>,

    #[arg(long, help = "Assessor name/ID")]
    assessor: Option<String>,

    #[arg(long, help = "Download data to named directory")]
    download: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_DOWNLOAD_RESOURCE, help = "Name of resource type to download")]
    download_resource: String,

    #[arg(long, value_enum, default_value_t = DownloadFormat::Xnat, help = "Download format")]
    download_format: DownloadFormat,

    #[arg(long, help = "File or directory containing data to upload to a scan/assessor")]
    upload: Option<PathBuf>,

    #[arg(
        long,
        help = "Resource type for uploaded data - if not specified will try to autodetect from file type"
    )]
    upload_resource: Option<String>,

    #[arg(long, help = "Name to give uploaded data - defaults to file basename")]
    upload_name: Option<String>,

    #[arg(long, help = "File containing XML definition of assessor to create")]
    create_assessor: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = MatchType::Glob, help = "Type of matching")]
    match_type: MatchType,

    #[arg(
        long,
        help = "Allow subject/experiment/scan etc to be file names containing ID lists"
    )]
    match_files: bool,

    #[arg(long, help = "Enable debug mode")]
    debug: bool,

    #[arg(long, help = "Print a JSON summary instead of the hierarchy listing")]
    json: bool,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Config {
            xnat: cli.xnat,
            user: cli.user,
            password: cli.password,
            project: cli.project,
            subject: cli.subject,
            experiment: cli.experiment,
            scan: cli.scan,
            assessor: cli.assessor,
            match_type: cli.match_type,
            match_files: cli.match_files,
            download: cli.download,
            download_resource: cli.download_resource,
            download_format: cli.download_format,
            upload: cli.upload,
            upload_resource: cli.upload_resource,
            upload_name: cli.upload_name,
            create_assessor: cli.create_assessor,
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<XnatcError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &XnatcError) -> u8 {
    match error {
        XnatcError::InvalidPattern { .. }
        | XnatcError::InvalidHost(_)
        | XnatcError::MissingCredentials(_)
        | XnatcError::NetrcRead(_)
        | XnatcError::IncompleteUploadTarget => 2,
        XnatcError::XnatHttp(_) | XnatcError::XnatStatus { .. } | XnatcError::XnatResponse(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let json = cli.json;
    let resolved = ConfigLoader::resolve(Config::from(cli))?;
    let client = XnatHttpClient::new(&resolved.host, resolved.credentials.clone())?;
    let app = App::new(client, resolved);

    if json {
        let result = app.run(&JsonOutput)?;
        JsonOutput::print_run(&result).into_diagnostic()?;
    } else {
        let result = app.run(&ConsoleOutput)?;
        if !result.failures.is_empty() {
            eprintln!("{} item(s) failed, see warnings above", result.failures.len());
        }
    }
    Ok(())
}

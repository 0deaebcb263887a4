use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use trophy_core::ExportError;
use trophy_psn::GroupSelection;
use trophy_runner::{
    load_dotenv, run_page_export, run_psn_export, run_steam_export, ExportConfig, ExportSummary,
    PageRequest, PsnRequest, RenderMode, SteamRequest,
};

const DEFAULT_LOG_FILTER: &str = "trophy=info";

#[derive(Debug, Parser)]
#[command(name = "trophy-cli")]
#[command(about = "Export achievement and trophy lists to CSV")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract achievements from a rendered web page.
    Page(PageArgs),
    /// Resolve a PlayStation title and export its trophy list.
    Psn(PsnArgs),
    /// Export Steam schema metadata with global unlock percentages.
    Steam(SteamArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RenderArg {
    Http,
    Browserless,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GroupArg {
    All,
    Base,
}

#[derive(Debug, Args)]
struct PageArgs {
    #[arg(long)]
    url: String,
    /// Tried when the primary URL renders nothing usable.
    #[arg(long)]
    fallback_url: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = RenderArg::Http)]
    render: RenderArg,
    #[arg(long)]
    dump_html: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PsnArgs {
    #[arg(long, required_unless_present = "np_id")]
    query: Option<String>,
    /// NP communication id (NPWR12345_00); skips the title search.
    #[arg(long)]
    np_id: Option<String>,
    #[arg(long, value_enum, default_value_t = GroupArg::All)]
    group: GroupArg,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    dump_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SteamArgs {
    #[arg(long = "appid")]
    app_id: u32,
    #[arg(long, default_value = "english")]
    lang: String,
    #[arg(long)]
    out: Option<PathBuf>,
}

impl From<PageArgs> for PageRequest {
    fn from(args: PageArgs) -> Self {
        Self {
            url: args.url,
            fallback_url: args.fallback_url,
            out: args.out,
            render: match args.render {
                RenderArg::Http => RenderMode::Http,
                RenderArg::Browserless => RenderMode::Browserless,
            },
            dump_html: args.dump_html,
        }
    }
}

impl From<PsnArgs> for PsnRequest {
    fn from(args: PsnArgs) -> Self {
        Self {
            query: args.query,
            np_id: args.np_id,
            group: match args.group {
                GroupArg::All => GroupSelection::All,
                GroupArg::Base => GroupSelection::Base,
            },
            out: args.out,
            dump_dir: args.dump_dir,
        }
    }
}

impl From<SteamArgs> for SteamRequest {
    fn from(args: SteamArgs) -> Self {
        Self {
            app_id: args.app_id,
            lang: args.lang,
            out: args.out,
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands, config: &ExportConfig) -> Result<ExportSummary, ExportError> {
    match command {
        Commands::Page(args) => run_page_export(config, &args.into()).await,
        Commands::Psn(args) => run_psn_export(config, &args.into()).await,
        Commands::Steam(args) => run_steam_export(config, &args.into()).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    load_dotenv();
    init_tracing();
    let cli = Cli::parse();
    let config = ExportConfig::from_env();

    match run(cli.command, &config).await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                tool = summary.tool,
                target = %summary.target,
                "export finished"
            );
            println!(
                "export complete: tool={} rows={} output={}",
                summary.tool,
                summary.rows,
                summary.output.display()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "export failed");
            eprintln!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}

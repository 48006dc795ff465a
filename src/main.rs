//! Transit Quality - command-line dashboard over the service-quality CSV.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use transit_quality::data::{FilterCriteria, FilterOptions, LoadOptions, Selection, SourceEncoding};
use transit_quality::{report, Dashboard, DataSource, PipelineError};

const DEFAULT_SOURCE: &str = "indicateurs-qualite-service-parcours-voyageur.csv";

#[derive(Parser)]
#[command(name = "transit_quality")]
#[command(about = "Service-quality dashboard for public-transport indicators", long_about = None)]
struct Cli {
    /// Path to the `;`-delimited indicator export
    #[arg(short, long, env = "TRANSIT_QUALITY_SOURCE", default_value = DEFAULT_SOURCE)]
    source: PathBuf,

    /// Field separator
    #[arg(long, env = "TRANSIT_QUALITY_SEPARATOR", default_value_t = ';')]
    separator: char,

    /// Encodings to try, in order
    #[arg(
        long,
        env = "TRANSIT_QUALITY_ENCODINGS",
        value_delimiter = ',',
        default_value = "latin1,utf8"
    )]
    encoding: Vec<SourceEncoding>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct FilterArgs {
    /// Keep these years (repeatable); none keeps every year
    #[arg(short, long = "year")]
    years: Vec<i64>,

    /// Transport mode, or "Tous"
    #[arg(short, long, default_value = "Tous")]
    mode: String,

    /// Thematique, or "Toutes"
    #[arg(short, long, default_value = "Toutes")]
    thematique: String,
}

impl FilterArgs {
    fn criteria(&self) -> FilterCriteria {
        FilterCriteria::new()
            .years(self.years.iter().copied())
            .mode(Selection::from_choice(&self.mode))
            .thematique(Selection::from_choice(&self.thematique))
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Headline figures and the three views
    Summary {
        #[command(flatten)]
        filters: FilterArgs,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// List the selectable filter values
    Options,
    /// Print the filtered, normalized rows as CSV
    Table {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Re-render the summary periodically, reloading only when the file changes
    Watch {
        #[command(flatten)]
        filters: FilterArgs,

        /// Seconds between refreshes
        #[arg(short, long, default_value_t = 30)]
        interval: u64,

        /// Number of refreshes (0 = until interrupted)
        #[arg(short, long, default_value_t = 0)]
        cycles: usize,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        );
    tracing_subscriber::registry().with(stderr_layer).init();

    let cli = Cli::parse();
    let separator = u8::try_from(cli.separator).context("separator must be a single-byte character")?;
    let options = LoadOptions {
        separator,
        encodings: cli.encoding.clone(),
    };
    let mut source = DataSource::new(options);

    match run(&cli, &mut source) {
        Err(e) => match e.downcast_ref::<PipelineError>() {
            Some(pipeline) if pipeline.is_warning() => {
                warn!("{}", pipeline);
                Ok(())
            }
            _ => Err(e),
        },
        ok => ok,
    }
}

fn run(cli: &Cli, source: &mut DataSource) -> Result<()> {
    match &cli.command {
        Commands::Summary { filters, format } => {
            let table = source.prepare(&cli.source)?;
            let dashboard = Dashboard::build(&table, &filters.criteria())?;
            print_dashboard(&dashboard, *format)?;
        }
        Commands::Options => {
            let table = source.prepare(&cli.source)?;
            print!("{}", report::render_options(&FilterOptions::from_table(&table)));
        }
        Commands::Table { filters } => {
            let table = source.prepare(&cli.source)?;
            let dashboard = Dashboard::build(&table, &filters.criteria())?;
            let stdout = std::io::stdout();
            report::write_rows(&dashboard, stdout.lock()).context("failed to write rows")?;
        }
        Commands::Watch {
            filters,
            interval,
            cycles,
        } => {
            let criteria = filters.criteria();
            let mut cycle = 0usize;
            loop {
                let table = source.prepare(&cli.source)?;
                let dashboard = Dashboard::build(&table, &criteria)?;
                print_dashboard(&dashboard, OutputFormat::Text)?;
                info!(cycle, builds = source.builds(), "Refreshed");

                cycle += 1;
                if *cycles != 0 && cycle >= *cycles {
                    break;
                }
                std::thread::sleep(Duration::from_secs(*interval));
            }
        }
    }

    Ok(())
}

fn print_dashboard(dashboard: &Dashboard, format: OutputFormat) -> Result<()> {
    let rendered = match format {
        OutputFormat::Text => report::render_text(dashboard),
        OutputFormat::Json => report::render_json(dashboard).context("failed to serialize dashboard")?,
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", rendered)?;
    Ok(())
}

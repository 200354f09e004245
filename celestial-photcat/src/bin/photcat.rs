use anyhow::Context;
use celestial_photcat::io::{self, read_ldac, CatalogFormat};
use celestial_photcat::{Band, Catalog, MatchResult, PhotcatConfig};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Parser)]
#[command(name = "photcat")]
#[command(about = "Inspect, convert, transform and cross-match photometric catalogs")]
struct Cli {
    /// JSON configuration file (defaults apply otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print catalog metadata and fields
    Info {
        /// Catalog file (.ldac/.cat/.fits or .db/.sqlite)
        file: PathBuf,
    },
    /// Convert between FITS_LDAC and SQLite, chosen by extension
    Convert {
        input: PathBuf,
        output: PathBuf,
        /// FITS image the LDAC sources were extracted from
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Derive a band with a published filter transformation
    Transform {
        /// SQLite catalog
        db: PathBuf,
        /// Target band: B V R I, g r i z, Y Z J H K
        #[arg(long)]
        band: String,
        /// Write here instead of updating the input
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Cross-match two catalogs on sky position
    Match {
        a: PathBuf,
        b: PathBuf,
        /// Match radius in arcseconds
        #[arg(long, conflicts_with = "nearest")]
        tolerance_arcsec: Option<f64>,
        /// Pair each source with its nearest neighbour instead of using a radius
        #[arg(long)]
        nearest: bool,
        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => PhotcatConfig::from_json_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => PhotcatConfig::default(),
    };

    match cli.command {
        Commands::Info { file } => {
            let catalog = open(&file, &config)?;
            print_info(&catalog);
        }
        Commands::Convert { input, output, image } => {
            let catalog = match (CatalogFormat::from_path(&input)?, image) {
                (CatalogFormat::Ldac, Some(image)) => read_ldac(&input, Some(image.as_path()), &config.ldac)?
                    .with_context(|| format!("{} holds no sources", input.display()))?,
                _ => open(&input, &config)?,
            };
            let written = io::write_catalog(&catalog, &output, &config)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("{} sources written to {}", written, output.display());
        }
        Commands::Transform { db, band, output } => {
            let band: Band = band.parse()?;
            let mut catalog = io::read_database(&db, Default::default())
                .with_context(|| format!("reading {}", db.display()))?;
            let count = catalog.transform_filters(band, &config.transform)?;
            if count == 0 {
                anyhow::bail!("no sources of {} could be transformed to {}", catalog.name, band);
            }
            let target = output.unwrap_or(db);
            io::write_database(&catalog, &target)
                .with_context(|| format!("writing {}", target.display()))?;
            println!("{} sources transformed to {}, written to {}", count, band, target.display());
        }
        Commands::Match {
            a,
            b,
            tolerance_arcsec,
            nearest,
            format,
        } => {
            let this = open(&a, &config)?;
            let other = open(&b, &config)?;
            let tolerance = if nearest {
                None
            } else {
                tolerance_arcsec
                    .map(|arcsec| arcsec / 3600.0)
                    .or(config.matching.tolerance_deg)
            };
            let result = this.match_positions(&other, tolerance)?;

            match format {
                OutputFormat::Table => print_table(&result),
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Csv => print_csv(&result),
            }
        }
    }

    Ok(())
}

fn open(path: &Path, config: &PhotcatConfig) -> anyhow::Result<Catalog> {
    io::read_catalog(path, config).with_context(|| format!("reading {}", path.display()))
}

fn print_info(catalog: &Catalog) {
    let (rows, fields) = catalog.shape();
    println!("Name:       {}", catalog.name);
    if let Some(family) = catalog.family {
        println!("Survey:     {}", family);
    }
    println!("Origin:     {}", catalog.origin);
    println!("Magsys:     {}", catalog.magnitude_system);
    if let Some(obs) = catalog.observation {
        println!("Midtime:    JD {:.6} ({} s)", obs.mid_jd, obs.exposure);
    }
    if let Some(object) = &catalog.object_name {
        println!("Object:     {}", object);
    }
    println!("Sources:    {}", rows);
    println!("Fields:     {}", fields);
    for column in catalog.table().columns() {
        let unit = column.unit.map(|u| u.symbol()).unwrap_or("");
        println!("  {:<16} {:<6} {}", column.name, column.data.column_type(), unit);
    }
    if !catalog.history().is_empty() {
        println!("History:");
        for entry in catalog.history() {
            println!("  {}", entry);
        }
    }
}

struct MatchRow {
    index_a: usize,
    index_b: usize,
    ra_a: f64,
    dec_a: f64,
    ra_b: f64,
    dec_b: f64,
}

fn match_rows(result: &MatchResult) -> Vec<MatchRow> {
    let values = |column: Option<&celestial_photcat::Column>| {
        column.and_then(|c| c.data.to_floats()).unwrap_or_default()
    };
    let (ra_a, dec_a) = (values(result.this_column("ra_deg")), values(result.this_column("dec_deg")));
    let (ra_b, dec_b) = (values(result.other_column("ra_deg")), values(result.other_column("dec_deg")));

    result
        .pairs
        .iter()
        .enumerate()
        .map(|(k, &(index_a, index_b))| MatchRow {
            index_a,
            index_b,
            ra_a: ra_a[k],
            dec_a: dec_a[k],
            ra_b: ra_b[k],
            dec_b: dec_b[k],
        })
        .collect()
}

fn separation_arcsec(row: &MatchRow) -> f64 {
    let dra = (row.ra_a - row.ra_b) * row.dec_a.to_radians().cos();
    let ddec = row.dec_a - row.dec_b;
    (dra * dra + ddec * ddec).sqrt() * 3600.0
}

fn print_table(result: &MatchResult) {
    for (i, row) in match_rows(result).iter().enumerate() {
        println!(
            "{:5}: A[{:>6}] RA={:.6}° Dec={:+.6}°  B[{:>6}] RA={:.6}° Dec={:+.6}°  Sep={:.3}\"",
            i + 1,
            row.index_a,
            row.ra_a,
            row.dec_a,
            row.index_b,
            row.ra_b,
            row.dec_b,
            separation_arcsec(row)
        );
    }

    if result.is_empty() {
        println!("No matches found.");
    } else {
        println!("\nTotal matches: {}", result.len());
    }
}

#[derive(serde::Serialize)]
struct JsonMatch {
    index_a: usize,
    index_b: usize,
    ra_a: f64,
    dec_a: f64,
    ra_b: f64,
    dec_b: f64,
    separation_arcsec: f64,
}

fn print_json(result: &MatchResult) -> anyhow::Result<()> {
    let matches: Vec<JsonMatch> = match_rows(result)
        .iter()
        .map(|row| JsonMatch {
            index_a: row.index_a,
            index_b: row.index_b,
            ra_a: row.ra_a,
            dec_a: row.dec_a,
            ra_b: row.ra_b,
            dec_b: row.dec_b,
            separation_arcsec: separation_arcsec(row),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&matches)?);
    Ok(())
}

fn print_csv(result: &MatchResult) {
    println!("index_a,index_b,ra_a,dec_a,ra_b,dec_b,separation_arcsec");
    for row in match_rows(result) {
        println!(
            "{},{},{:.8},{:.8},{:.8},{:.8},{:.4}",
            row.index_a,
            row.index_b,
            row.ra_a,
            row.dec_a,
            row.ra_b,
            row.dec_b,
            separation_arcsec(&row)
        );
    }
}

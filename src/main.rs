use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use stand_projector::{
    coefficients,
    config::ControlSettings,
    engine::{ExecutionStep, ForwardProcessingEngine},
    io::{self, CsvFormat, JsonFormat, SnapshotWriter},
    visualization::{print_polygon_summary, print_projection_table, print_species_table},
};

#[derive(Parser)]
#[command(
    name = "stand-projector",
    about = "Forward growth projection for forest inventory polygons",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Project one or more polygons forward and write per-year snapshots
    Project {
        /// Path to a JSON file holding a polygon or an array of polygons
        #[arg(short, long)]
        input: PathBuf,

        /// Path to a TOML control-settings file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Snapshot output path; printed to the terminal when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Snapshot output format
        #[arg(short, long, value_enum, default_value = "csv")]
        format: OutputFormat,

        /// Project this many years, overriding the polygon's target year
        #[arg(short, long)]
        years: Option<u32>,
    },

    /// Run the pipeline up to a named step and dump the processing state
    Inspect {
        /// Path to a JSON polygon file
        #[arg(short, long)]
        input: PathBuf,

        /// Step to stop after (e.g. determine_polygon_rankings)
        #[arg(short, long)]
        step: String,
    },

    /// Display a quick summary of a polygon file
    Summary {
        /// Path to a JSON polygon file
        #[arg(short, long)]
        input: PathBuf,
    },
}

/// Per-polygon output path: unchanged for a single polygon, suffixed with
/// the polygon id otherwise.
fn polygon_output_path(base: &Path, polygon_id: &str, multiple: bool) -> PathBuf {
    if !multiple {
        return base.to_path_buf();
    }
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("snapshots");
    let ext = base.extension().and_then(|s| s.to_str()).unwrap_or("csv");
    base.with_file_name(format!("{stem}-{polygon_id}.{ext}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Project {
            input,
            config,
            output,
            format,
            years,
        } => {
            let settings = match config {
                Some(path) => ControlSettings::load(&path)?,
                None => ControlSettings::default(),
            };
            let store = coefficients::with_defaults();
            let engine = ForwardProcessingEngine::new(&store, settings);

            let mut polygons = io::read_polygons(&input)?;
            let multiple = polygons.len() > 1;

            for polygon in &mut polygons {
                if let Some(years) = years {
                    polygon.target_year = Some(polygon.reference_year + years as i32);
                }

                println!(
                    "\n{}",
                    format!("Projecting polygon {}", polygon.id).bold().cyan()
                );

                let result = engine.process_polygon(polygon)?;

                match &output {
                    Some(path) => {
                        let path = polygon_output_path(path, &result.polygon_id, multiple);
                        let writer: &dyn SnapshotWriter = match format {
                            OutputFormat::Csv => &CsvFormat,
                            OutputFormat::Json => &JsonFormat { pretty: true },
                        };
                        writer.write(&result, &path)?;
                        println!(
                            "{} Wrote {} snapshot years to {}",
                            "Success:".green().bold(),
                            result.snapshots.len(),
                            path.display()
                        );
                    }
                    None => {
                        print_projection_table(&result);
                        if let Some(last) = result.snapshots.last() {
                            print_species_table(last);
                        }
                    }
                }
            }
        }

        Commands::Inspect { input, step } => {
            let last_step: ExecutionStep = step.parse()?;
            let polygon = io::read_polygon(&input)?;
            let store = coefficients::with_defaults();
            let engine = ForwardProcessingEngine::new(&store, ControlSettings::default());

            let (result, state) = engine.run_to_step(&polygon, last_step)?;

            println!(
                "\n{}",
                format!("State after {}", last_step.name()).bold().cyan()
            );
            println!("{}", "=".repeat(50));
            println!("  Polygon:            {}", polygon.id);
            println!("  Species retained:   {}", state.start.n_species());
            match state.primary_species_index() {
                Ok(i) => println!("  Primary species:    {}", state.start.species_names[i]),
                Err(_) => println!("  Primary species:    not determined"),
            }
            match state.secondary_species_index() {
                Some(i) => println!("  Secondary species:  {}", state.start.species_names[i]),
                None => println!("  Secondary species:  none"),
            }
            match state.inventory_type_group() {
                Ok(itg) => println!("  Inventory group:    {itg}"),
                Err(_) => println!("  Inventory group:    not determined"),
            }
            match state.primary_species_details() {
                Ok(details) => {
                    println!("  Dominant height:    {:.1} m", details.dominant_height);
                    println!("  Site index:         {:.1}", details.site_index);
                    println!("  Total age:          {:.0} y", details.total_age);
                    println!("  Site curve:         {}", details.site_curve);
                }
                Err(_) => println!("  Primary details:    not derived"),
            }
            println!(
                "  Compatibility:      {}",
                if state.compatibility_variables().is_ok() {
                    "set"
                } else {
                    "not set"
                }
            );
            println!("  Snapshot years:     {}", result.snapshots.len());
        }

        Commands::Summary { input } => {
            let polygon = io::read_polygon(&input)?;
            print_polygon_summary(&polygon);
        }
    }

    Ok(())
}

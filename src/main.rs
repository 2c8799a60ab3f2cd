#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use csv::WriterBuilder;
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::process;

use lpspline::data::{FeatureSource, load_table};
use lpspline::model::{FittedModel, ModelSpec};

#[derive(Args)]
pub struct FitArgs {
    /// TOML model specification (splines, constraints, penalties, solver settings)
    #[arg(long, value_name = "SPEC")]
    pub config: PathBuf,

    /// Training TSV file with a header row
    #[arg(long, value_name = "TSV")]
    pub data: PathBuf,

    /// Name of the target column in the training data
    #[arg(long, default_value = "y")]
    pub target: String,

    /// Where to write the fitted model
    #[arg(long, default_value = "model.toml")]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct PredictArgs {
    /// Fitted model written by `lpspline fit`
    #[arg(long, value_name = "MODEL")]
    pub model: PathBuf,

    /// TSV file with every feature column the model uses
    #[arg(long, value_name = "TSV")]
    pub data: PathBuf,

    /// Also write one column per spline, named by tag
    #[arg(long)]
    pub components: bool,

    /// Where to write the predictions
    #[arg(long, default_value = "predictions.tsv")]
    pub output: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "lpspline",
    about = "Additive spline regression with shape constraints",
    long_about = "Fits additive models whose terms are constrained splines (monotonic, \
                  convex, concave, anchored; ridge and lasso penalties) by solving one \
                  convex quadratic program, and applies fitted models to new data."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a model specification to training data
    #[command(about = "Fit a model (outputs: model.toml)")]
    Fit(FitArgs),

    /// Apply a fitted model to new data
    #[command(about = "Apply a fitted model to new data (outputs: predictions.tsv)")]
    Predict(PredictArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Fit(args)) => fit(args),
        Some(Commands::Predict(args)) => predict(args),
        None => Cli::command()
            .print_help()
            .map(|_| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

pub fn fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model specification from: {}", args.config.display());
    let spec = ModelSpec::load(&args.config)?;
    let mut regressor = spec.build()?;

    let data = load_table(&args.data)?;
    let y = data.feature(&args.target)?;
    println!("Loaded {} samples for fitting", y.len());

    let status = regressor.fit(&data, y.view(), &spec.solver())?;
    println!("{}", regressor.summary());
    if !status.is_optimal() {
        return Err(format!("fit did not reach an optimal solution (status: {status})").into());
    }

    FittedModel::from_regressor(&regressor)?.save(&args.output)?;
    println!("Model saved to: {}", args.output.display());
    Ok(())
}

pub fn predict(args: PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", args.model.display());
    let regressor = FittedModel::load(&args.model)?.to_regressor()?;

    let data = load_table(&args.data)?;
    let components = regressor.predict_components(&data)?;
    let tags: Vec<&str> = regressor.splines().iter().map(|s| s.tag()).collect();

    write_predictions(&args.output, &components, &tags, args.components)?;
    println!(
        "Wrote {} predictions to: {}",
        components.nrows(),
        args.output.display()
    );
    Ok(())
}

/// Tab-separated `prediction` column, optionally followed by one column per spline.
fn write_predictions(
    path: &Path,
    components: &Array2<f64>,
    tags: &[&str],
    with_components: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut wtr = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)?;

    let mut header = vec!["prediction"];
    if with_components {
        header.extend_from_slice(tags);
    }
    wtr.write_record(&header)?;

    for row in components.rows() {
        let mut record = vec![format!("{:.12}", row.sum())];
        if with_components {
            record.extend(row.iter().map(|v| format!("{v:.12}")));
        }
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

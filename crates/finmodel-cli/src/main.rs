//! finmodel CLI - inspect and evaluate financial model catalogs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use finmodel::prelude::*;
use finmodel::{FormulaKind, RegistryStatistics};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "finmodel")]
#[command(
    author,
    version,
    about = "Inspect and evaluate renewable-energy financial model catalogs"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show catalog statistics
    Stats {
        /// Catalog JSON file (default: built-in catalog)
        #[arg(short, long)]
        catalog: Option<PathBuf>,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a catalog and report every configuration problem
    Check {
        /// Catalog JSON file (default: built-in catalog)
        #[arg(short, long)]
        catalog: Option<PathBuf>,
    },

    /// Evaluate every computed field against a form data file
    #[command(alias = "eval")]
    Evaluate {
        /// Form data JSON file (field id or alias -> value)
        form_data: PathBuf,

        /// Catalog JSON file (default: built-in catalog)
        #[arg(short, long)]
        catalog: Option<PathBuf>,

        /// Evaluate every case lookup for this case (0-based)
        #[arg(long)]
        case: Option<i64>,

        /// Never substitute declared defaults for failed fields
        #[arg(long)]
        strict: bool,

        /// Output JSON file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Classify a single formula and list its operands
    Classify {
        /// Formula text, e.g. "= EDATE( F32, F37 + F40 ) - 1"
        formula: String,
    },

    /// List catalog fields
    Fields {
        /// Catalog JSON file (default: built-in catalog)
        #[arg(short, long)]
        catalog: Option<PathBuf>,

        /// Only fields of this type (input, calculated, formula, named_cell).
        /// Required fields are marked with '*'.
        #[arg(short = 't', long = "type")]
        field_type: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Stats { catalog, json } => show_stats(catalog.as_deref(), json),
        Commands::Check { catalog } => check(catalog.as_deref()),
        Commands::Evaluate {
            form_data,
            catalog,
            case,
            strict,
            output,
        } => {
            let mut options = EvaluationOptions::new();
            if let Some(case) = case {
                options = options.with_case(case);
            }
            if strict {
                options = options.strict();
            }
            evaluate_form(catalog.as_deref(), &form_data, &options, output.as_deref())
        }
        Commands::Classify { formula } => classify_formula(&formula),
        Commands::Fields {
            catalog,
            field_type,
        } => list_fields(catalog.as_deref(), field_type.as_deref()),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

/// Owned catalog loaded from a file, or the shared built-in one
enum Catalog {
    File(Registry),
    Builtin(&'static Registry),
}

impl std::ops::Deref for Catalog {
    type Target = Registry;

    fn deref(&self) -> &Registry {
        match self {
            Catalog::File(registry) => registry,
            Catalog::Builtin(registry) => registry,
        }
    }
}

fn load_catalog(path: Option<&Path>) -> Result<Catalog> {
    match path {
        Some(path) => {
            log::info!("Loading catalog '{}'", path.display());
            let registry = Registry::from_path(path)
                .with_context(|| format!("Failed to load catalog '{}'", path.display()))?;
            Ok(Catalog::File(registry))
        }
        None => {
            let registry = Registry::builtin().context("Failed to load the built-in catalog")?;
            Ok(Catalog::Builtin(registry))
        }
    }
}

fn show_stats(catalog: Option<&Path>, json: bool) -> Result<()> {
    let registry = load_catalog(catalog)?;
    let stats: RegistryStatistics = registry.compute_statistics();

    if json {
        let text = serde_json::to_string_pretty(&stats).context("Failed to serialize statistics")?;
        println!("{}", text);
    } else {
        println!("{}", stats);
    }

    Ok(())
}

fn check(catalog: Option<&Path>) -> Result<()> {
    let result = match catalog {
        Some(path) => Registry::from_path(path).map(Catalog::File),
        None => Registry::builtin().map(Catalog::Builtin),
    };

    match result {
        Ok(registry) => {
            println!(
                "OK: {} fields in {} sections, {} computed",
                registry.len(),
                registry.sections().len(),
                registry.evaluation_order().len()
            );
            Ok(())
        }
        Err(Error::Config(errors)) => {
            for error in &errors {
                eprintln!("error: {}", error);
            }
            bail!("catalog has {} configuration error(s)", errors.len())
        }
        Err(e) => Err(e).context("Failed to load catalog"),
    }
}

fn evaluate_form(
    catalog: Option<&Path>,
    form_path: &Path,
    options: &EvaluationOptions,
    output: Option<&Path>,
) -> Result<()> {
    let registry = load_catalog(catalog)?;

    let text = std::fs::read_to_string(form_path)
        .with_context(|| format!("Failed to read '{}'", form_path.display()))?;
    let form: FormData = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse form data '{}'", form_path.display()))?;

    let evaluation = registry.evaluate_with_options(&form, options);
    for issue in &evaluation.issues {
        log::warn!("{}: {}", issue.field_id, issue.message());
    }

    let json = serde_json::to_string_pretty(&evaluation).context("Failed to serialize evaluation")?;
    if let Some(output_path) = output {
        std::fs::write(output_path, &json)
            .with_context(|| format!("Failed to write '{}'", output_path.display()))?;
        eprintln!(
            "Wrote {} values ({} issues) to '{}'",
            evaluation.values.len(),
            evaluation.issues.len(),
            output_path.display()
        );
    } else {
        let mut stdout = io::stdout();
        writeln!(stdout, "{}", json).context("Failed to write to stdout")?;
    }

    Ok(())
}

fn classify_formula(formula: &str) -> Result<()> {
    let classification = classify(formula);

    println!("Kind: {}", classification.tag());
    match &classification.kind {
        FormulaKind::IndexedLookup { range, selector } => {
            println!("Cases: {} ({} columns)", range, range.width());
            println!("Selector: {}", selector);
        }
        FormulaKind::DateOffset { day_offset, .. } if *day_offset != 0 => {
            println!("Day offset: {:+}", day_offset);
        }
        FormulaKind::Unrecognized { reason } => {
            println!("Reason: {}", reason);
        }
        _ => {}
    }

    if !classification.operands.is_empty() {
        let operands: Vec<String> = classification
            .operands
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("Operands: {}", operands.join(", "));
    }

    Ok(())
}

fn list_fields(catalog: Option<&Path>, field_type: Option<&str>) -> Result<()> {
    let registry = load_catalog(catalog)?;

    let fields = match field_type {
        Some(name) => registry.list_by_type(name.parse::<FieldType>()?),
        None => registry.fields().iter().collect(),
    };

    for field in fields {
        let row = field.row.map(|r| r.to_string()).unwrap_or_default();
        let alias = field.named_cell.as_deref().unwrap_or("");
        let unit = field.unit.as_deref().unwrap_or("");
        let required = if field.is_required() { "*" } else { "" };
        let formula = field.formula.as_deref().unwrap_or("");
        println!(
            "{}{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            field.id, required, row, field.field_type, field.data_type, unit, alias, field.name, formula
        );
        if let Some(description) = &field.description {
            println!("\t{}", description);
        }
    }

    Ok(())
}

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::eval::{DEFAULT_EVAL_K, DEFAULT_PREDICTION_TOP_K};
use crate::recommender::SortOrder;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Numbered list with scores
    #[default]
    Table,
    Json,
    Csv,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Recommend assessments for a free-text query
    Recommend {
        /// Job description or hiring need
        query: String,

        /// Number of ranked results before filtering.
        /// Defaults to `default_top_k` from config.yaml
        #[clap(short = 'k', long, allow_negative_numbers = true)]
        top_k: Option<i64>,

        /// Drop results scoring below this value
        #[clap(short = 's', long)]
        min_score: Option<f32>,

        /// Keep only this test type. Can be repeated.
        #[clap(short = 't', long = "type")]
        types: Vec<String>,

        #[clap(long, value_enum, default_value_t = SortOrder::Score)]
        sort: SortOrder,

        #[clap(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Write the best url for every query of a CSV or spreadsheet file
    Predict {
        /// CSV or .xlsx with a `query` column
        #[clap(short, long)]
        input: PathBuf,

        /// Output CSV (query, recommended_assessment_url)
        #[clap(short, long, default_value = "predictions.csv")]
        output: PathBuf,

        #[clap(short = 'k', long, default_value_t = DEFAULT_PREDICTION_TOP_K)]
        top_k: usize,
    },

    /// Measure Recall@k over a labelled CSV or .xlsx (query, assessment_url)
    Evaluate {
        #[clap(short, long)]
        dataset: PathBuf,

        #[clap(short, long, default_value_t = DEFAULT_EVAL_K)]
        k: usize,
    },

    /// Generate the catalog CSV.
    /// Without --from a built-in list of products is used.
    BuildCatalog {
        /// Raw export (CSV or .xlsx) with "Assessment Name" and "Assessment URL" columns
        #[clap(long)]
        from: Option<PathBuf>,

        /// Where to write the catalog. Defaults to `catalog_path` from config.yaml
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Build the embedding cache if missing
    Index {
        /// Re-embed the catalog even when a valid cache exists
        #[clap(long, default_value = "false")]
        force: bool,
    },

    /// Start the HTTP API
    Serve {
        /// Address to bind. Defaults to `listen` from config.yaml
        #[clap(short, long)]
        listen: Option<String>,
    },
}

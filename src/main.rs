use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod catalog;
mod catalog_builder;
mod cli;
mod config;
mod eval;
mod recommender;
mod storage;
mod table;
#[cfg(test)]
mod tests;
mod web;

use cli::{Command, OutputFormat};
use config::Config;
use recommender::{clamp_top_k, RecommendOptions, Recommendation, RecommendationEngine};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let config = Config::load_with(config::default_base_path()?)?;

    match args.command {
        Command::Recommend {
            query,
            top_k,
            min_score,
            types,
            sort,
            format,
        } => {
            let engine = RecommendationEngine::open(&config)?;

            let options = RecommendOptions::new(
                top_k.map(clamp_top_k).unwrap_or(config.default_top_k),
            )
            .with_min_score(min_score.unwrap_or(config.default_min_score))
            .with_types(types)
            .with_sort(sort);

            let results = engine.recommend_with(&query, &options)?;
            print_results(&results, format)
        }

        Command::Predict {
            input,
            output,
            top_k,
        } => {
            let queries = eval::read_queries(&input)?;
            let engine = RecommendationEngine::open(&config)?;
            let predictions = eval::predict(&engine, &queries, top_k)?;
            eval::write_predictions(&output, &predictions)?;

            println!(
                "Saved {} predictions to {}",
                predictions.len(),
                output.display()
            );
            Ok(())
        }

        Command::Evaluate { dataset, k } => {
            let labeled = eval::read_labeled_queries(&dataset)?;
            let engine = RecommendationEngine::open(&config)?;
            let report = eval::evaluate(&engine, &labeled, k)?;

            println!("Total queries: {}", report.total);
            println!("Valid queries (present in catalog): {}", report.valid);
            println!("Hits: {}", report.hits);
            println!("Mean Recall@{}: {:.4}", report.k, report.recall());
            Ok(())
        }

        Command::BuildCatalog { from, output } => {
            let records = match &from {
                Some(path) => catalog_builder::import_export(path)?,
                None => catalog_builder::static_catalog(),
            };
            let output = output.unwrap_or_else(|| config.catalog_path());
            write_catalog(&output, &records)
        }

        Command::Index { force } => {
            let engine = RecommendationEngine::open(&config)?;
            let status = engine.reindex(force)?;

            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }

        Command::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| config.listen.clone());
            let engine = RecommendationEngine::shared(&config);
            if let Err(e) = &engine {
                log::error!("recommendation engine failed to start: {e}");
            }

            let state =
                web::SharedState::new(engine, config.default_top_k, config.default_min_score);
            web::start_daemon(state, listen)
        }
    }
}

fn print_results(results: &[Recommendation], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            if results.is_empty() {
                println!("No recommendations found");
            }
            for (idx, r) in results.iter().enumerate() {
                match &r.test_type {
                    Some(test_type) => println!(
                        "{}. {} [{}] ({:.3})",
                        idx + 1,
                        r.assessment_name,
                        test_type,
                        r.score
                    ),
                    None => println!("{}. {} ({:.3})", idx + 1, r.assessment_name, r.score),
                }
                println!("   {}", r.url);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(results)?),
        OutputFormat::Csv => recommender::write_csv(std::io::stdout().lock(), results)?,
    }
    Ok(())
}

fn write_catalog(output: &Path, records: &[catalog::CatalogRecord]) -> anyhow::Result<()> {
    catalog::write_catalog(output, records)
        .with_context(|| format!("could not write {}", output.display()))?;

    println!("Saved {} assessments to {}", records.len(), output.display());
    Ok(())
}

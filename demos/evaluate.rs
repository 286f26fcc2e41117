//! Cross-evaluate a condensed graph
//!
//! Loads an evaluation config and a dataset bundle, then trains every model
//! family on the synthetic graph found in `synthetic_dir` and scores it on the
//! real graph.
//!
//! Run with:
//! ```bash
//! RUST_LOG=info cargo run --example evaluate -- configs/cora.json data/cora.safetensors
//! RUST_LOG=info cargo run --example evaluate -- configs/cora.json data/cora.safetensors --family SGC
//! ```

use graph_condense_eval::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: evaluate <config.json> <dataset.safetensors> [--family SGC|SGCRich|MLP]");
        std::process::exit(2);
    }
    let config = EvalConfig::from_json_file(&args[1])?;
    let family = args
        .iter()
        .position(|a| a == "--family")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.parse::<ModelFamily>())
        .transpose()?;

    let device = best_device();
    let dataset = GraphDataset::load(config.dataset.clone(), &args[2], &device)?;
    let nruns = config.nruns;
    let evaluator = Evaluator::new(dataset, config, device)?;

    println!(
        "{}: {} synthetic nodes at rate {}",
        evaluator.config().dataset,
        evaluator.nnodes_syn(),
        evaluator.config().reduction_rate
    );

    if let Some(family) = family {
        let outcome = evaluator.evaluate(family, true)?;
        println!("{:<8} {:?}", family.to_string(), outcome.to_vec());
        return Ok(());
    }

    let results = evaluator.evaluate_cross(nruns)?;
    println!("\n{:<8} {:>24} {:>24}", "model", "mean [test, train]", "std");
    for (family, stats) in &results {
        let fmt = |v: &[f64]| {
            v.iter()
                .map(|x| format!("{:.4}", x))
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!(
            "{:<8} {:>24} {:>24}",
            family.to_string(),
            format!("[{}]", fmt(&stats.mean)),
            format!("[{}]", fmt(&stats.std))
        );
    }
    Ok(())
}

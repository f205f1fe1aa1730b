use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lcautomate::checkpoint::CheckpointStore;
use lcautomate::cli::{CalculationArgs, Cli, Command, StageArgs};
use lcautomate::ipc::IpcClient;
use lcautomate::pipeline::calculation::CalculationOptions;
use lcautomate::pipeline::{self, StageContext};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Model(args) => run_stage(&args, pipeline::model::run),
        Command::ProcessHierarchy(args) => run_stage(&args, pipeline::hierarchy::run),
        Command::ProductSystem(args) => run_stage(&args, pipeline::product_system::run),
        Command::Calculation(args) => run_calculation(&args),
    }
}

fn run_stage(
    args: &StageArgs,
    stage: fn(&StageContext<'_>, bool) -> Result<()>,
) -> Result<()> {
    let (client, store) = prepare(args)?;
    let ctx = StageContext {
        service: &client,
        store: &store,
        root: &args.input_root_folder,
    };
    stage(&ctx, args.restart)
}

fn run_calculation(args: &CalculationArgs) -> Result<()> {
    let (client, store) = prepare(&args.stage)?;
    let ctx = StageContext {
        service: &client,
        store: &store,
        root: &args.stage.input_root_folder,
    };
    let options = CalculationOptions {
        kind: args.calculation_type,
        impact_method: args.impact_assessment_method.clone(),
        iterations: args.number_of_iterations,
    };
    pipeline::calculation::run(&ctx, args.stage.restart, &options)
}

fn prepare(args: &StageArgs) -> Result<(IpcClient, CheckpointStore)> {
    if !args.input_root_folder.is_dir() {
        bail!(
            "input root folder {} is not a directory",
            args.input_root_folder.display()
        );
    }
    Ok((
        IpcClient::new(args.endpoint.clone()),
        CheckpointStore::new(&args.input_root_folder),
    ))
}

//! Command line surface. One subcommand per pipeline stage, all sharing the
//! input root, restart, and endpoint arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::schema::CalculationKind;

#[derive(Parser, Debug)]
#[command(
    name = "lcautomate",
    about = "Replicate LCA process templates per data column and run calculations",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read the driver and replication tables and record the template model
    Model(StageArgs),
    /// Materialize the replica hierarchy in the modeling database
    ProcessHierarchy(StageArgs),
    /// Create one product system per data column
    ProductSystem(StageArgs),
    /// Calculate the recorded product systems and export the results
    Calculation(CalculationArgs),
}

#[derive(Args, Debug)]
pub struct StageArgs {
    /// Folder holding the driver file, the replication tables, and the
    /// recorded state
    #[arg(short = 'i', long)]
    pub input_root_folder: PathBuf,

    /// Undo this operation's recorded output before running it
    #[arg(short = 'r', long)]
    pub restart: bool,

    /// Modeling service endpoint
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub endpoint: String,
}

#[derive(Args, Debug)]
pub struct CalculationArgs {
    #[command(flatten)]
    pub stage: StageArgs,

    /// Kind of calculation to run
    #[arg(long, value_enum, default_value = "upstream")]
    pub calculation_type: CalculationKind,

    /// Name of the impact assessment method
    #[arg(long, default_value = "CML-IA baseline")]
    pub impact_assessment_method: String,

    /// Monte Carlo iterations per data column
    #[arg(long, default_value_t = 10)]
    pub number_of_iterations: u32,
}

//! Calculation stage: run the chosen calculation per data column against the
//! recorded product system and write the result details as JSON artifacts
//! under `__calculation__/<kind>/<method>/`. Monte Carlo runs step a
//! simulator session and export every iteration separately.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::ipc::{ExportKind, ModelType, ResultRef};
use crate::model::{ArtifactFiles, Checkpoint};
use crate::pipeline::{hierarchy, StageContext};
use crate::schema::{CalculationKind, CalculationSetup, Ref, PHYSICAL_ALLOCATION};

const OUTPUT_DIRNAME: &str = "__calculation__";

#[derive(Debug, Clone)]
pub struct CalculationOptions {
    pub kind: CalculationKind,
    pub impact_method: String,
    pub iterations: u32,
}

pub fn run(ctx: &StageContext<'_>, restart: bool, options: &CalculationOptions) -> Result<()> {
    let mut checkpoint = hierarchy::load(ctx)?;
    if restart {
        reset(ctx, &mut checkpoint, options)?;
    }

    let output_dir = ctx
        .root
        .join(OUTPUT_DIRNAME)
        .join(options.kind.wire_name())
        .join(&options.impact_method);
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;
    prune_stray_files(&checkpoint, options, &output_dir);

    let root_id = checkpoint.top_level_process_id.clone();
    let scenarios = checkpoint
        .root()
        .ok_or_else(|| anyhow!("the recorded model has no top-level process"))?
        .tables
        .scenario_names
        .clone();

    for scenario in scenarios {
        let node = checkpoint
            .root()
            .ok_or_else(|| anyhow!("the recorded model has no top-level process"))?;
        let record = &node.scenarios[&scenario];
        if record
            .calculation_files_for(options.kind.wire_name(), &options.impact_method)
            .is_some()
        {
            debug!(%scenario, "calculation already recorded");
            continue;
        }
        let Some(system_id) = record.product_system_id.clone() else {
            bail!(
                "no product system recorded for data column '{scenario}'; \
                 run the product-system operation first"
            );
        };
        let setup = build_setup(ctx, options, &system_id)?;
        let base = node.replica_name(&scenario);

        let files = if options.kind.is_monte_carlo() {
            simulate(ctx, &setup, &output_dir, &base, options.iterations)?
        } else {
            calculate_once(ctx, &setup, &output_dir, &base)?
        };
        info!(%scenario, artifacts = files.len(), "calculation exported");

        let record = checkpoint
            .template_processes
            .get_mut(&root_id)
            .and_then(|node| node.scenarios.get_mut(&scenario))
            .ok_or_else(|| anyhow!("data column '{scenario}' vanished from the checkpoint"))?;
        record.record_calculation_files(options.kind.wire_name(), &options.impact_method, files);
        ctx.store.save(&checkpoint)?;
    }
    Ok(())
}

fn build_setup(
    ctx: &StageContext<'_>,
    options: &CalculationOptions,
    system_id: &str,
) -> Result<CalculationSetup> {
    let impact_method = ctx
        .service
        .find_descriptor(ModelType::ImpactMethod, &options.impact_method)?
        .ok_or_else(|| {
            anyhow!(
                "impact assessment method '{}' was not found in the modeling database",
                options.impact_method
            )
        })?;
    let product_system = ctx
        .service
        .get_product_system(system_id)?
        .map(|system| Ref::new(system_id, system.name))
        .with_context(|| {
            format!(
                "recorded product system {system_id} no longer exists; \
                 rerun the product-system operation with --restart"
            )
        })?;
    Ok(CalculationSetup {
        calculation_type: options.kind.wire_name(),
        allocation_method: PHYSICAL_ALLOCATION,
        impact_method,
        product_system,
        amount: 1.0,
        with_costs: false,
    })
}

fn calculate_once(
    ctx: &StageContext<'_>,
    setup: &CalculationSetup,
    output_dir: &Path,
    base: &str,
) -> Result<ArtifactFiles> {
    let result = ctx.service.calculate(setup)?;
    let exported = export_artifacts(ctx, &result, output_dir, base);
    dispose(ctx, &result);
    exported
}

/// One simulator session, stepped once per iteration; every iteration gets
/// its own artifact set labeled with the iteration number.
fn simulate(
    ctx: &StageContext<'_>,
    setup: &CalculationSetup,
    output_dir: &Path,
    base: &str,
    iterations: u32,
) -> Result<ArtifactFiles> {
    let simulator = ctx.service.open_simulator(setup)?;
    let mut files = BTreeMap::new();
    let outcome = (|| {
        for iteration in 1..=iterations {
            let result = match ctx.service.next_simulation(&simulator) {
                Ok(result) => result,
                Err(err) => return Err(err.into()),
            };
            let exported =
                export_artifacts(ctx, &result, output_dir, &format!("{base} - {iteration}"));
            dispose(ctx, &result);
            for (label, path) in exported? {
                files.insert(format!("{label} - {iteration}"), path);
            }
        }
        Ok(())
    })();
    dispose(ctx, &simulator);
    outcome.map(|()| files)
}

/// Fetch and write the four result details. Total impacts come first since
/// the per-category details are derived from them.
fn export_artifacts(
    ctx: &StageContext<'_>,
    result: &ResultRef,
    output_dir: &Path,
    base: &str,
) -> Result<ArtifactFiles> {
    let mut files = BTreeMap::new();
    let total_impacts = ctx.service.fetch_result_detail(ExportKind::TotalImpacts, result)?;

    let mut write = |kind: ExportKind, payload: &Value| -> Result<()> {
        let suffix = kind.file_suffix();
        let path = output_dir.join(format!("{base}-result-{suffix}.json"));
        let data = serde_json::to_string_pretty(payload)
            .with_context(|| format!("encoding {suffix} detail"))?;
        fs::write(&path, data).with_context(|| format!("writing {}", path.display()))?;
        files.insert(suffix.to_string(), path);
        Ok(())
    };

    write(ExportKind::TotalImpacts, &total_impacts)?;
    let upstream = ctx.service.derive_result_detail(
        ExportKind::UpstreamOfImpactCategory,
        result,
        &total_impacts,
    )?;
    write(ExportKind::UpstreamOfImpactCategory, &upstream)?;
    let total_flows = ctx.service.fetch_result_detail(ExportKind::TotalFlows, result)?;
    write(ExportKind::TotalFlows, &total_flows)?;
    let flows = ctx.service.derive_result_detail(
        ExportKind::FlowsOfImpactCategory,
        result,
        &total_impacts,
    )?;
    write(ExportKind::FlowsOfImpactCategory, &flows)?;
    Ok(files)
}

fn dispose(ctx: &StageContext<'_>, result: &ResultRef) {
    if let Err(err) = ctx.service.dispose(result) {
        warn!(id = %result.id, "could not dispose result: {err}");
    }
}

/// Files in the output directory that no scenario records for this kind and
/// method are leftovers of an interrupted export; they would otherwise sit
/// next to fresh artifacts indistinguishably.
fn prune_stray_files(checkpoint: &Checkpoint, options: &CalculationOptions, output_dir: &Path) {
    let recorded: Vec<PathBuf> = checkpoint
        .root()
        .map(|node| {
            node.scenarios
                .values()
                .filter_map(|record| {
                    record.calculation_files_for(options.kind.wire_name(), &options.impact_method)
                })
                .flat_map(|files| files.values().cloned())
                .collect()
        })
        .unwrap_or_default();
    let entries = match fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("could not scan {}: {err}", output_dir.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && !recorded.contains(&path) {
            warn!("removing stray file {}", path.display());
            if let Err(err) = fs::remove_file(&path) {
                warn!("could not remove {}: {err}", path.display());
            }
        }
    }
}

/// Forget this kind and method's recorded artifacts and remove their files.
fn reset(
    ctx: &StageContext<'_>,
    checkpoint: &mut Checkpoint,
    options: &CalculationOptions,
) -> Result<()> {
    info!(
        kind = options.kind.wire_name(),
        method = %options.impact_method,
        "restart requested, discarding recorded calculations"
    );
    let root_id = checkpoint.top_level_process_id.clone();
    if let Some(node) = checkpoint.template_processes.get_mut(&root_id) {
        for record in node.scenarios.values_mut() {
            let Some(files) =
                record.clear_calculation_files(options.kind.wire_name(), &options.impact_method)
            else {
                continue;
            };
            for path in files.values() {
                match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                        debug!("artifact {} was already gone", path.display());
                    }
                    Err(err) => warn!("could not remove {}: {err}", path.display()),
                }
            }
        }
    }
    ctx.store.save(checkpoint)?;
    Ok(())
}

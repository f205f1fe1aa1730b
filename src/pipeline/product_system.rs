//! Product system stage: build one product system per data column from the
//! top-level replica. Linking prefers default providers, so the rewritten
//! references pull in the whole replica hierarchy.

use anyhow::{anyhow, bail, Result};
use tracing::{debug, info, warn};

use crate::ipc::ModelType;
use crate::model::Checkpoint;
use crate::pipeline::{hierarchy, StageContext};

pub fn run(ctx: &StageContext<'_>, restart: bool) -> Result<()> {
    let mut checkpoint = hierarchy::load(ctx)?;
    if restart {
        reset(ctx, &mut checkpoint)?;
    }

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
        if record.product_system_id.is_some() {
            debug!(%scenario, "product system already recorded");
            continue;
        }
        let Some(replica_id) = record.replica_id.clone() else {
            bail!(
                "no replica recorded for data column '{scenario}'; \
                 run the process-hierarchy operation first"
            );
        };
        let system_name = node.replica_name(&scenario);
        delete_preexisting(ctx, &system_name)?;
        let system = ctx.service.create_product_system(&replica_id)?;
        info!(%scenario, system = %system.id, "created product system");

        let record = checkpoint
            .template_processes
            .get_mut(&root_id)
            .and_then(|node| node.scenarios.get_mut(&scenario))
            .ok_or_else(|| anyhow!("data column '{scenario}' vanished from the checkpoint"))?;
        record.product_system_id = Some(system.id);
        record.product_system_name = Some(if system.name.is_empty() {
            system_name
        } else {
            system.name
        });
        ctx.store.save(&checkpoint)?;
    }
    Ok(())
}

fn reset(ctx: &StageContext<'_>, checkpoint: &mut Checkpoint) -> Result<()> {
    info!("restart requested, deleting recorded product systems");
    let root_id = checkpoint.top_level_process_id.clone();
    if let Some(node) = checkpoint.template_processes.get_mut(&root_id) {
        for record in node.scenarios.values_mut() {
            if let Some(system_id) = record.product_system_id.take() {
                if let Err(err) = ctx.service.delete(ModelType::ProductSystem, &system_id) {
                    warn!(id = %system_id, "could not delete recorded product system: {err}");
                }
            }
            record.product_system_name = None;
            record.calculation_files.clear();
        }
    }
    ctx.store.save(checkpoint)?;
    Ok(())
}

/// Product systems carry the replica's name; stale ones from earlier runs
/// would make the name ambiguous for operators browsing the database.
fn delete_preexisting(ctx: &StageContext<'_>, name: &str) -> Result<()> {
    while let Some(existing) = ctx
        .service
        .find_descriptor(ModelType::ProductSystem, name)?
    {
        warn!(%name, id = %existing.id, "deleting preexisting product system with the replica's name");
        ctx.service.delete(ModelType::ProductSystem, &existing.id)?;
    }
    Ok(())
}

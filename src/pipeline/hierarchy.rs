//! Materialization stage: for every template process and data column, clone
//! the template snapshot into a replica, substitute the column's amounts,
//! allocation factors, and data quality cells, rewrite default providers to
//! the already-materialized child replicas, and insert it into the modeling
//! service. Children go first so parents always point at existing replicas.

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info, warn};

use crate::dqi;
use crate::errors::ServiceError;
use crate::ipc::ModelType;
use crate::model::{Checkpoint, TemplateProcess};
use crate::pipeline::StageContext;
use crate::schema::{self, Process, Ref, Uncertainty};

pub fn run(ctx: &StageContext<'_>, restart: bool) -> Result<()> {
    let mut checkpoint = load(ctx)?;
    if restart {
        reset(ctx, &mut checkpoint)?;
    }

    for id in checkpoint.post_order() {
        let scenarios = checkpoint.template_processes[&id]
            .tables
            .scenario_names
            .clone();
        for scenario in scenarios {
            let node = &checkpoint.template_processes[&id];
            if node.scenarios[&scenario].replica_id.is_some() {
                debug!(process = %node.name, %scenario, "replica already recorded");
                continue;
            }
            let replica = build_replica(ctx, &checkpoint, node, &scenario)?;
            let replica_name = replica.name.clone();
            delete_preexisting(ctx, &replica_name)?;
            let inserted = ctx.service.insert_process(&replica)?;
            info!(process = %checkpoint.template_processes[&id].name, %scenario,
                replica = %replica_name, "inserted replica");

            let record = checkpoint
                .template_processes
                .get_mut(&id)
                .and_then(|node| node.scenarios.get_mut(&scenario))
                .ok_or_else(|| anyhow!("scenario '{scenario}' vanished from the checkpoint"))?;
            record.replica_id = Some(inserted.id);
            record.replica_name = Some(replica_name);
            ctx.store.save(&checkpoint)?;
        }
    }
    Ok(())
}

pub fn load(ctx: &StageContext<'_>) -> Result<Checkpoint> {
    ctx.store
        .load_optional()?
        .ok_or_else(|| anyhow!("no recorded model in {}; run the model operation first",
            ctx.store.path().display()))
}

/// Delete every replica this stage recorded, then clear the records. The
/// downstream stages' records go with them since their objects referenced
/// the deleted replicas.
fn reset(ctx: &StageContext<'_>, checkpoint: &mut Checkpoint) -> Result<()> {
    info!("restart requested, deleting recorded replicas");
    for node in checkpoint.template_processes.values_mut() {
        for record in node.scenarios.values_mut() {
            if let Some(system_id) = record.product_system_id.take() {
                tolerant_delete(ctx, ModelType::ProductSystem, &system_id)?;
            }
            record.product_system_name = None;
            if let Some(replica_id) = record.replica_id.take() {
                tolerant_delete(ctx, ModelType::Process, &replica_id)?;
            }
            record.replica_name = None;
            record.calculation_files.clear();
        }
    }
    ctx.store.save(checkpoint)?;
    Ok(())
}

/// Delete an object that may already be gone; only transport failures stop
/// the reset.
fn tolerant_delete(ctx: &StageContext<'_>, model_type: ModelType, id: &str) -> Result<()> {
    match ctx.service.delete(model_type, id) {
        Ok(()) => Ok(()),
        Err(ServiceError::Remote { message, .. }) => {
            warn!(id, "could not delete recorded object: {message}");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Other runs (or operators) may have left objects carrying the replica's
/// name; they would shadow the fresh insert, so they go first.
fn delete_preexisting(ctx: &StageContext<'_>, name: &str) -> Result<()> {
    while let Some(existing) = ctx.service.find_descriptor(ModelType::Process, name)? {
        warn!(%name, id = %existing.id, "deleting preexisting process with the replica's name");
        ctx.service.delete(ModelType::Process, &existing.id)?;
    }
    Ok(())
}

fn build_replica(
    ctx: &StageContext<'_>,
    checkpoint: &Checkpoint,
    node: &TemplateProcess,
    scenario: &str,
) -> Result<Process> {
    let scenario_index = node
        .tables
        .scenario_index(scenario)
        .ok_or_else(|| anyhow!("'{}' has no data column '{scenario}'", node.name))?;

    let mut replica = node.process.clone();
    replica.id = uuid::Uuid::new_v4().to_string();
    replica.name = node.replica_name(scenario);
    replica.last_change = Some(chrono::Utc::now().to_rfc3339());
    replica.description = if node.process.description.is_empty() {
        format!("Derived from '{}' for data column '{scenario}'.", node.name)
    } else {
        format!(
            "Derived from '{}' for data column '{scenario}'.\n{}",
            node.name, node.process.description
        )
    };

    for (row_index, exchange_index) in node.matched_exchange_indices.iter().enumerate() {
        let row = &node.tables.amounts[row_index];
        let exchange = &mut replica.exchanges[*exchange_index];
        exchange.quantitative_reference = row.is_reference;
        exchange.input = row.direction.is_input();
        exchange.amount = parse_amount(&row.amounts[scenario_index], &node.name, &row.key.flow);
        if let Some(provider) = &exchange.default_provider {
            if let Some(child) = checkpoint.template_processes.get(&provider.id) {
                exchange.default_provider =
                    Some(child_replica_ref(ctx, child, scenario)?);
            }
        }
    }

    if let (Some(matched), Some(rows)) =
        (&node.matched_allocation_indices, &node.tables.allocations)
    {
        for (row_index, position) in matched.iter().enumerate() {
            if let Some(position) = position {
                let row = &rows[row_index];
                replica.allocation_factors[*position].value =
                    parse_amount(&row.values[scenario_index], &node.name, &row.key.flow);
            }
        }
    }

    if let Some(dqi_rows) = &node.tables.dqis {
        for (row_index, dqi_row) in dqi_rows.iter().enumerate() {
            let Some(cell) = &dqi_row.entries[scenario_index] else {
                continue;
            };
            let (entry, base) = dqi::parse(cell)?;
            let geom_sd = dqi::geometric_sd(&entry, base)?;
            let exchange = &mut replica.exchanges[node.matched_exchange_indices[row_index]];
            exchange.uncertainty = Some(Uncertainty {
                distribution_type: schema::LOG_NORMAL_DISTRIBUTION.to_string(),
                geom_mean: exchange.amount,
                geom_sd,
                extra: serde_json::Map::new(),
            });
            exchange.dq_entry = Some(entry);
            exchange.base_uncertainty = Some(base);
        }
    }

    Ok(replica)
}

/// Reference to the child's replica for the same data column. The child is
/// materialized first; a missing or deleted replica means the recorded state
/// no longer matches the modeling database.
fn child_replica_ref(
    ctx: &StageContext<'_>,
    child: &TemplateProcess,
    scenario: &str,
) -> Result<Ref> {
    let record = child
        .scenarios
        .get(scenario)
        .ok_or_else(|| anyhow!("'{}' has no data column '{scenario}'", child.name))?;
    let (Some(id), Some(name)) = (&record.replica_id, &record.replica_name) else {
        bail!(
            "replica of '{}' for data column '{scenario}' is not recorded yet",
            child.name
        );
    };
    ctx.service
        .get_process(id)?
        .with_context(|| {
            format!(
                "recorded replica '{name}' ({id}) no longer exists; \
                 rerun this operation with --restart"
            )
        })?;
    Ok(Ref::new(id.clone(), name.clone()))
}

/// An empty or unparsable amount cell substitutes zero; the cell is logged
/// so the operator can fix the table.
fn parse_amount(cell: &str, process: &str, flow: &str) -> f64 {
    if cell.is_empty() {
        return 0.0;
    }
    match cell.parse::<f64>() {
        Ok(value) => value,
        Err(_) => {
            warn!(%process, %flow, %cell, "unparsable amount cell, substituting 0");
            0.0
        }
    }
}

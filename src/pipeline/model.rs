//! Definition stage: read the driver and replication tables, snapshot every
//! template process from the modeling service, resolve the default-provider
//! hierarchy, and pair replication rows with exchanges and allocation
//! factors. The result is the initial checkpoint; nothing is written to the
//! service here.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::errors::{ConfigError, MatchError};
use crate::matcher::{self, MarkerInput, RowKey};
use crate::model::{Checkpoint, TemplateProcess, STATE_SCHEMA_VERSION};
use crate::pipeline::StageContext;
use crate::schema::Process;
use crate::tables;

pub fn run(ctx: &StageContext<'_>, restart: bool) -> Result<()> {
    if restart {
        info!("restart requested, discarding the recorded model");
        ctx.store.delete()?;
    }
    if ctx.store.load_optional()?.is_some() {
        info!("model already recorded in {}", ctx.store.path().display());
        return Ok(());
    }

    let driver = tables::load_driver(ctx.root)?;
    info!(processes = driver.len(), "loaded driver file");

    let mut pool: BTreeMap<String, TemplateProcess> = BTreeMap::new();
    let mut top_level_id = String::new();
    for row in &driver {
        let replication = tables::load_replication_tables(ctx.root, &row.replication_file)
            .with_context(|| format!("loading replication tables for '{}'", row.name))?;
        let process = ctx
            .service
            .get_process(&row.process_id)?
            .ok_or_else(|| ConfigError::UnknownProcess {
                id: row.process_id.clone(),
                name: row.name.clone(),
            })?;
        debug!(process = %row.name, scenarios = replication.scenario_names.len(), "snapshotted template");
        if row.top_level {
            top_level_id = row.process_id.clone();
        }
        pool.insert(
            row.process_id.clone(),
            TemplateProcess::new(
                row.process_id.clone(),
                row.name.clone(),
                row.replication_base_name.clone(),
                process,
                replication,
            ),
        );
    }

    check_scenario_sets(&pool, &top_level_id)?;

    if let Some(root) = pool.get_mut(&top_level_id) {
        root.is_referenced = true;
    }
    let mut path = Vec::new();
    let mut resolved = BTreeSet::new();
    resolve(ctx, &mut pool, &top_level_id, &mut path, &mut resolved)?;

    for node in pool.values() {
        if !node.is_referenced {
            return Err(ConfigError::Unreferenced {
                name: node.name.clone(),
            }
            .into());
        }
    }

    let checkpoint = Checkpoint {
        schema_version: STATE_SCHEMA_VERSION,
        top_level_process_id: top_level_id,
        template_processes: pool,
    };
    ctx.store.save(&checkpoint)?;
    info!(
        templates = checkpoint.template_processes.len(),
        "model recorded in {}",
        ctx.store.path().display()
    );
    Ok(())
}

/// Every template must carry exactly the top-level template's data columns.
fn check_scenario_sets(
    pool: &BTreeMap<String, TemplateProcess>,
    top_level_id: &str,
) -> Result<(), ConfigError> {
    let reference: BTreeSet<&String> = match pool.get(top_level_id) {
        Some(root) => root.tables.scenario_names.iter().collect(),
        None => return Ok(()),
    };
    for node in pool.values() {
        let own: BTreeSet<&String> = node.tables.scenario_names.iter().collect();
        if own != reference {
            let extra = own
                .difference(&reference)
                .map(|s| s.to_string())
                .collect::<Vec<_>>();
            let missing = reference
                .difference(&own)
                .map(|s| s.to_string())
                .collect::<Vec<_>>();
            return Err(ConfigError::ScenarioMismatch {
                process: node.name.clone(),
                extra,
                missing,
            });
        }
    }
    Ok(())
}

/// Depth-first resolution of one template: pair its rows with its exchanges
/// and allocation factors, derive its children from the matched exchanges'
/// default providers, then descend. The path guards against provider cycles;
/// the resolved set rejects templates reachable from two parents.
fn resolve(
    ctx: &StageContext<'_>,
    pool: &mut BTreeMap<String, TemplateProcess>,
    id: &str,
    path: &mut Vec<String>,
    resolved: &mut BTreeSet<String>,
) -> Result<()> {
    let (name, process, rows) = {
        let node = pool
            .get(id)
            .with_context(|| format!("template '{id}' disappeared during resolution"))?;
        if path.iter().any(|ancestor| ancestor == id) {
            let mut chain: Vec<&str> = path.iter().map(String::as_str).collect();
            chain.push(id);
            return Err(ConfigError::Cycle {
                chain: chain.join(" -> "),
            }
            .into());
        }
        if !resolved.insert(id.to_string()) {
            return Err(ConfigError::MultiplyReferenced {
                name: node.name.clone(),
            }
            .into());
        }
        let rows: Vec<RowKey> = node
            .tables
            .amounts
            .iter()
            .map(|row| RowKey {
                name: row.key.flow.clone(),
                description: row.key.description.clone(),
                category: row.key.category.clone(),
            })
            .collect();
        (node.name.clone(), node.process.clone(), rows)
    };

    if rows.len() != process.exchanges.len() {
        return Err(MatchError::RowCountMismatch {
            process: name,
            kind: "exchange",
            rows: rows.len(),
            items: process.exchanges.len(),
        }
        .into());
    }

    let exchange_markers = matcher::build_markers(&exchange_inputs(ctx, &name, &process)?)?;
    let matched_exchanges = matcher::match_required(&rows, &exchange_markers, &name, "exchange")?;
    debug!(process = %name, exchanges = matched_exchanges.len(), "paired replication rows");

    // Children in replication row order: matched exchanges whose default
    // provider is itself a template.
    let mut children = Vec::new();
    for index in &matched_exchanges {
        if let Some(provider) = &process.exchanges[*index].default_provider {
            if pool.contains_key(&provider.id) {
                children.push(provider.id.clone());
            }
        }
    }

    let matched_allocations = match pool.get(id).and_then(|node| node.tables.allocations.as_ref())
    {
        Some(allocation_rows) => Some(match_allocations(ctx, &name, &process, allocation_rows)?),
        None => None,
    };

    {
        let node = pool
            .get_mut(id)
            .with_context(|| format!("template '{id}' disappeared during resolution"))?;
        node.matched_exchange_indices = matched_exchanges;
        node.matched_allocation_indices = matched_allocations;
        node.children = children.clone();
    }
    for child in &children {
        if let Some(node) = pool.get_mut(child) {
            node.is_referenced = true;
        }
    }

    path.push(id.to_string());
    for child in &children {
        resolve(ctx, pool, child, path, resolved)?;
    }
    path.pop();
    Ok(())
}

/// Marker inputs for a process's exchanges: flow name, exchange description,
/// and the flow's category path from the service.
fn exchange_inputs(
    ctx: &StageContext<'_>,
    process_name: &str,
    process: &Process,
) -> Result<Vec<MarkerInput>> {
    let mut inputs = Vec::with_capacity(process.exchanges.len());
    let mut categories: BTreeMap<String, String> = BTreeMap::new();
    for exchange in &process.exchanges {
        let category = match categories.get(&exchange.flow.id) {
            Some(category) => category.clone(),
            None => {
                let flow = ctx.service.get_flow(&exchange.flow.id)?.ok_or_else(|| {
                    ConfigError::UnknownFlow {
                        id: exchange.flow.id.clone(),
                        process: process_name.to_string(),
                    }
                })?;
                let category = flow.category_path();
                categories.insert(exchange.flow.id.clone(), category.clone());
                category
            }
        };
        inputs.push(MarkerInput {
            name: exchange.flow.name.clone(),
            description: exchange.description.clone(),
            category,
        });
    }
    Ok(inputs)
}

/// Pair allocation rows with the process's physical allocation factors. Each
/// factor borrows the description of the exchange carrying its product flow,
/// so rows can use the same disambiguators as the amounts table.
fn match_allocations(
    ctx: &StageContext<'_>,
    process_name: &str,
    process: &Process,
    allocation_rows: &[crate::tables::AllocationRow],
) -> Result<Vec<Option<usize>>> {
    let positions = process.physical_allocation_positions();
    let mut inputs = Vec::with_capacity(positions.len());
    for position in &positions {
        let factor = &process.allocation_factors[*position];
        let description = process
            .exchanges
            .iter()
            .find(|exchange| exchange.flow.id == factor.product.id)
            .map(|exchange| exchange.description.clone())
            .unwrap_or_default();
        let category = match ctx.service.get_flow(&factor.product.id)? {
            Some(flow) => flow.category_path(),
            None => {
                return Err(ConfigError::UnknownFlow {
                    id: factor.product.id.clone(),
                    process: process_name.to_string(),
                }
                .into())
            }
        };
        inputs.push(MarkerInput {
            name: factor.product.name.clone(),
            description,
            category,
        });
    }
    let markers = matcher::build_markers(&inputs)?;
    let rows: Vec<RowKey> = allocation_rows
        .iter()
        .map(|row| RowKey {
            name: row.key.flow.clone(),
            description: row.key.description.clone(),
            category: row.key.category.clone(),
        })
        .collect();
    let matched = matcher::match_optional(&rows, &markers, process_name, "physical allocation")?;
    // Map back from marker index to the factor's position in the process.
    Ok(matched
        .into_iter()
        .map(|hit| hit.map(|index| positions[index]))
        .collect())
}

//! `reefd`: the Reef admin daemon.
//!
//! Opens the admin's metadata store for offline inspection and recovery.
//!
//! # Usage
//!
//! ```text
//! reefd plans                   # list every plan
//! reefd plan 12                 # show one plan and its tasks
//! reefd topology                # live topology and static checks
//! reefd candidates              # stored candidates and their changes
//! reefd recover                 # interrupt plans left running
//! reefd prune -c reef.toml      # drop old finished plans
//! ```

mod config;
mod detached;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reef_admin::{Admin, Collaborators};
use reef_meta::MetaStore;
use reef_planner::TopologyDiff;
use reef_topology::Topology;
use reef_types::{PlanId, PlanState, ResultCode};
use tracing::{error, info};

use config::CliConfig;
use detached::Detached;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "reefd", version, about = "Reef key-value store admin daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory.
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List plans.
    Plans {
        /// Only plans in this state (e.g. "ERROR", "INTERRUPTED").
        #[arg(short, long)]
        state: Option<String>,
    },

    /// Show one plan with its tasks and failure.
    Plan {
        /// Plan id.
        id: u64,
    },

    /// Show the live topology and run the static checks on it.
    Topology,

    /// List topology candidates and what deploying each would change.
    Candidates,

    /// Interrupt plans a previous admin left running.
    Recover,

    /// Delete the oldest finished plans beyond the configured retention.
    Prune,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(dir) = cli.data_dir {
        config.admin.data_dir = dir;
    }

    telemetry::init(&config.log.level);

    match cli.command {
        Commands::Plans { state } => cmd_plans(&config, state.as_deref()),
        Commands::Plan { id } => cmd_plan(&config, PlanId::new(id)),
        Commands::Topology => cmd_topology(&config),
        Commands::Candidates => cmd_candidates(&config),
        Commands::Recover => cmd_recover(&config),
        Commands::Prune => cmd_prune(&config),
    }
}

fn open_meta(config: &CliConfig) -> Result<Arc<MetaStore>> {
    let meta_path = config.meta_path();
    let meta = MetaStore::open(&meta_path).map_err(|e| {
        error!(path = %meta_path.display(), %e, "failed to open metadata store");
        anyhow::anyhow!(
            "cannot open metadata at {}. Is another admin using it? ({e})",
            meta_path.display(),
        )
    })?;
    Ok(Arc::new(meta))
}

/// Open an admin with no storage node agents behind it. Opening recovers
/// plans left running.
fn open_admin(config: &CliConfig) -> Result<Admin> {
    let meta = open_meta(config)?;
    let parts = Collaborators::new(Arc::new(Detached), Arc::new(Detached));
    Admin::open(config.admin_config(), meta, parts).context("failed to open admin")
}

fn live_topology(config: &CliConfig, meta: &MetaStore) -> Result<Topology> {
    Ok(meta
        .get_topology()?
        .unwrap_or_else(|| Topology::new(&config.admin.store_name)))
}

// -----------------------------------------------------------------------
// reefd plans / plan
// -----------------------------------------------------------------------

fn cmd_plans(config: &CliConfig, state: Option<&str>) -> Result<()> {
    let meta = open_meta(config)?;
    let plans = meta.list_plans()?;
    let shown: Vec<_> = plans
        .iter()
        .filter(|p| state.is_none_or(|s| p.state.to_string().eq_ignore_ascii_case(s)))
        .collect();

    println!("Plans: {} of {}", shown.len(), plans.len());
    for plan in shown {
        println!(
            "  {:>5} {:<20} {:<22} {:<20} tasks={}/{}",
            plan.id.to_string(),
            plan.state.to_string(),
            plan.kind.to_string(),
            plan.name,
            plan.completed_tasks(),
            plan.tasks.len(),
        );
    }
    Ok(())
}

fn cmd_plan(config: &CliConfig, id: PlanId) -> Result<()> {
    let meta = open_meta(config)?;
    let plan = meta
        .get_plan(id)?
        .ok_or_else(|| anyhow::anyhow!("plan {id} does not exist"))?;

    println!("Plan {} \"{}\"", plan.id, plan.name);
    println!("  kind:     {}", plan.kind);
    println!(
        "  state:    {} (code {})",
        plan.state,
        ResultCode::for_state(plan.state).code()
    );
    if let Some(owner) = &plan.owner {
        println!("  owner:    {owner}");
    }
    println!("  attempts: {}", plan.attempts);
    if let Some(seq) = plan.base_topology_seq {
        println!("  base topology sequence: {seq}");
    }
    if let Some(failure) = &plan.failure {
        println!("  failure:  {failure}");
    }
    println!("  tasks:");
    for task in &plan.tasks {
        let group = task
            .group
            .map(|g| format!(" [group {g}]"))
            .unwrap_or_default();
        println!(
            "    {:>3} {:<11} {}{group}",
            task.index,
            task.state.to_string(),
            task.kind
        );
        if let Some(err) = &task.error {
            println!("        error: {err}");
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------
// reefd topology / candidates
// -----------------------------------------------------------------------

fn cmd_topology(config: &CliConfig) -> Result<()> {
    let meta = open_meta(config)?;
    let topo = live_topology(config, &meta)?;
    let params = meta.get_parameters()?.unwrap_or_default();

    println!("Store {} at sequence {}", topo.store_name, topo.sequence);
    for zone in topo.zones.values() {
        println!(
            "  {} \"{}\" {} rf={}",
            zone.id, zone.name, zone.zone_type, zone.repfactor
        );
        for sn in topo.storage_nodes_in(zone.id) {
            let node = topo.storage_node(sn)?;
            let hosted: Vec<String> = topo
                .rep_nodes_on(sn)
                .iter()
                .map(|rn| rn.to_string())
                .chain(topo.arb_nodes_on(sn).iter().map(|an| an.to_string()))
                .chain(topo.admins_on(sn).iter().map(|a| a.to_string()))
                .collect();
            println!(
                "    {sn} {}:{} capacity={} hosts [{}]",
                node.host,
                node.port,
                node.capacity,
                hosted.join(", ")
            );
        }
    }
    println!(
        "Shards: {}  partitions: {}",
        topo.rep_groups.len(),
        topo.partition_count()
    );

    let report = reef_verify::check_static(&topo, &params, &config.verify);
    if report.is_clean() {
        println!("Static checks: clean");
    } else {
        println!(
            "Static checks: {} violation(s), {} warning(s)",
            report.violations.len(),
            report.warnings.len()
        );
        for problem in report.violations.iter().chain(&report.warnings) {
            println!("  {:?} {problem}", problem.severity());
        }
    }
    Ok(())
}

fn cmd_candidates(config: &CliConfig) -> Result<()> {
    let meta = open_meta(config)?;
    let live = live_topology(config, &meta)?;
    let names = meta.list_candidates()?;

    println!("Topology candidates: {}", names.len());
    for name in &names {
        let Some(cand) = meta.get_candidate(name)? else {
            continue;
        };
        if !cand.is_based_on(live.sequence) {
            println!(
                "  {name}: out of date (built from sequence {}, live is {})",
                cand.base_sequence, live.sequence
            );
            continue;
        }
        let diff = TopologyDiff::between(&live, &cand.topology);
        if diff.is_empty() {
            println!("  {name}: same as the live topology");
            continue;
        }
        println!(
            "  {name}: +{} shard(s) -{} shard(s), +{} rn -{} rn, {} rn moved, {} partition(s) moved",
            diff.new_shards.len(),
            diff.removed_shards.len(),
            diff.added_rns.len(),
            diff.removed_rns.len(),
            diff.relocated_rns.len(),
            diff.moved_partitions.len(),
        );
        if let Some(last) = cand.log.last() {
            println!("      last change: {last}");
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------
// reefd recover / prune
// -----------------------------------------------------------------------

fn cmd_recover(config: &CliConfig) -> Result<()> {
    let admin = open_admin(config)?;
    let interrupted: Vec<PlanId> = admin
        .plan_ids()?
        .into_iter()
        .filter(|id| {
            admin.get_plan(*id).is_ok_and(|p| {
                p.state == PlanState::Interrupted
                    && p.failure
                        .as_ref()
                        .is_some_and(|f| f.kind == reef_types::FailureKind::AdminFailover)
            })
        })
        .collect();
    info!(count = interrupted.len(), "recovery complete");
    println!("Plans interrupted by admin failover: {}", interrupted.len());
    for id in interrupted {
        println!("  {id}");
    }
    Ok(())
}

fn cmd_prune(config: &CliConfig) -> Result<()> {
    let admin = open_admin(config)?;
    let pruned = admin.prune_plans()?;
    println!(
        "Pruned {} plan(s), keeping at most {} finished",
        pruned.len(),
        admin.config().plan_retention
    );
    Ok(())
}

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dealgate_core::{
    entry_gate, stage, stages, ChecklistConfirmation, HealthScore, InactivityFilter,
    OpportunityFilter,
};
use dealgate_storage::{MemoryOpportunityStore, OpportunityStore, PgOpportunityStore};
use dealgate_sync::{MoveOutcome, Pipeline, PipelineConfig};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "dealgate")]
#[command(about = "Dealgate pipeline qualification")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Serve {
        #[arg(long)]
        port: Option<u16>,
        /// Serve an empty in-memory pipeline instead of Postgres.
        #[arg(long)]
        memory: bool,
    },
    Migrate,
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        stage: Option<u8>,
        #[arg(long)]
        vendor: Option<String>,
        #[arg(long, default_value = "all")]
        inactivity: InactivityFilter,
    },
    Metrics {
        #[arg(long)]
        vendor: Option<String>,
    },
    Stages,
    Move {
        id: Uuid,
        stage: u8,
        /// Checklist item keys confirmed for the stage being left.
        #[arg(long = "confirm", value_name = "KEY")]
        confirm: Vec<String>,
        #[arg(long)]
        confirm_all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve {
        port: None,
        memory: false,
    }) {
        Commands::Serve { port, memory } => {
            let (store, _change_feed) = if memory {
                let store: Arc<dyn OpportunityStore> = Arc::new(MemoryOpportunityStore::new());
                (store, None)
            } else {
                let store = connect_store(&config).await?;
                let feed = store
                    .listen_for_changes()
                    .await
                    .context("subscribing to opportunity changes")?;
                let store: Arc<dyn OpportunityStore> = Arc::new(store);
                (store, Some(feed))
            };
            let pipeline = Arc::new(Pipeline::from_config(&config, store)?);
            let port = port.unwrap_or(config.web_port);
            info!(port, memory, "starting dealgate");
            dealgate_web::serve(pipeline, port).await?;
        }
        Commands::Migrate => {
            connect_store(&config).await?;
            println!("migrations applied");
        }
        Commands::List {
            search,
            stage,
            vendor,
            inactivity,
        } => {
            let pipeline = warm_pipeline(&config).await?;
            let filter = OpportunityFilter {
                search,
                stage,
                vendor,
                inactivity,
            };
            for opp in pipeline.filtered(&filter).await {
                println!(
                    "{}  [{}] {:<28} {:<20} {:>12.2}  {:>3}%  health {}  {}",
                    opp.id,
                    opp.stage,
                    opp.name,
                    opp.client,
                    opp.value,
                    opp.probability,
                    HealthScore::of(&opp).readout(),
                    opp.vendor,
                );
            }
        }
        Commands::Metrics { vendor } => {
            let pipeline = warm_pipeline(&config).await?;
            let metrics = pipeline.metrics(vendor.as_deref()).await;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Commands::Stages => {
            for stage in stages() {
                let gate = entry_gate(stage.id)
                    .map(|gate| {
                        gate.thresholds
                            .iter()
                            .map(|t| format!("{} >= {}", t.scale.key(), t.minimum))
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_else(|| "-".to_string());
                println!("{} {:<18} {:>3}%  gate: {}", stage.id, stage.name, stage.probability, gate);
                for item in stage.checklist {
                    println!("    {:<30} {}", item.key, item.label);
                }
            }
        }
        Commands::Move {
            id,
            stage: target,
            confirm,
            confirm_all,
        } => {
            let pipeline = warm_pipeline(&config).await?;
            let outcome = match pipeline.request_stage_move(id, target).await? {
                MoveOutcome::ChecklistRequired(pending) if confirm_all || !confirm.is_empty() => {
                    let confirmation = match pending.checklist_stage() {
                        Some(leaving) if confirm_all => ChecklistConfirmation::confirm_all(leaving),
                        _ => {
                            let mut confirmation = ChecklistConfirmation::new();
                            for key in &confirm {
                                confirmation.confirm(key.as_str());
                            }
                            confirmation
                        }
                    };
                    MoveOutcome::Moved(pipeline.confirm_stage_move(&pending, &confirmation).await?)
                }
                outcome => outcome,
            };
            match &outcome {
                MoveOutcome::Moved(opp) => {
                    let name = stage(opp.stage).map(|s| s.name).unwrap_or("?");
                    println!("{} moved to {} ({}%)", opp.name, name, opp.probability);
                }
                MoveOutcome::ChecklistRequired(pending) => {
                    println!(
                        "gate for stage {} not met; confirm the stage {} checklist:",
                        pending.target_stage, pending.from_stage
                    );
                    for unmet in &pending.unmet {
                        println!("    {} is {} (needs {})", unmet.scale.key(), unmet.actual, unmet.minimum);
                    }
                    for item in pending.checklist {
                        println!("    --confirm {:<28} {}", item.key, item.label);
                    }
                }
                MoveOutcome::Ignored => println!("stage {target} does not exist; nothing changed"),
            }
        }
    }

    Ok(())
}

async fn connect_store(config: &PipelineConfig) -> Result<PgOpportunityStore> {
    let store = PgOpportunityStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("running migrations")?;
    Ok(store)
}

async fn warm_pipeline(config: &PipelineConfig) -> Result<Pipeline> {
    let store: Arc<dyn OpportunityStore> = Arc::new(connect_store(config).await?);
    let pipeline = Pipeline::from_config(config, store)?;
    pipeline.load_vendors().await;
    pipeline
        .load_opportunities()
        .await
        .context("loading opportunities")?;
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["dealgate"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["dealgate", "serve", "--memory", "--port", "9000"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Serve { port: Some(9000), memory: true })
        ));
    }

    #[test]
    fn memory_store_is_only_accepted_by_serve() {
        for args in [
            vec!["dealgate", "list", "--memory"],
            vec!["dealgate", "metrics", "--memory"],
            vec!["dealgate", "--memory", "stages"],
        ] {
            assert!(Cli::try_parse_from(args.iter().copied()).is_err(), "{args:?} should be rejected");
        }
    }

    #[test]
    fn move_collects_checklist_keys() {
        let id = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from([
            "dealgate",
            "move",
            id.as_str(),
            "2",
            "--confirm",
            "first_contact",
            "--confirm",
            "contact_identified",
        ])
        .unwrap();
        let Some(Commands::Move { stage, confirm, confirm_all, .. }) = cli.command else {
            panic!("expected move");
        };
        assert_eq!(stage, 2);
        assert_eq!(confirm, ["first_contact", "contact_identified"]);
        assert!(!confirm_all);
    }

    #[test]
    fn list_parses_inactivity_filter() {
        let cli = Cli::try_parse_from(["dealgate", "list", "--inactivity", "7days"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::List { inactivity: InactivityFilter::Over7Days, .. })
        ));
        assert!(Cli::try_parse_from(["dealgate", "list", "--inactivity", "weekly"]).is_err());
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use leadhub_core::LeadStatus;
use leadhub_storage::{
    job_postings, lead_job_postings, leads, Database, JobPosting, JobPostingFilter, Lead,
    LeadFilter, UpsertAction,
};
use leadhub_sync::{LeadHubConfig, RunError, RunSummary};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "leadhub")]
#[command(about = "Collect, score and curate networking leads")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every configured search query once and store the results.
    Run {
        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Create or upgrade the database schema.
    Migrate,
    /// List stored leads, best first.
    Leads {
        #[arg(long)]
        status: Option<LeadStatus>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },
    /// Record progress on a lead.
    SetStatus {
        id: i64,
        status: LeadStatus,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List stored job postings, or only those linked to one lead.
    Postings {
        #[arg(long)]
        lead: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Link a lead to a job posting, e.g. after asking them for a referral.
    Link {
        lead_id: i64,
        job_posting_id: i64,
        /// Where the application stands, e.g. `applied` or `referred`.
        #[arg(long)]
        status: Option<String>,
    },
    /// Remove a lead's link to a job posting.
    Unlink { lead_id: i64, job_posting_id: i64 },
}

const DEFAULT_LOG_FILTER: &str =
    "info,leadhub_fetch=debug,leadhub_adapters=debug,leadhub_storage=debug,leadhub_sync=debug";

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn open_database(config: &LeadHubConfig) -> Result<Database> {
    let db = Database::connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    db.migrate().await.context("migrating database")?;
    Ok(db)
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!(
        "run {}: state={:?} queries={} query_failures={} raw={} filtered_in={} created={} \
         updated={} record_failures={} postings_inserted={}",
        summary.run_id,
        summary.state,
        summary.queries,
        summary.query_failures.len(),
        summary.leads.raw,
        summary.leads.filtered_in,
        summary.leads.created,
        summary.leads.updated,
        summary.leads.record_failures.len(),
        summary.job_boards.postings_inserted,
    );
    for failure in &summary.query_failures {
        println!(
            "  query failed [{}]: {} ({})",
            failure.kind, failure.query, failure.message
        );
    }
    Ok(())
}

fn print_lead(lead: &Lead) {
    println!(
        "{:>5}  {:>5.1}  {:<14} {} | {} @ {} | {}",
        lead.id,
        lead.score,
        lead.status.as_str(),
        lead.name,
        lead.current_role.as_deref().unwrap_or("-"),
        lead.company_name.as_deref().unwrap_or("-"),
        lead.profile_url,
    );
}

fn print_posting(posting: &JobPosting, application_status: Option<&str>) {
    println!(
        "{:>5}  {:<10} {} | {} | {}{}",
        posting.id,
        posting.source.as_str(),
        posting.title,
        posting.location.as_deref().unwrap_or("-"),
        posting.url,
        application_status.map(|s| format!(" [{s}]")).unwrap_or_default(),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // Loads `.env` first, so RUST_LOG set there reaches the subscriber.
    let config = LeadHubConfig::from_env().context("loading configuration")?;
    init_tracing();

    match cli.command.unwrap_or(Commands::Run { json: false }) {
        Commands::Run { json } => match leadhub_sync::run_once(&config).await {
            Ok(summary) => print_summary(&summary, json)?,
            Err(err) => {
                if let Some(run_error) = err.downcast_ref::<RunError>() {
                    print_summary(run_error.summary(), json)?;
                }
                return Err(err);
            }
        },
        Commands::Migrate => {
            open_database(&config).await?;
            info!(url = %config.database_url, "database is up to date");
        }
        Commands::Leads { status, limit, json } => {
            let db = open_database(&config).await?;
            let filter = LeadFilter {
                status,
                limit: Some(limit),
                ..Default::default()
            };
            let found = leads::list_leads(db.pool(), &filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&found)?);
            } else {
                found.iter().for_each(print_lead);
            }
        }
        Commands::SetStatus { id, status, notes } => {
            let db = open_database(&config).await?;
            let lead =
                leads::update_lead_status_and_notes(db.pool(), id, Some(status), notes.as_deref())
                    .await
                    .with_context(|| format!("updating lead {id}"))?;
            print_lead(&lead);
        }
        Commands::Postings { lead, json } => {
            let db = open_database(&config).await?;
            match lead {
                Some(lead_id) => {
                    let linked = lead_job_postings::linked_job_postings(db.pool(), lead_id).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&linked)?);
                    } else {
                        for link in &linked {
                            print_posting(&link.posting, link.application_status.as_deref());
                        }
                    }
                }
                None => {
                    let all =
                        job_postings::list_job_postings(db.pool(), &JobPostingFilter::default())
                            .await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&all)?);
                    } else {
                        all.iter().for_each(|posting| print_posting(posting, None));
                    }
                }
            }
        }
        Commands::Link {
            lead_id,
            job_posting_id,
            status,
        } => {
            let db = open_database(&config).await?;
            let action = lead_job_postings::link_lead_to_job_posting(
                db.pool(),
                lead_id,
                job_posting_id,
                status.as_deref(),
            )
            .await
            .with_context(|| format!("linking lead {lead_id} to posting {job_posting_id}"))?;
            match action {
                UpsertAction::Created => {
                    println!("linked lead {lead_id} to posting {job_posting_id}")
                }
                UpsertAction::Updated => {
                    println!("updated link from lead {lead_id} to posting {job_posting_id}")
                }
            }
        }
        Commands::Unlink {
            lead_id,
            job_posting_id,
        } => {
            let db = open_database(&config).await?;
            if lead_job_postings::unlink_lead_from_job_posting(db.pool(), lead_id, job_posting_id)
                .await?
            {
                println!("unlinked lead {lead_id} from posting {job_posting_id}");
            } else {
                println!("lead {lead_id} was not linked to posting {job_posting_id}");
            }
        }
    }

    Ok(())
}

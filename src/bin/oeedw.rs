use chrono::Utc;
use clap::{Parser, Subcommand};

use oeedw::date_util::parse_timestamp;
use oeedw::metrics::{Aggregate, Diagnostics, LiveSession, PerformanceMetrics};
use oeedw::{
    CurrentStatus, EntityOutcome, EntityType, MetricsReport, MetricsRequest, OeeDW, WindowSpec,
};

#[derive(Parser)]
#[command(name = "oeedw", about = "Hybrid OEE aggregation over rollups and live sessions")]
struct Cli {
    /// Database path (default: ~/.oeedw/oeedw.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute OEE metrics over a time window
    Metrics {
        /// Entity type: machine, operator, item
        entity_type: String,
        /// Restrict to these entity keys (repeatable)
        #[arg(long = "entity", value_name = "KEY")]
        entities: Vec<String>,
        /// Window: today, yesterday, wtd, mtd, 8h, 7d, YYYY-MM-DD, or A..B
        #[arg(long, conflicts_with_all = ["start", "end"])]
        window: Option<String>,
        /// Window start (RFC 3339 or local date-time)
        #[arg(long, requires = "end")]
        start: Option<String>,
        /// Window end (RFC 3339 or local date-time)
        #[arg(long, requires = "start")]
        end: Option<String>,
        /// Attach current status to each entity
        #[arg(long)]
        status: bool,
        /// Narrow each entity's window to its first and last session
        #[arg(long)]
        bookend: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show what entities are doing right now
    Status {
        /// Entity type: machine, operator
        entity_type: String,
        /// Restrict to these entity keys (repeatable)
        #[arg(long = "entity", value_name = "KEY")]
        entities: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage engine configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show row counts for the warehouse tables
    Stats,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => oeedw::Database::open_at(path).await?,
        None => oeedw::Database::open().await?,
    };
    let dw = OeeDW::new(db);

    match cli.command {
        Commands::Metrics {
            entity_type,
            entities,
            window,
            start,
            end,
            status,
            bookend,
            json,
        } => {
            let entity_type: EntityType = entity_type.parse()?;
            let config = dw.engine_config().await?;
            let now = Utc::now();
            let spec = match (window, start, end) {
                (Some(w), _, _) => WindowSpec::parse(&w, config.zone())?,
                (None, Some(s), Some(e)) => WindowSpec::Range(
                    parse_timestamp(&s, config.zone())?,
                    parse_timestamp(&e, config.zone())?,
                ),
                _ => WindowSpec::Today,
            };
            let window = spec.resolve(now, config.zone())?;

            let mut request = MetricsRequest::new(entity_type, window)
                .bookend(bookend)
                .with_status(status);
            if !entities.is_empty() {
                request = request.entities(entities);
            }

            let report = dw.compute_metrics_with(&request, &config, now).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report, &spec);
            }
        }
        Commands::Status {
            entity_type,
            entities,
            json,
        } => {
            let entity_type: EntityType = entity_type.parse()?;
            let filter = (!entities.is_empty()).then_some(&entities[..]);
            let statuses = dw.current_status(entity_type, filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else if statuses.is_empty() {
                println!("No current activity for {entity_type}s.");
            } else {
                for s in statuses.values() {
                    print_status(s);
                }
            }
        }
        Commands::Config { action } => {
            handle_config(&dw, action).await?;
        }
        Commands::Stats => {
            println!("Warehouse Stats");
            for (table, count) in dw.stats().await? {
                println!("  {table:<15} {count}");
            }
        }
    }

    Ok(())
}

async fn handle_config(dw: &OeeDW, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match dw.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            dw.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let stored = dw.config_list().await?;
            if stored.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in &stored {
                    println!("{k} = {v}");
                }
            }
            println!();
            println!("Effective engine settings:");
            for (k, v) in dw.engine_config().await?.to_pairs() {
                let origin = if stored.iter().any(|(s, _)| *s == k) { "" } else { " (default)" };
                println!("  {k} = {v}{origin}");
            }
        }
    }
    Ok(())
}

fn print_report(report: &MetricsReport, spec: &WindowSpec) {
    println!(
        "{} metrics for {} ({} .. {})",
        report.entity_type,
        spec,
        report.window.start.to_rfc3339(),
        report.window.end.to_rfc3339()
    );
    if let Some(p) = &report.partition {
        println!(
            "  Buckets: {} complete days, {} fragments ({} cache, {} live)",
            p.complete_days().count(),
            p.partial_fragments().count(),
            p.count(oeedw::BucketSource::Cache),
            p.count(oeedw::BucketSource::Live)
        );
    }
    if report.entities.is_empty() {
        println!("  No data in window");
        return;
    }

    for outcome in report.entities.values() {
        println!();
        match outcome {
            EntityOutcome::Computed(m) => {
                println!("{} ({})", m.entity_name, m.entity_key);
                print_aggregate(&m.aggregate);
                print_performance(&m.performance);
                print_diagnostics(&m.diagnostics);
                if let Some(status) = &m.current_status {
                    println!("  Now: {}", status.status_name);
                }
            }
            EntityOutcome::Failed { entity_key, error } => {
                println!("{entity_key}: FAILED ({error})");
            }
        }
    }
}

fn hours(ms: i64) -> f64 {
    ms as f64 / 3_600_000.0
}

fn print_aggregate(a: &Aggregate) {
    println!("  Time:");
    println!("    Runtime:  {:.2} h", hours(a.runtime_ms));
    println!("    Downtime: {:.2} h", hours(a.downtime_ms));
    println!("    Worked:   {:.2} h", hours(a.worked_time_ms));
    println!("    Credit:   {:.2} h", hours(a.time_credit_ms));
    println!("  Counts:");
    println!("    Valid:    {}", a.valid_count);
    println!("    Misfeed:  {}", a.misfeed_count);
}

fn print_performance(p: &PerformanceMetrics) {
    println!("  Performance:");
    println!("    Availability: {:.2}%", p.availability.percentage);
    println!("    Throughput:   {:.2}%", p.throughput.percentage);
    println!("    Efficiency:   {:.2}%", p.efficiency.percentage);
    println!("    OEE:          {:.2}%", p.oee.percentage);
}

fn print_diagnostics(d: &Diagnostics) {
    println!(
        "  Sources: {} cache / {} live buckets, {} sessions",
        d.cache_buckets, d.live_buckets, d.contributing_sessions
    );
    if !d.missing_rollup_days.is_empty() {
        println!("  Missing rollups: {}", d.missing_rollup_days.join(", "));
    }
}

fn print_status(s: &CurrentStatus) {
    println!("{}: {}", s.entity_key, s.status_name);
    if !s.operators.is_empty() {
        let names: Vec<String> = s
            .operators
            .iter()
            .map(|o| o.name.clone().unwrap_or_else(|| o.id.clone()))
            .collect();
        println!("  Operators: {}", names.join(", "));
    }
    if let Some(session) = &s.session {
        print_live_session(session);
    }
}

fn print_live_session(l: &LiveSession) {
    let state = if l.open { "open" } else { "closed" };
    println!("  Session ({state}) since {}", l.start.to_rfc3339());
    if let Some(machine) = &l.machine_key {
        println!("    Machine:    {machine}");
    }
    println!("    Runtime:    {:.2} h", hours(l.runtime_ms));
    println!("    Counts:     {} valid, {} misfeed", l.valid_count, l.misfeed_count);
    println!("    Efficiency: {:.2}%", l.efficiency.percentage);
}

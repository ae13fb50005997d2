//! fundgate CLI: fetch fund data through the resilient pipeline.
//!
//! Commands:
//! - `quote`: latest price for one or more funds
//! - `history`: NAV series, as a table or CSV
//! - `flow`: sector fund-flow ranking
//! - `sentiment`: background score for a sector or a fund's sector
//! - `sources`: registered sources, breaker states and proxy environment
//! - `cache compact` / `cache get`: cache maintenance and inspection

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fundgate_core::http::proxy_env_present;
use fundgate_core::sentiment::SectorSentiment;
use fundgate_core::{
    CacheStore, DataType, FetchResult, FlowPeriod, MarketData, MarketDataContext, NavPoint,
    NormalizedQuote, SectorFlowRecord, SectorKind, Settings,
};
use rayon::prelude::*;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fundgate", about = "fundgate: resilient fund market data")]
struct Cli {
    /// TOML settings file. Environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of tables.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Latest price for each fund code.
    Quote {
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// NAV history, oldest first.
    History {
        code: String,

        /// Days to look back. Defaults to 180.
        #[arg(long, default_value_t = 0)]
        days: u64,

        /// Write CSV to stdout.
        #[arg(long, default_value_t = false)]
        csv: bool,
    },
    /// Sector ranking by main-force net inflow.
    Flow {
        /// industry, concept or region.
        #[arg(default_value = "industry")]
        kind: String,

        /// today, 5d or 10d.
        #[arg(long, default_value = "today")]
        period: String,

        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Background sentiment for a sector, or for a fund's sector with --fund.
    Sentiment {
        /// Sector name, e.g. 半导体.
        sector: Option<String>,

        #[arg(long)]
        fund: Option<String>,
    },
    /// Registered sources, breaker states and proxy environment.
    Sources,
    /// Cache maintenance commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Drop entries that expired longer ago than the retention window.
    Compact,
    /// Show a raw cache entry, expired or not.
    Get { key: String },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_ref())?;
    let ctx = MarketDataContext::from_settings(settings).context("building market data context")?;
    let md = MarketData::new(Arc::new(ctx));

    match cli.command {
        Commands::Quote { codes } => run_quote(&md, &codes, cli.json),
        Commands::History { code, days, csv } => run_history(&md, &code, days, csv, cli.json),
        Commands::Flow { kind, period, top } => run_flow(&md, &kind, &period, top, cli.json),
        Commands::Sentiment { sector, fund } => run_sentiment(&md, sector, fund, cli.json),
        Commands::Sources => run_sources(&md, cli.json),
        Commands::Cache { action } => match action {
            CacheAction::Compact => run_cache_compact(&md),
            CacheAction::Get { key } => run_cache_get(&md, &key),
        },
    }
}

/// Logs go to stderr so stdout stays clean for tables, JSON and CSV.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fundgate_core=info,fundgate=info")),
        )
        .with_writer(io::stderr)
        .init();
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    let Some(p) = path else {
        return Settings::from_env().context("reading environment settings");
    };
    let mut settings =
        Settings::from_file(p).with_context(|| format!("loading {}", p.display()))?;
    settings
        .apply_env(|k| std::env::var(k).ok())
        .context("reading environment overrides")?;
    Ok(settings)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn provenance<T>(r: &FetchResult<T>) -> String {
    let mut s = format!("{} @ {}", r.source, r.fetched_at.format("%Y-%m-%d %H:%M:%S"));
    if r.stale {
        s.push_str(" [stale]");
    } else if r.cached {
        s.push_str(" [cached]");
    }
    s
}

fn run_quote(md: &MarketData, codes: &[String], json: bool) -> Result<()> {
    let results: Vec<(String, Option<FetchResult<NormalizedQuote>>)> = codes
        .par_iter()
        .map(|code| (code.clone(), md.get_latest_quote(code)))
        .collect();

    if json {
        let out: Vec<_> = results
            .iter()
            .map(|(code, r)| serde_json::json!({ "code": code, "result": r }))
            .collect();
        return print_json(&out);
    }

    println!("{:<8} {:>10} {:>8} {:<9} SOURCE", "CODE", "PRICE", "CHG%", "KIND");
    for (code, result) in &results {
        match result {
            Some(r) => {
                let q = &r.value;
                let chg = q.change_pct.map_or("-".to_string(), |c| format!("{c:+.2}"));
                println!(
                    "{:<8} {:>10.4} {:>8} {:<9} {}",
                    code,
                    q.price,
                    chg,
                    q.origin.as_str(),
                    provenance(r)
                );
            }
            None => println!("{code:<8} data unavailable"),
        }
    }
    Ok(())
}

fn run_history(md: &MarketData, code: &str, days: u64, csv: bool, json: bool) -> Result<()> {
    let Some(result) = md.get_history(code, days) else {
        bail!("no NAV history available for {code}");
    };
    info!(code, points = result.value.len(), source = %provenance(&result), "history");

    if json {
        return print_json(&result);
    }
    if csv {
        let mut writer = csv::Writer::from_writer(io::stdout());
        writer.write_record(["date", "nav"])?;
        for NavPoint { date, close } in &result.value {
            writer.write_record([date.to_string(), close.to_string()])?;
        }
        writer.flush()?;
        return Ok(());
    }

    println!("{code}  ({})", provenance(&result));
    for p in &result.value {
        println!("{}  {:.4}", p.date, p.close);
    }
    Ok(())
}

fn run_flow(md: &MarketData, kind: &str, period: &str, top: usize, json: bool) -> Result<()> {
    let kind: SectorKind = kind.parse().map_err(anyhow::Error::msg)?;
    let period: FlowPeriod = period.parse().map_err(anyhow::Error::msg)?;
    let Some(result) = md.get_sector_flow_ranking_for(kind, period, top) else {
        bail!("no {} ranking available", kind.as_str());
    };

    if json {
        return print_json(&result);
    }

    println!("{} {}  ({})", kind.as_str(), period.as_str(), provenance(&result));
    println!("{:>4} {:<16} {:>8} {:>12}", "RANK", "SECTOR", "CHG%", "NET(亿)");
    for SectorFlowRecord {
        rank,
        name,
        change_pct,
        main_net,
        ..
    } in &result.value
    {
        let chg = change_pct.map_or("-".to_string(), |c| format!("{c:+.2}"));
        println!("{:>4} {:<16} {:>8} {:>12.2}", rank, name, chg, main_net / 1e8);
    }
    Ok(())
}

fn run_sentiment(
    md: &MarketData,
    sector: Option<String>,
    fund: Option<String>,
    json: bool,
) -> Result<()> {
    let sector = match (sector, fund) {
        (Some(s), _) => s,
        (None, Some(code)) => match md.sector_of_fund(&code) {
            Some(s) => s.to_string(),
            None => bail!("no sector known for fund {code}"),
        },
        (None, None) => bail!("give a sector name or --fund <code>"),
    };
    let s: SectorSentiment = md.sector_sentiment(&sector);

    if json {
        return print_json(&s);
    }
    let basis = match &s.matched {
        Some(row) => format!("from ranking row {row}"),
        None => "fallback".to_string(),
    };
    println!("{}  {} ({})  {}", s.sector, s.score, s.level.label(), basis);
    Ok(())
}

fn run_sources(md: &MarketData, json: bool) -> Result<()> {
    let ctx = md.context();
    let health = ctx.health();
    let trust_env_proxy = ctx.settings().http.trust_env_proxy;

    if json {
        let sources: Vec<_> = DataType::ALL
            .iter()
            .map(|dt| {
                serde_json::json!({
                    "data_type": dt,
                    "selection": ctx.registry().selection(*dt).to_string(),
                    "sources": ctx.registry().entries(*dt).iter().map(|e| serde_json::json!({
                        "name": e.name,
                        "priority": e.priority,
                        "state": health.state(*dt, &e.name),
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();
        return print_json(&serde_json::json!({
            "sources": sources,
            "proxy_env_present": proxy_env_present().into_iter().collect::<std::collections::BTreeMap<_, _>>(),
            "trust_env_proxy": trust_env_proxy,
        }));
    }

    for dt in DataType::ALL {
        println!("{dt} (selection: {})", ctx.registry().selection(dt));
        for entry in ctx.registry().entries(dt) {
            println!(
                "  {:<18} priority {:>3}  {:?}",
                entry.name,
                entry.priority,
                health.state(dt, &entry.name)
            );
        }
    }
    let present: Vec<_> = proxy_env_present()
        .into_iter()
        .filter(|(_, set)| *set)
        .map(|(k, _)| k)
        .collect();
    println!(
        "proxy env: {}  (trusted: {trust_env_proxy})",
        if present.is_empty() { "none".to_string() } else { present.join(", ") }
    );
    Ok(())
}

fn run_cache_compact(md: &MarketData) -> Result<()> {
    let retention = md.context().settings().cache_retention();
    let removed = md
        .context()
        .cache()
        .compact(retention)
        .context("compacting cache")?;
    println!("removed {removed} expired entries");
    Ok(())
}

fn run_cache_get(md: &MarketData, key: &str) -> Result<()> {
    let cache = md.context().cache();
    match cache.get_allow_stale(key).context("reading cache")? {
        Some(read) => print_json(&serde_json::json!({
            "key": read.entry.key,
            "stale": read.is_stale,
            "created_at": read.entry.created_at,
            "expires_at": read.entry.expires_at,
            "value": read.entry.value,
        })),
        None => bail!("no cache entry for {key}"),
    }
}

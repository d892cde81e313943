//! recon-runner: headless driver for payroll deduction reconciliation.
//!
//! Usage:
//!   recon-runner seed      --seed 42 [--employees 50] [--batches 2]
//!   recon-runner reconcile --tenant demo-tenant-1 --batch 1
//!   recon-runner items     --tenant demo-tenant-1 --run 1 [--issue missing_coverage] [--page 1] [--limit 20]
//!   recon-runner insights  --tenant demo-tenant-1 --run 1
//!   recon-runner approve   --tenant demo-tenant-1 --run 1 [--commit] [--out-dir runtime/ach]
//!   recon-runner ask       --tenant demo-tenant-1 --question "..." [--no-correct] [--summary] [--max-retries 2]
//!   recon-runner audit     --tenant demo-tenant-1 [--entity reconciliation_run] [--limit 20]
//!   recon-runner serve     --tenant demo-tenant-1
//!
//! Common flags: --db payrecon.db --data-dir ./data --actor cli

use anyhow::{bail, Context, Result};
use payrecon_core::{
    config::AppConfig,
    insights::InsightsService,
    query_guard::GuardedQueryExecutor,
    query_orchestrator::{OrchestrateRequest, QueryOrchestrator},
    service::ReconService,
    store::{AuditFilter, ItemFilter, Page, ReconStore},
    synthetic::{SyntheticConfig, SyntheticGenerator},
    translation::{OpenAiTranslator, Translator},
    types::{IssueKind, RunId},
};
use log::info;
use std::env;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

/// One JSON request per stdin line in `serve` mode.
#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Summary {
        run_id: RunId,
    },
    Items {
        run_id: RunId,
        #[serde(default)]
        issue_type: Option<IssueKind>,
        #[serde(default)]
        page: Option<u32>,
        #[serde(default)]
        limit: Option<u32>,
    },
    Approve {
        run_id: RunId,
        #[serde(default = "default_dry_run")]
        dry_run: bool,
    },
    ExecuteSql {
        sql: String,
    },
    Quit,
}

fn default_dry_run() -> bool {
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        bail!("usage: recon-runner <seed|reconcile|items|insights|approve|ask|audit|serve> [flags]");
    };
    let db = arg_str(&args, "--db").unwrap_or("payrecon.db");
    let data_dir = arg_str(&args, "--data-dir").unwrap_or("./data");
    let tenant = arg_str(&args, "--tenant").unwrap_or("demo-tenant-1");
    let actor = arg_str(&args, "--actor").unwrap_or("cli");

    let config = AppConfig::load(data_dir)?;

    // A plain :memory: database would vanish between the writer and the
    // query-only connection; use a shared-cache URI instead.
    let db_effective: String = if db == ":memory:" {
        format!("file:recon_{}?mode=memory&cache=shared", std::process::id())
    } else {
        db.to_string()
    };
    let store = ReconStore::open(&db_effective)?;
    store.migrate()?;
    info!("recon-runner {command}: db={db_effective} tenant={tenant}");
    let service = ReconService::new(&store, &config);

    match command {
        "seed" => {
            let synthetic = SyntheticConfig {
                employees_per_tenant: parse_arg(&args, "--employees", 50usize),
                batches_per_tenant: parse_arg(&args, "--batches", 2usize),
                ..SyntheticConfig::default()
            };
            let generator = SyntheticGenerator::new(parse_arg(&args, "--seed", 42u64), synthetic);
            let report = service.seed(actor, &generator)?;
            print_json(&report)?;
        }
        "reconcile" => {
            let batch = required(&args, "--batch")?;
            let result = service.run_reconciliation(tenant, batch, actor)?;
            print_json(&result)?;
        }
        "items" => {
            let run_id = required(&args, "--run")?;
            let filter = ItemFilter {
                issue_kind: arg_str(&args, "--issue")
                    .map(str::parse)
                    .transpose()
                    .map_err(anyhow::Error::msg)?,
            };
            let page = Page::new(parse_arg(&args, "--page", 1u32), parse_arg(&args, "--limit", 20u32));
            print_json(&service.list_items(tenant, run_id, &filter, page)?)?;
        }
        "insights" => {
            let run_id = required(&args, "--run")?;
            let advisor: Arc<dyn Translator> = Arc::new(OpenAiTranslator::new(&config.translation));
            let insights = InsightsService::new(advisor, &config);
            print_json(&service.create_insights(tenant, run_id, &insights).await?)?;
        }
        "approve" => {
            let run_id = required(&args, "--run")?;
            let out_dir = arg_str(&args, "--out-dir").unwrap_or("runtime/ach");
            let dry_run = !args.iter().any(|a| a == "--commit");
            print_json(&service.approve_run(tenant, actor, run_id, dry_run, Path::new(out_dir))?)?;
        }
        "ask" => {
            let question = arg_str(&args, "--question").context("--question is required")?;
            let executor = Arc::new(GuardedQueryExecutor::new(store.reopen()?, &config.query_guard)?);
            let translator: Arc<dyn Translator> = Arc::new(OpenAiTranslator::new(&config.translation));
            let orchestrator = QueryOrchestrator::new(translator, executor, &config);
            let request = OrchestrateRequest {
                self_correct: !args.iter().any(|a| a == "--no-correct"),
                include_summary: args.iter().any(|a| a == "--summary"),
                max_retries: arg_str(&args, "--max-retries").and_then(|v| v.parse().ok()),
                ..OrchestrateRequest::new(question, tenant)
            };
            print_json(&orchestrator.orchestrate(request).await)?;
        }
        "audit" => {
            let filter = AuditFilter {
                entity: arg_str(&args, "--entity").map(String::from),
                action: arg_str(&args, "--action").map(String::from),
                ..AuditFilter::default()
            };
            let page = Page::new(parse_arg(&args, "--page", 1u32), parse_arg(&args, "--limit", 20u32));
            print_json(&service.list_audit(tenant, &filter, page)?)?;
        }
        "serve" => {
            let executor = GuardedQueryExecutor::new(store.reopen()?, &config.query_guard)?;
            run_ipc_loop(&service, &executor, tenant, actor)?;
        }
        other => bail!("unknown command '{other}'"),
    }

    Ok(())
}

fn run_ipc_loop(
    service: &ReconService<'_>,
    executor: &GuardedQueryExecutor,
    tenant: &str,
    actor: &str,
) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Summary { run_id } => service
                .summary_from_items(tenant, run_id)
                .map(|rows| {
                    let summary: serde_json::Map<String, serde_json::Value> = rows
                        .into_iter()
                        .map(|(kind, n)| (kind.to_string(), n.into()))
                        .collect();
                    serde_json::json!({ "run_id": run_id, "summary": summary })
                })
                .map_err(anyhow::Error::from),
            IpcCommand::Items {
                run_id,
                issue_type,
                page,
                limit,
            } => {
                let filter = ItemFilter {
                    issue_kind: issue_type,
                };
                let page = Page::new(page.unwrap_or(1), limit.unwrap_or(100));
                service
                    .list_items(tenant, run_id, &filter, page)
                    .map_err(anyhow::Error::from)
                    .map(|items| serde_json::json!({ "run_id": run_id, "items": items }))
            }
            IpcCommand::Approve { run_id, dry_run } => service
                .approve_run(tenant, actor, run_id, dry_run, Path::new("runtime/ach"))
                .map_err(anyhow::Error::from)
                .and_then(|a| serde_json::to_value(a).map_err(anyhow::Error::from)),
            IpcCommand::ExecuteSql { sql } => Ok(match executor.execute(&sql, tenant) {
                Ok(success) => serde_json::json!({
                    "success": true,
                    "row_count": success.row_count,
                    "data": success.rows,
                    "sql": success.query,
                    "execution_time": success.elapsed.as_secs_f64(),
                }),
                Err(failure) => serde_json::json!({
                    "success": false,
                    "error": failure.kind.to_string(),
                    "sql": failure.query,
                }),
            }),
        };

        let line = match reply {
            Ok(value) => value,
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn arg_str<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn required<T: std::str::FromStr>(args: &[String], flag: &str) -> Result<T> {
    arg_str(args, flag)
        .and_then(|v| v.parse().ok())
        .with_context(|| format!("{flag} is required"))
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

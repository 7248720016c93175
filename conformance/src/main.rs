//! MCP authorization conformance suite.
//!
//! # Usage
//!
//! Run one scenario:
//! ```bash
//! mcp-conformance --scenario server.auth.challenge --server-url http://localhost:3000/mcp
//! ```
//!
//! Run everything for one side:
//! ```bash
//! mcp-conformance --side client --client-cmd './my-client {url}'
//! mcp-conformance --side server --server-url http://localhost:3000/mcp
//! ```
//!
//! List scenarios:
//! ```bash
//! mcp-conformance --list
//! mcp-conformance --list --category server.auth --show-rules
//! ```
//!
//! # Exit Codes
//!
//! - 0: no FAILURE checks (with `--baseline`: reconciliation clean)
//! - 1: at least one FAILURE (with `--baseline`: unexpected or stale entries)
//! - 2: internal error (bad arguments, unreadable baseline)

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use mcp_conformance::{report, runner, Registry, RunContext, ScenarioDef, Side};
use mcp_conformance_core::ExpectedFailures;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "mcp-conformance")]
#[command(about = "MCP authorization conformance suite")]
struct Args {
    /// Run a specific scenario (e.g., "client.discovery.root")
    #[arg(long)]
    scenario: Option<String>,

    /// List available scenarios
    #[arg(long)]
    list: bool,

    /// Which side to test (client, server)
    #[arg(long)]
    side: Option<String>,

    /// Filter by name prefix (e.g., "client.discovery")
    #[arg(long)]
    category: Option<String>,

    /// Protocol endpoint of the server under test
    #[arg(long)]
    server_url: Option<Url>,

    /// Command template for the client under test; `{url}` expands to the
    /// protocol endpoint
    #[arg(long)]
    client_cmd: Option<String>,

    /// Run the selected scenarios as concurrent tasks
    #[arg(long)]
    parallel: bool,

    /// Expected-failures baseline (YAML)
    #[arg(long)]
    baseline: Option<PathBuf>,

    /// Show every check, not only failing ones
    #[arg(long)]
    all_checks: bool,

    /// Show normative references covered by each scenario
    #[arg(long)]
    show_rules: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: String,
}

fn usage_error(message: &str) -> ExitCode {
    eprintln!("error: {message}");
    ExitCode::from(2)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let registry = Registry::builtin();

    if args.list {
        list_scenarios(&registry, &args);
        return ExitCode::SUCCESS;
    }

    let selection: Vec<&'static ScenarioDef> = if let Some(name) = &args.scenario {
        match registry.get(name) {
            Some(def) => vec![def],
            None => return usage_error(&format!("unknown scenario {name:?}; try --list")),
        }
    } else {
        let side = match args.side.as_deref() {
            Some("client") => Side::Client,
            Some("server") => Side::Server,
            Some(other) => {
                return usage_error(&format!("--side must be client or server, got {other:?}"));
            }
            None => return usage_error("pass --scenario <name>, or --side with optional --category"),
        };
        let selection = registry.select(side, args.category.as_deref());
        if selection.is_empty() {
            return usage_error("no scenarios match the given side and category");
        }
        selection
    };

    if selection.iter().any(|d| d.side == Side::Server) && args.server_url.is_none() {
        return usage_error("server-side scenarios need --server-url");
    }
    if selection.iter().any(|d| d.side == Side::Client) && args.client_cmd.is_none() {
        return usage_error("client-side scenarios need --client-cmd");
    }

    let ctx = RunContext {
        server_url: args.server_url.clone(),
        client_command: args.client_cmd.clone(),
        ..RunContext::default()
    };

    let results = runner::run_suite(&selection, &ctx, args.parallel).await;

    let baseline_eval = match &args.baseline {
        Some(path) => {
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(err) => {
                    return usage_error(&format!("cannot read {}: {err}", path.display()));
                }
            };
            let expected = match ExpectedFailures::parse(&text) {
                Ok(expected) => expected,
                Err(err) => {
                    return usage_error(&format!("bad baseline {}: {err}", path.display()));
                }
            };
            let server_side = selection[0].side == Side::Server;
            Some(mcp_conformance_core::evaluate_baseline(
                &results,
                expected.for_side(server_side),
            ))
        }
        None => None,
    };

    if args.format == "json" {
        let rendered = report::render_json(&results, baseline_eval.as_ref());
        println!("{}", serde_json::to_string_pretty(&rendered).unwrap_or_default());
    } else {
        let mut out = std::io::stdout();
        let _ = report::print_text(&mut out, &results, args.all_checks);
        if let Some(eval) = &baseline_eval {
            let _ = report::print_baseline_text(&mut out, eval);
        }
    }

    let code = match baseline_eval {
        Some(eval) => eval.exit_code,
        None => {
            let failed = results
                .iter()
                .any(|r| r.checks.iter().any(|c| c.status.fails_exit()));
            i32::from(failed)
        }
    };
    ExitCode::from(code as u8)
}

fn list_scenarios(registry: &Registry, args: &Args) {
    let defs: Vec<_> = registry
        .iter()
        .filter(|def| match args.side.as_deref() {
            Some(side) => def.side.as_str() == side,
            None => true,
        })
        .filter(|def| match &args.category {
            Some(category) => {
                def.name == *category || def.name.starts_with(&format!("{category}."))
            }
            None => true,
        })
        .collect();

    if args.format == "json" {
        let listing: Vec<_> = defs
            .iter()
            .map(|def| {
                serde_json::json!({
                    "name": def.name,
                    "side": def.side.as_str(),
                    "description": def.description,
                    "rules": def.rule_ids(),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&listing).unwrap_or_default()
        );
        return;
    }

    println!("Available scenarios:\n");
    let mut current_category = String::new();
    for def in &defs {
        // Group under "side.area" headings.
        let category: String = def.name.rsplitn(2, '.').nth(1).unwrap_or("").to_string();
        if category != current_category {
            if !current_category.is_empty() {
                println!();
            }
            println!("## {category}");
            current_category = category;
        }

        if args.show_rules {
            println!("  {} [{}]", def.name, def.rule_ids().join(", "));
        } else {
            println!("  {}  {}", def.name, def.description);
        }
    }

    println!("\nTotal: {} scenarios", defs.len());

    let mut rules: BTreeSet<&str> = BTreeSet::new();
    for def in &defs {
        for spec in def.assertions {
            rules.extend(spec.spec_references.iter().map(|(id, _)| *id));
        }
    }
    println!("References covered: {}", rules.len());
}

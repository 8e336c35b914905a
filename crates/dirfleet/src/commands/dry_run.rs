use crate::utils::{self, Context};
use colored::Colorize;
use dirfleet_core::NodeId;
use dirfleet_pipeline::{HostPortReport, JobKind, ProvisioningJob};

pub async fn handle(ctx: &Context, id: u32, json: bool) -> anyhow::Result<()> {
    let topology = ctx.topology().await?;
    let node = utils::require_node(&topology, id)?;
    if !json {
        ctx.print_header();
        println!(
            "{}",
            format!("{} のポート疎通を確認します...", node.hostname).blue()
        );
    }

    let orchestrator = ctx.build_orchestrator(!json)?;
    let job = ProvisioningJob::new(JobKind::DryRun, NodeId(id));
    let locks = ctx.lock(&job).await?;
    let (outcome, report) = orchestrator.dry_run_job(job).await;
    utils::release(locks).await;

    if let Some(report) = &report {
        if json {
            println!("{}", serde_json::to_string_pretty(report)?);
        } else {
            println!();
            print_table(&report.node);
            if let Some(proxy) = &report.proxy {
                print_table(proxy);
            }
        }
    }
    if json {
        return if outcome.success {
            Ok(())
        } else {
            Err(anyhow::anyhow!("{} に失敗しました", outcome.kind))
        };
    }
    utils::report(&outcome)
}

fn print_table(report: &HostPortReport) {
    let ssh = if report.ssh { "ssh ✓".green() } else { "ssh ✗".red() };
    println!("{} ({})", report.hostname.cyan().bold(), ssh);
    for (port, open) in &report.ports {
        let state = if *open { "open".green() } else { "closed".red() };
        println!("  {:>6}  {}", port, state);
    }
}

use crate::utils::{self, Context};
use colored::Colorize;
use dirfleet_pipeline::{JobKind, ProvisioningJob, Target};

pub async fn handle(ctx: &Context, yes: bool) -> anyhow::Result<()> {
    ctx.print_header();
    let topology = ctx.topology().await?;

    println!();
    println!("{}", "ファイル同期 (csync2) を設定します".bold());
    for node in topology.nodes() {
        let role = if node.is_primary { " (primary)" } else { "" };
        println!("  • {}{}", node.hostname.cyan(), role);
    }

    if !yes {
        utils::print_confirm_hint();
        return Ok(());
    }
    ctx.execute(ProvisioningJob::new(JobKind::SetupFileSync, Target::All))
        .await
}

use crate::utils::{self, Context};
use colored::Colorize;
use dirfleet_core::NodeId;
use dirfleet_pipeline::{JobKind, ProvisioningJob};

pub async fn handle(ctx: &Context, id: u32, yes: bool) -> anyhow::Result<()> {
    ctx.print_header();
    let topology = ctx.topology().await?;
    let node = utils::require_node(&topology, id)?;

    println!();
    match topology.primary() {
        Some(current) if current.id == node.id => {
            println!("{} は既にプライマリです", node.hostname.cyan());
            return Ok(());
        }
        Some(current) => println!(
            "プライマリを {} から {} に変更します",
            current.hostname.cyan(),
            node.hostname.cyan()
        ),
        None => println!("{} をプライマリに設定します", node.hostname.cyan()),
    }

    if !yes {
        utils::print_confirm_hint();
        return Ok(());
    }
    ctx.execute(ProvisioningJob::new(JobKind::SetPrimary, NodeId(id)))
        .await
}

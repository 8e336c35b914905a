use crate::utils::{self, Context};
use colored::Colorize;
use dirfleet_pipeline::{JobKind, ProvisioningJob};
use dirfleet_core::NodeId;

pub async fn handle(ctx: &Context, id: u32) -> anyhow::Result<()> {
    ctx.print_header();
    let topology = ctx.topology().await?;
    let node = utils::require_node(&topology, id)?;
    println!(
        "{}",
        format!("{} の OS とコンポーネントを検出します...", node.hostname).blue()
    );

    ctx.execute(ProvisioningJob::new(JobKind::InspectNode, NodeId(id)))
        .await
}

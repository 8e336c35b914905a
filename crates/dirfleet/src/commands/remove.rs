use crate::utils::{self, Context};
use colored::Colorize;
use dirfleet_core::{Configurator, NodeId};
use dirfleet_pipeline::{JobKind, ProvisioningJob};

pub async fn handle(ctx: &Context, id: u32, yes: bool) -> anyhow::Result<()> {
    ctx.print_header();
    let topology = ctx.topology().await?;
    let node = utils::require_node(&topology, id)?;

    let remaining = topology.without(node.id);
    let configurator = Configurator::new(&remaining, &ctx.cluster);

    println!();
    println!("{}", format!("{} を fleet から削除します", node.hostname).bold());
    if node.replication_enabled {
        println!("  • レプリケーションを無効化");
    }
    println!("更新後のピアリスト:");
    for (peer, endpoints) in configurator.peer_map() {
        if let Some(member) = remaining.get(peer) {
            println!("  • {} → {}", member.hostname.cyan(), endpoints.join(","));
        }
    }
    if !ctx.cluster.external_load_balancer
        && let Some(lb) = &ctx.cluster.load_balancer_host
    {
        let backends: Vec<_> = configurator
            .proxy_backends(None)
            .into_iter()
            .map(|n| n.hostname.as_str())
            .collect();
        println!("  • {} のバックエンド: {}", lb.cyan(), backends.join(", "));
    }
    println!("{}", "警告: すべての手順が成功した場合のみ登録を削除します".yellow());

    if !yes {
        utils::print_confirm_hint();
        return Ok(());
    }
    ctx.execute(ProvisioningJob::new(JobKind::RemoveNode, NodeId(id)))
        .await
}

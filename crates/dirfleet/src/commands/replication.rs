use crate::utils::{self, Context};
use colored::Colorize;
use dirfleet_core::{Configurator, NodeId};
use dirfleet_pipeline::{JobKind, ProvisioningJob, Target};

pub async fn handle_enable(ctx: &Context, target: &str, yes: bool) -> anyhow::Result<()> {
    ctx.print_header();
    let target = utils::parse_target(target)?;
    let topology = ctx.topology().await?;
    let primary = topology
        .primary()
        .ok_or_else(|| anyhow::anyhow!("プライマリが指定されていません"))?;

    let targets: Vec<_> = match target {
        Target::All => topology.nodes().filter(|n| !n.is_primary).collect(),
        Target::Node(id) => vec![utils::require_node(&topology, id.0)?],
    };

    println!();
    println!(
        "{}",
        format!("レプリケーションを有効化します (ソース: {})", primary.hostname).bold()
    );
    for node in &targets {
        let state = if node.replication_enabled {
            " (有効化済み)".dimmed().to_string()
        } else {
            String::new()
        };
        println!("  • {}{}", node.hostname.cyan(), state);
    }

    if !yes {
        utils::print_confirm_hint();
        return Ok(());
    }
    ctx.execute(ProvisioningJob::new(JobKind::EnableReplication, target))
        .await
}

pub async fn handle_disable(ctx: &Context, id: u32, delete: bool, yes: bool) -> anyhow::Result<()> {
    ctx.print_header();
    let topology = ctx.topology().await?;
    let node = utils::require_node(&topology, id)?;

    let remaining = topology.without(node.id);
    let configurator = Configurator::new(&remaining, &ctx.cluster);

    println!();
    println!(
        "{}",
        format!("{} のレプリケーションを無効化します", node.hostname).bold()
    );
    println!("更新後のピアリスト:");
    for (peer, endpoints) in configurator.peer_map() {
        if let Some(member) = remaining.get(peer) {
            println!("  • {} → {}", member.hostname.cyan(), endpoints.join(","));
        }
    }
    if delete {
        println!("{}", "警告: 完了後にノードの登録を削除します".yellow());
    }

    if !yes {
        utils::print_confirm_hint();
        return Ok(());
    }
    ctx.execute(
        ProvisioningJob::new(JobKind::DisableReplication, NodeId(id)).with_delete_record(delete),
    )
    .await
}

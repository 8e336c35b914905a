use crate::utils::Context;
use colored::Colorize;
use dirfleet_core::{Configurator, Node};

pub async fn handle(ctx: &Context) -> anyhow::Result<()> {
    ctx.print_header();
    let topology = ctx.topology().await?;

    println!();
    if topology.is_empty() {
        println!("{}", "ノードが登録されていません".yellow());
        return Ok(());
    }

    println!("{}", format!("ノード ({} 台):", topology.len()).bold());
    for node in topology.nodes() {
        print_node(node);
    }

    let configurator = Configurator::new(&topology, &ctx.cluster);
    let active = topology.active_replication_set();
    println!();
    println!("{}", format!("レプリケーション有効 ({} 台):", active.len()).bold());
    for node in active {
        let peers = configurator.peer_endpoints(node.id)?;
        println!("  • {} → {}", node.hostname.cyan(), peers.join(","));
    }
    Ok(())
}

fn print_node(node: &Node) {
    let role = if node.is_primary {
        "primary".green().bold().to_string()
    } else {
        "replica".normal().to_string()
    };
    let os = node
        .os
        .map(|os| os.to_string())
        .unwrap_or_else(|| "(OS 未検出)".to_string());
    let replication = if node.replication_enabled {
        "replication: on".green().to_string()
    } else {
        "replication: off".dimmed().to_string()
    };
    let components: Vec<_> = node.installed_components.iter().map(|c| c.as_str()).collect();

    println!(
        "  {} {} ({}) [{}] {} {}",
        format!("#{}", node.id).bold(),
        node.hostname.cyan(),
        node.ip,
        role,
        os,
        replication
    );
    if !components.is_empty() {
        println!("      {}", components.join(", ").dimmed());
    }
}

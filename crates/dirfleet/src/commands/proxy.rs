use crate::utils::{self, Context};
use colored::Colorize;
use dirfleet_core::Configurator;
use dirfleet_pipeline::{JobKind, ProvisioningJob, Target};

pub async fn handle_deploy(ctx: &Context, hosts: bool, yes: bool) -> anyhow::Result<()> {
    ctx.print_header();
    if ctx.cluster.external_load_balancer {
        println!("{}", "外部ロードバランサーが設定されているためデプロイ不要です".yellow());
        return Ok(());
    }
    let lb = ctx
        .cluster
        .load_balancer_host
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("load-balancer が設定されていません"))?;

    let topology = ctx.topology().await?;
    let configurator = Configurator::new(&topology, &ctx.cluster);

    println!();
    println!("{}", format!("{} に nginx をデプロイします", lb).bold());
    println!("バックエンド:");
    for node in configurator.proxy_backends(None) {
        println!("  • {}:443", node.hostname.cyan());
    }
    if hosts {
        println!("  • 全ノードの /etc/hosts にホスト名を追記");
    }

    if !yes {
        utils::print_confirm_hint();
        return Ok(());
    }
    ctx.execute(ProvisioningJob::new(JobKind::DeployProxy, Target::All).with_host_aliases(hosts))
        .await
}

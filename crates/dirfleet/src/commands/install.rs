use crate::utils::{self, Context};
use colored::Colorize;
use dirfleet_core::NodeId;
use dirfleet_pipeline::{JobKind, ProvisioningJob};

pub async fn handle(ctx: &Context, id: u32, yes: bool) -> anyhow::Result<()> {
    ctx.print_header();
    let topology = ctx.topology().await?;
    let node = utils::require_node(&topology, id)?;

    println!();
    println!(
        "{}",
        format!(
            "{} を {} にインストールします",
            ctx.cluster.product_package(),
            node.hostname
        )
        .bold()
    );
    if node.is_primary {
        println!("  • プライマリ: データディレクトリの setup.properties を使用");
    } else {
        match topology.primary() {
            Some(primary) => println!(
                "  • レプリカ: {} の setup.properties.last から設定を生成",
                primary.hostname.cyan()
            ),
            None => println!("  {}", "⚠ プライマリが指定されていません".yellow()),
        }
    }
    if node.is_installed() {
        println!("  {}", "⚠ このノードはインストール済みとして記録されています".yellow());
    }

    if !yes {
        utils::print_confirm_hint();
        return Ok(());
    }
    ctx.execute(ProvisioningJob::new(JobKind::Install, NodeId(id)))
        .await
}

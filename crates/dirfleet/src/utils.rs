use crate::console::ConsoleSink;
use colored::Colorize;
use dirfleet_config::DataDir;
use dirfleet_core::{ClusterConfig, FanoutSink, NodeId, Topology, TracingSink};
use dirfleet_pipeline::{
    JsonFileStore, NodeLock, NodeStore, Orchestrator, PipelineInputs, PipelineOutcome,
    ProvisioningJob, Target,
};
use dirfleet_remote::SshTransportFactory;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// インベントリとノードストアを読み込んだ実行コンテキスト
pub struct Context {
    pub inventory_path: PathBuf,
    pub cluster: ClusterConfig,
    pub store: Arc<JsonFileStore>,
    pub verbose: bool,
}

impl Context {
    pub fn load(verbose: bool) -> anyhow::Result<Self> {
        let inventory_path = dirfleet_config::find_inventory_file()?;
        let inventory = dirfleet_core::parse_inventory_file(&inventory_path)?;
        let root = dirfleet_config::inventory_root(&inventory_path)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let store = Arc::new(JsonFileStore::new(&root).with_seed(inventory.nodes));
        tracing::debug!(inventory = %inventory_path.display(), root = %root.display(), "Loaded inventory");

        Ok(Self {
            inventory_path,
            cluster: inventory.cluster,
            store,
            verbose,
        })
    }

    pub async fn topology(&self) -> anyhow::Result<Topology> {
        Ok(self.store.load().await?)
    }

    pub fn print_header(&self) {
        println!("📄 インベントリ: {}", self.inventory_path.display().to_string().cyan());
        let name = if self.cluster.name.is_empty() {
            "(名前未設定)"
        } else {
            self.cluster.name.as_str()
        };
        println!("クラスタ: {}", name.cyan());
    }

    /// SSH トランスポートとデータディレクトリで組み立てたオーケストレータ
    pub fn orchestrator(&self) -> anyhow::Result<Orchestrator> {
        self.build_orchestrator(true)
    }

    /// `console` が false ならログは tracing にだけ流す（JSON 出力時）
    pub fn build_orchestrator(&self, console: bool) -> anyhow::Result<Orchestrator> {
        let data_dir = DataDir::discover()?;
        tracing::debug!(data_dir = %data_dir.root().display(), "Using data directory");
        let inputs = PipelineInputs::from_data_dir(&data_dir)?;
        let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
        if console {
            sink = sink.with(Arc::new(ConsoleSink::new(self.verbose)));
        }

        Ok(Orchestrator::new(
            self.cluster.clone(),
            self.store.clone(),
            Arc::new(SshTransportFactory::new()),
            Arc::new(sink),
        )
        .with_inputs(inputs))
    }

    /// ジョブが触るノードすべてのロックを取る
    ///
    /// メンバー構成を書き換えるジョブはフリート全体をロックする。
    pub async fn lock(&self, job: &ProvisioningJob) -> anyhow::Result<Vec<NodeLock>> {
        let ids = job.lock_scope(&self.topology().await?);
        let mut locks = Vec::with_capacity(ids.len());
        for id in ids {
            locks.push(NodeLock::acquire(self.store.state_dir(), id, job.task_id.as_str()).await?);
        }
        Ok(locks)
    }

    /// ロックを取ってジョブを実行し、結果を表示する
    pub async fn execute(&self, job: ProvisioningJob) -> anyhow::Result<()> {
        let orchestrator = self.orchestrator()?;
        let locks = self.lock(&job).await?;
        let outcome = orchestrator.run(job).await;
        release(locks).await;
        report(&outcome)
    }
}

pub async fn release(locks: Vec<NodeLock>) {
    for lock in locks {
        if let Err(e) = lock.release().await {
            tracing::warn!(error = %e, "Failed to release node lock");
        }
    }
}

/// 実行結果を表示し、失敗ならエラーを返す
pub fn report(outcome: &PipelineOutcome) -> anyhow::Result<()> {
    println!();
    if outcome.success {
        println!("{}", format!("✓ {} が完了しました", outcome.kind).green().bold());
        println!("  タスク ID: {}", outcome.task_id.as_str().dimmed());
        Ok(())
    } else {
        println!("{}", format!("✗ {} が失敗しました", outcome.kind).red().bold());
        println!("  タスク ID: {}", outcome.task_id.as_str().dimmed());
        Err(anyhow::anyhow!("{} に失敗しました", outcome.kind))
    }
}

/// `--yes` が無いときの案内
pub fn print_confirm_hint() {
    println!();
    println!("{}", "→ 実行するには --yes を付けてください".yellow());
}

/// 登録済みノードを取り出す
pub fn require_node(topology: &Topology, id: u32) -> anyhow::Result<&dirfleet_core::Node> {
    topology.get(NodeId(id)).ok_or_else(|| {
        anyhow::anyhow!(
            "ノード {} は登録されていません。登録済み: {}",
            id,
            topology
                .nodes()
                .map(|n| n.id.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    })
}

/// `all` または数値 ID
pub fn parse_target(value: &str) -> anyhow::Result<Target> {
    if value.eq_ignore_ascii_case("all") {
        return Ok(Target::All);
    }
    value
        .parse::<u32>()
        .map(|id| Target::Node(NodeId(id)))
        .map_err(|_| anyhow::anyhow!("ノード ID または all を指定してください: {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("all").unwrap(), Target::All);
        assert_eq!(parse_target("ALL").unwrap(), Target::All);
        assert_eq!(parse_target("3").unwrap(), Target::Node(NodeId(3)));
        assert!(parse_target("b").is_err());
    }
}

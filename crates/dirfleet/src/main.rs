mod commands;
mod console;
mod utils;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dirfleet")]
#[command(about = "LDAP ディレクトリ fleet のプロビジョニングとレプリケーション管理", long_about = None)]
struct Cli {
    /// debug レベルのタスクログも表示
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 登録済みノードとフラグを表示
    Nodes,
    /// ノードの OS・配置・コンポーネントを検出して記録
    Inspect {
        /// ノード ID
        id: u32,
    },
    /// ノードにプロダクトをインストール
    Install {
        /// ノード ID
        id: u32,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// マルチマスターレプリケーション
    #[command(subcommand)]
    Replication(ReplicationCommands),
    /// ノードを fleet から削除
    Remove {
        /// ノード ID
        id: u32,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// フロントプロキシ
    #[command(subcommand)]
    Proxy(ProxyCommands),
    /// ファイル同期を全ノードに設定
    #[command(name = "file-sync")]
    FileSync {
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// ノードとプロキシ間のポート疎通を確認
    #[command(name = "dry-run")]
    DryRun {
        /// ノード ID
        id: u32,
        /// 結果を JSON で出力
        #[arg(long)]
        json: bool,
    },
    /// プライマリを変更
    Primary {
        /// ノード ID
        id: u32,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// バージョン情報を表示
    Version,
}

#[derive(Subcommand)]
enum ReplicationCommands {
    /// レプリケーションを有効化
    Enable {
        /// ノード ID または all
        target: String,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// レプリケーションを無効化
    Disable {
        /// ノード ID
        id: u32,
        /// 完了後にノードの登録を削除
        #[arg(long)]
        delete: bool,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ProxyCommands {
    /// nginx をデプロイしてバックエンドを設定
    Deploy {
        /// 全ノードの /etc/hosts にホスト名を追記
        #[arg(long)]
        hosts: bool,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Versionコマンドはインベントリ不要
    if matches!(cli.command, Commands::Version) {
        println!("dirfleet {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let ctx = utils::Context::load(cli.verbose)?;

    match cli.command {
        Commands::Nodes => commands::nodes::handle(&ctx).await,
        Commands::Inspect { id } => commands::inspect::handle(&ctx, id).await,
        Commands::Install { id, yes } => commands::install::handle(&ctx, id, yes).await,
        Commands::Replication(ReplicationCommands::Enable { target, yes }) => {
            commands::replication::handle_enable(&ctx, &target, yes).await
        }
        Commands::Replication(ReplicationCommands::Disable { id, delete, yes }) => {
            commands::replication::handle_disable(&ctx, id, delete, yes).await
        }
        Commands::Remove { id, yes } => commands::remove::handle(&ctx, id, yes).await,
        Commands::Proxy(ProxyCommands::Deploy { hosts, yes }) => {
            commands::proxy::handle_deploy(&ctx, hosts, yes).await
        }
        Commands::FileSync { yes } => commands::file_sync::handle(&ctx, yes).await,
        Commands::DryRun { id, json } => commands::dry_run::handle(&ctx, id, json).await,
        Commands::Primary { id, yes } => commands::primary::handle(&ctx, id, yes).await,
        Commands::Version => Ok(()),
    }
}

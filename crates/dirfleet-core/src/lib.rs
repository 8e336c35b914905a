//! dirfleet コア: ディレクトリサービス fleet のトポロジーと派生設定
//!
//! LDAP ノード群の役割・レプリケーション状態を管理し、そこから
//! 各ノードに配布する設定（ピアリスト、同期グループ、プロキシバックエンド）を
//! 決定的に計算する。リモート操作は一切行わない。
//!
//! # 構成
//!
//! - **model**: Node / ClusterConfig などのデータモデル
//! - **topology**: ノード集合と不変条件（プライマリは常に 1 台以下）
//! - **configurator**: トポロジーから派生するピア・バックエンド集合
//! - **artifacts**: ノードへ配布するテキスト設定ファイルの生成
//! - **parser**: dirfleet.kdl インベントリのパース
//! - **log**: タスク単位のログシンク

pub mod artifacts;
pub mod configurator;
pub mod error;
pub mod log;
pub mod model;
pub mod parser;
pub mod topology;

pub use artifacts::*;
pub use configurator::*;
pub use error::*;
pub use log::{FanoutSink, LogEntry, LogLevel, LogSink, MemorySink, TaskId, TaskLogger, TracingSink};
pub use model::*;
pub use parser::*;
pub use topology::*;

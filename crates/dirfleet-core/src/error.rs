use crate::model::NodeId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("トポロジー不変条件違反: {0}")]
    InvariantViolation(String),

    #[error("ノードが見つかりません: {0}")]
    NodeNotFound(NodeId),

    #[error("ノード {0} はレプリケーション有効集合に含まれていません")]
    NotInActiveSet(NodeId),

    #[error("テンプレート展開エラー: {name}\n理由: {message}")]
    Template { name: String, message: String },
}

pub type Result<T> = std::result::Result<T, FleetError>;

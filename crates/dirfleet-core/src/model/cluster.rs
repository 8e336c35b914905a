//! クラスタ全体の設定

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// パスワード等の秘匿値
///
/// `Debug` では中身を出力しない。
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// クラスタ共通設定
///
/// パイプライン実行ごとに値として渡される。プロセス全体の可変状態は持たない。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// クラスタ名
    pub name: String,

    /// ピアアドレスにホスト名ではなく IP を使う
    pub use_ip_for_peer_addresses: bool,

    /// ディレクトリサーバーの管理者バインド DN
    pub replication_bind_dn: String,

    /// レプリケーション管理者パスワード
    pub replication_password: Secret,

    /// プロダクト名（パッケージ・コンテナ名の接頭辞）
    pub product_name: String,

    /// プロダクトバージョン
    pub product_version: String,

    /// レプリケーション対象のベース DN
    pub base_dns: Vec<String>,

    /// プロキシ層のホスト
    pub load_balancer_host: Option<String>,
    pub load_balancer_ip: Option<String>,

    /// キャッシュ層のホスト
    pub cache_host: Option<String>,
    pub cache_ip: Option<String>,

    /// 外部ロードバランサーを利用する（プロキシ層は管理しない）
    pub external_load_balancer: bool,

    /// SSH ログインユーザー
    pub ssh_user: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            use_ip_for_peer_addresses: false,
            replication_bind_dn: "cn=directory manager".to_string(),
            replication_password: Secret::default(),
            product_name: "gluu-server".to_string(),
            product_version: String::new(),
            base_dns: vec!["o=gluu".to_string()],
            load_balancer_host: None,
            load_balancer_ip: None,
            cache_host: None,
            cache_ip: None,
            external_load_balancer: false,
            ssh_user: "root".to_string(),
        }
    }
}

impl ClusterConfig {
    /// プロダクトのパッケージ名（例: `gluu-server-3.1.6`）
    pub fn product_package(&self) -> String {
        format!("{}-{}", self.product_name, self.product_version)
    }

    /// コンテナ化ノードのファイルシステムルート
    pub fn container_root(&self) -> PathBuf {
        PathBuf::from("/opt").join(self.product_package())
    }
}

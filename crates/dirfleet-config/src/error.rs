use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "インベントリが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリとその親: dirfleet.local.kdl, dirfleet.kdl\n\
        - ./.dirfleet/ ディレクトリ\n\
        - ~/.config/dirfleet/dirfleet.kdl\n\
        または DIRFLEET_INVENTORY 環境変数で直接指定できます"
    )]
    InventoryNotFound,

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

//! dirfleet のローカル設定
//!
//! インベントリファイルの探索と、コントローラ側データディレクトリ
//! （インストーラ設定・スキーマ・同期パス一覧・プロキシテンプレート）の読み込み。

pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// インベントリの環境変数
pub const INVENTORY_PATH_ENV: &str = "DIRFLEET_INVENTORY";

/// データディレクトリの環境変数
pub const DATA_DIR_ENV: &str = "DIRFLEET_DATA_DIR";

/// プロジェクト内の状態ディレクトリ名
pub const STATE_DIR: &str = ".dirfleet";

const CANDIDATES: [&str; 2] = ["dirfleet.local.kdl", "dirfleet.kdl"];

/// dirfleet の設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("dirfleet");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// インベントリファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 DIRFLEET_INVENTORY (直接パス指定)
/// 2. カレントディレクトリから上方向: dirfleet.local.kdl, dirfleet.kdl
/// 3. ./.dirfleet/ ディレクトリ内: 同様の順序
/// 4. ~/.config/dirfleet/dirfleet.kdl (グローバル設定)
#[tracing::instrument]
pub fn find_inventory_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(path_str) = std::env::var(INVENTORY_PATH_ENV) {
        let path = PathBuf::from(&path_str);
        if path.exists() {
            info!(inventory = %path.display(), "Found inventory from environment variable");
            return Ok(path);
        }
        warn!(env_path = %path_str, "DIRFLEET_INVENTORY is set but file does not exist");
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリから上方向
    if let Some(path) = find_inventory_from(&current_dir) {
        return Ok(path);
    }

    // 3. ./.dirfleet/ ディレクトリ
    let state_dir = current_dir.join(STATE_DIR);
    if state_dir.is_dir()
        && let Some(path) = first_candidate(&state_dir)
    {
        return Ok(path);
    }

    // 4. グローバル設定
    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("dirfleet").join("dirfleet.kdl");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::InventoryNotFound)
}

/// 指定ディレクトリから上方向にインベントリを探す
pub fn find_inventory_from(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();
    debug!(start_dir = %start_dir.display(), "Searching for inventory");

    loop {
        if let Some(path) = first_candidate(&current) {
            info!(inventory = %path.display(), "Found inventory file");
            return Some(path);
        }
        if !current.pop() {
            break;
        }
    }

    debug!("Inventory file not found");
    None
}

fn first_candidate(dir: &Path) -> Option<PathBuf> {
    CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// インベントリのパスからプロジェクトルートを求める
///
/// `.dirfleet/` 内のインベントリならその親を返す。
pub fn inventory_root(inventory: &Path) -> Option<&Path> {
    let parent = inventory.parent()?;
    if parent.file_name().is_some_and(|name| name == STATE_DIR) {
        parent.parent()
    } else {
        Some(parent)
    }
}

/// コントローラ側データディレクトリ
///
/// 配布元となるローカルファイル群を置く:
/// - `setup.properties`: プライマリのインストーラ設定
/// - `schema/`: カスタムスキーマ
/// - `fs_replication_paths.txt`: ファイル同期対象パス
/// - `nginx.conf.tera`: プロキシ設定テンプレート（任意）
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// DIRFLEET_DATA_DIR、なければ `<設定ディレクトリ>/data`
    pub fn discover() -> Result<Self> {
        if let Ok(path) = std::env::var(DATA_DIR_ENV) {
            return Ok(Self::new(path));
        }
        Ok(Self::new(get_config_dir()?.join("data")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// プライマリ用インストーラ設定
    pub fn setup_properties(&self) -> Result<Option<String>> {
        read_optional(&self.root.join("setup.properties"))
    }

    /// プロキシ設定テンプレート
    pub fn proxy_template(&self) -> Result<Option<String>> {
        read_optional(&self.root.join("nginx.conf.tera"))
    }

    /// ファイル同期対象パス（空行と `#` 行は無視）
    pub fn file_sync_paths(&self) -> Result<Vec<String>> {
        let content = read_optional(&self.root.join("fs_replication_paths.txt"))?;
        Ok(content
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    /// カスタムスキーマファイル（ファイル名順）
    pub fn schema_files(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let dir = self.root.join("schema");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let name = entry.file_name().to_string_lossy().to_string();
                files.push((name, std::fs::read(entry.path())?));
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("dirfleet"));
        assert!(config_dir.exists());
    }

    #[test]
    fn test_find_inventory_from_subdirectory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("dirfleet.kdl"), "// test").unwrap();

        let sub_dir = root.join("ops").join("site-a");
        fs::create_dir_all(&sub_dir).unwrap();

        let result = find_inventory_from(&sub_dir).unwrap();
        assert_eq!(result, root.join("dirfleet.kdl"));
    }

    #[test]
    fn test_find_inventory_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("dirfleet.kdl"), "// shared").unwrap();
        fs::write(temp_dir.path().join("dirfleet.local.kdl"), "// local").unwrap();

        let result = find_inventory_from(temp_dir.path()).unwrap();
        assert!(result.ends_with("dirfleet.local.kdl"));
    }

    #[test]
    #[serial]
    fn test_find_inventory_in_state_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let state_dir = temp_dir.path().join(STATE_DIR);
        fs::create_dir(&state_dir).unwrap();
        fs::write(state_dir.join("dirfleet.kdl"), "// in state dir").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();
        let result = temp_env::with_var_unset(INVENTORY_PATH_ENV, find_inventory_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with(".dirfleet/dirfleet.kdl"));
    }

    #[test]
    #[serial]
    fn test_find_inventory_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("custom.kdl");
        fs::write(&path, "// custom").unwrap();

        let result = temp_env::with_var(INVENTORY_PATH_ENV, Some(&path), find_inventory_file);
        assert_eq!(result.unwrap(), path);
    }

    #[test]
    fn test_inventory_root() {
        assert_eq!(
            inventory_root(Path::new("/srv/site/dirfleet.kdl")),
            Some(Path::new("/srv/site"))
        );
        assert_eq!(
            inventory_root(Path::new("/srv/site/.dirfleet/dirfleet.kdl")),
            Some(Path::new("/srv/site"))
        );
    }

    #[test]
    fn test_data_dir_reads_optional_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(temp_dir.path());

        assert!(data.setup_properties().unwrap().is_none());
        assert!(data.file_sync_paths().unwrap().is_empty());
        assert!(data.schema_files().unwrap().is_empty());

        fs::write(temp_dir.path().join("setup.properties"), "ip=10.0.0.1\n").unwrap();
        fs::write(
            temp_dir.path().join("fs_replication_paths.txt"),
            "# certs\n/etc/certs\n\n/opt/shibboleth-idp/metadata\n",
        )
        .unwrap();
        fs::create_dir(temp_dir.path().join("schema")).unwrap();
        fs::write(temp_dir.path().join("schema").join("b.schema"), "b").unwrap();
        fs::write(temp_dir.path().join("schema").join("a.schema"), "a").unwrap();

        assert_eq!(
            data.setup_properties().unwrap().as_deref(),
            Some("ip=10.0.0.1\n")
        );
        assert_eq!(
            data.file_sync_paths().unwrap(),
            vec!["/etc/certs", "/opt/shibboleth-idp/metadata"]
        );
        let names: Vec<_> = data
            .schema_files()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["a.schema", "b.schema"]);
    }

    #[test]
    #[serial]
    fn test_data_dir_from_env() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data = temp_env::with_var(DATA_DIR_ENV, Some(temp_dir.path()), DataDir::discover);
        assert_eq!(data.unwrap().root(), temp_dir.path());
    }
}

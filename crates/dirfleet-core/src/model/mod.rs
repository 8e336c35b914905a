//! モデル定義
//!
//! dirfleet で扱うノード・OS・クラスタ設定のデータモデル。

mod cluster;
mod component;
mod node;
mod os;

pub use cluster::*;
pub use component::*;
pub use node::*;
pub use os::*;

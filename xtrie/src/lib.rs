//! # xtrie
//!
//! xtrieは、バイト列のキーに32ビット整数を対応付ける、構築後は
//! 不変の連想配列です。内部はAoeのダブル配列トライで、2つの圧縮
//! 方式を選べます:
//!
//! - **TAIL** (単一トライ): 分岐しないキーの末尾を平坦な接尾辞
//!   バッファへ追い出します。
//! - **TWO** (二重トライ): 共通の接尾辞を反転した後方トライへ
//!   折り畳み、前方トライと索引・受理テーブルで連結します。
//!
//! 構築したトライは単一ファイルのアーカイブとして書き出し、
//! メモリマップでそのまま読み込めます。読み込んだトライは検索と
//! 接頭辞列挙だけを提供します。
//!
//! ## 使用例
//!
//! ```
//! # fn main() -> xtrie::Result<()> {
//! use xtrie::{Trie, TrieKind};
//!
//! let mut trie = Trie::new(TrieKind::Two, 4096);
//! trie.insert(b"badge", 4);
//! trie.insert(b"badger", 5);
//! trie.insert(b"badness", 6);
//!
//! assert_eq!(trie.search(b"badger"), Some(5));
//! assert_eq!(trie.search(b"bad"), None);
//!
//! let mut matches = trie.prefix_search(b"badge");
//! matches.sort();
//! assert_eq!(matches.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! アーカイブを介した使い方は[`Trie::build`]と[`Trie::from_archive`]を
//! 参照してください。

/// アーカイブの低水準な読み書き
pub(crate) mod archive;

/// 共通の型定義とユーティリティ
pub mod common;

/// エラー型の定義
pub mod errors;

/// キーのエンコードとデコード
pub mod key;

/// トライの実装
pub mod trie;

#[cfg(test)]
mod tests;

pub use crate::common::Value;
pub use crate::errors::{Result, XtrieError};
pub use crate::key::Key;
pub use crate::trie::{BasicTrie, TailTrie, Trie, TrieKind, TwoTrie};

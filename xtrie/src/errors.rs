//! エラー型の定義
//!
//! このモジュールは、xtrieライブラリで使用されるすべてのエラー型を定義します。

use std::error::Error;
use std::fmt;

/// xtrie専用のResult型
///
/// エラー型としてデフォルトで[`XtrieError`]を使用します。
pub type Result<T, E = XtrieError> = std::result::Result<T, E>;

/// xtrieのエラー型
///
/// このライブラリで発生する可能性のあるすべてのエラーを表現します。
/// 検索のミスはエラーではなく`Option`の`None`で表されるため、
/// ここに含まれるのはリソース障害と入力データの不正のみです。
#[derive(Debug, thiserror::Error)]
pub enum XtrieError {
    /// アーカイブファイルの不正
    ///
    /// [`BadTrieArchiveError`]のエラーバリアント。
    /// オープン失敗、ファイルの切り詰め、マジックバイトの不一致で発生します。
    #[error(transparent)]
    BadTrieArchive(BadTrieArchiveError),

    /// テキストソースの不正
    ///
    /// [`BadTrieSourceError`]のエラーバリアント。
    /// ソースファイルのI/Oエラーまたはレコード形式の不正で発生します。
    #[error(transparent)]
    BadTrieSource(BadTrieSourceError),

    /// 標準I/Oエラー
    ///
    /// [`std::io::Error`]のエラーバリアント。
    #[error(transparent)]
    StdIo(#[from] std::io::Error),
}

impl XtrieError {
    /// アーカイブ不正エラーを生成します
    ///
    /// # 引数
    ///
    /// * `op` - 失敗した操作の名前
    /// * `msg` - エラーメッセージ
    pub(crate) fn bad_archive<S>(op: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::BadTrieArchive(BadTrieArchiveError {
            op,
            msg: msg.into(),
        })
    }

    /// ソース不正エラーを生成します
    ///
    /// # 引数
    ///
    /// * `msg` - エラーメッセージ
    pub(crate) fn bad_source<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::BadTrieSource(BadTrieSourceError {
            msg: msg.into(),
            line: None,
        })
    }

    /// 行番号付きのソース不正エラーを生成します
    ///
    /// # 引数
    ///
    /// * `line` - 1始まりの行番号
    /// * `msg` - エラーメッセージ
    pub(crate) fn bad_source_at<S>(line: usize, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::BadTrieSource(BadTrieSourceError {
            msg: msg.into(),
            line: Some(line),
        })
    }
}

/// アーカイブファイルが不正な場合に使用されるエラー
#[derive(Debug)]
pub struct BadTrieArchiveError {
    /// 失敗した操作の名前
    pub(crate) op: &'static str,

    /// エラーメッセージ
    pub(crate) msg: String,
}

impl fmt::Display for BadTrieArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BadTrieArchiveError: {}: {}", self.op, self.msg)
    }
}

impl Error for BadTrieArchiveError {}

/// テキストソースが不正な場合に使用されるエラー
#[derive(Debug)]
pub struct BadTrieSourceError {
    /// エラーメッセージ
    pub(crate) msg: String,

    /// エラーが発生した1始まりの行番号
    pub(crate) line: Option<usize>,
}

impl BadTrieSourceError {
    /// エラーが発生した行番号を取得します
    ///
    /// # 戻り値
    ///
    /// 行に紐付くエラーであれば1始まりの行番号、そうでなければ`None`。
    pub const fn line(&self) -> Option<usize> {
        self.line
    }
}

impl fmt::Display for BadTrieSourceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "BadTrieSourceError: line {}: {}", line, self.msg),
            None => write!(f, "BadTrieSourceError: {}", self.msg),
        }
    }
}

impl Error for BadTrieSourceError {}

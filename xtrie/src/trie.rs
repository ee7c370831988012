//! トライの方式非依存な入口
//!
//! このモジュールは、2つの圧縮方式を同じ操作で扱うための
//! ファサードを提供します。アーカイブからの読み込みでは、ファイル
//! 先頭のマジックバイトで方式を判別します。

pub mod basic;
pub mod tail;
pub mod two;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::archive;
use crate::common::Value;
use crate::errors::{Result, XtrieError};
use crate::key::Key;

pub use crate::trie::basic::BasicTrie;
pub use crate::trie::tail::TailTrie;
pub use crate::trie::two::TwoTrie;

/// トライの圧縮方式。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TrieKind {
    /// 単一トライと接尾辞バッファの組み合わせ。
    Tail,

    /// 前方・後方の2つのトライの組み合わせ。
    #[default]
    Two,
}

/// バイト列のキーに32ビット整数を対応付ける連想配列
///
/// 一括構築の後にアーカイブへ書き出し、以降はメモリマップで
/// 読み込んで検索だけを行う使い方を想定しています。
///
/// # 例
///
/// ```
/// use xtrie::{Trie, TrieKind};
///
/// let mut trie = Trie::new(TrieKind::Two, 4096);
/// trie.insert(b"back", 3);
/// trie.insert(b"badge", 4);
/// assert_eq!(trie.search(b"back"), Some(3));
/// assert_eq!(trie.search(b"bad"), None);
/// ```
pub enum Trie {
    Tail(TailTrie),
    Two(TwoTrie),
}

impl Trie {
    /// 空のトライを生成します。
    ///
    /// # 引数
    ///
    /// * `kind` - 圧縮方式
    /// * `size` - 内部バッファの初期セル数
    pub fn new(kind: TrieKind, size: i32) -> Self {
        match kind {
            TrieKind::Tail => Self::Tail(TailTrie::new(size)),
            TrieKind::Two => Self::Two(TwoTrie::new(size)),
        }
    }

    /// アーカイブファイルからトライを読み込みます。
    ///
    /// 方式はマジックバイトから判別されます。読み込まれたトライは
    /// 検索専用です。
    ///
    /// # エラー
    ///
    /// ファイルが開けない場合や、マジックバイトがどの方式とも
    /// 一致しない場合は[`XtrieError::BadTrieArchive`]を返します。
    pub fn from_archive<P: AsRef<Path>>(path: P) -> Result<Self> {
        let map = archive::map_file(path.as_ref())?;
        let magic = archive::magic_of(&map)?;
        if magic == tail::TAIL_MAGIC {
            Ok(Self::Tail(TailTrie::from_map(map)?))
        } else if magic == two::TWO_MAGIC {
            Ok(Self::Two(TwoTrie::from_map(map)?))
        } else {
            Err(XtrieError::bad_archive(
                "magic",
                format!("{} is not a trie archive", path.as_ref().display()),
            ))
        }
    }

    /// トライの圧縮方式を返します。
    pub fn kind(&self) -> TrieKind {
        match self {
            Self::Tail(_) => TrieKind::Tail,
            Self::Two(_) => TrieKind::Two,
        }
    }

    /// キーに値を対応付けます。既存のキーに対しては値を上書きします。
    ///
    /// # パニック
    ///
    /// アーカイブから読み込んだトライに対して呼ぶとパニックします。
    pub fn insert(&mut self, key: &[u8], value: Value) {
        let key = Key::from_bytes(key);
        self.insert_key(&key, value);
    }

    /// エンコード済みのキーに値を対応付けます。
    pub fn insert_key(&mut self, key: &Key, value: Value) {
        match self {
            Self::Tail(trie) => trie.insert(key, value),
            Self::Two(trie) => trie.insert(key, value),
        }
    }

    /// キーに対応付けられた値を検索します。
    pub fn search(&self, key: &[u8]) -> Option<Value> {
        let key = Key::from_bytes(key);
        self.search_key(&key)
    }

    /// エンコード済みのキーで検索します。
    pub fn search_key(&self, key: &Key) -> Option<Value> {
        match self {
            Self::Tail(trie) => trie.search(key),
            Self::Two(trie) => trie.search(key),
        }
    }

    /// 指定した接頭辞を持つすべてのキーと値を列挙します。
    pub fn prefix_search(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Value)> {
        match self {
            Self::Tail(trie) => trie.prefix_search(prefix),
            Self::Two(trie) => trie.prefix_search(prefix),
        }
    }

    /// 現在の内容のスナップショットをアーカイブとして書き出します。
    pub fn build<P: AsRef<Path>>(&self, path: P, verbose: bool) -> Result<()> {
        match self {
            Self::Tail(trie) => trie.build(path, verbose),
            Self::Two(trie) => trie.build(path, verbose),
        }
    }

    /// テキストソースからレコードを一括で読み込みます。
    ///
    /// ソースは1行につき1レコードで、整数の値、空白、改行までの
    /// キーという形式です。キーには空白を含められます。
    ///
    /// # 引数
    ///
    /// * `source` - ソースファイルのパス
    /// * `verbose` - 進捗を標準エラーへ出力するか。500行ごとにドットを、
    ///   1500行ごとに行数を出力します。
    ///
    /// # エラー
    ///
    /// ソースが開けない場合や形式の崩れた行がある場合は、1始まりの
    /// 行番号を添えて[`XtrieError::BadTrieSource`]を返します。
    pub fn read_from_text<P: AsRef<Path>>(&mut self, source: P, verbose: bool) -> Result<()> {
        let source = source.as_ref();
        let file = File::open(source)
            .map_err(|e| XtrieError::bad_source(format!("{}: {}", source.display(), e)))?;
        let rdr = BufReader::new(file);

        if verbose {
            eprint!("building");
        }
        let mut key = Key::new();
        let mut lineno = 0;
        for line in rdr.lines() {
            let line = line.map_err(|e| XtrieError::bad_source_at(lineno + 1, e.to_string()))?;
            lineno += 1;
            if verbose {
                if lineno % 500 == 0 {
                    eprint!(".");
                }
                if lineno % 1500 == 0 {
                    eprint!("{lineno}");
                }
            }
            let (value, word) = parse_record(&line)
                .ok_or_else(|| XtrieError::bad_source_at(lineno, "format error"))?;
            key.assign(word.as_bytes());
            self.insert_key(&key, value);
        }
        if verbose {
            eprintln!("...{lineno}.");
        }
        Ok(())
    }
}

/// `<値> <キー>`形式の1行をパースします。
///
/// 値の前後の空白は読み飛ばし、キーは行末までをそのまま使います。
fn parse_record(line: &str) -> Option<(Value, &str)> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let rest = line.trim_start();
    let split = rest.find(char::is_whitespace)?;
    let value = rest[..split].parse().ok()?;
    let word = rest[split..].trim_start();
    if word.is_empty() {
        return None;
    }
    Some((value, word))
}

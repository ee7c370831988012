//! 単一トライとTAILによる圧縮
//!
//! このモジュールは、ひとつのダブル配列と平坦な接尾辞バッファを
//! 組み合わせたトライを提供します。キーのうち他のキーと分岐しない
//! 末尾部分は、トライの状態を費やさずに接尾辞バッファへそのまま
//! 格納されます。トライ側の状態`s`のBASEが負値`-k`であることが
//! 「残りのキーはバッファの位置`k`から始まる」ことを表し、尾部は
//! 終端記号まで続いたあと、1セルの値が後置されます。

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::archive::{self, Cells, Region};
use crate::common::{aligned_grow, pretty_size, FromI32, StateId, Symbol, Value, DEFAULT_STATE_SIZE};
use crate::errors::Result;
use crate::key::{self, Key, TERMINATOR};
use crate::trie::basic::{BasicTrie, Extremum, NullRelocator};

/// TAIL方式のアーカイブを識別するマジックバイト。
pub(crate) const TAIL_MAGIC: [u8; 16] = *b"TAIL_TRIE\0\0\0\0\0\0\0";

/// 接尾辞バッファ付きのトライ
///
/// 構築中はすべてのバッファを所有し、アーカイブから読み込まれた場合は
/// マッピング上の窓を重ねた検索専用のインスタンスになります。
pub struct TailTrie {
    /// 前方トライ。分岐のある接頭辞部分だけを保持します。
    trie: BasicTrie,

    /// 共有される接尾辞バッファ。セル0は使いません。
    suffix: Cells,

    /// 次に書き込む接尾辞バッファの位置。
    next_suffix: StateId,
}

impl TailTrie {
    /// 空のトライを生成します。
    pub fn new(size: i32) -> Self {
        let request = if size > 0 { size } else { DEFAULT_STATE_SIZE };
        Self {
            trie: BasicTrie::new(size),
            suffix: Cells::zeroed(usize::from_i32(aligned_grow(0, request))),
            next_suffix: 1,
        }
    }

    /// アーカイブのマッピングからトライを読み込みます。
    pub(crate) fn from_map(map: Arc<Mmap>) -> Result<Self> {
        let mut sizes = [0i32; 1];
        archive::read_header(&map, 0, &TAIL_MAGIC, &mut sizes)?;
        let suffix_size = sizes[0];
        let suffix_at = archive::HEADER_LEN;
        let suffix = Region::new(Arc::clone(&map), suffix_at, usize::from_i32(suffix_size))?;
        let trie_at = suffix_at + archive::cells_to_bytes(suffix_size);
        let (trie, _) = BasicTrie::from_map(map, trie_at)?;
        Ok(Self {
            trie,
            suffix: Cells::Mapped(suffix),
            next_suffix: suffix_size,
        })
    }

    /// アーカイブファイルからトライを読み込みます。
    ///
    /// # エラー
    ///
    /// ファイルが開けない場合、マジックが一致しない場合、または
    /// ファイルが切り詰められている場合は
    /// [`XtrieError::BadTrieArchive`](crate::errors::XtrieError)を返します。
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_map(archive::map_file(path.as_ref())?)
    }

    /// 接尾辞バッファへセルを1つ書き足します。
    fn push_suffix(&mut self, cell: i32) {
        let at = usize::from_i32(self.next_suffix);
        if at + 1 >= self.suffix.len() {
            let nsize = aligned_grow(self.suffix.len() as i32, 1);
            self.suffix.grow(usize::from_i32(nsize));
        }
        self.suffix.set(at, cell);
        self.next_suffix += 1;
    }

    /// 状態`s`を分離状態にして、残りのキーと値を接尾辞バッファへ移します。
    fn insert_suffix(&mut self, s: StateId, rest: &[Symbol], value: Value) {
        self.trie.set_base(s, -self.next_suffix);
        for &ch in rest {
            self.push_suffix(ch);
        }
        self.push_suffix(value);
    }

    /// 分離状態`s`で格納済みの尾部と新しいキーが食い違ったときの分岐処理。
    ///
    /// 共通部分をトライ側の遷移に掘り下げ、古い尾部は分岐点以降を
    /// バッファ内でそのまま再利用し、新しい尾部だけを書き足します。
    fn create_branch(&mut self, s: StateId, rest: &[Symbol], value: Value) {
        let mut start = usize::from_i32(-self.trie.base(s));
        let mut common = Vec::new();
        let mut ext = Extremum::default();
        let mut i = 0;

        // longest common prefix of the stored tail and the remaining key
        while i < rest.len() {
            let ch = rest[i];
            if self.suffix.get(start) != ch {
                break;
            }
            common.push(ch);
            ext.note(ch);
            start += 1;
            i += 1;
            if ch == TERMINATOR {
                break;
            }
        }

        // the stored tail equals the remaining key: overwrite the value
        if common.last() == Some(&TERMINATOR) {
            self.suffix.set(start, value);
            return;
        }

        let mut s = s;
        if common.is_empty() {
            self.trie.set_base(s, 0);
        } else {
            let base = self.trie.find_base(&common, &ext);
            self.trie.set_base(s, base);
            for &ch in &common {
                s = self.trie.create_transition(s, ch, &mut NullRelocator);
            }
        }

        // twig for the rest of the stored tail, reused in place
        let t = self
            .trie
            .create_transition(s, self.suffix.get(start), &mut NullRelocator);
        self.trie.set_base(t, -(start as StateId + 1));

        // twig for the new tail
        let t = self.trie.create_transition(s, rest[i], &mut NullRelocator);
        if rest[i] == TERMINATOR {
            self.trie.set_base(t, -self.next_suffix);
            self.push_suffix(value);
        } else {
            self.insert_suffix(t, &rest[i + 1..], value);
        }
    }

    /// キーに値を対応付けます。既存のキーに対しては値を上書きします。
    ///
    /// # パニック
    ///
    /// アーカイブから読み込んだトライに対して呼ぶとパニックします。
    pub fn insert(&mut self, key: &Key, value: Value) {
        assert!(
            self.trie.is_owned(),
            "cannot insert into an archive-backed trie"
        );
        let symbols = key.symbols();
        let (s, mismatch) = self.trie.walk(1, symbols);
        if self.trie.base(s) < 0 {
            match mismatch {
                Some(pos) => self.create_branch(s, &symbols[pos..], value),
                None => {
                    // duplicated key: the value cell sits right at the tail start
                    let k = usize::from_i32(-self.trie.base(s));
                    self.suffix.set(k, value);
                }
            }
        } else {
            let pos = match mismatch {
                Some(pos) => pos,
                None => unreachable!("complete keys always end at a separated state"),
            };
            let t = self
                .trie
                .create_transition(s, symbols[pos], &mut NullRelocator);
            if symbols[pos] == TERMINATOR {
                self.trie.set_base(t, -self.next_suffix);
                self.push_suffix(value);
            } else {
                self.insert_suffix(t, &symbols[pos + 1..], value);
            }
        }
    }

    /// キーに対応付けられた値を検索します。
    pub fn search(&self, key: &Key) -> Option<Value> {
        let symbols = key.symbols();
        let (s, mismatch) = self.trie.walk(1, symbols);
        if self.trie.base(s) >= 0 {
            return None;
        }
        let mut at = usize::from_i32(-self.trie.base(s));
        if let Some(pos) = mismatch {
            for &ch in &symbols[pos..] {
                if self.suffix.get(at) != ch {
                    return None;
                }
                at += 1;
            }
        }
        Some(self.suffix.get(at))
    }

    /// 指定した接頭辞を持つすべてのキーと値を列挙します。
    pub fn prefix_search(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Value)> {
        let symbols: Vec<Symbol> = prefix.iter().map(|&b| key::encode_byte(b)).collect();
        let (s, mismatch) = self.trie.walk(1, &symbols);
        let mut results = Vec::new();
        match mismatch {
            Some(pos) if self.trie.base(s) < 0 => {
                // the prefix continues into a stored tail
                let mut at = usize::from_i32(-self.trie.base(s));
                for &ch in &symbols[pos..] {
                    if self.suffix.get(at) != ch {
                        return results;
                    }
                    at += 1;
                }
                results.push(self.tail_record(&symbols[..pos], -self.trie.base(s)));
            }
            None => {
                let mut path = symbols;
                self.collect(s, &mut path, &mut results);
            }
            _ => {}
        }
        results
    }

    /// トライ側の経路と格納済み尾部からレコードを復元します。
    fn tail_record(&self, path: &[Symbol], k: StateId) -> (Vec<u8>, Value) {
        let mut full = path.to_vec();
        let mut at = usize::from_i32(k);
        loop {
            let ch = self.suffix.get(at);
            at += 1;
            if ch == TERMINATOR {
                break;
            }
            full.push(ch);
        }
        (key::decode(&full), self.suffix.get(at))
    }

    fn collect(&self, s: StateId, path: &mut Vec<Symbol>, results: &mut Vec<(Vec<u8>, Value)>) {
        if self.trie.base(s) < 0 {
            let k = -self.trie.base(s);
            if path.last() == Some(&TERMINATOR) {
                // the whole key lives in the trie; the tail holds the value only
                results.push((key::decode(path), self.suffix.get(usize::from_i32(k))));
            } else {
                results.push(self.tail_record(path, k));
            }
            return;
        }
        for ch in 1..=TERMINATOR {
            let t = self.trie.next(s, ch);
            if t >= self.trie.size() {
                break;
            }
            if !self.trie.check_transition(s, t) {
                continue;
            }
            path.push(ch);
            self.collect(t, path, results);
            path.pop();
        }
    }

    fn used_suffix_size(&self) -> i32 {
        if self.suffix.is_owned() {
            self.next_suffix
        } else {
            self.suffix.len() as i32
        }
    }

    /// 現在の内容のスナップショットをアーカイブとして書き出します。
    ///
    /// # 引数
    ///
    /// * `path` - 出力ファイルのパス
    /// * `verbose` - 書き出したテーブルのサイズ内訳を標準エラーへ出力するか
    pub fn build<P: AsRef<Path>>(&self, path: P, verbose: bool) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut wtr = BufWriter::new(file);
        let suffix_size = self.used_suffix_size();
        archive::write_header(&mut wtr, &TAIL_MAGIC, &[suffix_size])?;
        for cell in 0..usize::from_i32(suffix_size) {
            archive::write_cell(&mut wtr, self.suffix.get(cell))?;
        }
        self.trie.write_states(&mut wtr)?;
        wtr.flush()?;

        if verbose {
            let suffix_bytes = archive::cells_to_bytes(suffix_size);
            let trie_bytes = archive::cells_to_bytes(self.trie.used_size() * 2);
            eprintln!(
                "suffix = {}, trie = {}, total = {}",
                pretty_size(suffix_bytes),
                pretty_size(trie_bytes),
                pretty_size(suffix_bytes + trie_bytes)
            );
        }
        Ok(())
    }

    /// 接尾辞バッファの一部を標準エラーへ出力します。デバッグ用です。
    pub fn trace_suffix(&self, start: StateId, count: StateId) {
        let end = (start + count).min(self.used_suffix_size());
        let mut line = String::new();
        for at in start..end {
            let cell = self.suffix.get(usize::from_i32(at));
            if cell == TERMINATOR {
                line.push_str(&format!("[{at}:#]"));
            } else if (1..TERMINATOR).contains(&cell) && key::decode_symbol(cell).is_ascii_graphic()
            {
                line.push_str(&format!("[{}:{}]", at, key::decode_symbol(cell) as char));
            } else {
                line.push_str(&format!("[{at}:{cell:x}]"));
            }
        }
        eprintln!("{line}");
    }

    #[cfg(test)]
    pub(crate) fn trie(&self) -> &BasicTrie {
        &self.trie
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tail_trie(records: &[(&[u8], Value)]) -> TailTrie {
        let mut trie = TailTrie::new(0);
        for &(word, value) in records {
            trie.insert(&Key::from_bytes(word), value);
            trie.trie().assert_unambiguous();
        }
        trie
    }

    #[test]
    fn test_single_key() {
        let trie = tail_trie(&[(b"bachelor", 1)]);
        assert_eq!(trie.search(&Key::from_bytes(b"bachelor")), Some(1));
        assert!(trie.search(&Key::from_bytes(b"bach")).is_none());
        assert!(trie.search(&Key::from_bytes(b"bachelors")).is_none());
    }

    #[test]
    fn test_branch_in_tail() {
        // "back" splits the tail of "bachelor" inside the suffix buffer
        let trie = tail_trie(&[(b"bachelor", 1), (b"back", 2)]);
        assert_eq!(trie.search(&Key::from_bytes(b"bachelor")), Some(1));
        assert_eq!(trie.search(&Key::from_bytes(b"back")), Some(2));
        assert!(trie.search(&Key::from_bytes(b"ba")).is_none());
    }

    #[test]
    fn test_nested_keys() {
        let trie = tail_trie(&[(b"a", 1), (b"ab", 2), (b"abc", 3)]);
        assert_eq!(trie.search(&Key::from_bytes(b"a")), Some(1));
        assert_eq!(trie.search(&Key::from_bytes(b"ab")), Some(2));
        assert_eq!(trie.search(&Key::from_bytes(b"abc")), Some(3));
        assert!(trie.search(&Key::from_bytes(b"abcd")).is_none());
    }

    #[test]
    fn test_nested_keys_reversed() {
        let trie = tail_trie(&[(b"abc", 3), (b"ab", 2), (b"a", 1)]);
        assert_eq!(trie.search(&Key::from_bytes(b"a")), Some(1));
        assert_eq!(trie.search(&Key::from_bytes(b"ab")), Some(2));
        assert_eq!(trie.search(&Key::from_bytes(b"abc")), Some(3));
    }

    #[test]
    fn test_duplicate_overwrites() {
        let mut trie = tail_trie(&[(b"molochize", 7), (b"moldy", 8)]);
        trie.insert(&Key::from_bytes(b"molochize"), 9);
        assert_eq!(trie.search(&Key::from_bytes(b"molochize")), Some(9));
        assert_eq!(trie.search(&Key::from_bytes(b"moldy")), Some(8));
    }

    #[test]
    fn test_empty_key() {
        let trie = tail_trie(&[(b"", 42), (b"a", 1)]);
        assert_eq!(trie.search(&Key::from_bytes(b"")), Some(42));
        assert_eq!(trie.search(&Key::from_bytes(b"a")), Some(1));
    }

    #[test]
    fn test_negative_and_zero_values() {
        let trie = tail_trie(&[(b"\x00\x01\x02", 1), (b"\x00\x01", 0), (b"\x00", -1)]);
        assert_eq!(trie.search(&Key::from_bytes(b"\x00\x01\x02")), Some(1));
        assert_eq!(trie.search(&Key::from_bytes(b"\x00\x01")), Some(0));
        assert_eq!(trie.search(&Key::from_bytes(b"\x00")), Some(-1));
    }

    #[test]
    fn test_prefix_into_tail() {
        let trie = tail_trie(&[(b"inspiration", 1), (b"instant", 2)]);
        // "insp" ends inside the stored tail of "inspiration"
        let results = trie.prefix_search(b"insp");
        assert_eq!(results, vec![(b"inspiration".to_vec(), 1)]);
    }
}

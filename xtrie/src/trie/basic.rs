//! ダブル配列の状態表
//!
//! このモジュールは、トライの遷移をBASE/CHECKの整数対として実装する
//! ダブル配列を提供します。状態`s`から記号`c`での遷移先は`base(s) + c`で、
//! その遷移が有効であるのは`check(base(s) + c) = s`が成り立つときだけです。
//! 状態`1`が固定の根であり、状態`0`はどの遷移の行き先にもなりません。
//!
//! 遷移の追加で衝突が起きた場合は、衝突した側のいずれか安い方の子集合を
//! 空いているBASEへ移設(リロケーション)します。移設はCHECKの張り替えで
//! すべての遷移を保存し、セル番号の変化は[`Relocator`]を通じて
//! 上位層へ通知されます。

use std::io::Write;
use std::sync::Arc;

use memmap2::Mmap;

use crate::archive::{self, Cells, Region};
use crate::common::{aligned_grow, FromI32, StateId, Symbol, Value, DEFAULT_STATE_SIZE};
use crate::errors::Result;
use crate::key::{self, Key, CHARSET_SIZE, TERMINATOR};

/// 状態の移設を監視するリスナー。
///
/// [`BasicTrie`]がリロケーション中にセルを移動するたびに、移動の完了後
/// かつ旧セルの消去前に呼び出されます。サイドテーブルに状態番号を保持する
/// 上位層は、このリスナーで参照を張り替えます。
pub(crate) trait Relocator {
    /// 状態が`from`から`to`へ移動したことを通知します。
    fn relocate(&mut self, trie: &BasicTrie, from: StateId, to: StateId);
}

/// 何もしないリスナー。サイドテーブルを持たない利用者向けです。
pub(crate) struct NullRelocator;

impl Relocator for NullRelocator {
    #[inline(always)]
    fn relocate(&mut self, _trie: &BasicTrie, _from: StateId, _to: StateId) {}
}

/// 遷移記号集合の最大値と最小値。`find_base`の走査を減らすための補助です。
#[derive(Clone, Copy, Default)]
pub(crate) struct Extremum {
    pub(crate) max: Symbol,
    pub(crate) min: Symbol,
}

impl Extremum {
    /// 記号を観測して最大値・最小値を更新します。
    #[inline(always)]
    pub(crate) fn note(&mut self, ch: Symbol) {
        if ch > self.max || self.max == 0 {
            self.max = ch;
        }
        if ch < self.min || self.min == 0 {
            self.min = ch;
        }
    }
}

/// ダブル配列トライ
///
/// BASE/CHECK対の列を所有するか、アーカイブ上の読み取り専用の窓として
/// 重ねるかのいずれかです。アーカイブに重ねたインスタンスは検索専用で、
/// 変更操作はプログラミングエラーとしてパニックします。
pub struct BasicTrie {
    /// BASE/CHECKを交互に並べたセル列。状態`s`はセル`2s`と`2s+1`を使います。
    states: Cells,

    /// 直近に`find_base`が返したBASE値。次回の探索の開始位置になります。
    last_base: StateId,

    /// 使用中の最大状態番号。アーカイブへの書き出し量を決めます。
    max_state: StateId,
}

impl BasicTrie {
    /// 空のダブル配列を生成します。
    ///
    /// # 引数
    ///
    /// * `size` - 状態バッファの初期セル数。アルファベットより小さい場合は
    ///   デフォルトサイズに切り上げられます。
    pub fn new(size: i32) -> Self {
        let size = if size < CHARSET_SIZE {
            DEFAULT_STATE_SIZE
        } else {
            size
        };
        let mut trie = Self {
            states: Cells::zeroed(0),
            last_base: 0,
            max_state: 0,
        };
        trie.resize_state(size);
        trie
    }

    /// アーカイブ上の窓からトライを読み込みます。
    ///
    /// # 引数
    ///
    /// * `map` - アーカイブ全体のマッピング
    /// * `offset` - 埋め込みヘッダの開始オフセット
    ///
    /// # 戻り値
    ///
    /// 読み込んだトライと、後続データの開始オフセット。
    pub(crate) fn from_map(map: Arc<Mmap>, offset: usize) -> Result<(Self, usize)> {
        let size = archive::read_sized_header(&map, offset)?;
        let states_at = offset + archive::HEADER_LEN;
        let region = Region::new(map, states_at, usize::from_i32(size) * 2)?;
        let next = states_at + archive::cells_to_bytes(size * 2);
        Ok((
            Self {
                states: Cells::Mapped(region),
                last_base: 0,
                max_state: size - 1,
            },
            next,
        ))
    }

    /// トライが状態バッファを所有しているかどうかを返します。
    #[inline(always)]
    pub fn is_owned(&self) -> bool {
        self.states.is_owned()
    }

    /// 状態バッファのセル数を返します。
    #[inline(always)]
    pub fn size(&self) -> StateId {
        (self.states.len() / 2) as StateId
    }

    /// 状態`s`のBASE値を返します。
    #[inline(always)]
    pub(crate) fn base(&self, s: StateId) -> i32 {
        self.states.get(usize::from_i32(s) * 2)
    }

    /// 状態`s`のCHECK値を返します。
    #[inline(always)]
    pub(crate) fn check(&self, s: StateId) -> i32 {
        self.states.get(usize::from_i32(s) * 2 + 1)
    }

    #[inline(always)]
    pub(crate) fn set_base(&mut self, s: StateId, val: i32) {
        self.states.set(usize::from_i32(s) * 2, val);
        if s > self.max_state {
            self.max_state = s;
        }
    }

    #[inline(always)]
    pub(crate) fn set_check(&mut self, s: StateId, val: i32) {
        self.states.set(usize::from_i32(s) * 2 + 1, val);
        if s > self.max_state {
            self.max_state = s;
        }
    }

    /// 状態`s`から記号`ch`での遷移先の候補を返します。
    ///
    /// BASEが負の状態や値を格納した状態から呼ばれても飽和せずに
    /// 計算します。結果の妥当性は[`check_transition`](Self::check_transition)
    /// で判定してください。
    #[inline(always)]
    pub(crate) fn next(&self, s: StateId, ch: Symbol) -> StateId {
        self.base(s).wrapping_add(ch)
    }

    /// 状態`s`の親状態を返します。
    #[inline(always)]
    pub(crate) fn prev(&self, s: StateId) -> StateId {
        self.check(s)
    }

    /// `s`から`t`への遷移が存在するかどうかを返します。
    #[inline(always)]
    pub(crate) fn check_transition(&self, s: StateId, t: StateId) -> bool {
        s > 0 && t > 0 && t < self.size() && self.check(t) == s
    }

    /// `s`が記号`ch`によって親から辿られた状態かどうかを返します。
    pub(crate) fn check_reverse_transition(&self, s: StateId, ch: Symbol) -> bool {
        if s <= 0 || s >= self.size() {
            return false;
        }
        let p = self.prev(s);
        if p <= 0 || p >= self.size() {
            return false;
        }
        self.next(p, ch) == s && self.check_transition(p, s)
    }

    /// 根以外も含む任意の状態`s`から記号列に沿って前進します。
    ///
    /// # 戻り値
    ///
    /// 最後に到達した状態と、不一致が起きた記号位置。すべて一致した
    /// 場合は`None`。
    pub(crate) fn walk(&self, mut s: StateId, symbols: &[Symbol]) -> (StateId, Option<usize>) {
        for (i, &ch) in symbols.iter().enumerate() {
            let t = self.next(s, ch);
            if !self.check_transition(s, t) {
                return (s, Some(i));
            }
            s = t;
        }
        (s, None)
    }

    /// 記号列を末尾から読む順で前進します。反転済みの尾部を
    /// 後方トライへ重ねるときに使います。
    pub(crate) fn walk_reverse(&self, mut s: StateId, symbols: &[Symbol]) -> (StateId, Option<usize>) {
        for i in (0..symbols.len()).rev() {
            let ch = symbols[i];
            let t = self.next(s, ch);
            if !self.check_transition(s, t) {
                return (s, Some(i));
            }
            s = t;
        }
        (s, None)
    }

    /// 状態`s`から親方向へ、記号列をラベルとして検証しながら遡ります。
    ///
    /// 各ステップで、現在の状態が先頭の記号によって親から辿られた状態で
    /// あることを確認します。ラベルの一致しない遷移は辿りません。
    pub(crate) fn walk_backward(&self, mut s: StateId, symbols: &[Symbol]) -> (StateId, Option<usize>) {
        for (i, &ch) in symbols.iter().enumerate() {
            if !self.check_reverse_transition(s, ch) {
                return (s, Some(i));
            }
            s = self.prev(s);
        }
        (s, None)
    }

    /// 状態`s`の既存の遷移記号をすべて列挙します。
    pub(crate) fn find_targets(&self, s: StateId) -> (Vec<Symbol>, Extremum) {
        let mut targets = Vec::new();
        let mut ext = Extremum::default();
        for ch in 1..=TERMINATOR {
            let t = self.next(s, ch);
            if t >= self.size() {
                break;
            }
            if self.check_transition(s, t) {
                targets.push(ch);
                ext.note(ch);
            }
        }
        (targets, ext)
    }

    /// 状態`s`の出次数を返します。
    pub(crate) fn out_degree(&self, s: StateId) -> usize {
        let mut degree = 0;
        for ch in 1..=TERMINATOR {
            let t = self.next(s, ch);
            if t >= self.size() {
                break;
            }
            if self.check_transition(s, t) {
                degree += 1;
            }
        }
        degree
    }

    /// `inputs`のすべての記号を収容できる空きBASE値を探します。
    ///
    /// `last_base`の次の値から走査し、必要なら状態バッファを拡張します。
    /// 見つけたBASE値は次回の探索の開始位置として記録されます。
    pub(crate) fn find_base(&mut self, inputs: &[Symbol], ext: &Extremum) -> StateId {
        let mut i = self.last_base;
        'search: loop {
            i += 1;
            if i + ext.max >= self.size() {
                self.resize_state(ext.max);
            }
            if self.check(i + ext.min) <= 0 && self.check(i + ext.max) <= 0 {
                for &ch in inputs {
                    if self.check(i + ch) > 0 {
                        continue 'search;
                    }
                }
                break;
            }
        }
        self.last_base = i;
        i
    }

    /// 状態バッファを拡張します。セルは移動せず、新しい領域はゼロ埋めされます。
    fn resize_state(&mut self, request: i32) {
        let nsize = aligned_grow(self.size(), request);
        self.states.grow(usize::from_i32(nsize) * 2);
    }

    /// 状態`q`の子集合`inputs`を新しいBASEの下へ移設します。
    ///
    /// 子のセルを複製し、孫のCHECKを新しい親へ張り替え、リスナーへ
    /// 通知した後に旧セルを消去します。呼び出し側が立っている状態が
    /// 移動した場合は、新しい番号を返します。
    fn relocate(
        &mut self,
        mut stand: StateId,
        q: StateId,
        inputs: &[Symbol],
        ext: &Extremum,
        rel: &mut dyn Relocator,
    ) -> StateId {
        let obase = self.base(q);
        let nbase = self.find_base(inputs, ext);

        for &ch in inputs {
            let old = obase.wrapping_add(ch);
            if old <= 0 || old >= self.size() || self.check(old) != q {
                // not an existing child (e.g. the symbol being added)
                continue;
            }
            let new = nbase + ch;
            self.set_base(new, self.base(old));
            self.set_check(new, self.check(old));
            // re-parent the grand children
            let (grand, _) = self.find_targets(old);
            for &g in &grand {
                let gc = self.base(old) + g;
                self.set_check(gc, new);
            }
            // if where we are standing is moving, we move with it
            if stand == old {
                stand = new;
            }
            rel.relocate(self, old, new);
            self.set_base(old, 0);
            self.set_check(old, 0);
        }
        self.set_base(q, nbase);

        stand
    }

    /// 状態`s`から記号`ch`の遷移を新設し、遷移先の状態番号を返します。
    ///
    /// 目的のセルが空いていればそのまま要求し、衝突していれば子集合の
    /// 小さい側を移設して場所を空けます。`s`自身が移設で動いた場合も、
    /// 返り値は新しい配置における遷移先です。
    pub(crate) fn create_transition(
        &mut self,
        mut s: StateId,
        ch: Symbol,
        rel: &mut dyn Relocator,
    ) -> StateId {
        let mut t = self.next(s, ch);
        if t >= self.size() {
            self.resize_state(t - self.size() + 1);
        }

        if !(self.base(s) > 0 && self.check(t) <= 0) {
            let (mut targets, mut ext) = self.find_targets(s);
            let parent = if t > 0 && t < self.size() {
                self.check(t)
            } else {
                0
            };
            let (parent_targets, parent_ext) = if parent > 0 {
                self.find_targets(parent)
            } else {
                (Vec::new(), Extremum::default())
            };
            if !parent_targets.is_empty() && targets.len() + 1 > parent_targets.len() {
                // the intruder is cheaper to move
                s = self.relocate(s, parent, &parent_targets, &parent_ext, rel);
            } else {
                targets.push(ch);
                ext.note(ch);
                s = self.relocate(s, s, &targets, &ext, rel);
            }
            t = self.next(s, ch);
            if t >= self.size() {
                self.resize_state(t - self.size() + 1);
            }
        }
        self.set_check(t, s);

        t
    }

    /// キーに値を対応付けます。
    ///
    /// 既存のキーに対しては値を上書きします。この表は終端状態のBASEに
    /// 値をそのまま格納するため、値は1以上でなければなりません。
    ///
    /// # パニック
    ///
    /// `value`が1未満の場合、またはアーカイブに重ねたトライに対して
    /// 呼ばれた場合はパニックします。
    pub fn insert(&mut self, key: &Key, value: Value) {
        assert!(value >= 1, "basic trie values must be greater than zero");
        let symbols = key.symbols();
        let (mut s, mismatch) = self.walk(1, symbols);
        if let Some(pos) = mismatch {
            for &ch in &symbols[pos..] {
                s = self.create_transition(s, ch, &mut NullRelocator);
            }
        }
        self.set_base(s, value);
    }

    /// キーに対応付けられた値を検索します。
    pub fn search(&self, key: &Key) -> Option<Value> {
        let (s, mismatch) = self.walk(1, key.symbols());
        if mismatch.is_some() {
            return None;
        }
        Some(self.base(s))
    }

    /// 指定した接頭辞を持つすべてのキーと値を列挙します。
    pub fn prefix_search(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Value)> {
        let symbols: Vec<Symbol> = prefix.iter().map(|&b| key::encode_byte(b)).collect();
        let (s, mismatch) = self.walk(1, &symbols);
        let mut results = Vec::new();
        if mismatch.is_some() {
            return results;
        }
        let mut path = symbols;
        self.collect_suffixes(s, &mut path, &mut results);
        results
    }

    fn collect_suffixes(
        &self,
        s: StateId,
        path: &mut Vec<Symbol>,
        results: &mut Vec<(Vec<u8>, Value)>,
    ) {
        for ch in 1..=TERMINATOR {
            let t = self.next(s, ch);
            if t >= self.size() {
                break;
            }
            if !self.check_transition(s, t) {
                continue;
            }
            if ch == TERMINATOR {
                results.push((key::decode(path), self.base(t)));
            } else {
                path.push(ch);
                self.collect_suffixes(t, path, results);
                path.pop();
            }
        }
    }

    /// 実際に使用されている状態数を返します。アーカイブにはこの分だけが
    /// 書き出されます。
    pub(crate) fn used_size(&self) -> StateId {
        if self.states.is_owned() {
            self.max_state + 1
        } else {
            self.size()
        }
    }

    /// 埋め込みヘッダと使用中の状態セルを書き出します。
    pub(crate) fn write_states<W: Write>(&self, wtr: &mut W) -> std::io::Result<()> {
        let used = self.used_size();
        archive::write_sized_header(wtr, used)?;
        for cell in 0..usize::from_i32(used) * 2 {
            archive::write_cell(wtr, self.states.get(cell))?;
        }
        Ok(())
    }

    /// 状態`s`から到達できる遷移の連鎖を標準エラーへ出力します。
    ///
    /// デバッグ用です。葉に到達するたびに、そこまでの経路を
    /// `状態[BASE]`の列とラベルで1行にして印字します。
    pub fn trace(&self, s: StateId) {
        let mut stack = Vec::new();
        self.trace_from(s, &mut stack);
    }

    fn trace_from(&self, s: StateId, stack: &mut Vec<StateId>) {
        stack.push(s);
        let (targets, _) = self.find_targets(s);
        if targets.is_empty() {
            let mut line = String::new();
            let mut prev_base = 0;
            for (k, &state) in stack.iter().enumerate() {
                if k > 0 {
                    let ch = state - prev_base;
                    if ch == TERMINATOR {
                        line.push_str("-#->");
                    } else {
                        let byte = key::decode_symbol(ch);
                        if byte.is_ascii_graphic() {
                            line.push_str(&format!("-'{}'->", byte as char));
                        } else {
                            line.push_str(&format!("-<{byte:02x}>->"));
                        }
                    }
                }
                line.push_str(&format!("{}[{}]", state, self.base(state)));
                prev_base = self.base(state);
            }
            eprintln!("transition => {}", line);
        } else {
            for &ch in &targets {
                let t = self.next(s, ch);
                if t < self.size() {
                    self.trace_from(t, stack);
                }
            }
        }
        stack.pop();
    }

    /// 状態表のセル番号がただ一通りに復号できることを検査します。
    #[cfg(test)]
    pub(crate) fn assert_unambiguous(&self) {
        for t in 2..self.size() {
            if self.check(t) > 0 {
                let s = self.check(t);
                let ch = t - self.base(s);
                assert!(
                    (1..=TERMINATOR).contains(&ch),
                    "state {} is not decodable from its parent {}",
                    t,
                    s
                );
            }
        }
    }
}

impl Clone for BasicTrie {
    /// 所有コピーを作ります。アーカイブに重ねたトライからの複製は
    /// セルのコピーとなり、以後は変更できます。
    fn clone(&self) -> Self {
        Self {
            states: self.states.to_owned_cells(),
            last_base: self.last_base,
            max_state: self.max_state,
        }
    }
}

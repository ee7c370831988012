//! 前方・後方の2つのトライによる圧縮
//!
//! このモジュールは、共通の接頭辞を前方トライで、共通の接尾辞を
//! 反転した後方トライで共有するトライを提供します。前方トライの
//! 状態`s`のBASEが負値`-i`であることが分離状態を表し、`index[i]`が
//! キーの値と受理スロットを持ちます。受理スロット`accept[j]`は後方
//! トライの状態を指し、キーの残り部分を反転した列が、その状態から
//! 後方トライの根まで遡る経路のラベルになります。
//!
//! 後方トライの状態はキー間で共有されるため、ひとつの受理状態を
//! 複数の分離状態が参照できます。構築中は`refer`表がその逆引き
//! (受理状態→参照元の集合)を保持し、リロケーションのリスナーが
//! この表と受理テーブルを追従させます。

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use memmap2::Mmap;

use crate::archive::{self, Cells, Region};
use crate::common::{aligned_grow, pretty_size, FromI32, StateId, Symbol, Value, DEFAULT_STATE_SIZE};
use crate::errors::Result;
use crate::key::{self, Key, TERMINATOR};
use crate::trie::basic::{BasicTrie, Relocator};

/// 二重トライ方式のアーカイブを識別するマジックバイト。
pub(crate) const TWO_MAGIC: [u8; 16] = *b"TWO_TRIE\0\0\0\0\0\0\0\0";

/// 後方トライの掃除で許す再帰の深さ。
///
/// 掃除は出次数と参照数が単調に減ることでしか停止が保証されないため、
/// 深さに上限を置いて打ち切ります。打ち切っても構造は有効なままで、
/// 後方トライに使われないセルが残るだけです。
const REAR_CLEAN_DEPTH_LIMIT: usize = 1024;

/// 受理状態ひとつ分の逆引き情報。
struct Refer {
    /// この受理状態を指す受理スロットの番号。
    accept_ix: StateId,

    /// この受理状態に連結されている前方の分離状態の集合。
    referers: HashSet<StateId>,
}

/// 分離状態と受理状態をつなぐサイドテーブルの一式。
///
/// 後方トライのリロケーションに立ち会うため、進行中の操作が
/// 監視している状態番号もここに置きます。
struct LinkTables {
    /// 分離状態ごとの`(値, 受理スロット)`対。2セルで1エントリです。
    index: Cells,

    /// 受理スロットごとの後方トライの状態番号。
    accept: Cells,

    /// 受理状態から参照元への逆引き。構築中にだけ維持されます。
    refer: HashMap<StateId, Refer>,

    /// 解放された索引スロットのFIFO。
    free_index: VecDeque<StateId>,

    /// 解放された受理スロットのFIFO。
    free_accept: VecDeque<StateId>,

    /// 次に割り当てる索引スロット。
    next_index: StateId,

    /// 次に割り当てる受理スロット。
    next_accept: StateId,

    /// 進行中の操作が立っている後方トライの状態。リロケーションで追従します。
    watchers: [StateId; 2],
}

impl LinkTables {
    #[inline(always)]
    fn data(&self, i: StateId) -> Value {
        self.index.get(usize::from_i32(i) * 2)
    }

    #[inline(always)]
    fn set_data(&mut self, i: StateId, value: Value) {
        self.index.set(usize::from_i32(i) * 2, value);
    }

    #[inline(always)]
    fn accept_ix(&self, i: StateId) -> StateId {
        self.index.get(usize::from_i32(i) * 2 + 1)
    }

    #[inline(always)]
    fn set_accept_ix(&mut self, i: StateId, j: StateId) {
        self.index.set(usize::from_i32(i) * 2 + 1, j);
    }

    #[inline(always)]
    fn accept_state(&self, j: StateId) -> StateId {
        self.accept.get(usize::from_i32(j))
    }

    #[inline(always)]
    fn set_accept_state(&mut self, j: StateId, r: StateId) {
        debug_assert!(j > 0);
        self.accept.set(usize::from_i32(j), r);
    }

    fn index_slots(&self) -> StateId {
        (self.index.len() / 2) as StateId
    }

    fn accept_slots(&self) -> StateId {
        self.accept.len() as StateId
    }

    fn ensure_index(&mut self, slot: StateId) {
        if slot >= self.index_slots() {
            let nslots = aligned_grow(slot, 0);
            self.index.grow(usize::from_i32(nslots) * 2);
        }
    }

    fn ensure_accept(&mut self, slot: StateId) {
        if slot >= self.accept_slots() {
            let nslots = aligned_grow(slot, 0);
            self.accept.grow(usize::from_i32(nslots));
        }
    }

    fn count_referer(&self, s: StateId) -> usize {
        self.refer.get(&s).map_or(0, |entry| entry.referers.len())
    }
}

/// 前方トライのリスナー。分離状態の移動を逆引き表へ反映します。
struct FrontRelocator<'a> {
    tables: &'a mut LinkTables,
}

impl Relocator for FrontRelocator<'_> {
    fn relocate(&mut self, trie: &BasicTrie, from: StateId, to: StateId) {
        // a separated state may carry a value with no accept state, in
        // which case its index slot holds a zero and there is nothing
        // to re-point
        if trie.base(from) < 0 {
            let i = -trie.base(from);
            let j = self.tables.accept_ix(i);
            if j > 0 {
                let r = self.tables.accept_state(j);
                if let Some(entry) = self.tables.refer.get_mut(&r) {
                    entry.referers.remove(&from);
                    debug_assert!(trie.base(to) < 0);
                    entry.referers.insert(to);
                }
            }
        }
    }
}

/// 後方トライのリスナー。受理状態の移動を受理テーブルと逆引き表、
/// そして監視中の状態番号へ反映します。
struct RearRelocator<'a> {
    tables: &'a mut LinkTables,
}

impl Relocator for RearRelocator<'_> {
    fn relocate(&mut self, _trie: &BasicTrie, from: StateId, to: StateId) {
        if let Some(entry) = self.tables.refer.remove(&from) {
            self.tables.set_accept_state(entry.accept_ix, to);
            self.tables.refer.insert(to, entry);
        }
        for watcher in self.tables.watchers.iter_mut() {
            if *watcher == from {
                *watcher = to;
            }
        }
    }
}

/// 前方・後方トライの対
///
/// 構築中はすべてのテーブルを所有し、アーカイブから読み込まれた場合は
/// マッピング上の窓を重ねた検索専用のインスタンスになります。逆引き表は
/// 構築にしか使われないため、読み込み時には再構築しません。
pub struct TwoTrie {
    /// 前方トライ。キーの接頭辞側を保持します。
    front: BasicTrie,

    /// 後方トライ。キーの接尾辞側を反転して保持します。
    rear: BasicTrie,

    /// 分離状態と受理状態をつなぐサイドテーブル。
    tables: LinkTables,
}

impl TwoTrie {
    /// 空のトライを生成します。
    pub fn new(size: i32) -> Self {
        let slots = if size > 0 { size } else { DEFAULT_STATE_SIZE };
        Self {
            front: BasicTrie::new(size),
            rear: BasicTrie::new(size),
            tables: LinkTables {
                index: Cells::zeroed(usize::from_i32(slots) * 2),
                accept: Cells::zeroed(usize::from_i32(slots)),
                refer: HashMap::new(),
                free_index: VecDeque::new(),
                free_accept: VecDeque::new(),
                next_index: 1,
                next_accept: 1,
                watchers: [0; 2],
            },
        }
    }

    /// アーカイブのマッピングからトライを読み込みます。
    pub(crate) fn from_map(map: Arc<Mmap>) -> Result<Self> {
        let mut sizes = [0i32; 2];
        archive::read_header(&map, 0, &TWO_MAGIC, &mut sizes)?;
        let (index_size, accept_size) = (sizes[0], sizes[1]);

        let index_at = archive::HEADER_LEN;
        let index = Region::new(Arc::clone(&map), index_at, usize::from_i32(index_size) * 2)?;
        let accept_at = index_at + archive::cells_to_bytes(index_size * 2);
        let accept = Region::new(Arc::clone(&map), accept_at, usize::from_i32(accept_size))?;
        let front_at = accept_at + archive::cells_to_bytes(accept_size);
        let (front, rear_at) = BasicTrie::from_map(Arc::clone(&map), front_at)?;
        let (rear, _) = BasicTrie::from_map(map, rear_at)?;

        Ok(Self {
            front,
            rear,
            tables: LinkTables {
                index: Cells::Mapped(index),
                accept: Cells::Mapped(accept),
                refer: HashMap::new(),
                free_index: VecDeque::new(),
                free_accept: VecDeque::new(),
                next_index: index_size,
                next_accept: accept_size,
                watchers: [0; 2],
            },
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

    /// 前方トライで遷移を新設します。リロケーションはサイドテーブルへ反映されます。
    fn front_create(&mut self, s: StateId, ch: Symbol) -> StateId {
        self.front.create_transition(
            s,
            ch,
            &mut FrontRelocator {
                tables: &mut self.tables,
            },
        )
    }

    /// 後方トライで遷移を新設します。リロケーションはサイドテーブルへ反映されます。
    fn rear_create(&mut self, s: StateId, ch: Symbol) -> StateId {
        self.rear.create_transition(
            s,
            ch,
            &mut RearRelocator {
                tables: &mut self.tables,
            },
        )
    }

    /// 状態`s`が分離状態かどうかを返します。
    #[inline(always)]
    fn is_separator(&self, s: StateId) -> bool {
        self.front.base(s) < 0
    }

    /// 分離状態`s`に連結された後方トライの受理状態を返します。
    ///
    /// 値だけを持つ分離状態では受理スロットが0であり、その場合は
    /// 0を返します。
    fn link_state(&self, s: StateId) -> StateId {
        self.tables
            .accept_state(self.tables.accept_ix(-self.front.base(s)))
    }

    /// 状態`s`の索引スロットを返します。未割り当てなら確保します。
    fn find_index_entry(&mut self, s: StateId) -> StateId {
        if self.front.base(s) >= 0 {
            let slot = match self.tables.free_index.pop_front() {
                Some(slot) => slot,
                None => {
                    let slot = self.tables.next_index;
                    self.tables.next_index += 1;
                    slot
                }
            };
            self.tables.ensure_index(slot);
            debug_assert_eq!(self.tables.accept_ix(slot), 0);
            self.front.set_base(s, -slot);
        }
        -self.front.base(s)
    }

    /// 索引スロット`i`の受理スロットを返します。未割り当てなら確保します。
    fn find_accept_entry(&mut self, i: StateId) -> StateId {
        if self.tables.accept_ix(i) == 0 {
            let slot = match self.tables.free_accept.pop_front() {
                Some(slot) => slot,
                None => {
                    let slot = self.tables.next_accept;
                    self.tables.next_accept += 1;
                    slot
                }
            };
            self.tables.ensure_accept(slot);
            self.tables.set_accept_ix(i, slot);
        }
        self.tables.accept_ix(i)
    }

    /// 分離状態`s`を後方トライの状態`t`へ連結します。
    ///
    /// `t`が既に受理状態であればその受理スロットを共有し、そうで
    /// なければスロットを確保して`t`を新しい受理状態にします。
    /// いずれの場合も`s`は`t`の参照元として登録されます。
    ///
    /// # 戻り値
    ///
    /// `s`の索引スロット。
    fn set_link(&mut self, s: StateId, t: StateId) -> StateId {
        let i = self.find_index_entry(s);
        let shared = self
            .tables
            .refer
            .get(&t)
            .is_some_and(|entry| !entry.referers.is_empty());
        if shared {
            let j = self.tables.refer[&t].accept_ix;
            self.tables.set_accept_ix(i, j);
        } else {
            let j = self.find_accept_entry(i);
            self.tables.set_accept_state(j, t);
            debug_assert!(j > 0 && j < self.tables.accept_slots());
            match self.tables.refer.get_mut(&t) {
                Some(entry) => entry.accept_ix = j,
                None => {
                    self.tables.refer.insert(
                        t,
                        Refer {
                            accept_ix: j,
                            referers: HashSet::new(),
                        },
                    );
                }
            }
        }
        debug_assert!(self.front.base(s) < 0);
        if let Some(entry) = self.tables.refer.get_mut(&t) {
            entry.referers.insert(s);
        }
        i
    }

    fn count_referer(&self, s: StateId) -> usize {
        self.tables.count_referer(s)
    }

    /// 受理状態`s`の受理スロットを解放し、逆引きから取り除きます。
    ///
    /// 参照元が残っている場合はスロットを解放しません。そのスロットは
    /// 参照元の付け替えで別の受理状態に引き継がれています。
    fn free_accept_entry(&mut self, s: StateId) {
        if let Some(entry) = self.tables.refer.get(&s) {
            if s > 0 && entry.referers.is_empty() {
                let j = entry.accept_ix;
                if j > 0 && j < self.tables.accept_slots() {
                    self.tables.set_accept_state(j, 0);
                    self.tables.free_accept.push_back(j);
                }
            }
            self.tables.refer.remove(&s);
        }
    }

    /// 後方トライから受理状態を取り除きます。
    fn remove_accept_state(&mut self, s: StateId) {
        debug_assert!(s > 0);
        self.rear.set_base(s, 0);
        self.rear.set_check(s, 0);
        self.free_accept_entry(s);
    }

    /// 反転した尾部を後方トライへ重ね、受理状態を返します。
    ///
    /// 尾部全体が既存の経路と一致した場合、到達状態が葉ならそれを
    /// そのまま受理状態とし、葉でなければ終端記号の遷移で受理を
    /// 区別します。途中で食い違った場合は、食い違い点が受理状態で
    /// あれば先に終端記号の遷移へ参照元を退避してから、残りの記号の
    /// 経路を作り足します。
    fn rhs_append(&mut self, tail: &[Symbol]) -> StateId {
        let (s, mismatch) = self.rear.walk_reverse(1, tail);
        let Some(mut pos) = mismatch else {
            if self.rear.out_degree(s) == 0 {
                return s;
            }
            let t = self.rear.next(s, TERMINATOR);
            if !self.rear.check_transition(s, t) {
                return self.rear_create(s, TERMINATOR);
            }
            return t;
        };

        let mut s = s;
        if self.rear.out_degree(s) == 0 {
            // the mismatch state accepts some keys; give them their own
            // terminator branch before extending the path
            let t = self.rear_create(s, TERMINATOR);
            s = self.rear.prev(t);
            let referers: Vec<StateId> = self
                .tables
                .refer
                .get(&s)
                .map(|entry| entry.referers.iter().copied().collect())
                .unwrap_or_default();
            for q in referers {
                self.set_link(q, t);
            }
            self.free_accept_entry(s);
        }
        loop {
            s = self.rear_create(s, tail[pos]);
            if pos == 0 {
                break;
            }
            pos -= 1;
        }
        s
    }

    /// 前方トライ側の挿入。残りのキーを新しい分離状態と後方の尾部に分けます。
    fn lhs_insert(&mut self, s: StateId, rest: &[Symbol], value: Value) {
        let t = self.front_create(s, rest[0]);
        let acc = self.rhs_append(&rest[1..]);
        let i = self.set_link(t, acc);
        self.tables.set_data(i, value);
    }

    /// 葉になった受理状態をひとつだけ取り除きます。
    fn rhs_clean_one(&mut self, t: StateId) -> bool {
        debug_assert!(self.rear.check(t) > 0);
        let s = self.rear.prev(t);
        if s > 0 && t == self.rear.next(s, TERMINATOR) && self.count_referer(t) == 0 {
            self.remove_accept_state(t);
            return true;
        }
        false
    }

    /// 使われなくなった後方トライの経路を親方向へ掃除します。
    ///
    /// 参照も子も持たない状態を取り除いて親へ遡り、唯一の子が終端記号の
    /// 遷移だけになった状態は、その子の参照元を引き取って子を取り除きます。
    fn rhs_clean_more(&mut self, t: StateId, depth: usize) {
        debug_assert!(t > 0);
        if depth >= REAR_CLEAN_DEPTH_LIMIT {
            log::warn!("rear cleanup exceeded depth {REAR_CLEAN_DEPTH_LIMIT}, leaving the rest in place");
            debug_assert!(depth < REAR_CLEAN_DEPTH_LIMIT);
            return;
        }
        if self.rear.out_degree(t) == 0 && self.count_referer(t) == 0 {
            let s = self.rear.prev(t);
            self.remove_accept_state(t);
            if s > 0 {
                self.rhs_clean_more(s, depth + 1);
            }
        } else if self.rear.out_degree(t) == 1 {
            let r = self.rear.next(t, TERMINATOR);
            if self.rear.check_transition(t, r) {
                // the terminator branch is no longer needed to tell the
                // accepts apart; fold it back into its parent
                let referers: Vec<StateId> = self
                    .tables
                    .refer
                    .get(&r)
                    .map(|entry| entry.referers.iter().copied().collect())
                    .unwrap_or_default();
                for q in referers {
                    self.set_link(q, t);
                }
                let j = self.tables.refer.get(&t).map_or(0, |entry| entry.accept_ix);
                if let Some(entry) = self.tables.refer.get_mut(&r) {
                    if entry.accept_ix != j {
                        // the migration moved everybody onto a slot of
                        // their own; retire the abandoned one
                        entry.referers.clear();
                    }
                }
                if j > 0 {
                    self.tables.set_accept_state(j, t);
                }
                self.remove_accept_state(r);
            }
        }
    }

    /// 後方トライ側の挿入。格納済みのキーと新しいキーを分離し直します。
    ///
    /// `matched`は後方側で一致した記号列(前方の遷移になります)、
    /// `remain`は新しいキーの残り、`ch`は格納済みのキーの分岐記号です。
    fn rhs_insert(
        &mut self,
        s: StateId,
        r: StateId,
        matched: &[Symbol],
        remain: &[Symbol],
        ch: Symbol,
        value: Value,
    ) {
        // R-1: unlink the separated state and retire its index slot
        let u = self.link_state(s);
        let i_old = -self.front.base(s);
        let oval = self.tables.data(i_old);
        self.tables.set_accept_ix(i_old, 0);
        self.tables.set_data(i_old, 0);
        self.tables.free_index.push_back(i_old);
        self.front.set_base(s, 0);
        self.tables.watchers = [r, u];
        if u > 0 {
            if let Some(entry) = self.tables.refer.get_mut(&u) {
                entry.referers.remove(&s);
            }
            if self.count_referer(u) == 0 {
                self.free_accept_entry(u);
            }
        }

        // R-2: the symbols matched on the rear side become front
        // transitions, and the new key gets its own twig
        let mut s = s;
        for &c in matched {
            s = self.front_create(s, c);
        }
        let t = self.front_create(s, remain[0]);
        let s = self.front.prev(t);
        if remain[0] == TERMINATOR {
            // no rear remainder: the slot carries the value alone
            let i = self.find_index_entry(t);
            self.tables.set_data(i, value);
        } else {
            let acc = self.rhs_append(&remain[1..]);
            let i = self.set_link(t, acc);
            self.tables.set_data(i, value);
        }

        // R-3: give the stored key its own twig and isolate its rear accept
        let t = self.front_create(s, ch);
        let stand = self.tables.watchers[0];
        let v = self.rear.prev(stand);
        let r2 = if !self.rear.check_transition(v, self.rear.next(v, TERMINATOR)) {
            self.rear_create(v, TERMINATOR)
        } else {
            self.rear.next(v, TERMINATOR)
        };
        let i = self.set_link(t, r2);
        self.tables.set_data(i, oval);

        // R-4: shrink what is left of the old rear accept path
        let u = self.tables.watchers[1];
        if u > 0 {
            if !self.rhs_clean_one(u) {
                self.rhs_clean_more(u, 0);
            }
        }
    }

    /// キーに値を対応付けます。既存のキーに対しては値を上書きします。
    ///
    /// # パニック
    ///
    /// アーカイブから読み込んだトライに対して呼ぶとパニックします。
    pub fn insert(&mut self, key: &Key, value: Value) {
        assert!(
            self.front.is_owned(),
            "cannot insert into an archive-backed trie"
        );
        let symbols = key.symbols();
        let (s, mismatch) = self.front.walk(1, symbols);

        if !self.is_separator(s) {
            let pos = match mismatch {
                Some(pos) => pos,
                None => unreachable!("complete keys always end at a separated state"),
            };
            self.lhs_insert(s, &symbols[pos..], value);
            return;
        }
        let Some(pos) = mismatch else {
            // the key is already present with an empty rear remainder
            let i = -self.front.base(s);
            self.tables.set_data(i, value);
            return;
        };

        // skip the dummy terminator unless it hangs off the rear root
        let mut r = self.link_state(s);
        if self.rear.check_reverse_transition(r, TERMINATOR) && self.rear.prev(r) > 1 {
            r = self.rear.prev(r);
        }

        // travel the rear side backwards as far as the key matches it
        let mut matched = Vec::new();
        let mut p = pos;
        while p < symbols.len() {
            let c = symbols[p];
            if !self.rear.check_reverse_transition(r, c) {
                break;
            }
            r = self.rear.prev(r);
            matched.push(c);
            p += 1;
            if c == TERMINATOR {
                break;
            }
        }
        if r == 1 {
            // reached the rear root: the whole key is already present
            let i = -self.front.base(s);
            self.tables.set_data(i, value);
            return;
        }
        debug_assert!(r > 0 && p < symbols.len());
        let mismatch_ch = r - self.rear.base(self.rear.prev(r));
        self.rhs_insert(s, r, &matched, &symbols[p..], mismatch_ch, value);
    }

    /// キーに対応付けられた値を検索します。
    pub fn search(&self, key: &Key) -> Option<Value> {
        let symbols = key.symbols();
        let (s, mismatch) = self.front.walk(1, symbols);
        if !self.is_separator(s) {
            return None;
        }
        let i = -self.front.base(s);
        let Some(pos) = mismatch else {
            return Some(self.tables.data(i));
        };
        let mut r = self.link_state(s);
        // skip the dummy terminator; a terminator edge at the rear root
        // is the remainder itself and has to be consumed by the walk
        if self.rear.check_reverse_transition(r, TERMINATOR) && self.rear.prev(r) > 1 {
            r = self.rear.prev(r);
        }
        let (r, _) = self.rear.walk_backward(r, &symbols[pos..]);
        if r == 1 {
            Some(self.tables.data(i))
        } else {
            None
        }
    }

    /// 受理状態から後方トライの根まで遡り、キーの残り部分を復元します。
    fn rear_tail(&self, mut r: StateId) -> Vec<Symbol> {
        let mut symbols = Vec::new();
        if self.rear.check_reverse_transition(r, TERMINATOR) && self.rear.prev(r) > 1 {
            r = self.rear.prev(r);
        }
        while r > 1 && r < self.rear.size() {
            let p = self.rear.prev(r);
            if p <= 0 {
                break;
            }
            symbols.push(r - self.rear.base(p));
            r = p;
        }
        symbols
    }

    /// 分離状態`s`までの前方経路からレコードを復元します。
    fn reconstruct(&self, path: &[Symbol], s: StateId) -> (Vec<u8>, Value) {
        let i = -self.front.base(s);
        let data = self.tables.data(i);
        let mut symbols = path.to_vec();
        if symbols.last() != Some(&TERMINATOR) {
            // the front path ends short of the terminator: the rest of
            // the key lives on the rear side
            symbols.extend(self.rear_tail(self.link_state(s)));
        }
        (key::decode(&symbols), data)
    }

    fn collect_front(&self, s: StateId, path: &mut Vec<Symbol>, results: &mut Vec<(Vec<u8>, Value)>) {
        if self.is_separator(s) {
            results.push(self.reconstruct(path, s));
            return;
        }
        for ch in 1..=TERMINATOR {
            let t = self.front.next(s, ch);
            if t >= self.front.size() {
                break;
            }
            if !self.front.check_transition(s, t) {
                continue;
            }
            path.push(ch);
            self.collect_front(t, path, results);
            path.pop();
        }
    }

    /// 指定した接頭辞を持つすべてのキーと値を列挙します。
    pub fn prefix_search(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Value)> {
        let symbols: Vec<Symbol> = prefix.iter().map(|&b| key::encode_byte(b)).collect();
        let (s, mismatch) = self.front.walk(1, &symbols);
        let mut results = Vec::new();
        match mismatch {
            None => {
                let mut path = symbols;
                self.collect_front(s, &mut path, &mut results);
            }
            Some(pos) if self.is_separator(s) => {
                // the prefix continues onto the rear side
                let mut r = self.link_state(s);
                if self.rear.check_reverse_transition(r, TERMINATOR) && self.rear.prev(r) > 1 {
                    r = self.rear.prev(r);
                }
                let (_, mis) = self.rear.walk_backward(r, &symbols[pos..]);
                if mis.is_none() {
                    results.push(self.reconstruct(&symbols[..pos], s));
                }
            }
            Some(_) => {}
        }
        results
    }

    fn used_index_size(&self) -> i32 {
        if self.tables.index.is_owned() {
            self.tables.next_index
        } else {
            self.tables.index_slots()
        }
    }

    fn used_accept_size(&self) -> i32 {
        if self.tables.accept.is_owned() {
            self.tables.next_accept
        } else {
            self.tables.accept_slots()
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
        let index_size = self.used_index_size();
        let accept_size = self.used_accept_size();
        archive::write_header(&mut wtr, &TWO_MAGIC, &[index_size, accept_size])?;
        for cell in 0..usize::from_i32(index_size) * 2 {
            archive::write_cell(&mut wtr, self.tables.index.get(cell))?;
        }
        for cell in 0..usize::from_i32(accept_size) {
            archive::write_cell(&mut wtr, self.tables.accept.get(cell))?;
        }
        self.front.write_states(&mut wtr)?;
        self.rear.write_states(&mut wtr)?;
        wtr.flush()?;

        if verbose {
            let index_bytes = archive::cells_to_bytes(index_size * 2);
            let accept_bytes = archive::cells_to_bytes(accept_size);
            let front_bytes = archive::cells_to_bytes(self.front.used_size() * 2);
            let rear_bytes = archive::cells_to_bytes(self.rear.used_size() * 2);
            eprintln!(
                "index = {}, accept = {}, front = {}, rear = {}, total = {}",
                pretty_size(index_bytes),
                pretty_size(accept_bytes),
                pretty_size(front_bytes),
                pretty_size(rear_bytes),
                pretty_size(index_bytes + accept_bytes + front_bytes + rear_bytes)
            );
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn front_trie(&self) -> &BasicTrie {
        &self.front
    }

    #[cfg(test)]
    pub(crate) fn rear_trie(&self) -> &BasicTrie {
        &self.rear
    }

    /// 受理テーブルと逆引き表の整合性を検査します。
    #[cfg(test)]
    pub(crate) fn assert_refer_consistency(&self) {
        let mut by_slot: HashMap<StateId, HashSet<StateId>> = HashMap::new();
        for s in 1..self.front.size() {
            if self.front.check(s) <= 0 && s != 1 {
                continue;
            }
            if self.front.base(s) < 0 {
                let j = self.tables.accept_ix(-self.front.base(s));
                if j > 0 {
                    by_slot.entry(j).or_default().insert(s);
                }
            }
        }
        for j in 1..self.used_accept_size() {
            let r = self.tables.accept_state(j);
            if r == 0 {
                continue;
            }
            let entry = self
                .tables
                .refer
                .get(&r)
                .unwrap_or_else(|| panic!("accept slot {j} names state {r} without a refer entry"));
            assert_eq!(entry.accept_ix, j, "refer entry of state {r} names another slot");
            let expected = by_slot.remove(&j).unwrap_or_default();
            assert_eq!(expected, entry.referers, "referer set of state {r} is stale");
        }
        assert!(by_slot.is_empty(), "some separated states name freed accept slots");
        for &j in &self.tables.free_accept {
            assert_eq!(self.tables.accept_state(j), 0, "free accept slot {j} is still used");
        }
        for &i in &self.tables.free_index {
            assert_eq!(self.tables.accept_ix(i), 0, "free index slot {i} is still linked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_trie(records: &[(&[u8], Value)]) -> TwoTrie {
        let mut trie = TwoTrie::new(0);
        for &(word, value) in records {
            trie.insert(&Key::from_bytes(word), value);
            trie.front_trie().assert_unambiguous();
            trie.rear_trie().assert_unambiguous();
            trie.assert_refer_consistency();
        }
        trie
    }

    #[test]
    fn test_single_key() {
        let trie = two_trie(&[(b"bachelor", 1)]);
        assert_eq!(trie.search(&Key::from_bytes(b"bachelor")), Some(1));
        assert!(trie.search(&Key::from_bytes(b"bach")).is_none());
        assert!(trie.search(&Key::from_bytes(b"bachelors")).is_none());
    }

    #[test]
    fn test_rear_overlap_must_miss() {
        let trie = two_trie(&[(b"OK", 1), (b"Jan", 2)]);
        assert_eq!(trie.search(&Key::from_bytes(b"OK")), Some(1));
        assert_eq!(trie.search(&Key::from_bytes(b"Jan")), Some(2));
        assert!(trie.search(&Key::from_bytes(b"On")).is_none());
    }

    #[test]
    fn test_shared_suffixes() {
        let words: &[&[u8]] = &[
            b"in",
            b"inspiration",
            b"instant",
            b"instrument",
            b"prevision",
            b"precession",
            b"procession",
            b"provision",
        ];
        let records: Vec<(&[u8], Value)> = words
            .iter()
            .enumerate()
            .map(|(i, &w)| (w, i as Value + 1))
            .collect();
        let trie = two_trie(&records);
        for &(word, value) in &records {
            assert_eq!(trie.search(&Key::from_bytes(word)), Some(value));
        }
        assert!(trie.search(&Key::from_bytes(b"vision")).is_none());
        assert!(trie.search(&Key::from_bytes(b"pre")).is_none());
    }

    #[test]
    fn test_nested_keys() {
        let trie = two_trie(&[(b"a", 1), (b"ab", 2), (b"abc", 3)]);
        assert_eq!(trie.search(&Key::from_bytes(b"a")), Some(1));
        assert_eq!(trie.search(&Key::from_bytes(b"ab")), Some(2));
        assert_eq!(trie.search(&Key::from_bytes(b"abc")), Some(3));
        assert!(trie.search(&Key::from_bytes(b"abcd")).is_none());
        assert!(trie.search(&Key::from_bytes(b"")).is_none());
    }

    #[test]
    fn test_nested_keys_reversed() {
        let trie = two_trie(&[(b"abc", 3), (b"ab", 2), (b"a", 1)]);
        assert_eq!(trie.search(&Key::from_bytes(b"a")), Some(1));
        assert_eq!(trie.search(&Key::from_bytes(b"ab")), Some(2));
        assert_eq!(trie.search(&Key::from_bytes(b"abc")), Some(3));
    }

    #[test]
    fn test_duplicate_overwrites() {
        let mut trie = two_trie(&[(b"badge", 4), (b"badger", 5)]);
        trie.insert(&Key::from_bytes(b"badge"), 40);
        trie.assert_refer_consistency();
        assert_eq!(trie.search(&Key::from_bytes(b"badge")), Some(40));
        assert_eq!(trie.search(&Key::from_bytes(b"badger")), Some(5));
    }

    #[test]
    fn test_fold_leaves_no_false_hit() {
        // inserting the shorter key folds the rear accept of "ab" right
        // next to the rear root; extensions must still miss
        let trie = two_trie(&[(b"ab", 1), (b"a", 2)]);
        assert_eq!(trie.search(&Key::from_bytes(b"ab")), Some(1));
        assert_eq!(trie.search(&Key::from_bytes(b"a")), Some(2));
        assert!(trie.search(&Key::from_bytes(b"abx")).is_none());
        assert!(trie.search(&Key::from_bytes(b"ax")).is_none());
        assert!(trie.search(&Key::from_bytes(b"b")).is_none());
    }

    #[test]
    fn test_split_after_fold() {
        let mut trie = two_trie(&[(b"ab", 1), (b"a", 2)]);
        trie.insert(&Key::from_bytes(b"abx"), 9);
        trie.assert_refer_consistency();
        assert_eq!(trie.search(&Key::from_bytes(b"ab")), Some(1));
        assert_eq!(trie.search(&Key::from_bytes(b"a")), Some(2));
        assert_eq!(trie.search(&Key::from_bytes(b"abx")), Some(9));
        assert!(trie.search(&Key::from_bytes(b"abxy")).is_none());
    }

    #[test]
    fn test_empty_key() {
        let trie = two_trie(&[(b"", 42), (b"a", 1)]);
        assert_eq!(trie.search(&Key::from_bytes(b"")), Some(42));
        assert_eq!(trie.search(&Key::from_bytes(b"a")), Some(1));
    }

    #[test]
    fn test_negative_and_zero_values() {
        let trie = two_trie(&[(b"\x00\x01\x02", 1), (b"\x00\x01", 0), (b"\x00", -1)]);
        assert_eq!(trie.search(&Key::from_bytes(b"\x00\x01\x02")), Some(1));
        assert_eq!(trie.search(&Key::from_bytes(b"\x00\x01")), Some(0));
        assert_eq!(trie.search(&Key::from_bytes(b"\x00")), Some(-1));
    }

    #[test]
    fn test_prefix_search() {
        let trie = two_trie(&[
            (b"baby", 1),
            (b"bachelor", 2),
            (b"back", 3),
            (b"badge", 4),
            (b"badger", 5),
            (b"badness", 6),
            (b"bcs", 7),
        ]);
        let mut results = trie.prefix_search(b"bad");
        results.sort();
        assert_eq!(
            results,
            vec![
                (b"badge".to_vec(), 4),
                (b"badger".to_vec(), 5),
                (b"badness".to_vec(), 6),
            ]
        );
        assert_eq!(trie.prefix_search(b"").len(), 7);
        assert!(trie.prefix_search(b"z").is_empty());
    }

    #[test]
    fn test_prefix_into_rear() {
        let trie = two_trie(&[(b"inspiration", 1), (b"instant", 2)]);
        // "inspi" ends on the rear side of "inspiration"
        let results = trie.prefix_search(b"inspi");
        assert_eq!(results, vec![(b"inspiration".to_vec(), 1)]);
    }
}

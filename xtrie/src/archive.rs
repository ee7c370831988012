//! アーカイブの低水準な読み書き
//!
//! アーカイブは、16バイトのマジックで始まる64バイトのヘッダに続けて、
//! 各テーブルを32ビットセルの列として並べた単一ファイルです。
//! セルはリトルエンディアンで書き込まれ、読み出しはファイルを
//! 読み取り専用でメモリマップした上でセル単位にデコードします。
//! リトルエンディアンのホストではデコードは単なるロードになります。

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::common::FromI32;
use crate::errors::{Result, XtrieError};

/// ヘッダの長さ(バイト)。マジック16バイトとサイズ欄、予約領域からなります。
pub(crate) const HEADER_LEN: usize = 64;

/// マジックバイトの長さ。
pub(crate) const MAGIC_LEN: usize = 16;

/// 1セルの長さ(バイト)。
pub(crate) const CELL_LEN: usize = 4;

/// ファイルを読み取り専用でメモリマップします。
///
/// # エラー
///
/// ファイルが開けない場合やマップに失敗した場合は
/// [`XtrieError::BadTrieArchive`]を返します。
pub(crate) fn map_file(path: &Path) -> Result<Arc<Mmap>> {
    let file = File::open(path)
        .map_err(|e| XtrieError::bad_archive("open", format!("{}: {}", path.display(), e)))?;
    let map = unsafe { Mmap::map(&file) }
        .map_err(|e| XtrieError::bad_archive("mmap", format!("{}: {}", path.display(), e)))?;
    Ok(Arc::new(map))
}

/// マップの先頭からマジックバイトを取り出します。
pub(crate) fn magic_of(map: &Mmap) -> Result<[u8; MAGIC_LEN]> {
    if map.len() < MAGIC_LEN {
        return Err(XtrieError::bad_archive("magic", "file is too short"));
    }
    let mut magic = [0u8; MAGIC_LEN];
    magic.copy_from_slice(&map[..MAGIC_LEN]);
    Ok(magic)
}

/// マップ上のオフセットからセルを1つ読み取ります。
#[inline(always)]
fn cell_at(map: &Mmap, offset: usize) -> i32 {
    i32::from_le_bytes([
        map[offset],
        map[offset + 1],
        map[offset + 2],
        map[offset + 3],
    ])
}

/// マップ内のセル列を指す読み取り専用の窓。
///
/// マップ本体は`Arc`で共有されるため、ひとつのアーカイブから
/// 切り出した複数の窓が同じマッピングを保持し続けられます。
/// マッピングは最後の窓が破棄されたときに解放されます。
#[derive(Clone)]
pub(crate) struct Region {
    map: Arc<Mmap>,
    offset: usize,
    cells: usize,
}

impl Region {
    /// マップからセル列の窓を切り出します。
    ///
    /// # エラー
    ///
    /// 窓がマップの末尾を超える場合は切り詰められたアーカイブとして
    /// [`XtrieError::BadTrieArchive`]を返します。
    pub(crate) fn new(map: Arc<Mmap>, offset: usize, cells: usize) -> Result<Self> {
        let end = offset + cells * CELL_LEN;
        if end > map.len() {
            return Err(XtrieError::bad_archive(
                "read",
                format!("archive is truncated: need {} bytes, have {}", end, map.len()),
            ));
        }
        Ok(Self { map, offset, cells })
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.cells
    }

    #[inline(always)]
    pub(crate) fn get(&self, i: usize) -> i32 {
        debug_assert!(i < self.cells);
        cell_at(&self.map, self.offset + i * CELL_LEN)
    }
}

/// 32ビットセルの列。所有バッファかアーカイブ上の窓のいずれかです。
///
/// 構築中のトライはセルを所有し、自由に書き換えと拡張ができます。
/// アーカイブから読み込まれたトライはマップ上の窓を重ねるだけで、
/// 書き換えはプログラミングエラーとして扱われます。
pub(crate) enum Cells {
    Owned(Vec<i32>),
    Mapped(Region),
}

impl Cells {
    /// ゼロ埋めされた所有セル列を生成します。
    pub(crate) fn zeroed(cells: usize) -> Self {
        Self::Owned(vec![0; cells])
    }

    /// セル列が所有バッファかどうかを返します。
    #[inline(always)]
    pub(crate) fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Owned(buf) => buf.len(),
            Self::Mapped(region) => region.len(),
        }
    }

    #[inline(always)]
    pub(crate) fn get(&self, i: usize) -> i32 {
        match self {
            Self::Owned(buf) => buf[i],
            Self::Mapped(region) => region.get(i),
        }
    }

    #[inline(always)]
    pub(crate) fn set(&mut self, i: usize, value: i32) {
        match self {
            Self::Owned(buf) => buf[i] = value,
            Self::Mapped(_) => panic!("attempted to mutate an archive-backed trie"),
        }
    }

    /// セル列を指定セル数まで拡張します。新しいセルはゼロ埋めされます。
    pub(crate) fn grow(&mut self, cells: usize) {
        match self {
            Self::Owned(buf) => {
                debug_assert!(cells >= buf.len());
                buf.resize(cells, 0);
            }
            Self::Mapped(_) => panic!("attempted to grow an archive-backed trie"),
        }
    }

    /// 所有セル列として複製します。窓からの複製はセルのコピーになります。
    pub(crate) fn to_owned_cells(&self) -> Self {
        match self {
            Self::Owned(buf) => Self::Owned(buf.clone()),
            Self::Mapped(region) => {
                Self::Owned((0..region.len()).map(|i| region.get(i)).collect())
            }
        }
    }
}

/// セルを1つリトルエンディアンで書き込みます。
#[inline]
pub(crate) fn write_cell<W: Write>(wtr: &mut W, value: i32) -> std::io::Result<()> {
    wtr.write_all(&value.to_le_bytes())
}

/// ゼロの詰め物を書き込みます。
pub(crate) fn write_padding<W: Write>(wtr: &mut W, len: usize) -> std::io::Result<()> {
    const ZEROS: [u8; HEADER_LEN] = [0; HEADER_LEN];
    debug_assert!(len <= ZEROS.len());
    wtr.write_all(&ZEROS[..len])
}

/// 64バイトのヘッダを書き込みます。
///
/// マジック16バイトに続けてサイズ欄を並べ、残りをゼロで埋めます。
pub(crate) fn write_header<W: Write>(
    wtr: &mut W,
    magic: &[u8; MAGIC_LEN],
    sizes: &[i32],
) -> std::io::Result<()> {
    wtr.write_all(magic)?;
    for &size in sizes {
        write_cell(wtr, size)?;
    }
    write_padding(wtr, HEADER_LEN - MAGIC_LEN - sizes.len() * CELL_LEN)
}

/// ヘッダを読み取り、マジックを検査した上でサイズ欄を取り出します。
///
/// # エラー
///
/// マジックが一致しない場合、またはヘッダがマップに収まらない場合は
/// [`XtrieError::BadTrieArchive`]を返します。
pub(crate) fn read_header(
    map: &Mmap,
    offset: usize,
    magic: &[u8; MAGIC_LEN],
    sizes: &mut [i32],
) -> Result<()> {
    if offset + HEADER_LEN > map.len() {
        return Err(XtrieError::bad_archive("read", "archive header is truncated"));
    }
    if &map[offset..offset + MAGIC_LEN] != magic {
        return Err(XtrieError::bad_archive(
            "magic",
            "the magic bytes of the archive mismatch",
        ));
    }
    for (k, size) in sizes.iter_mut().enumerate() {
        *size = cell_at(map, offset + MAGIC_LEN + k * CELL_LEN);
        if *size < 0 {
            return Err(XtrieError::bad_archive("read", "negative table size"));
        }
    }
    Ok(())
}

/// マジックを持たない内部ヘッダ(埋め込みトライ用)を読み取ります。
pub(crate) fn read_sized_header(map: &Mmap, offset: usize) -> Result<i32> {
    if offset + HEADER_LEN > map.len() {
        return Err(XtrieError::bad_archive("read", "archive header is truncated"));
    }
    let size = cell_at(map, offset);
    if size < 0 {
        return Err(XtrieError::bad_archive("read", "negative table size"));
    }
    Ok(size)
}

/// 内部ヘッダを書き込みます。サイズ欄1つと予約領域からなります。
pub(crate) fn write_sized_header<W: Write>(wtr: &mut W, size: i32) -> std::io::Result<()> {
    write_cell(wtr, size)?;
    write_padding(wtr, HEADER_LEN - CELL_LEN)
}

/// セル数をバイト数に換算します。
#[inline]
pub(crate) fn cells_to_bytes(cells: i32) -> usize {
    usize::from_i32(cells) * CELL_LEN
}

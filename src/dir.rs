//! ディレクトリエントリおよびストライプ化ディレクトリのマージ読み出し.
//!
//! ディレクトリの列挙順序は、エントリ名のハッシュ値(64bit)による全順序で
//! 定義される. ページ(エントリのバッチ)単位の読み出しは、このハッシュ値を
//! 再開位置として中断・再開が可能となっている.
//!
//! ストライプ化ディレクトリの場合には、各ストライプが独立にページングされる
//! ため、[read_striped_page]が全ストライプに対するk-wayマージを行って、
//! あたかも単一のディレクトリであるかのような一本のストリームを合成する.
//!
//! [read_striped_page]: fn.read_striped_page.html
use crate::fid::Fid;
use crate::layout::StripedLayout;
use crate::{ErrorKind, Result};

/// ディレクトリの論理的な終端を表すハッシュ値の番兵.
pub const END_OF_DIR: u64 = std::u64::MAX;

/// エントリ一件あたりの固定オーバヘッド(バイト単位).
///
/// ハッシュ値(8)、FID(16)、レコード長等のメタ情報分.
const ENTRY_FIXED_SIZE: usize = 24;

/// 指定された名前長のエントリが占めるバイト数を計算する.
///
/// 末尾は8バイト境界に切り上げられる.
pub fn entry_size(name_len: usize) -> u16 {
    ((ENTRY_FIXED_SIZE + name_len + 7) / 8 * 8) as u16
}

/// ディレクトリエントリの種別.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// 通常ファイル.
    Regular,

    /// ディレクトリ.
    Directory,

    /// シンボリックリンク.
    Symlink,

    /// その他(デバイスファイル等).
    Special,
}

/// ディレクトリの走査中に得られる一件のエントリ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// 列挙順序を定めるハッシュ値.
    pub hash: u64,

    /// エントリ名.
    ///
    /// 空文字列はパディング用のダミーエントリを表しており、走査時には
    /// 読み飛ばされる.
    pub name: String,

    /// エントリが指すオブジェクトのFID.
    pub fid: Fid,

    /// エントリの種別.
    pub kind: EntryKind,

    /// エントリのレコード長(バイト単位).
    ///
    /// `0`は「内容から計算せよ」を意味する. また、ページ中の最終エントリの
    /// レコード長をゼロにすることで「ページの終端」の印としても用いられる.
    pub rec_len: u16,
}
impl DirEntry {
    /// 新しい`DirEntry`インスタンスを生成する.
    ///
    /// レコード長は名前長から計算される.
    pub fn new<T: Into<String>>(hash: u64, name: T, fid: Fid, kind: EntryKind) -> Self {
        let name = name.into();
        let rec_len = entry_size(name.len());
        DirEntry {
            hash,
            name,
            fid,
            kind,
            rec_len,
        }
    }

    /// このエントリが占める実効バイト数を返す.
    ///
    /// レコード長がゼロの場合には、名前長から計算される.
    pub fn effective_size(&self) -> u16 {
        if self.rec_len == 0 {
            entry_size(self.name.len())
        } else {
            self.rec_len
        }
    }

    fn is_dummy(&self) -> bool {
        self.name.is_empty()
    }

    fn is_dot_or_dotdot(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// ディレクトリ読み出しの結果となる一ページ分のエントリ群.
#[derive(Debug, Clone, Default)]
pub struct DirPage {
    /// このページの開始ハッシュ値.
    pub hash_start: u64,

    /// 次のページの読み出しを再開すべきハッシュ値.
    ///
    /// `END_OF_DIR`の場合には、ディレクトリの終端に達している.
    pub hash_end: u64,

    /// ハッシュ値の昇順にソートされたエントリ群.
    pub entries: Vec<DirEntry>,
}
impl DirPage {
    /// ディレクトリの終端に達しているかどうかを返す.
    pub fn is_end(&self) -> bool {
        self.hash_end == END_OF_DIR
    }
}

/// 一つのストライプに対する読み出しカーソル.
///
/// ストライプのページを必要に応じて順次取得しながら、現在位置のエントリを
/// 供給する. 供給されるのは「ハッシュ値が`resume_hash`以上」かつ
/// 「ダミーではない」エントリのみであり、非マスターストライプの場合には
/// `"."`および`".."`も併せて読み飛ばされる.
#[derive(Debug)]
struct StripeCursor {
    stripe_index: u32,
    fid: Fid,
    page: Option<DirPage>,
    pos: usize,
    fetch_hash: u64,
    done: bool,
}
impl StripeCursor {
    fn new(stripe_index: u32, fid: Fid, resume_hash: u64) -> Self {
        StripeCursor {
            stripe_index,
            fid,
            page: None,
            pos: 0,
            fetch_hash: resume_hash,
            done: false,
        }
    }

    /// 現在位置のエントリのハッシュ値を返す.
    ///
    /// ストライプの終端に達している場合には`None`が返される.
    fn peek_hash<F>(&mut self, resume_hash: u64, fetch: &mut F) -> Result<Option<u64>>
    where
        F: FnMut(u32, Fid, u64) -> Result<DirPage>,
    {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.page.is_none() {
                let page = track!(fetch(self.stripe_index, self.fid, self.fetch_hash))?;
                self.page = Some(page);
                self.pos = 0;
            }

            {
                let page = self.page.as_ref().expect("Never fails");
                while self.pos < page.entries.len() {
                    let entry = &page.entries[self.pos];
                    let skip = entry.is_dummy()
                        || entry.hash < resume_hash
                        || (self.stripe_index != 0 && entry.is_dot_or_dotdot());
                    if !skip {
                        return Ok(Some(entry.hash));
                    }
                    self.pos += 1;
                }

                // 現在のページを読み尽くした
                if page.hash_end == END_OF_DIR {
                    self.done = true;
                } else {
                    self.fetch_hash = page.hash_end;
                }
            }
            self.page = None;
        }
    }

    /// 現在位置のエントリを取り出して、カーソルを一つ進める.
    fn take_current(&mut self) -> DirEntry {
        let page = self.page.as_ref().expect("Never fails");
        let entry = page.entries[self.pos].clone();
        self.pos += 1;
        entry
    }
}

/// ストライプ化ディレクトリから一ページ分のエントリ群を合成する.
///
/// 全ストライプのカーソルの中から「ハッシュ値が最小の未出力エントリ」を
/// 繰り返し選択することで、単一のハッシュ順ストリームを合成する
/// (ハッシュ値が等しい場合にはストライプ番号の小さい方が先).
///
/// `"."`および`".."`は非マスターストライプからは読み飛ばされ、
/// 出力される唯一のコピーのFIDは、物理ストライプのものではなく
/// それぞれ`self_fid`(ディレクトリ自身)と`parent_fid`(親)に書き換えられる.
///
/// ページは`page_size`(バイト単位)に達するまで充填され、収まらなかった
/// エントリのハッシュ値が`hash_end`(次回の再開位置)となる. その際、
/// ページ中の最終エントリのレコード長はゼロに書き換えられる(終端の印).
/// 全ストライプが終端に達した場合の`hash_end`は`END_OF_DIR`.
///
/// # Errors
///
/// いずれかのストライプのページ取得が失敗した場合には、合成途中の結果は
/// 破棄されて、そのエラーがそのまま返される(ページ生成は呼び出し単位で
/// アトミック).
pub fn read_striped_page<F>(
    layout: &StripedLayout,
    self_fid: Fid,
    parent_fid: Fid,
    resume_hash: u64,
    page_size: usize,
    mut fetch: F,
) -> Result<DirPage>
where
    F: FnMut(u32, Fid, u64) -> Result<DirPage>,
{
    let mut cursors = layout
        .stripes()
        .enumerate()
        .map(|(i, stripe)| StripeCursor::new(i as u32, stripe.fid(), resume_hash))
        .collect::<Vec<_>>();

    let mut entries: Vec<DirEntry> = Vec::new();
    let mut left = page_size;
    let hash_end;
    loop {
        let mut min: Option<(u64, usize)> = None;
        for (i, cursor) in cursors.iter_mut().enumerate() {
            if let Some(hash) = track!(cursor.peek_hash(resume_hash, &mut fetch))? {
                let better = match min {
                    None => true,
                    Some((min_hash, _)) => hash < min_hash,
                };
                if better {
                    min = Some((hash, i));
                }
            }
        }

        let (hash, index) = if let Some(min) = min {
            min
        } else {
            // 全ストライプが終端に達した
            hash_end = END_OF_DIR;
            break;
        };

        let mut entry = cursors[index].take_current();
        let size = usize::from(entry.effective_size());
        if size > left {
            track_assert!(!entries.is_empty(), ErrorKind::InvalidInput;
                          page_size, size);
            hash_end = hash;
            entries.last_mut().expect("Never fails").rec_len = 0;
            break;
        }

        // マスターストライプ由来の"."と".."は、論理ディレクトリのFIDに書き換える
        if entry.name == "." {
            entry.fid = self_fid;
        } else if entry.name == ".." {
            entry.fid = parent_fid;
        }
        entry.rec_len = size as u16;
        left -= size;
        entries.push(entry);
    }

    Ok(DirPage {
        hash_start: resume_hash,
        hash_end,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;
    use crate::layout::{HashKind, StripeInfo, StripedLayout};

    fn fid(oid: u32) -> Fid {
        Fid::new(0x100, oid, 0)
    }

    fn layout(stripe_count: u32) -> StripedLayout {
        let stripes = (0..stripe_count)
            .map(|i| StripeInfo::new(Fid::new(0x200 + u64::from(i), 1, 0), i))
            .collect();
        StripedLayout::new(HashKind::AllChars, stripes).unwrap()
    }

    fn entry(hash: u64, name: &str, oid: u32) -> DirEntry {
        DirEntry::new(hash, name, fid(oid), EntryKind::Regular)
    }

    fn single_page(entries: Vec<DirEntry>) -> DirPage {
        DirPage {
            hash_start: 0,
            hash_end: END_OF_DIR,
            entries,
        }
    }

    #[test]
    fn two_stripes_merge_in_hash_order() -> TestResult {
        // stripe0: a(10), c(20) / stripe1: b(15)
        let layout = layout(2);
        let page = track!(read_striped_page(
            &layout,
            fid(1),
            fid(2),
            0,
            4096,
            |stripe, _fid, _hash| {
                if stripe == 0 {
                    Ok(single_page(vec![entry(10, "a", 10), entry(20, "c", 12)]))
                } else {
                    Ok(single_page(vec![entry(15, "b", 11)]))
                }
            }
        ))?;

        let names = page
            .entries
            .iter()
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b", "c"]);
        let hashes = page.entries.iter().map(|e| e.hash).collect::<Vec<_>>();
        assert_eq!(hashes, vec![10, 15, 20]);
        assert!(page.is_end());
        Ok(())
    }

    #[test]
    fn dot_entries_are_unified_and_rewritten() -> TestResult {
        // 両ストライプが"."と".."を持つが、出力には一組だけ現れる
        let layout = layout(2);
        let self_fid = Fid::new(0x900, 1, 0);
        let parent_fid = Fid::new(0x900, 2, 0);
        let page = track!(read_striped_page(
            &layout,
            self_fid,
            parent_fid,
            0,
            4096,
            |stripe, stripe_fid, _hash| {
                let mut entries = vec![
                    DirEntry::new(0, ".", stripe_fid, EntryKind::Directory),
                    DirEntry::new(1, "..", stripe_fid, EntryKind::Directory),
                ];
                entries.push(entry(100 + u64::from(stripe), "x", 30 + stripe));
                Ok(single_page(entries))
            }
        ))?;

        let dots = page.entries.iter().filter(|e| e.name == ".").count();
        let dotdots = page.entries.iter().filter(|e| e.name == "..").count();
        assert_eq!(dots, 1);
        assert_eq!(dotdots, 1);
        assert_eq!(page.entries[0].fid, self_fid);
        assert_eq!(page.entries[1].fid, parent_fid);
        Ok(())
    }

    #[test]
    fn page_budget_truncates_and_resumes() -> TestResult {
        let layout = layout(2);
        let fetch = |stripe: u32, _fid: Fid, _hash: u64| {
            if stripe == 0 {
                Ok(single_page(vec![
                    entry(10, "a", 10),
                    entry(30, "c", 12),
                    entry(50, "e", 14),
                ]))
            } else {
                Ok(single_page(vec![entry(20, "b", 11), entry(40, "d", 13)]))
            }
        };

        // 一エントリ32バイト: 二件でバジェットが尽きる
        let budget = usize::from(entry_size(1)) * 2;
        let mut resume = 0;
        let mut all = Vec::new();
        loop {
            let page = track!(read_striped_page(
                &layout,
                fid(1),
                fid(2),
                resume,
                budget,
                fetch
            ))?;
            if !page.is_end() {
                // 収まらなかったエントリの位置から再開する
                assert_eq!(page.entries.last().map(|e| e.rec_len), Some(0));
            }
            all.extend(page.entries.iter().map(|e| e.hash));
            if page.is_end() {
                break;
            }
            resume = page.hash_end;
        }

        assert_eq!(all, vec![10, 20, 30, 40, 50]);
        Ok(())
    }

    #[test]
    fn cursor_refetches_next_page_of_exhausted_stripe() -> TestResult {
        // stripe0は一件ずつの複数ページに分かれている
        let layout = layout(2);
        let page = track!(read_striped_page(
            &layout,
            fid(1),
            fid(2),
            0,
            4096,
            |stripe, _fid, hash| {
                if stripe == 0 {
                    match hash {
                        0 => Ok(DirPage {
                            hash_start: 0,
                            hash_end: 30,
                            entries: vec![entry(10, "a", 10)],
                        }),
                        30 => Ok(DirPage {
                            hash_start: 30,
                            hash_end: END_OF_DIR,
                            entries: vec![entry(30, "c", 12)],
                        }),
                        _ => track_panic!(ErrorKind::InconsistentState, "hash={}", hash),
                    }
                } else {
                    Ok(single_page(vec![entry(20, "b", 11)]))
                }
            }
        ))?;

        let hashes = page.entries.iter().map(|e| e.hash).collect::<Vec<_>>();
        assert_eq!(hashes, vec![10, 20, 30]);
        Ok(())
    }

    #[test]
    fn fetch_error_discards_partial_page() {
        let layout = layout(2);
        let result = read_striped_page(&layout, fid(1), fid(2), 0, 4096, |stripe, _fid, _hash| {
            if stripe == 0 {
                Ok(single_page(vec![entry(10, "a", 10)]))
            } else {
                track_panic!(ErrorKind::NotConnected)
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn zero_rec_len_entry_is_sized_from_content() {
        let e = DirEntry {
            rec_len: 0,
            ..entry(10, "abcdefg", 1)
        };
        assert_eq!(e.effective_size(), entry_size(7));
    }

    #[test]
    fn equal_hashes_prefer_lower_stripe_index() -> TestResult {
        let layout = layout(2);
        let page = track!(read_striped_page(
            &layout,
            fid(1),
            fid(2),
            0,
            4096,
            |stripe, _fid, _hash| {
                if stripe == 0 {
                    Ok(single_page(vec![entry(10, "s0", 10)]))
                } else {
                    Ok(single_page(vec![entry(10, "s1", 11)]))
                }
            }
        ))?;
        let names = page
            .entries
            .iter()
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["s0", "s1"]);
        Ok(())
    }
}

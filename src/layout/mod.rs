//! ストライプ化ディレクトリのレイアウト記述子.
//!
//! ストライプ化ディレクトリは、一つの論理ディレクトリを複数の独立な
//! サブオブジェクト("ストライプ")に分割して、別々のサーバに配置したもの.
//! どのエントリ名がどのストライプに属するかは、レイアウト記述子が持つ
//! ハッシュ種別によって決定論的に定まる.
//!
//! 記述子はサーバから供給されるバイナリ形式([ストライプレイアウト形式])を
//! 展開して構築され、ディレクトリのメモリ上表現が破棄されるまで不変となる
//! (唯一の例外は、各ストライプのローカルハンドルの遅延キャッシュ).
//!
//! [ストライプレイアウト形式]: struct.StripedLayout.html#method.read_from
use std::hash::Hasher;
use std::sync::Mutex;

use crate::fid::Fid;
use crate::{ErrorKind, Result};

pub use self::packed::MAGIC_NUMBER;

mod packed;

/// ストライプ数の上限.
pub const MAX_STRIPE_COUNT: u32 = 0xFFFF;

/// プール名の最大長(バイト単位、終端は含まない).
pub const MAX_POOL_NAME_LEN: usize = 15;

/// エントリ名からストライプを選択するためのハッシュ種別コード: 全文字加算方式.
pub const HASH_CODE_ALL_CHARS: u32 = 1;

/// エントリ名からストライプを選択するためのハッシュ種別コード: SipHash-2-4方式.
pub const HASH_CODE_SIP24: u32 = 2;

/// ハッシュ種別コードに埋め込まれる「移行中」フラグ.
pub const HASH_FLAG_MIGRATING: u32 = 0x8000_0000;

const SIP_KEY0: u64 = 0;
const SIP_KEY1: u64 = 0;

/// エントリ名からストライプを選択するためのハッシュ種別.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    /// 名前の全バイトの加算値をストライプ数で割った剰余.
    AllChars,

    /// SipHash-2-4(固定鍵)の出力をストライプ数で割った剰余.
    Sip24,

    /// 未知のハッシュ種別.
    ///
    /// 名前からの直接解決は不可能であり、全ストライプの逐次探索に
    /// 切り替える必要がある. 記述子の展開自体は成功する点に注意
    /// (未知なのはハッシュ種別だけであり、レイアウトは有効なため).
    Unknown(u32),
}
impl HashKind {
    /// ハッシュ種別コード(移行フラグを除く)から`HashKind`を生成する.
    pub fn from_code(code: u32) -> Self {
        match code {
            HASH_CODE_ALL_CHARS => HashKind::AllChars,
            HASH_CODE_SIP24 => HashKind::Sip24,
            _ => HashKind::Unknown(code),
        }
    }

    /// ハッシュ種別コードを返す.
    pub fn code(&self) -> u32 {
        match *self {
            HashKind::AllChars => HASH_CODE_ALL_CHARS,
            HashKind::Sip24 => HASH_CODE_SIP24,
            HashKind::Unknown(code) => code,
        }
    }

    /// 既知のハッシュ種別かどうかを返す.
    pub fn is_known(&self) -> bool {
        match *self {
            HashKind::Unknown(_) => false,
            _ => true,
        }
    }

    fn hash_name(&self, name: &str) -> Option<u64> {
        match *self {
            HashKind::AllChars => {
                Some(name.as_bytes().iter().fold(0, |acc, &b| acc + u64::from(b)))
            }
            HashKind::Sip24 => {
                let mut hasher =
                    siphasher::sip::SipHasher24::new_with_keys(SIP_KEY0, SIP_KEY1);
                hasher.write(name.as_bytes());
                Some(hasher.finish())
            }
            HashKind::Unknown(_) => None,
        }
    }
}

/// 呼び出し側がローカルに保持するディレクトリオブジェクトのハンドル.
///
/// ルーティング層はこの値を解釈せず、単にストライプ毎にキャッシュするだけ.
/// 典型的には、上位層のinodeテーブルへのキーとして利用される.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirHandle(pub u64);

/// 一つのストライプの情報.
#[derive(Debug)]
pub struct StripeInfo {
    fid: Fid,
    target: u32,
    root: Mutex<Option<DirHandle>>,
}
impl StripeInfo {
    /// 新しい`StripeInfo`インスタンスを生成する.
    pub fn new(fid: Fid, target: u32) -> Self {
        StripeInfo {
            fid,
            target,
            root: Mutex::new(None),
        }
    }

    /// このストライプのFIDを返す.
    pub fn fid(&self) -> Fid {
        self.fid
    }

    /// このストライプを保持するターゲットのインデックスを返す.
    pub fn target(&self) -> u32 {
        self.target
    }

    /// キャッシュ済みのローカルハンドルを返す.
    pub fn root_handle(&self) -> Option<DirHandle> {
        *self.root.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// ローカルハンドルを遅延キャッシュする.
    ///
    /// 既にキャッシュ済みの場合には上書きされる.
    pub fn set_root_handle(&self, handle: DirHandle) {
        *self.root.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }
}

/// ストライプ化ディレクトリのレイアウト記述子.
///
/// ストライプ0が"マスター"であり、名前を伴わない(FIDのみの)操作では
/// マスターのみが参照される.
#[derive(Debug)]
pub struct StripedLayout {
    master_target: u32,
    hash: HashKind,
    migrating: bool,
    layout_version: u32,
    pool: Option<String>,
    stripes: Vec<StripeInfo>,
}
impl StripedLayout {
    /// 新しい`StripedLayout`インスタンスを生成する.
    ///
    /// # Errors
    ///
    /// ストライプ数がゼロないし`MAX_STRIPE_COUNT`超の場合は、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn new(hash: HashKind, stripes: Vec<StripeInfo>) -> Result<Self> {
        track_assert!(!stripes.is_empty(), ErrorKind::InvalidInput);
        track_assert!(
            stripes.len() <= MAX_STRIPE_COUNT as usize,
            ErrorKind::InvalidInput,
            "Too many stripes: {}",
            stripes.len()
        );
        let master_target = stripes[0].target();
        Ok(StripedLayout {
            master_target,
            hash,
            migrating: false,
            layout_version: 0,
            pool: None,
            stripes,
        })
    }

    pub(crate) fn with_details(
        hash: HashKind,
        migrating: bool,
        master_target: u32,
        layout_version: u32,
        pool: Option<String>,
        stripes: Vec<StripeInfo>,
    ) -> Result<Self> {
        let mut layout = track!(StripedLayout::new(hash, stripes))?;
        layout.migrating = migrating;
        layout.master_target = master_target;
        layout.layout_version = layout_version;
        layout.pool = pool;
        Ok(layout)
    }

    /// ストライプ数を返す.
    pub fn stripe_count(&self) -> u32 {
        self.stripes.len() as u32
    }

    /// マスターストライプ(=ストライプ0)を保持するターゲットのインデックスを返す.
    pub fn master_target(&self) -> u32 {
        self.master_target
    }

    /// ハッシュ種別を返す.
    pub fn hash_kind(&self) -> HashKind {
        self.hash
    }

    /// レイアウトのバージョン番号を返す.
    pub fn layout_version(&self) -> u32 {
        self.layout_version
    }

    /// 配置プール名を返す.
    pub fn pool(&self) -> Option<&str> {
        self.pool.as_ref().map(|s| s.as_str())
    }

    /// このディレクトリがサーバ間で移行中かどうかを返す.
    pub fn is_migrating(&self) -> bool {
        self.migrating
    }

    /// 指定インデックスのストライプを返す.
    pub fn stripe(&self, index: u32) -> Option<&StripeInfo> {
        self.stripes.get(index as usize)
    }

    /// マスターストライプを返す.
    pub fn master_stripe(&self) -> &StripeInfo {
        &self.stripes[0]
    }

    /// 全ストライプを走査するためのイテレータを返す.
    pub fn stripes(&self) -> impl Iterator<Item = &StripeInfo> {
        self.stripes.iter()
    }

    /// 名前による解決の代わりに、全ストライプの逐次探索が必要かどうかを返す.
    ///
    /// ハッシュ種別が未知の場合と、ディレクトリが移行中の場合に真となる.
    pub fn needs_exhaustive_search(&self) -> bool {
        !self.hash.is_known() || self.migrating
    }

    /// 指定された名前を担当するストライプを返す.
    ///
    /// # Errors
    ///
    /// ハッシュ種別が未知の場合には、種類が`ErrorKind::UnknownHashType`の
    /// エラーが返される. この場合、呼び出し側は全ストライプを
    /// インデックス順に試行する必要がある.
    pub fn stripe_for_name(&self, name: &str) -> Result<&StripeInfo> {
        let hash = track_assert_some!(self.hash.hash_name(name), ErrorKind::UnknownHashType);
        let index = (hash % u64::from(self.stripe_count())) as usize;
        Ok(&self.stripes[index])
    }
}

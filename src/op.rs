//! メタデータ操作のリクエスト/リプライ定義.
//!
//! 一つの論理操作(create/link/unlink/rename等)に関与し得る最大四つのFIDと
//! 名前、配置ヒント、ロック取消指示を一つの構造体にまとめている.
//! どのフィールドが使用されるかは操作毎に異なる([Router]の各メソッドを参照).
//!
//! [Router]: ../router/struct.Router.html
use std::sync::Arc;

use crate::fid::Fid;
use crate::layout::StripedLayout;

/// リクエスト内のFIDスロットを指すセレクタ.
///
/// 操作毎の各スロットの意味は以下の通り:
///
/// | 操作 | `Fid1` | `Fid2` | `Fid3` | `Fid4` |
/// |---|---|---|---|---|
/// | create | 親 | 新オブジェクト | - | - |
/// | link | 対象オブジェクト | 新しい親 | - | - |
/// | unlink | 親 | 子(未知ならゼロ) | 子(取消用) | - |
/// | rename | 旧親 | 新親 | 旧子 | 既存の新子 |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FidSlot {
    /// 第一FID.
    Fid1,
    /// 第二FID.
    Fid2,
    /// 第三FID.
    Fid3,
    /// 第四FID.
    Fid4,
}

/// サーバ側でのロック取消を依頼するFIDスロットの集合.
///
/// 操作を実行するサーバ自身がロックを保持している場合には、
/// クライアントからの早期取消RPCは発行せずに、
/// このフラグ集合を操作リクエストに載せてサーバに取消を委ねる.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CancelSet([bool; 4]);
impl CancelSet {
    /// 指定スロットの取消フラグを立てる.
    pub fn set(&mut self, slot: FidSlot) {
        self.0[slot as usize] = true;
    }

    /// 指定スロットの取消フラグが立っているかどうかを返す.
    pub fn contains(&self, slot: FidSlot) -> bool {
        self.0[slot as usize]
    }
}

/// オブジェクトの属性.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObjectAttrs {
    /// ファイル種別を含むモードビット.
    pub mode: u32,

    /// 所有者のユーザID.
    pub uid: u32,

    /// 所有者のグループID.
    pub gid: u32,

    /// デバイス番号(スペシャルファイル用).
    pub rdev: u64,

    /// サイズ(バイト単位).
    pub size: u64,

    /// 割当済みブロック数.
    pub blocks: u64,

    /// リンク数.
    pub nlink: u32,

    /// 最終アクセス時刻(UNIX時間).
    pub atime: u64,

    /// 最終更新時刻(UNIX時間).
    pub mtime: u64,

    /// 最終状態変更時刻(UNIX時間).
    pub ctime: u64,
}

/// 分散ロックのモード.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// 共有ロック.
    Shared,

    /// 排他ロック.
    Exclusive,
}

/// 取消対象のロックの範囲.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    /// 名前解決(lookup)ロックのみ.
    Lookup,

    /// 更新(update)ロックのみ.
    Update,

    /// 全ビット.
    Full,
}

/// 一つのメタデータ操作のリクエスト.
///
/// 元々の呼び出しに含まれる論理的なFIDが設定された後、
/// ルーティング層によって実際の宛先(e.g., ストライプのFID)へと
/// 書き換えられることがある.
#[derive(Debug, Default, Clone)]
pub struct MdRequest {
    /// 第一FID. 通常は親ディレクトリ.
    pub fid1: Fid,

    /// 第二FID. 子や新しい親等、操作に依存する.
    pub fid2: Fid,

    /// 第三FID.
    pub fid3: Fid,

    /// 第四FID.
    pub fid4: Fid,

    /// 操作対象のエントリ名.
    pub name: Option<String>,

    /// renameの移動先エントリ名.
    pub name2: Option<String>,

    /// `fid1`が指すディレクトリのストライプレイアウト(存在する場合).
    pub layout1: Option<Arc<StripedLayout>>,

    /// `fid2`が指すディレクトリのストライプレイアウト(存在する場合).
    pub layout2: Option<Arc<StripedLayout>>,

    /// 明示的なターゲット指定(e.g., "サーバNに作成する").
    ///
    /// `None`の場合には、親ディレクトリの担当サーバが選択される.
    pub target_hint: Option<u32>,

    /// サーバ側でのロック取消指示.
    pub cancel: CancelSet,

    /// ディレクトリ移行(migration)モードのrenameかどうか.
    pub migrate: bool,

    /// create時の新規オブジェクトの属性.
    pub attrs: ObjectAttrs,
}
impl MdRequest {
    /// FIDのみを対象とする操作のリクエストを生成する.
    pub fn with_fid(fid: Fid) -> Self {
        MdRequest {
            fid1: fid,
            ..Default::default()
        }
    }

    /// `(親, 名前)`を対象とする操作のリクエストを生成する.
    pub fn with_name<T: Into<String>>(parent: Fid, name: T) -> Self {
        MdRequest {
            fid1: parent,
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// 指定スロットのFIDを返す.
    pub fn fid(&self, slot: FidSlot) -> Fid {
        match slot {
            FidSlot::Fid1 => self.fid1,
            FidSlot::Fid2 => self.fid2,
            FidSlot::Fid3 => self.fid3,
            FidSlot::Fid4 => self.fid4,
        }
    }
}

/// メタデータ操作のリプライ.
#[derive(Debug, Default, Clone)]
pub struct MdReply {
    /// 操作の主対象となったオブジェクトのFID.
    pub fid: Option<Fid>,

    /// 取得ないし更新後の属性.
    pub attrs: Option<ObjectAttrs>,

    /// クロスリファレンス応答.
    ///
    /// 問い合わせたオブジェクトが実際には別サーバに存在することを示しており、
    /// ルーティング層はこのFIDの担当サーバに対して操作を再発行する.
    pub remote: Option<Fid>,
}

/// ファイルシステムの統計情報.
///
/// 全ターゲットへのブロードキャストの後、算術的にマージされる
/// ([Router::statfs]を参照).
///
/// [Router::statfs]: ../router/struct.Router.html#method.statfs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    /// 総ブロック数.
    pub blocks: u64,

    /// 空きブロック数.
    pub bfree: u64,

    /// 非特権ユーザが利用可能なブロック数.
    pub bavail: u64,

    /// 総ファイル数.
    pub files: u64,

    /// 空きファイルスロット数.
    pub ffree: u64,

    /// ブロックサイズ(バイト単位).
    pub bsize: u32,

    /// ファイル名の最大長.
    pub namelen: u32,
}

/// 一つのユーザないしグループのクォータ情報.
///
/// 使用量は全ターゲットの合計、上限は最初に応答したターゲットの値が
/// 採用される([Router::quotactl]を参照).
///
/// [Router::quotactl]: ../router/struct.Router.html#method.quotactl
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QuotaInfo {
    /// 使用中のブロック数.
    pub block_usage: u64,

    /// ブロック数の上限.
    pub block_limit: u64,

    /// 使用中のファイル数.
    pub file_usage: u64,

    /// ファイル数の上限.
    pub file_limit: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_set_works() {
        let mut cancel = CancelSet::default();
        assert!(!cancel.contains(FidSlot::Fid3));
        cancel.set(FidSlot::Fid3);
        assert!(cancel.contains(FidSlot::Fid3));
        assert!(!cancel.contains(FidSlot::Fid1));
    }

    #[test]
    fn fid_slot_works() {
        let mut req = MdRequest::with_name(Fid::new(1, 1, 0), "foo");
        req.fid3 = Fid::new(1, 9, 0);
        assert_eq!(req.fid(FidSlot::Fid1), Fid::new(1, 1, 0));
        assert_eq!(req.fid(FidSlot::Fid3), Fid::new(1, 9, 0));
        assert_eq!(req.fid(FidSlot::Fid2), Fid::ZERO);
    }
}

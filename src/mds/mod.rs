//! メタデータサーバとの通信インターフェース定義と実装群.
//!
//! ルーティング層は、個々のメタデータサーバ(MDS)とのRPCやFID位置サービスを
//! 自前では実装せず、このモジュールのトレイト群を通じて外部の協力者として
//! 利用する. 具体的には:
//!
//! - [MdsSession]: 接続済みの一つのサーバに対するメタデータ操作
//! - [MdsConnector]: サーバ毎のセッションの確立
//! - [FidLocator]: FIDから担当サーバのインデックスへの解決
//! - [Observer]: ターゲットの活性/非活性イベントの上位層への通知
//!
//! また、テスト・検証用のプロセス内実装である[MemoryCluster]を提供する.
//!
//! [MdsSession]: trait.MdsSession.html
//! [MdsConnector]: trait.MdsConnector.html
//! [FidLocator]: trait.FidLocator.html
//! [Observer]: trait.Observer.html
//! [MemoryCluster]: struct.MemoryCluster.html
use uuid::Uuid;

use crate::dir::DirPage;
use crate::fid::Fid;
use crate::op::{LockMode, LockScope, MdReply, MdRequest, QuotaInfo, StatFs};
use crate::Result;

pub use self::memory::{MemoryCluster, MemoryConnector, MemoryLocator, MemorySession, RpcRecord};

mod memory;

/// 接続済みの一つのメタデータサーバに対する操作群を表すトレイト.
///
/// 各メソッドはリモートとの往復を伴うため、呼び出しスレッドを
/// ブロックし得る. タイムアウトや再送は実装側(RPC層)の責務であり、
/// ルーティング層は追加のタイムアウトを課さない.
pub trait MdsSession: Send + Sync + 'static {
    /// FIDで指定されたオブジェクトの属性を取得する.
    fn getattr(&self, fid: &Fid) -> Result<MdReply>;

    /// `(親, 名前)`で指定されたオブジェクトの属性を取得する.
    ///
    /// オブジェクトが別サーバに存在する場合には、リプライの`remote`に
    /// そのFIDが設定される(クロスリファレンス応答).
    fn getattr_name(&self, req: &MdRequest) -> Result<MdReply>;

    /// 新しいオブジェクトを作成する.
    ///
    /// 作成されるオブジェクトのFIDは`req.fid2`に設定済みであること.
    fn create(&self, req: &MdRequest) -> Result<MdReply>;

    /// 既存オブジェクトへのハードリンクを作成する.
    fn link(&self, req: &MdRequest) -> Result<MdReply>;

    /// エントリを削除する.
    fn unlink(&self, req: &MdRequest) -> Result<MdReply>;

    /// エントリ名を変更(ないし移動)する.
    fn rename(&self, req: &MdRequest) -> Result<MdReply>;

    /// ディレクトリの一ページ分のエントリ群を読み出す.
    fn read_page(&self, dir: &Fid, resume_hash: u64) -> Result<DirPage>;

    /// このサーバから新しいFIDの割り当てを受ける.
    ///
    /// # 注意
    ///
    /// 同一ターゲットに対する本メソッドの並行呼び出しは、シーケンス割当の
    /// 競合を招くため許容されない. 呼び出しはターゲット毎の割当ロックで
    /// 直列化される([Router]が行う).
    ///
    /// [Router]: ../router/struct.Router.html
    fn alloc_fid(&self) -> Result<Fid>;

    /// 指定オブジェクトに関する未使用ロックの取消を依頼する(ベストエフォート).
    fn cancel_unused(&self, fid: &Fid, scope: LockScope, mode: LockMode) -> Result<()>;

    /// このサーバのファイルシステム統計を取得する.
    fn statfs(&self) -> Result<StatFs>;

    /// ファイルシステムのルートディレクトリのFIDを取得する.
    ///
    /// この問い合わせはターゲット0にのみ発行される.
    fn getstatus(&self) -> Result<Fid>;

    /// 指定ユーザのこのサーバ上でのクォータ情報を取得する.
    fn quotactl(&self, uid: u32) -> Result<QuotaInfo>;
}

/// メタデータサーバとのセッションを確立するためのトレイト.
pub trait MdsConnector: Send + Sync + 'static {
    /// 確立されるセッションの型.
    type Session: MdsSession;

    /// 指定されたターゲットとのセッションを確立する.
    fn connect(&self, index: u32, uuid: &Uuid) -> Result<Self::Session>;

    /// 接続先クラスタがディレクトリストライピングに対応しているかどうかを返す.
    ///
    /// 真の場合、create操作は親の担当サーバではなく、新規オブジェクト自身の
    /// 担当サーバへと振り向けられる.
    fn supports_dir_stripe(&self) -> bool {
        true
    }
}

/// FID位置サービス(FIDから担当ターゲットへの解決)を表すトレイト.
///
/// 解決結果は呼び出し側が性能目的でキャッシュしても構わないが、
/// 権威を持つのは常にこのサービスの側となる.
pub trait FidLocator: Send + Sync + 'static {
    /// 指定されたFIDを保持するターゲットのインデックスを返す.
    ///
    /// # Errors
    ///
    /// 所在が解決できない場合には、種類が`ErrorKind::StaleLocation`の
    /// エラーが返される.
    fn locate(&self, fid: &Fid) -> Result<u32>;
}

/// ターゲットの状態変化イベント.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetEvent {
    /// 接続が確立されて、ターゲットが利用可能になった.
    Activated,

    /// 接続が失われて、ターゲットが利用不可能になった.
    Deactivated,
}

/// 上位層へと転送されるターゲット状態変化の通知.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// 対象ターゲットのインデックス.
    pub index: u32,

    /// 対象ターゲットの識別子.
    pub uuid: Uuid,

    /// 発生したイベント.
    pub event: TargetEvent,
}

/// ルーティング層を所有する上位層がターゲットの状態変化を
/// 監視するためのトレイト.
///
/// 通知は、レジストリの状態更新が完了した後に呼び出される
/// (i.e., 通知受信の時点で、活性フラグは既に更新済み).
pub trait Observer: Send + Sync + 'static {
    /// 状態変化の通知を受け取る.
    fn notify(&self, notification: &Notification);
}

/// 何もしない`Observer`実装.
#[derive(Debug, Default, Clone)]
pub struct NullObserver;
impl Observer for NullObserver {
    fn notify(&self, _notification: &Notification) {}
}

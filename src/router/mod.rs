//! メタデータ操作のルーティングと分散操作の編成.
//!
//! [Router]は、このcrateの利用者が直接触る構成要素であり、
//! 以下の責務を持つ:
//!
//! - **ターゲット選択**: FIDないし`(親, 名前)`の組から担当サーバを解決する
//! - **分散操作の編成**: create/link/unlink/renameが複数サーバに跨る場合の
//!   ロック取消の順序付けと、クロスリファレンス応答による再試行
//! - **ストライプ化ディレクトリの読み出し**: 全ストライプへのファンアウトと
//!   ハッシュ順のマージ([dir]モジュールに委譲)
//! - **接続/セッション管理**: 参照カウントによるconnect/disconnectと、
//!   ターゲットの活性/非活性イベントの処理
//!
//! 一つの編成済み操作の中では、ロック取消RPCの完了(ないし失敗)が
//! 本体操作RPCの発行に必ず先行する. 独立な操作同士の間には順序の保証はない.
//!
//! [Router]: struct.Router.html
//! [dir]: ../dir/index.html
use slog::Logger;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub use self::builder::RouterBuilder;

use crate::dir::{self, DirPage};
use crate::fid::Fid;
use crate::layout::StripedLayout;
use crate::mds::{FidLocator, MdsConnector, MdsSession, Notification, Observer, TargetEvent};
use crate::metrics::RouterMetrics;
use crate::op::{FidSlot, LockMode, LockScope, MdReply, MdRequest, ObjectAttrs, QuotaInfo, StatFs};
use crate::target::{Target, TargetRegistry};
use crate::{ErrorKind, Result};

mod builder;

/// メタデータ操作のルータ.
///
/// `C`は各ターゲットとのセッションを確立する接続層、
/// `L`はFIDから担当ターゲットを解決する位置サービス.
///
/// 全メソッドは`&self`で並行に呼び出し可能であり、
/// 無関係な操作同士は完全に並列へと進行する.
pub struct Router<C: MdsConnector, L: FidLocator> {
    connector: C,
    locator: L,
    observer: Box<dyn Observer>,
    registry: TargetRegistry<C::Session>,
    connected: AtomicBool,
    refcount: Mutex<u32>,
    init_lock: Mutex<()>,
    max_redirects: usize,
    dir_page_size: usize,
    logger: Logger,
    metrics: RouterMetrics,
}
impl<C: MdsConnector, L: FidLocator> Router<C, L> {
    pub(crate) fn new(
        connector: C,
        locator: L,
        observer: Box<dyn Observer>,
        metrics: RouterMetrics,
        logger: Logger,
        max_redirects: usize,
        dir_page_size: usize,
    ) -> Self {
        Router {
            connector,
            locator,
            observer,
            registry: TargetRegistry::new(),
            connected: AtomicBool::new(false),
            refcount: Mutex::new(0),
            init_lock: Mutex::new(()),
            max_redirects,
            dir_page_size,
            logger,
            metrics,
        }
    }

    /// ルータのメトリクスを返す.
    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    /// 登録済みターゲット数を返す.
    pub fn target_count(&self) -> u32 {
        self.registry.target_count()
    }

    /// 活性状態のターゲット数を返す.
    pub fn active_target_count(&self) -> u32 {
        self.registry.active_count()
    }

    /// 新しいターゲットを登録する.
    ///
    /// 既に接続済みの場合には、新しいターゲットへの接続も即座に確立される
    /// (接続に失敗した場合は、登録自体が取り消される).
    ///
    /// # Errors
    ///
    /// 指定インデックスが既に使用されている場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn add_target(&self, index: u32, uuid: Uuid) -> Result<()> {
        let _guard = track!(self.init_lock.lock().map_err(crate::Error::from))?;
        let target = track!(self.registry.add(index, uuid))?;
        self.metrics
            .targets
            .set(f64::from(self.registry.target_count()));

        if self.connected.load(Ordering::SeqCst) {
            if let Err(e) = track!(self.connect_target(&target)) {
                track!(self.registry.remove(index))?;
                self.metrics
                    .targets
                    .set(f64::from(self.registry.target_count()));
                return Err(e);
            }
        }
        Ok(())
    }

    /// 接続の参照カウントを増やす.
    ///
    /// 実際の各ターゲットへのセッション確立は、最初の操作の発行時まで
    /// 遅延される. 二回目以降の呼び出しはカウントを増やすだけとなる.
    pub fn connect(&self) -> Result<()> {
        let mut refcount = track!(self.refcount.lock().map_err(crate::Error::from))?;
        *refcount += 1;
        Ok(())
    }

    /// 接続の参照カウントを減らして、ゼロになった場合には
    /// 全ターゲットとのセッションを切断する.
    pub fn disconnect(&self) -> Result<()> {
        let mut refcount = track!(self.refcount.lock().map_err(crate::Error::from))?;
        if *refcount > 0 {
            *refcount -= 1;
        }
        if *refcount != 0 {
            return Ok(());
        }

        let _guard = track!(self.init_lock.lock().map_err(crate::Error::from))?;
        for target in track!(self.registry.targets())? {
            if target.is_connected() {
                track!(self.disconnect_target(&target))?;
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        info!(self.logger, "Disconnected from all targets");
        Ok(())
    }

    /// ターゲットの活性/非活性イベントを処理する.
    ///
    /// レジストリの活性フラグと集計を更新した後、
    /// 同じ内容の通知をこのルータの監視者へと転送する.
    pub fn notify(&self, uuid: &Uuid, event: TargetEvent) -> Result<()> {
        let target = track!(self.registry.get_by_uuid(uuid))?;
        let active = event == TargetEvent::Activated;
        track!(self.set_active(&target, active))?;
        info!(
            self.logger,
            "Target {} (index {}) is now {}",
            uuid,
            target.index(),
            if active { "active" } else { "inactive" }
        );

        self.observer.notify(&Notification {
            index: target.index(),
            uuid: *uuid,
            event,
        });
        Ok(())
    }

    /// 新しいオブジェクトを作成する.
    ///
    /// `req.fid1`は親ディレクトリ(ストライプ化されている場合には
    /// `req.layout1`も設定すること). 割り当てられた新規オブジェクトの
    /// FIDは`req.fid2`およびリプライに設定される.
    ///
    /// 配置先は`req.target_hint`が指定されていればそのターゲット、
    /// さもなくば親ディレクトリの担当ターゲットとなる.
    ///
    /// # Errors
    ///
    /// 活性なターゲットが一つも存在しない場合には、
    /// 種類が`ErrorKind::Io`のエラーが返される.
    pub fn create(&self, req: &mut MdRequest) -> Result<MdReply> {
        track!(self.check_connect())?;
        self.metrics.creates.increment();
        track_assert!(req.name.is_some(), ErrorKind::InvalidInput);
        track_assert_ne!(
            self.registry.active_count(),
            0,
            ErrorKind::Io,
            "No active target"
        );

        let placement_hint = req.target_hint;
        let parent_target = track!(self.locate_parent(req))?;
        debug!(
            self.logger,
            "CREATE {:?} on {} -> mds {}",
            req.name,
            req.fid1,
            parent_target.index()
        );

        let alloc_target = if let Some(index) = placement_hint {
            track!(self.registry.get(index))?
        } else {
            Arc::clone(&parent_target)
        };
        req.fid2 = track!(self.alloc_fid(&alloc_target))?;

        let exec_target = if self.connector.supports_dir_stripe() {
            // 新規オブジェクト自身の担当サーバに発行する
            track!(self.find_target(&req.fid2))?
        } else {
            debug!(self.logger, "Server doesn't support striped dirs");
            parent_target
        };

        req.cancel.set(FidSlot::Fid1);
        let session = track!(exec_target.session())?;
        let reply = track!(session.create(req))?;
        debug!(
            self.logger,
            "Created {} -> mds {}",
            req.fid2,
            exec_target.index()
        );
        Ok(reply)
    }

    /// 既存オブジェクトへのハードリンクを作成する.
    ///
    /// `req.fid1`はリンク対象のオブジェクト、`req.fid2`は新しい親
    /// ディレクトリ(ストライプ化されている場合には`req.layout2`も
    /// 設定すること).
    pub fn link(&self, req: &mut MdRequest) -> Result<MdReply> {
        track!(self.check_connect())?;
        self.metrics.links.increment();
        let name = track_assert_some!(req.name.clone(), ErrorKind::InvalidInput);

        if let Some(layout) = req.layout2.clone() {
            let stripe = track!(layout.stripe_for_name(&name))?;
            req.fid2 = stripe.fid();
        }
        let target = track!(self.find_target(&req.fid2))?;
        debug!(
            self.logger,
            "LINK {}:{:?} to {} -> mds {}",
            req.fid2,
            name,
            req.fid1,
            target.index()
        );

        // 新しい親(fid2)のUPDATEロックはサーバ側で取消される
        req.cancel.set(FidSlot::Fid2);
        track!(self.early_cancel(
            None,
            req,
            target.index(),
            LockMode::Exclusive,
            LockScope::Update,
            FidSlot::Fid1
        ))?;

        let session = track!(target.session())?;
        track!(session.link(req))
    }

    /// エントリ名を変更(ないし移動)する.
    ///
    /// `req.fid1`は旧親、`req.fid2`は新親、`req.fid3`は移動対象の子、
    /// `req.fid4`は移動先に既存の子が居る場合のそのFID.
    /// 名前は`req.name`(旧)と`req.name2`(新).
    ///
    /// `req.migrate`が真の場合はディレクトリ移行モードとなり、
    /// `req.target_hint`で指定された移行先ターゲットから新しいFIDが
    /// 割り当てられる.
    pub fn rename(&self, req: &mut MdRequest) -> Result<MdReply> {
        track!(self.check_connect())?;
        self.metrics.renames.increment();
        let old = track_assert_some!(req.name.clone(), ErrorKind::InvalidInput);
        let new = track_assert_some!(req.name2.clone(), ErrorKind::InvalidInput);
        debug!(
            self.logger,
            "RENAME {:?} in {} to {:?} in {}",
            old,
            req.fid1,
            new,
            req.fid2
        );

        let src_target;
        if req.migrate {
            track_assert!(req.fid3.is_sane(), ErrorKind::InvalidInput, "fid:{}", req.fid3);
            // 移行先のターゲットから新しいFIDの割り当てを受ける
            let placement = track_assert_some!(
                req.target_hint,
                ErrorKind::InvalidInput,
                "Migration requires an explicit target"
            );
            let alloc_target = track!(self.registry.get(placement))?;
            req.fid2 = track!(self.alloc_fid(&alloc_target))?;
            src_target = track!(self.find_target(&req.fid3))?;
        } else {
            if let Some(layout) = req.layout1.clone() {
                let stripe = track!(layout.stripe_for_name(&old))?;
                req.fid1 = stripe.fid();
                src_target = track!(self.registry.get(stripe.target()))?;
            } else {
                src_target = track!(self.find_target(&req.fid1))?;
            }
            if let Some(layout) = req.layout2.clone() {
                let stripe = track!(layout.stripe_for_name(&new))?;
                req.fid2 = stripe.fid();
            }
        }

        // 取消は親から子の順に行う(クラスタ内の他操作とのロック順序の整合)
        req.cancel.set(FidSlot::Fid1);
        req.cancel.set(FidSlot::Fid3);
        track!(self.early_cancel(
            None,
            req,
            src_target.index(),
            LockMode::Exclusive,
            LockScope::Update,
            FidSlot::Fid2
        ))?;
        if req.fid3.is_sane() {
            // 旧親のサーバが保持する、子のLOOKUPロック
            let parent_target = track!(self.find_target(&req.fid1))?;
            track!(self.early_cancel(
                Some(&parent_target),
                req,
                src_target.index(),
                LockMode::Exclusive,
                LockScope::Lookup,
                FidSlot::Fid3
            ))?;
            track!(self.early_cancel(
                None,
                req,
                src_target.index(),
                LockMode::Exclusive,
                LockScope::Full,
                FidSlot::Fid3
            ))?;
        }
        if req.fid4.is_sane() {
            track!(self.early_cancel(
                None,
                req,
                src_target.index(),
                LockMode::Exclusive,
                LockScope::Full,
                FidSlot::Fid4
            ))?;
        }

        let session = track!(src_target.session())?;
        track!(session.rename(req))
    }

    /// エントリを削除する.
    ///
    /// `req.fid1`は親ディレクトリ、`req.fid2`は子のFID(未知の場合は
    /// ゼロ)、`req.fid3`はロック取消対象としての子のFID.
    ///
    /// 子のFIDが既知の場合には、その担当サーバに直接リクエストが
    /// 発行される. 親がストライプ化されていて、かつハッシュ種別が未知
    /// ないし移行中の場合には、子が見つかるまで全ストライプが
    /// インデックス順に試行される.
    pub fn unlink(&self, req: &mut MdRequest) -> Result<MdReply> {
        track!(self.check_connect())?;
        self.metrics.unlinks.increment();
        let name = track_assert_some!(req.name.clone(), ErrorKind::InvalidInput);

        let layout = req.layout1.clone();
        let mut stripe_hint = None;
        let mut stripe_index = 0;
        if let Some(ref layout) = layout {
            match layout.stripe_for_name(&name) {
                Ok(stripe) => {
                    req.fid1 = stripe.fid();
                    stripe_hint = Some(stripe.target());
                }
                Err(e) => {
                    // 未知のハッシュ種別は逐次探索で処理できるため継続する
                    if *e.kind() != ErrorKind::UnknownHashType {
                        return Err(track!(e));
                    }
                }
            }
            if layout.needs_exhaustive_search() {
                let stripe = track_assert_some!(layout.stripe(0), ErrorKind::InconsistentState);
                req.fid1 = stripe.fid();
                stripe_hint = Some(stripe.target());
                stripe_index = 0;
            }
        }

        let mut redirects = 0;
        loop {
            // 子の担当サーバが分かっている場合には、そちらに発行する
            let target = if !req.fid2.is_zero() {
                track!(self.find_target(&req.fid2))?
            } else if let Some(index) = stripe_hint {
                track!(self.registry.get(index))?
            } else {
                track!(self.find_target(&req.fid1))?
            };

            req.cancel.set(FidSlot::Fid1);
            req.cancel.set(FidSlot::Fid3);
            let parent_target = track!(self.find_target(&req.fid1))?;
            if parent_target.index() != target.index() {
                track!(self.early_cancel(
                    Some(&parent_target),
                    req,
                    target.index(),
                    LockMode::Exclusive,
                    LockScope::Lookup,
                    FidSlot::Fid3
                ))?;
            }
            track!(self.early_cancel(
                None,
                req,
                target.index(),
                LockMode::Exclusive,
                LockScope::Full,
                FidSlot::Fid3
            ))?;

            debug!(
                self.logger,
                "UNLINK {:?} with fid {}/{} -> mds {}",
                name,
                req.fid1,
                req.fid2,
                target.index()
            );
            let session = track!(target.session())?;
            let reply = match session.unlink(req) {
                Ok(reply) => reply,
                Err(e) => {
                    if *e.kind() == ErrorKind::NotFound {
                        if let Some(ref layout) = layout {
                            if layout.needs_exhaustive_search() {
                                stripe_index += 1;
                                if let Some(stripe) = layout.stripe(stripe_index) {
                                    self.metrics.stripe_retries.increment();
                                    req.fid1 = stripe.fid();
                                    stripe_hint = Some(stripe.target());
                                    continue;
                                }
                            }
                        }
                    }
                    return Err(track!(e));
                }
            };

            if let Some(remote) = reply.remote {
                // オブジェクトの実体は別サーバにある. 並行するrenameによって
                // 再試行中にも所在が移動し得るため、回数は上限で打ち切る.
                redirects += 1;
                track_assert!(
                    redirects <= self.max_redirects,
                    ErrorKind::Io,
                    "Too many cross-reference redirects: fid:{}",
                    remote
                );
                self.metrics.redirects.increment();
                debug!(self.logger, "Try unlink to another mds for {}", remote);
                req.fid2 = remote;
                continue;
            }
            return Ok(reply);
        }
    }

    /// FIDで指定されたオブジェクトの属性を取得する.
    pub fn getattr(&self, fid: &Fid) -> Result<MdReply> {
        track!(self.check_connect())?;
        self.metrics.getattrs.increment();
        let target = track!(self.find_target(fid))?;
        let session = track!(target.session())?;
        track!(session.getattr(fid))
    }

    /// `(親, 名前)`で指定されたオブジェクトの属性を取得する.
    ///
    /// 問い合わせ先のサーバが「オブジェクトは別サーバにある」と応答した
    /// 場合には、解決済みのFIDを用いてそのサーバへと問い合わせ直す.
    /// 再試行の回数は`max_redirects`で打ち切られる.
    pub fn getattr_by_name(&self, req: &mut MdRequest) -> Result<MdReply> {
        track!(self.check_connect())?;
        self.metrics.getattrs_by_name.increment();
        track_assert!(req.name.is_some(), ErrorKind::InvalidInput);

        let target = track!(self.locate_parent(req))?;
        debug!(
            self.logger,
            "GETATTR_NAME for {:?} on {} -> mds {}",
            req.name,
            req.fid1,
            target.index()
        );
        let session = track!(target.session())?;
        let mut reply = track!(session.getattr_name(req))?;

        let mut redirects = 0;
        while let Some(remote) = reply.remote {
            redirects += 1;
            track_assert!(
                redirects <= self.max_redirects,
                ErrorKind::Io,
                "Too many cross-reference redirects: fid:{}",
                remote
            );
            self.metrics.redirects.increment();
            debug!(self.logger, "Request attrs for {}", remote);

            // 最初のリプライは破棄して、解決済みFIDで直接問い合わせる
            let target = track!(self.find_target(&remote))?;
            req.fid1 = remote;
            req.name = None;
            let session = track!(target.session())?;
            reply = track!(session.getattr_name(req))?;
        }
        Ok(reply)
    }

    /// ディレクトリの一ページ分のエントリ群を読み出す.
    ///
    /// `req.fid1`は対象ディレクトリ、`req.fid2`はその親(`".."`の
    /// 書き換えに使用される). ストライプ化されている場合には
    /// `req.layout1`を設定すること.
    ///
    /// ストライプ化ディレクトリでは、全ストライプへの読み出しが
    /// ハッシュ順にマージされて、単一のディレクトリと同じ見え方の
    /// ページが合成される.
    pub fn read_page(&self, req: &MdRequest, resume_hash: u64) -> Result<DirPage> {
        track!(self.check_connect())?;
        self.metrics.dir_pages.increment();

        if let Some(layout) = req.layout1.clone() {
            let page = track!(dir::read_striped_page(
                &layout,
                req.fid1,
                req.fid2,
                resume_hash,
                self.dir_page_size,
                |stripe_index, stripe_fid, hash| {
                    let info = track_assert_some!(
                        layout.stripe(stripe_index),
                        ErrorKind::InconsistentState
                    );
                    let target = track!(self.registry.get(info.target()))?;
                    let session = track!(target.session())?;
                    track!(session.read_page(&stripe_fid, hash))
                }
            ))?;
            Ok(page)
        } else {
            let target = track!(self.find_target(&req.fid1))?;
            let session = track!(target.session())?;
            track!(session.read_page(&req.fid1, resume_hash))
        }
    }

    /// ストライプ化ディレクトリの属性を全ストライプから集計する.
    ///
    /// サイズとブロック数は合計、時刻は最大値が採用される.
    /// リンク数は、非マスターストライプの`"."`と`".."`の重複分
    /// (ストライプあたり2)を差し引いた上で合計される.
    pub fn merge_attrs(&self, layout: &StripedLayout) -> Result<ObjectAttrs> {
        track!(self.check_connect())?;

        let mut merged = ObjectAttrs::default();
        for (i, stripe) in layout.stripes().enumerate() {
            let target = track!(self.registry.get(stripe.target()))?;
            let session = track!(target.session())?;
            let reply = track!(session.getattr(&stripe.fid()))?;
            let attrs = track_assert_some!(reply.attrs, ErrorKind::InconsistentState);

            if i == 0 {
                merged.nlink = attrs.nlink;
                merged.mode = attrs.mode;
                merged.uid = attrs.uid;
                merged.gid = attrs.gid;
            } else {
                merged.nlink += attrs.nlink.saturating_sub(2);
            }
            merged.size += attrs.size;
            merged.blocks += attrs.blocks;
            merged.atime = std::cmp::max(merged.atime, attrs.atime);
            merged.mtime = std::cmp::max(merged.mtime, attrs.mtime);
            merged.ctime = std::cmp::max(merged.ctime, attrs.ctime);
        }
        Ok(merged)
    }

    /// 指定FIDの担当ターゲットのインデックスを返す.
    pub fn get_target_index(&self, fid: &Fid) -> Result<u32> {
        track!(self.check_connect())?;
        let target = track!(self.find_target(fid))?;
        Ok(target.index())
    }

    /// ファイルシステムのルートディレクトリのFIDを取得する.
    pub fn get_root(&self) -> Result<Fid> {
        track!(self.check_connect())?;
        let target = track!(self.registry.get(0))?;
        let session = track!(target.session())?;
        track!(session.getstatus())
    }

    /// 全ターゲットのファイルシステム統計を集計して返す.
    ///
    /// 利用可能ブロック数・総ブロック数・空きファイル数・総ファイル数は
    /// 全ターゲットの合計となり、その他はいずれかの応答の値が使用される.
    /// `for_mount`が真の場合には、マウント処理用にターゲット0相当の
    /// 最初の応答がそのまま返される.
    ///
    /// # Errors
    ///
    /// 個々のターゲットの失敗はベストエフォートで読み飛ばされるが、
    /// 全ターゲットが失敗した場合には、種類が`ErrorKind::Io`のエラーが
    /// 返される.
    pub fn statfs(&self, for_mount: bool) -> Result<StatFs> {
        track!(self.check_connect())?;
        self.metrics.statfs_calls.increment();

        let mut merged: Option<StatFs> = None;
        for target in track!(self.registry.targets())? {
            if !target.is_connected() {
                continue;
            }
            let result = target.session().and_then(|session| session.statfs());
            match result {
                Err(e) => {
                    self.metrics.broadcast_failures.increment();
                    warn!(
                        self.logger,
                        "Can't stat mds {}: {}",
                        target.index(),
                        e
                    );
                }
                Ok(statfs) => {
                    if let Some(ref mut merged) = merged {
                        merged.bavail += statfs.bavail;
                        merged.blocks += statfs.blocks;
                        merged.ffree += statfs.ffree;
                        merged.files += statfs.files;
                    } else {
                        merged = Some(statfs);
                        if for_mount {
                            break;
                        }
                    }
                }
            }
        }
        let merged = track_assert_some!(merged, ErrorKind::Io, "statfs failed on all targets");
        Ok(merged)
    }

    /// 指定ユーザのクォータ情報を全ターゲットから集計して返す.
    ///
    /// 使用量は全ターゲットの合計、上限は最初に応答したターゲットの値が
    /// 採用される. 失敗の扱いは`statfs`と同様にベストエフォート.
    pub fn quotactl(&self, uid: u32) -> Result<QuotaInfo> {
        track!(self.check_connect())?;

        let mut merged: Option<QuotaInfo> = None;
        for target in track!(self.registry.targets())? {
            if !target.is_active() {
                continue;
            }
            let result = target.session().and_then(|session| session.quotactl(uid));
            match result {
                Err(e) => {
                    self.metrics.broadcast_failures.increment();
                    warn!(
                        self.logger,
                        "Can't query quota on mds {}: {}",
                        target.index(),
                        e
                    );
                }
                Ok(quota) => {
                    if let Some(ref mut merged) = merged {
                        merged.block_usage += quota.block_usage;
                        merged.file_usage += quota.file_usage;
                    } else {
                        merged = Some(quota);
                    }
                }
            }
        }
        let merged = track_assert_some!(merged, ErrorKind::Io, "quotactl failed on all targets");
        Ok(merged)
    }

    /// 指定オブジェクトに関する未使用ロックの取消を全ターゲットに依頼する.
    ///
    /// ターゲット毎の失敗はベストエフォートで読み飛ばされるが、
    /// 全ターゲットが失敗した場合には、種類が`ErrorKind::Io`のエラーが
    /// 返される.
    pub fn cancel_unused(&self, fid: &Fid, scope: LockScope, mode: LockMode) -> Result<()> {
        track!(self.check_connect())?;

        let mut succeeded = 0;
        for target in track!(self.registry.targets())? {
            if !target.is_active() {
                continue;
            }
            let result = target
                .session()
                .and_then(|session| session.cancel_unused(fid, scope, mode));
            if let Err(e) = result {
                self.metrics.broadcast_failures.increment();
                warn!(
                    self.logger,
                    "Can't cancel locks on mds {}: {}",
                    target.index(),
                    e
                );
            } else {
                succeeded += 1;
            }
        }
        track_assert_ne!(succeeded, 0, ErrorKind::Io, "fid:{}", fid);
        Ok(())
    }

    /// 接続状態を確認して、未接続の場合には全ターゲットへの接続を確立する.
    ///
    /// 途中で失敗した場合には、確立済みの接続を切断した上でエラーが返される.
    fn check_connect(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let _guard = track!(self.init_lock.lock().map_err(crate::Error::from))?;
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        track_assert_ne!(
            self.registry.target_count(),
            0,
            ErrorKind::NotConnected,
            "No targets configured"
        );

        let targets = track!(self.registry.targets())?;
        let mut connected = Vec::new();
        for target in &targets {
            if let Err(e) = track!(self.connect_target(target)) {
                for target in connected {
                    let _ = self.disconnect_target(target);
                }
                return Err(e);
            }
            connected.push(target);
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(
            self.logger,
            "Connected to {} targets",
            self.registry.target_count()
        );
        Ok(())
    }

    fn connect_target(&self, target: &Target<C::Session>) -> Result<()> {
        let session = track!(self.connector.connect(target.index(), target.uuid()))?;
        track!(target.set_session(Some(Arc::new(session))))?;
        track!(self.set_active(target, true))?;
        debug!(
            self.logger,
            "Connected to {} (index {})",
            target.uuid(),
            target.index()
        );
        Ok(())
    }

    fn disconnect_target(&self, target: &Target<C::Session>) -> Result<()> {
        track!(self.set_active(target, false))?;
        track!(target.set_session(None))?;
        debug!(
            self.logger,
            "Disconnected from {} (index {})",
            target.uuid(),
            target.index()
        );
        Ok(())
    }

    fn set_active(&self, target: &Target<C::Session>, active: bool) -> Result<()> {
        track!(self.registry.activate(target, active))?;
        self.metrics
            .active_targets
            .set(f64::from(self.registry.active_count()));
        Ok(())
    }

    /// FIDの担当ターゲットを位置サービス経由で解決する.
    fn find_target(&self, fid: &Fid) -> Result<Arc<Target<C::Session>>> {
        let index = track!(self.locator.locate(fid))?;
        track!(self.registry.get(index))
    }

    /// `req.fid1`(親ディレクトリ)の担当ターゲットを解決する.
    ///
    /// 親がストライプ化されていて名前が与えられている場合には、
    /// 名前を担当するストライプのFIDへと`req.fid1`が書き換えられる.
    /// 名前がない場合にはマスターストライプが使用される.
    fn locate_parent(&self, req: &mut MdRequest) -> Result<Arc<Target<C::Session>>> {
        if let Some(layout) = req.layout1.clone() {
            if let Some(name) = req.name.clone() {
                let stripe = track!(layout.stripe_for_name(&name))?;
                req.fid1 = stripe.fid();
                return track!(self.registry.get(stripe.target()));
            }
            let stripe = layout.master_stripe();
            req.fid1 = stripe.fid();
            return track!(self.registry.get(stripe.target()));
        }
        track!(self.find_target(&req.fid1))
    }

    /// 対象FIDのロックを、操作の実行サーバ以外のサーバから事前に取り消す.
    ///
    /// 対象FIDが実行サーバ自身にある場合には、RPCは発行せずに
    /// リクエストの取消フラグを立てるだけとなる(サーバが操作の処理の
    /// 一環として自分で取り消すため).
    fn early_cancel(
        &self,
        target: Option<&Arc<Target<C::Session>>>,
        req: &mut MdRequest,
        op_target: u32,
        mode: LockMode,
        scope: LockScope,
        slot: FidSlot,
    ) -> Result<()> {
        let fid = req.fid(slot);
        if !fid.is_sane() {
            return Ok(());
        }

        let target = if let Some(target) = target {
            Arc::clone(target)
        } else {
            track!(self.find_target(&fid))?
        };
        if target.index() != op_target {
            debug!(self.logger, "EARLY_CANCEL on {}", fid);
            self.metrics.early_cancels.increment();
            let session = track!(target.session())?;
            track!(session.cancel_unused(&fid, scope, mode))?;
        } else {
            req.cancel.set(slot);
        }
        Ok(())
    }

    /// 指定ターゲットから新しいFIDの割り当てを受ける.
    ///
    /// 新規シーケンスの割当と位置サービス側の登録は不可分である必要が
    /// あるため、呼び出しはターゲット毎のロックで直列化される.
    fn alloc_fid(&self, target: &Target<C::Session>) -> Result<Fid> {
        let _guard = track!(target.fid_lock())?;
        track_assert!(
            target.is_active(),
            ErrorKind::NotConnected,
            "target:{}",
            target.index()
        );
        let session = track!(target.session())?;
        let fid = track!(session.alloc_fid())?;
        track_assert!(fid.is_sane(), ErrorKind::InconsistentState, "fid:{}", fid);
        Ok(fid)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;
    use trackable::result::TestResult;
    use uuid::Uuid;

    use super::*;
    use crate::dir::EntryKind;
    use crate::layout::{HashKind, StripeInfo, StripedLayout};
    use crate::mds::{MemoryCluster, MemoryConnector, MemoryLocator, RpcRecord};

    fn fixture(servers: u32) -> (MemoryCluster, Router<MemoryConnector, MemoryLocator>) {
        let cluster = MemoryCluster::new(servers);
        let router = RouterBuilder::new().finish(cluster.connector(), cluster.locator());
        for i in 0..servers {
            router.add_target(i, Uuid::new_v4()).unwrap();
        }
        (cluster, router)
    }

    fn servers_of(log: &[RpcRecord], op: &str) -> Vec<u32> {
        log.iter().filter(|r| r.op == op).map(|r| r.server).collect()
    }

    #[test]
    fn create_goes_to_parent_target() -> TestResult {
        // 親の担当サーバで割当と作成が行われる
        let (cluster, router) = fixture(3);
        let root = Fid::new(0x100, 1, 0);
        cluster.register_dir(1, root, root);

        let mut req = MdRequest::with_name(root, "foo");
        let reply = track!(router.create(&mut req))?;
        let new_fid = reply.fid.unwrap();
        assert!(new_fid.is_sane());

        let log = cluster.rpc_log();
        assert_eq!(servers_of(&log, "alloc_fid"), vec![1]);
        assert_eq!(servers_of(&log, "create"), vec![1]);
        // 明示的な配置指定がない限り、新規オブジェクトも親と同じサーバに載る
        assert_eq!(track!(router.get_target_index(&new_fid))?, 1);
        Ok(())
    }

    #[test]
    fn create_honors_explicit_placement() -> TestResult {
        let (cluster, router) = fixture(3);
        let root = Fid::new(0x100, 1, 0);
        cluster.register_dir(0, root, root);

        let mut req = MdRequest::with_name(root, "foo");
        req.target_hint = Some(2);
        let reply = track!(router.create(&mut req))?;

        let log = cluster.rpc_log();
        assert_eq!(servers_of(&log, "alloc_fid"), vec![2]);
        assert_eq!(servers_of(&log, "create"), vec![2]);
        assert_eq!(track!(router.get_target_index(&reply.fid.unwrap()))?, 2);
        Ok(())
    }

    #[test]
    fn create_without_active_targets_fails_with_io() -> TestResult {
        let (cluster, router) = fixture(2);
        let root = Fid::new(0x100, 1, 0);
        cluster.register_dir(0, root, root);

        // 一度接続してから、全ターゲットを非活性にする
        track!(router.getattr(&root).map(|_| ()))?;
        for target in track!(router.registry.targets())? {
            track!(router.set_active(&target, false))?;
        }

        let mut req = MdRequest::with_name(root, "foo");
        let e = router.create(&mut req).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::Io);
        Ok(())
    }

    #[test]
    fn routing_is_independent_of_name_for_plain_dirs() -> TestResult {
        // 非ストライプディレクトリでは、名前に依らず親の担当サーバが選ばれる
        let (cluster, router) = fixture(3);
        let root = Fid::new(0x100, 1, 0);
        cluster.register_dir(2, root, root);
        let child = Fid::new(0x200, 7, 0);
        cluster.register_object(2, child, ObjectAttrs::default());
        for name in &["a", "quite-long-name", "zzz"] {
            cluster.insert_entry(root, name, child, EntryKind::Regular);
            let mut req = MdRequest::with_name(root, *name);
            track!(router.getattr_by_name(&mut req))?;
        }

        let log = cluster.rpc_log();
        assert_eq!(servers_of(&log, "getattr_name"), vec![2, 2, 2]);
        Ok(())
    }

    #[test]
    fn cross_server_rename_cancels_locks_first() -> TestResult {
        // 早期取消RPCは、本体のrename RPCに必ず先行する
        let (cluster, router) = fixture(2);
        let src_dir = Fid::new(0x100, 1, 0);
        let dst_dir = Fid::new(0x200, 1, 0);
        let child = Fid::new(0x100, 5, 0);
        cluster.register_dir(0, src_dir, src_dir);
        cluster.register_dir(1, dst_dir, dst_dir);
        cluster.register_object(0, child, ObjectAttrs::default());
        cluster.insert_entry(src_dir, "victim", child, EntryKind::Regular);

        let mut req = MdRequest::with_name(src_dir, "victim");
        req.fid2 = dst_dir;
        req.fid3 = child;
        req.name2 = Some("renamed".to_owned());
        track!(router.rename(&mut req))?;

        let log = cluster.rpc_log();
        let cancel_pos = log.iter().position(|r| r.op == "cancel_unused").unwrap();
        let rename_pos = log.iter().position(|r| r.op == "rename").unwrap();
        assert!(cancel_pos < rename_pos);
        // 新親(dst_dir)はrenameの実行サーバ(0)とは別サーバにあるため、
        // そのUPDATEロックは事前に取り消される
        assert_eq!(log[cancel_pos].server, 1);
        assert_eq!(log[cancel_pos].fid, dst_dir);
        assert_eq!(log[rename_pos].server, 0);
        assert!(cluster.contains_entry(dst_dir, "renamed"));
        Ok(())
    }

    #[test]
    fn unlink_tries_stripes_in_order_for_unknown_hash() -> TestResult {
        // 未知ハッシュのストライプ化ディレクトリでは、
        // 見つかるまでストライプをインデックス順に試行する
        let (cluster, router) = fixture(2);
        let stripe0 = Fid::new(0x300, 1, 0);
        let stripe1 = Fid::new(0x400, 1, 0);
        cluster.register_dir(0, stripe0, stripe0);
        cluster.register_dir(1, stripe1, stripe1);
        // 対象のエントリはストライプ1側にのみ存在する
        let child = Fid::new(0x400, 9, 0);
        cluster.register_object(1, child, ObjectAttrs::default());
        cluster.insert_entry(stripe1, "victim", child, EntryKind::Regular);

        let layout = StripedLayout::new(
            HashKind::Unknown(0x77),
            vec![StripeInfo::new(stripe0, 0), StripeInfo::new(stripe1, 1)],
        )
        .unwrap();
        let mut req = MdRequest::with_name(Fid::new(0x900, 1, 0), "victim");
        req.layout1 = Some(Arc::new(layout));
        track!(router.unlink(&mut req))?;

        // 発行されたunlink RPCは、ストライプ0とストライプ1への二つだけ
        let log = cluster.rpc_log();
        assert_eq!(servers_of(&log, "unlink"), vec![0, 1]);
        assert!(!cluster.contains_entry(stripe1, "victim"));
        Ok(())
    }

    #[test]
    fn unlink_redirect_cycle_is_bounded() -> TestResult {
        // 所在が循環し続けても、再試行は上限で打ち切られる
        let (cluster, router) = fixture(2);
        let dir = Fid::new(0x100, 1, 0);
        let fid_a = Fid::new(0x100, 5, 0);
        let fid_b = Fid::new(0x200, 5, 0);
        cluster.register_dir(0, dir, dir);
        cluster.register_object(0, fid_a, ObjectAttrs::default());
        cluster.register_object(1, fid_b, ObjectAttrs::default());
        cluster.insert_entry(dir, "cycled", fid_a, EntryKind::Regular);
        cluster.force_remote_fid(0, fid_a, fid_b);
        cluster.force_remote_fid(1, fid_b, fid_a);

        let mut req = MdRequest::with_name(dir, "cycled");
        req.fid2 = fid_a;
        let e = router.unlink(&mut req).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::Io);

        // 初回 + 上限回数分の再試行で停止する
        let log = cluster.rpc_log();
        assert_eq!(servers_of(&log, "unlink").len(), 1 + 3);
        Ok(())
    }

    #[test]
    fn getattr_by_name_follows_cross_reference_once() -> TestResult {
        let (cluster, router) = fixture(2);
        let dir = Fid::new(0x100, 1, 0);
        let child = Fid::new(0x200, 3, 0);
        cluster.register_dir(0, dir, dir);
        cluster.register_object(1, child, ObjectAttrs { size: 77, ..ObjectAttrs::default() });
        cluster.insert_entry(dir, "remote", child, EntryKind::Directory);

        let mut req = MdRequest::with_name(dir, "remote");
        let reply = track!(router.getattr_by_name(&mut req))?;
        assert_eq!(reply.fid, Some(child));
        assert_eq!(reply.attrs.map(|a| a.size), Some(77));

        // 一度目は親の担当サーバ、二度目は解決済みFIDの担当サーバ
        let log = cluster.rpc_log();
        assert_eq!(servers_of(&log, "getattr_name"), vec![0, 1]);
        Ok(())
    }

    #[test]
    fn getattr_by_name_follows_forced_redirect() -> TestResult {
        let (cluster, router) = fixture(2);
        let dir = Fid::new(0x100, 1, 0);
        let fid_a = Fid::new(0x100, 5, 0);
        let fid_b = Fid::new(0x200, 5, 0);
        cluster.register_dir(0, dir, dir);
        cluster.register_object(0, fid_a, ObjectAttrs::default());
        cluster.register_object(1, fid_b, ObjectAttrs::default());
        cluster.force_remote_name(0, "moved", fid_b);

        // 一度目の応答はリダイレクト指示として破棄され、
        // 解決済みFIDによる再問い合わせの結果だけが返る
        let mut req = MdRequest::with_name(dir, "moved");
        let reply = track!(router.getattr_by_name(&mut req))?;
        assert_eq!(reply.fid, Some(fid_b));
        assert_eq!(router.metrics().redirects(), 1);
        Ok(())
    }

    #[test]
    fn concurrent_creates_serialize_fid_allocation() -> TestResult {
        // 同一サーバに対する並行createでも、FID割当は直列化される
        let (cluster, router) = fixture(2);
        let root = Fid::new(0x100, 1, 0);
        cluster.register_dir(0, root, root);
        // 接続確立を先に済ませておく
        track!(router.getattr(&root).map(|_| ()))?;

        let router = Arc::new(router);
        let results = Arc::new(Mutex::new(Vec::new()));
        let threads = (0..2)
            .map(|i| {
                let router = Arc::clone(&router);
                let results = Arc::clone(&results);
                thread::spawn(move || {
                    let mut req = MdRequest::with_name(root, format!("file-{}", i));
                    let reply = router.create(&mut req).unwrap();
                    results.lock().unwrap().push(reply.fid.unwrap());
                })
            })
            .collect::<Vec<_>>();
        for t in threads {
            assert!(t.join().is_ok());
        }

        let fids = results.lock().unwrap().clone();
        assert_eq!(fids.len(), 2);
        assert_ne!(fids[0], fids[1]);
        assert_eq!(cluster.alloc_overlaps(), 0);
        Ok(())
    }

    #[test]
    fn striped_read_merges_all_stripes_in_hash_order() -> TestResult {
        // 複数ページに渡っても全体がハッシュ順で、
        // "."と".."は全体で一組だけ現れる
        let (cluster, _) = fixture(2);
        let stripe0 = Fid::new(0x300, 1, 0);
        let stripe1 = Fid::new(0x400, 1, 0);
        let logical = Fid::new(0x900, 1, 0);
        let parent = Fid::new(0x900, 2, 0);
        cluster.register_dir(0, stripe0, stripe0);
        cluster.register_dir(1, stripe1, stripe1);
        cluster.insert_entry_with_hash(stripe0, 10, "a", Fid::new(0x300, 2, 0), EntryKind::Regular);
        cluster.insert_entry_with_hash(stripe1, 15, "b", Fid::new(0x400, 2, 0), EntryKind::Regular);
        cluster.insert_entry_with_hash(stripe0, 20, "c", Fid::new(0x300, 3, 0), EntryKind::Regular);
        cluster.insert_entry_with_hash(stripe1, 25, "d", Fid::new(0x400, 3, 0), EntryKind::Regular);

        let router = RouterBuilder::new()
            .dir_page_size(96) // 一ページに三エントリまで
            .finish(cluster.connector(), cluster.locator());
        for i in 0..2 {
            track!(router.add_target(i, Uuid::new_v4()))?;
        }

        let layout = StripedLayout::new(
            HashKind::AllChars,
            vec![StripeInfo::new(stripe0, 0), StripeInfo::new(stripe1, 1)],
        )
        .unwrap();
        let mut req = MdRequest::with_fid(logical);
        req.fid2 = parent;
        req.layout1 = Some(Arc::new(layout));

        let mut resume = 0;
        let mut pages = 0;
        let mut all = Vec::new();
        loop {
            let page = track!(router.read_page(&req, resume))?;
            all.extend(page.entries.iter().cloned());
            pages += 1;
            if page.is_end() {
                break;
            }
            resume = page.hash_end;
        }

        assert!(pages > 1);
        let hashes = all.iter().map(|e| e.hash).collect::<Vec<_>>();
        let mut sorted = hashes.clone();
        sorted.sort();
        assert_eq!(hashes, sorted);

        assert_eq!(all.iter().filter(|e| e.name == ".").count(), 1);
        assert_eq!(all.iter().filter(|e| e.name == "..").count(), 1);
        assert_eq!(all.iter().find(|e| e.name == ".").map(|e| e.fid), Some(logical));
        assert_eq!(all.iter().find(|e| e.name == "..").map(|e| e.fid), Some(parent));

        let names = all.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec![".", "..", "a", "b", "c", "d"]);
        Ok(())
    }

    #[test]
    fn statfs_merges_active_targets_best_effort() -> TestResult {
        let (cluster, router) = fixture(3);
        for i in 0..3 {
            cluster.set_statfs(
                i,
                StatFs {
                    blocks: 100,
                    bfree: 80,
                    bavail: 70,
                    files: 10,
                    ffree: 9,
                    bsize: 4096,
                    namelen: 255,
                },
            );
        }
        cluster.fail_statfs(1);

        let statfs = track!(router.statfs(false))?;
        assert_eq!(statfs.blocks, 200);
        assert_eq!(statfs.bavail, 140);
        assert_eq!(statfs.files, 20);
        assert_eq!(statfs.ffree, 18);
        assert_eq!(statfs.bsize, 4096);
        assert_eq!(router.metrics().broadcast_failures(), 1);

        // マウント用には最初の応答がそのまま返される
        let statfs = track!(router.statfs(true))?;
        assert_eq!(statfs.blocks, 100);
        Ok(())
    }

    #[test]
    fn statfs_fails_when_all_targets_fail() -> TestResult {
        let (cluster, router) = fixture(2);
        cluster.fail_statfs(0);
        cluster.fail_statfs(1);
        let e = router.statfs(false).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::Io);
        Ok(())
    }

    #[test]
    fn connect_failure_rolls_back_established_sessions() -> TestResult {
        let (cluster, router) = fixture(2);
        cluster.fail_connect(1);
        let root = Fid::new(0x100, 1, 0);
        cluster.register_dir(0, root, root);

        assert!(router.getattr(&root).is_err());
        assert_eq!(router.active_target_count(), 0);
        Ok(())
    }

    #[test]
    fn operations_without_targets_fail_with_not_connected() {
        let cluster = MemoryCluster::new(1);
        let router = RouterBuilder::new().finish(cluster.connector(), cluster.locator());
        let e = router.getattr(&Fid::new(1, 1, 0)).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::NotConnected);
    }

    #[derive(Debug, Default)]
    struct RecordingObserver(Mutex<Vec<Notification>>);
    impl Observer for Arc<RecordingObserver> {
        fn notify(&self, notification: &Notification) {
            self.0.lock().unwrap().push(notification.clone());
        }
    }

    #[test]
    fn notify_updates_registry_and_forwards_event() -> TestResult {
        let cluster = MemoryCluster::new(2);
        let observer = Arc::new(RecordingObserver::default());
        let router = RouterBuilder::new().finish_with_observer(
            cluster.connector(),
            cluster.locator(),
            Arc::clone(&observer),
        );
        let uuid0 = Uuid::new_v4();
        let uuid1 = Uuid::new_v4();
        track!(router.add_target(0, uuid0))?;
        track!(router.add_target(1, uuid1))?;
        let root = Fid::new(0x100, 1, 0);
        cluster.register_dir(0, root, root);
        track!(router.getattr(&root).map(|_| ()))?;
        assert_eq!(router.active_target_count(), 2);

        track!(router.notify(&uuid1, TargetEvent::Deactivated))?;
        assert_eq!(router.active_target_count(), 1);

        let events = observer.0.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index, 1);
        assert_eq!(events[0].uuid, uuid1);
        assert_eq!(events[0].event, TargetEvent::Deactivated);

        track!(router.notify(&uuid1, TargetEvent::Activated))?;
        assert_eq!(router.active_target_count(), 2);
        Ok(())
    }

    #[test]
    fn merge_attrs_sums_stripes_with_nlink_correction() -> TestResult {
        let (cluster, router) = fixture(2);
        let stripe0 = Fid::new(0x300, 1, 0);
        let stripe1 = Fid::new(0x400, 1, 0);
        cluster.register_object(
            0,
            stripe0,
            ObjectAttrs {
                size: 100,
                blocks: 8,
                nlink: 4,
                mtime: 50,
                ..ObjectAttrs::default()
            },
        );
        cluster.register_object(
            1,
            stripe1,
            ObjectAttrs {
                size: 200,
                blocks: 16,
                nlink: 3,
                mtime: 70,
                ..ObjectAttrs::default()
            },
        );

        let layout = StripedLayout::new(
            HashKind::AllChars,
            vec![StripeInfo::new(stripe0, 0), StripeInfo::new(stripe1, 1)],
        )
        .unwrap();
        let attrs = track!(router.merge_attrs(&layout))?;
        assert_eq!(attrs.size, 300);
        assert_eq!(attrs.blocks, 24);
        // 非マスターストライプの"."と".."の分は差し引かれる
        assert_eq!(attrs.nlink, 4 + (3 - 2));
        assert_eq!(attrs.mtime, 70);
        Ok(())
    }

    #[test]
    fn get_root_queries_first_target() -> TestResult {
        let (cluster, router) = fixture(3);
        let root = Fid::new(0x100, 1, 0);
        cluster.set_root(root);
        assert_eq!(track!(router.get_root())?, root);
        let log = cluster.rpc_log();
        assert_eq!(servers_of(&log, "getstatus"), vec![0]);
        Ok(())
    }

    #[test]
    fn cancel_unused_broadcasts_to_active_targets() -> TestResult {
        let (cluster, router) = fixture(3);
        let fid = Fid::new(0x100, 1, 0);
        cluster.register_dir(0, fid, fid);
        track!(router.getattr(&fid).map(|_| ()))?;

        track!(router.cancel_unused(&fid, LockScope::Full, LockMode::Exclusive))?;
        let log = cluster.rpc_log();
        let mut servers = servers_of(&log, "cancel_unused");
        servers.sort();
        assert_eq!(servers, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn quotactl_sums_usage_and_keeps_first_limits() -> TestResult {
        let (cluster, router) = fixture(2);
        let fid = Fid::new(0x100, 1, 0);
        cluster.register_dir(0, fid, fid);
        track!(router.getattr(&fid).map(|_| ()))?;

        cluster.set_quota(
            0,
            1000,
            QuotaInfo {
                block_usage: 50,
                block_limit: 500,
                file_usage: 5,
                file_limit: 100,
            },
        );
        cluster.set_quota(
            1,
            1000,
            QuotaInfo {
                block_usage: 30,
                block_limit: 500,
                file_usage: 2,
                file_limit: 100,
            },
        );

        let quota = track!(router.quotactl(1000))?;
        assert_eq!(quota.block_usage, 80);
        assert_eq!(quota.file_usage, 7);
        assert_eq!(quota.block_limit, 500);
        assert_eq!(quota.file_limit, 100);
        Ok(())
    }

    #[test]
    fn disconnect_tears_down_at_zero_refcount() -> TestResult {
        let (cluster, router) = fixture(2);
        let root = Fid::new(0x100, 1, 0);
        cluster.register_dir(0, root, root);

        track!(router.connect())?;
        track!(router.connect())?;
        track!(router.getattr(&root).map(|_| ()))?;
        assert_eq!(router.active_target_count(), 2);

        track!(router.disconnect())?;
        assert_eq!(router.active_target_count(), 2); // まだ参照が残っている
        track!(router.disconnect())?;
        assert_eq!(router.active_target_count(), 0);
        Ok(())
    }

    #[test]
    fn dynamic_add_target_connects_immediately_when_connected() -> TestResult {
        let cluster = MemoryCluster::new(3);
        let router = RouterBuilder::new().finish(cluster.connector(), cluster.locator());
        track!(router.add_target(0, Uuid::new_v4()))?;
        track!(router.add_target(1, Uuid::new_v4()))?;
        let root = Fid::new(0x100, 1, 0);
        cluster.register_dir(0, root, root);
        track!(router.getattr(&root).map(|_| ()))?;
        assert_eq!(router.active_target_count(), 2);

        track!(router.add_target(2, Uuid::new_v4()))?;
        assert_eq!(router.active_target_count(), 3);
        Ok(())
    }
}

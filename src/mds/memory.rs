//! プロセス内で完結するメタデータクラスタのシミュレーション実装.
//!
//! 実際のRPC層やサーバ群の代わりに、共有メモリ上の一つの状態を
//! 複数の仮想サーバで分担するもの. 単体テストや上位層の動作検証に利用する.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

use crate::dir::{DirEntry, DirPage, EntryKind, END_OF_DIR};
use crate::fid::Fid;
use crate::mds::{FidLocator, MdsConnector, MdsSession};
use crate::op::{LockMode, LockScope, MdReply, MdRequest, ObjectAttrs, QuotaInfo, StatFs};
use crate::{ErrorKind, Result};

/// 発行されたRPC一件の記録.
///
/// どのサーバにどの操作が届いたかを、発行順に記録したもの.
/// ルーティングの検証(e.g., 「取消が本体操作に先行すること」)に利用する.
#[derive(Debug, Clone)]
pub struct RpcRecord {
    /// RPCを受理したサーバのインデックス.
    pub server: u32,

    /// 操作の種別名.
    pub op: &'static str,

    /// 操作の主対象のFID.
    pub fid: Fid,

    /// 操作対象のエントリ名(存在する場合).
    pub name: Option<String>,
}

#[derive(Debug)]
struct ClusterInner {
    server_count: u32,
    next_oid: HashMap<u32, u32>,
    attrs: HashMap<Fid, ObjectAttrs>,
    dirs: HashMap<Fid, BTreeMap<(u64, String), (Fid, EntryKind)>>,
    location: HashMap<Fid, u32>,
    statfs: HashMap<u32, StatFs>,
    statfs_fails: HashSet<u32>,
    log: Vec<RpcRecord>,
    remote_fids: HashMap<(u32, Fid), Fid>,
    remote_names: HashMap<(u32, String), Fid>,
    in_alloc: HashSet<u32>,
    alloc_overlaps: usize,
    page_limit: usize,
    fail_connect: HashSet<u32>,
    dir_stripe: bool,
    root_fid: Option<Fid>,
    quotas: HashMap<(u32, u32), QuotaInfo>,
}

/// テスト用のエントリ名ハッシュ.
fn name_hash(name: &str) -> u64 {
    match name {
        "." => 0,
        ".." => 1,
        _ => name
            .bytes()
            .fold(7u64, |acc, b| acc.wrapping_mul(131).wrapping_add(u64::from(b))),
    }
}

fn seq_of(server: u32) -> u64 {
    0x1000 + u64::from(server)
}

/// プロセス内メタデータクラスタ.
///
/// `server_count`個の仮想サーバと、それらを対象とする
/// [MemoryConnector]および[MemoryLocator]を提供する.
///
/// 全サーバが一つの共有状態を参照しているため、「どのサーバがどのRPCを
/// 受理したか」はデータの分割ではなく[rpc_log]で検証する.
///
/// [MemoryConnector]: struct.MemoryConnector.html
/// [MemoryLocator]: struct.MemoryLocator.html
/// [rpc_log]: #method.rpc_log
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    inner: Arc<Mutex<ClusterInner>>,
}
impl MemoryCluster {
    /// 指定された台数の仮想サーバを持つクラスタを生成する.
    pub fn new(server_count: u32) -> Self {
        let mut next_oid = HashMap::new();
        let mut statfs = HashMap::new();
        for i in 0..server_count {
            next_oid.insert(i, 1);
            statfs.insert(
                i,
                StatFs {
                    blocks: 1000,
                    bfree: 800,
                    bavail: 700,
                    files: 100,
                    ffree: 90,
                    bsize: 4096,
                    namelen: 255,
                },
            );
        }
        MemoryCluster {
            inner: Arc::new(Mutex::new(ClusterInner {
                server_count,
                next_oid,
                attrs: HashMap::new(),
                dirs: HashMap::new(),
                location: HashMap::new(),
                statfs,
                statfs_fails: HashSet::new(),
                log: Vec::new(),
                remote_fids: HashMap::new(),
                remote_names: HashMap::new(),
                in_alloc: HashSet::new(),
                alloc_overlaps: 0,
                page_limit: 1024,
                fail_connect: HashSet::new(),
                dir_stripe: true,
                root_fid: None,
                quotas: HashMap::new(),
            })),
        }
    }

    /// このクラスタに対する`MdsConnector`実装を返す.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            inner: Arc::clone(&self.inner),
        }
    }

    /// このクラスタに対する`FidLocator`実装を返す.
    pub fn locator(&self) -> MemoryLocator {
        MemoryLocator {
            inner: Arc::clone(&self.inner),
        }
    }

    fn lock(&self) -> MutexGuard<ClusterInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// オブジェクトを指定サーバに登録する.
    pub fn register_object(&self, server: u32, fid: Fid, attrs: ObjectAttrs) {
        let mut inner = self.lock();
        inner.attrs.insert(fid, attrs);
        inner.location.insert(fid, server);
    }

    /// ルートディレクトリのFIDを設定する.
    pub fn set_root(&self, fid: Fid) {
        self.lock().root_fid = Some(fid);
    }

    /// ディレクトリを指定サーバに登録して、`"."`と`".."`を追加する.
    pub fn register_dir(&self, server: u32, fid: Fid, parent: Fid) {
        let mut inner = self.lock();
        inner.attrs.insert(
            fid,
            ObjectAttrs {
                nlink: 2,
                ..ObjectAttrs::default()
            },
        );
        inner.location.insert(fid, server);
        let table = inner.dirs.entry(fid).or_insert_with(BTreeMap::new);
        table.insert((0, ".".to_owned()), (fid, EntryKind::Directory));
        table.insert((1, "..".to_owned()), (parent, EntryKind::Directory));
    }

    /// ディレクトリにエントリを追加する.
    ///
    /// 列挙順序のハッシュ値を明示的に指定する版.
    pub fn insert_entry_with_hash(
        &self,
        dir: Fid,
        hash: u64,
        name: &str,
        child: Fid,
        kind: EntryKind,
    ) {
        let mut inner = self.lock();
        inner
            .dirs
            .entry(dir)
            .or_insert_with(BTreeMap::new)
            .insert((hash, name.to_owned()), (child, kind));
    }

    /// ディレクトリにエントリを追加する.
    pub fn insert_entry(&self, dir: Fid, name: &str, child: Fid, kind: EntryKind) {
        self.insert_entry_with_hash(dir, name_hash(name), name, child, kind);
    }

    /// ディレクトリが指定された名前のエントリを持つかどうかを返す.
    pub fn contains_entry(&self, dir: Fid, name: &str) -> bool {
        self.lock()
            .dirs
            .get(&dir)
            .map_or(false, |t| t.keys().any(|&(_, ref n)| n.as_str() == name))
    }

    /// 指定サーバでの、指定FIDに対するunlink/getattr系の問い合わせに、
    /// 常にクロスリファレンス応答を返させる.
    pub fn force_remote_fid(&self, server: u32, fid: Fid, redirect: Fid) {
        self.lock().remote_fids.insert((server, fid), redirect);
    }

    /// 指定サーバでの、指定名に対するgetattr_name問い合わせに、
    /// 常にクロスリファレンス応答を返させる.
    pub fn force_remote_name(&self, server: u32, name: &str, redirect: Fid) {
        self.lock()
            .remote_names
            .insert((server, name.to_owned()), redirect);
    }

    /// 指定サーバのstatfs応答を設定する.
    pub fn set_statfs(&self, server: u32, statfs: StatFs) {
        self.lock().statfs.insert(server, statfs);
    }

    /// 指定サーバのstatfsを失敗させる.
    pub fn fail_statfs(&self, server: u32) {
        self.lock().statfs_fails.insert(server);
    }

    /// 指定サーバでの、指定ユーザのクォータ応答を設定する.
    pub fn set_quota(&self, server: u32, uid: u32, quota: QuotaInfo) {
        self.lock().quotas.insert((server, uid), quota);
    }

    /// 指定サーバへの接続確立を失敗させる.
    pub fn fail_connect(&self, server: u32) {
        self.lock().fail_connect.insert(server);
    }

    /// read_pageが一度に返すエントリ数の上限を設定する.
    pub fn set_page_limit(&self, limit: usize) {
        self.lock().page_limit = limit;
    }

    /// ディレクトリストライピング対応の申告値を設定する.
    pub fn set_dir_stripe_support(&self, supported: bool) {
        self.lock().dir_stripe = supported;
    }

    /// これまでに発行された全RPCの記録を返す.
    pub fn rpc_log(&self) -> Vec<RpcRecord> {
        self.lock().log.clone()
    }

    /// FID割当呼び出しの重複(並行実行)が観測された回数を返す.
    ///
    /// ターゲット毎の割当直列化が機能していれば、常にゼロとなる.
    pub fn alloc_overlaps(&self) -> usize {
        self.lock().alloc_overlaps
    }
}

/// [MemoryCluster]用の`MdsConnector`実装.
///
/// [MemoryCluster]: struct.MemoryCluster.html
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    inner: Arc<Mutex<ClusterInner>>,
}
impl MdsConnector for MemoryConnector {
    type Session = MemorySession;

    fn connect(&self, index: u32, _uuid: &Uuid) -> Result<Self::Session> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        track_assert!(
            index < inner.server_count,
            ErrorKind::Io,
            "No such server: {}",
            index
        );
        track_assert!(
            !inner.fail_connect.contains(&index),
            ErrorKind::Io,
            "Connection refused: {}",
            index
        );
        inner.log.push(RpcRecord {
            server: index,
            op: "connect",
            fid: Fid::ZERO,
            name: None,
        });
        Ok(MemorySession {
            server: index,
            inner: Arc::clone(&self.inner),
        })
    }

    fn supports_dir_stripe(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .dir_stripe
    }
}

/// [MemoryCluster]用の`FidLocator`実装.
///
/// [MemoryCluster]: struct.MemoryCluster.html
#[derive(Debug, Clone)]
pub struct MemoryLocator {
    inner: Arc<Mutex<ClusterInner>>,
}
impl FidLocator for MemoryLocator {
    fn locate(&self, fid: &Fid) -> Result<u32> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let index = track_assert_some!(
            inner.location.get(fid).cloned(),
            ErrorKind::StaleLocation,
            "Unknown location: {}",
            fid
        );
        Ok(index)
    }
}

/// [MemoryCluster]の一つの仮想サーバとのセッション.
///
/// [MemoryCluster]: struct.MemoryCluster.html
#[derive(Debug)]
pub struct MemorySession {
    server: u32,
    inner: Arc<Mutex<ClusterInner>>,
}
impl MemorySession {
    fn lock(&self) -> MutexGuard<ClusterInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log(&self, op: &'static str, fid: Fid, name: Option<&str>) {
        self.lock().log.push(RpcRecord {
            server: self.server,
            op,
            fid,
            name: name.map(|n| n.to_owned()),
        });
    }

    fn find_child(
        inner: &ClusterInner,
        dir: &Fid,
        name: &str,
    ) -> Option<(u64, Fid, EntryKind)> {
        inner.dirs.get(dir).and_then(|table| {
            table
                .iter()
                .find(|&(&(_, ref n), _)| n.as_str() == name)
                .map(|(&(hash, _), &(fid, kind))| (hash, fid, kind))
        })
    }
}
impl MdsSession for MemorySession {
    fn getattr(&self, fid: &Fid) -> Result<MdReply> {
        self.log("getattr", *fid, None);
        let inner = self.lock();
        let attrs = track_assert_some!(
            inner.attrs.get(fid).cloned(),
            ErrorKind::NotFound,
            "fid:{}",
            fid
        );
        Ok(MdReply {
            fid: Some(*fid),
            attrs: Some(attrs),
            remote: None,
        })
    }

    fn getattr_name(&self, req: &MdRequest) -> Result<MdReply> {
        self.log("getattr_name", req.fid1, req.name.as_ref().map(|n| n.as_str()));
        let inner = self.lock();
        let name = if let Some(ref name) = req.name {
            name
        } else {
            // クロスリファレンス解決後の、FID直接指定による再問い合わせ
            let attrs = track_assert_some!(
                inner.attrs.get(&req.fid1).cloned(),
                ErrorKind::NotFound,
                "fid:{}",
                req.fid1
            );
            return Ok(MdReply {
                fid: Some(req.fid1),
                attrs: Some(attrs),
                remote: None,
            });
        };

        if let Some(&redirect) = inner.remote_names.get(&(self.server, name.clone())) {
            return Ok(MdReply {
                fid: Some(redirect),
                attrs: None,
                remote: Some(redirect),
            });
        }

        let (_, child, _) = track_assert_some!(
            Self::find_child(&inner, &req.fid1, name),
            ErrorKind::NotFound,
            "name:{:?}",
            name
        );
        if inner.location.get(&child) != Some(&self.server) {
            // エントリは存在するが、オブジェクト自体は他サーバにある
            return Ok(MdReply {
                fid: Some(child),
                attrs: None,
                remote: Some(child),
            });
        }
        Ok(MdReply {
            fid: Some(child),
            attrs: inner.attrs.get(&child).cloned(),
            remote: None,
        })
    }

    fn create(&self, req: &MdRequest) -> Result<MdReply> {
        let name = track_assert_some!(req.name.as_ref(), ErrorKind::InvalidInput);
        self.log("create", req.fid1, Some(name.as_str()));
        track_assert!(req.fid2.is_sane(), ErrorKind::InvalidInput, "fid:{}", req.fid2);

        let mut inner = self.lock();
        let hash = name_hash(name);
        inner
            .dirs
            .entry(req.fid1)
            .or_insert_with(BTreeMap::new)
            .insert((hash, name.clone()), (req.fid2, EntryKind::Regular));
        inner.attrs.insert(
            req.fid2,
            ObjectAttrs {
                nlink: 1,
                ..req.attrs
            },
        );
        Ok(MdReply {
            fid: Some(req.fid2),
            attrs: Some(req.attrs),
            remote: None,
        })
    }

    fn link(&self, req: &MdRequest) -> Result<MdReply> {
        let name = track_assert_some!(req.name.as_ref(), ErrorKind::InvalidInput);
        self.log("link", req.fid2, Some(name.as_str()));

        let mut inner = self.lock();
        let hash = name_hash(name);
        inner
            .dirs
            .entry(req.fid2)
            .or_insert_with(BTreeMap::new)
            .insert((hash, name.clone()), (req.fid1, EntryKind::Regular));
        if let Some(attrs) = inner.attrs.get_mut(&req.fid1) {
            attrs.nlink += 1;
        }
        Ok(MdReply {
            fid: Some(req.fid1),
            attrs: None,
            remote: None,
        })
    }

    fn unlink(&self, req: &MdRequest) -> Result<MdReply> {
        let name = track_assert_some!(req.name.as_ref(), ErrorKind::InvalidInput);
        self.log("unlink", req.fid1, Some(name.as_str()));

        let mut inner = self.lock();
        if !req.fid2.is_zero() {
            if let Some(&redirect) = inner.remote_fids.get(&(self.server, req.fid2)) {
                return Ok(MdReply {
                    fid: Some(req.fid2),
                    attrs: None,
                    remote: Some(redirect),
                });
            }
        }

        let (hash, child, _) = track_assert_some!(
            Self::find_child(&inner, &req.fid1, name),
            ErrorKind::NotFound,
            "name:{:?}",
            name
        );
        if let Some(table) = inner.dirs.get_mut(&req.fid1) {
            table.remove(&(hash, name.clone()));
        }
        if let Some(attrs) = inner.attrs.get_mut(&child) {
            attrs.nlink = attrs.nlink.saturating_sub(1);
        }
        Ok(MdReply {
            fid: Some(child),
            attrs: None,
            remote: None,
        })
    }

    fn rename(&self, req: &MdRequest) -> Result<MdReply> {
        let old = track_assert_some!(req.name.as_ref(), ErrorKind::InvalidInput);
        let new = track_assert_some!(req.name2.as_ref(), ErrorKind::InvalidInput);
        self.log("rename", req.fid1, Some(old.as_str()));

        let mut inner = self.lock();
        let (hash, child, kind) = track_assert_some!(
            Self::find_child(&inner, &req.fid1, old),
            ErrorKind::NotFound,
            "name:{:?}",
            old
        );
        if let Some(table) = inner.dirs.get_mut(&req.fid1) {
            table.remove(&(hash, old.clone()));
        }
        let new_hash = name_hash(new);
        inner
            .dirs
            .entry(req.fid2)
            .or_insert_with(BTreeMap::new)
            .insert((new_hash, new.clone()), (child, kind));
        Ok(MdReply {
            fid: Some(child),
            attrs: None,
            remote: None,
        })
    }

    fn read_page(&self, dir: &Fid, resume_hash: u64) -> Result<DirPage> {
        self.log("read_page", *dir, None);
        let inner = self.lock();
        let table = track_assert_some!(
            inner.dirs.get(dir),
            ErrorKind::NotFound,
            "dir:{}",
            dir
        );

        let mut entries = Vec::new();
        let mut hash_end = END_OF_DIR;
        for (&(hash, ref name), &(fid, kind)) in table.iter() {
            if hash < resume_hash {
                continue;
            }
            if entries.len() == inner.page_limit {
                hash_end = hash;
                break;
            }
            entries.push(DirEntry::new(hash, name.as_str(), fid, kind));
        }
        Ok(DirPage {
            hash_start: resume_hash,
            hash_end,
            entries,
        })
    }

    fn alloc_fid(&self) -> Result<Fid> {
        self.log("alloc_fid", Fid::ZERO, None);
        {
            let mut inner = self.lock();
            if !inner.in_alloc.insert(self.server) {
                inner.alloc_overlaps += 1;
            }
        }
        // 直列化されていない並行割当を重複として検出しやすくするための猶予
        thread::sleep(Duration::from_millis(1));

        let mut inner = self.lock();
        let next = inner.next_oid.get(&self.server).cloned().unwrap_or(1);
        inner.next_oid.insert(self.server, next + 1);
        let fid = Fid::new(seq_of(self.server), next, 0);
        let server = self.server;
        inner.location.insert(fid, server);
        inner.in_alloc.remove(&self.server);
        Ok(fid)
    }

    fn cancel_unused(&self, fid: &Fid, _scope: LockScope, _mode: LockMode) -> Result<()> {
        self.log("cancel_unused", *fid, None);
        Ok(())
    }

    fn getstatus(&self) -> Result<Fid> {
        self.log("getstatus", Fid::ZERO, None);
        let inner = self.lock();
        let root = track_assert_some!(inner.root_fid, ErrorKind::NotFound, "No root fid");
        Ok(root)
    }

    fn quotactl(&self, uid: u32) -> Result<QuotaInfo> {
        self.log("quotactl", Fid::ZERO, None);
        let inner = self.lock();
        Ok(inner
            .quotas
            .get(&(self.server, uid))
            .cloned()
            .unwrap_or_default())
    }

    fn statfs(&self) -> Result<StatFs> {
        self.log("statfs", Fid::ZERO, None);
        let inner = self.lock();
        track_assert!(
            !inner.statfs_fails.contains(&self.server),
            ErrorKind::Io,
            "statfs failure injected: {}",
            self.server
        );
        let statfs = track_assert_some!(
            inner.statfs.get(&self.server).cloned(),
            ErrorKind::InconsistentState
        );
        Ok(statfs)
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;

    #[test]
    fn basic_namespace_operations_work() -> TestResult {
        let cluster = MemoryCluster::new(2);
        let root = Fid::new(0x100, 1, 0);
        cluster.register_dir(0, root, root);

        let connector = cluster.connector();
        let uuid = Uuid::new_v4();
        let session = track!(connector.connect(0, &uuid))?;

        let fid = track!(session.alloc_fid())?;
        let mut req = MdRequest::with_name(root, "foo");
        req.fid2 = fid;
        track!(session.create(&req))?;
        assert!(cluster.contains_entry(root, "foo"));

        let reply = track!(session.getattr_name(&MdRequest::with_name(root, "foo")))?;
        assert_eq!(reply.fid, Some(fid));
        assert!(reply.remote.is_none());

        let mut unlink = MdRequest::with_name(root, "foo");
        unlink.fid2 = fid;
        track!(session.unlink(&unlink))?;
        assert!(!cluster.contains_entry(root, "foo"));
        Ok(())
    }

    #[test]
    fn cross_server_entry_replies_remote() -> TestResult {
        let cluster = MemoryCluster::new(2);
        let root = Fid::new(0x100, 1, 0);
        let child = Fid::new(0x200, 1, 0);
        cluster.register_dir(0, root, root);
        cluster.register_object(1, child, ObjectAttrs::default());
        cluster.insert_entry(root, "remote", child, EntryKind::Directory);

        let session = track!(cluster.connector().connect(0, &Uuid::new_v4()))?;
        let reply = track!(session.getattr_name(&MdRequest::with_name(root, "remote")))?;
        assert_eq!(reply.remote, Some(child));
        Ok(())
    }

    #[test]
    fn connect_to_unknown_server_fails() {
        let cluster = MemoryCluster::new(1);
        assert!(cluster.connector().connect(3, &Uuid::new_v4()).is_err());
    }

    #[test]
    fn read_page_paginates() -> TestResult {
        let cluster = MemoryCluster::new(1);
        let dir = Fid::new(0x100, 1, 0);
        cluster.register_dir(0, dir, dir);
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            cluster.insert_entry_with_hash(
                dir,
                10 * (i as u64 + 1),
                name,
                Fid::new(0x100, 10 + i as u32, 0),
                EntryKind::Regular,
            );
        }
        cluster.set_page_limit(2);

        let session = track!(cluster.connector().connect(0, &Uuid::new_v4()))?;
        let page = track!(session.read_page(&dir, 2))?;
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.hash_end, 30);

        let page = track!(session.read_page(&dir, page.hash_end))?;
        assert_eq!(page.entries.len(), 1);
        assert!(page.is_end());
        Ok(())
    }
}

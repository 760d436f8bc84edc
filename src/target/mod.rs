//! ターゲット(個々のメタデータサーバ)のレジストリ.
//!
//! [Target]は、このクライアントがリクエストを振り向ける先の一つの
//! メタデータサーバを表す. [TargetRegistry]は、インデックスをキーとする
//! 疎で成長可能なターゲット表であり、多数の操作スレッドからの並行な
//! 読み出しと、直列化された追加・削除をサポートする.
//!
//! [Target]: struct.Target.html
//! [TargetRegistry]: struct.TargetRegistry.html
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use uuid::Uuid;

use crate::{ErrorKind, Result};

/// 一つのメタデータサーバを表すターゲット.
///
/// インデックスは、シャーディング方式における位置を表しており、
/// 割り当て後に変化することはない. `S`は接続確立後のセッションの型.
#[derive(Debug)]
pub struct Target<S> {
    index: u32,
    uuid: Uuid,
    active: AtomicBool,
    session: RwLock<Option<Arc<S>>>,
    fid_lock: Mutex<()>,
}
impl<S> Target<S> {
    fn new(index: u32, uuid: Uuid) -> Self {
        Target {
            index,
            uuid,
            active: AtomicBool::new(false),
            session: RwLock::new(None),
            fid_lock: Mutex::new(()),
        }
    }

    /// このターゲットのインデックスを返す.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// このターゲットの識別子を返す.
    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    /// このターゲットが活性(i.e., 接続が確立されて利用可能)かどうかを返す.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 確立済みのセッションを返す.
    ///
    /// # Errors
    ///
    /// セッションが未確立ないし切断済みの場合には、
    /// 種類が`ErrorKind::NotConnected`のエラーが返される.
    pub fn session(&self) -> Result<Arc<S>> {
        let slot = track!(self.session.read().map_err(crate::Error::from))?;
        let session = track_assert_some!(
            slot.clone(),
            ErrorKind::NotConnected,
            "target:{}",
            self.index
        );
        Ok(session)
    }

    /// セッションが確立済みかどうかを返す.
    pub fn is_connected(&self) -> bool {
        self.session
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub(crate) fn set_session(&self, session: Option<Arc<S>>) -> Result<()> {
        let mut slot = track!(self.session.write().map_err(crate::Error::from))?;
        *slot = session;
        Ok(())
    }

    /// FID割当操作を直列化するための、ターゲット毎のロックを返す.
    ///
    /// 新規シーケンスの割当と位置サービスへの登録は不可分に行われる
    /// 必要があるため、同一ターゲットに対する割当呼び出しは
    /// このロックの下で直列化される.
    pub(crate) fn fid_lock(&self) -> Result<MutexGuard<()>> {
        track!(self.fid_lock.lock().map_err(crate::Error::from))
    }
}

/// ターゲット群を保持するレジストリ.
///
/// 内部の表は読み出しが支配的であり、追加による成長時には
/// 容量を倍々に増やした新しい表が(書き込みロックの下で)丸ごと
/// 公開される. 既存インデックスが成長によって無効になることはない.
#[derive(Debug)]
pub struct TargetRegistry<S> {
    tgts: RwLock<Vec<Option<Arc<Target<S>>>>>,
    count: AtomicU32,
    active_count: AtomicU32,
    activate_lock: Mutex<()>,
}
impl<S> TargetRegistry<S> {
    /// 空のレジストリを生成する.
    pub fn new() -> Self {
        TargetRegistry {
            tgts: RwLock::new(Vec::new()),
            count: AtomicU32::new(0),
            active_count: AtomicU32::new(0),
            activate_lock: Mutex::new(()),
        }
    }

    /// 登録済みターゲット数(i.e., 最大インデックス + 1)を返す.
    pub fn target_count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// 活性状態のターゲット数を返す.
    pub fn active_count(&self) -> u32 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// 新しいターゲットを登録する.
    ///
    /// # Errors
    ///
    /// 指定インデックスが既に使用されている場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn add(&self, index: u32, uuid: Uuid) -> Result<Arc<Target<S>>> {
        let mut tgts = track!(self.tgts.write().map_err(crate::Error::from))?;
        if let Some(Some(existing)) = tgts.get(index as usize) {
            track_panic!(
                ErrorKind::InvalidInput,
                "UUID {} already assigned at target index {}",
                existing.uuid(),
                index
            );
        }

        if index as usize >= tgts.len() {
            let mut new_size = std::cmp::max(1, tgts.len());
            while new_size <= index as usize {
                new_size <<= 1;
            }
            let mut new_tgts = Vec::with_capacity(new_size);
            new_tgts.extend(tgts.iter().cloned());
            new_tgts.resize(new_size, None);
            *tgts = new_tgts;
        }

        let target = Arc::new(Target::new(index, uuid));
        tgts[index as usize] = Some(Arc::clone(&target));
        if index + 1 > self.count.load(Ordering::SeqCst) {
            self.count.store(index + 1, Ordering::SeqCst);
        }
        Ok(target)
    }

    /// 指定インデックスのターゲットを取り除く.
    ///
    /// システム全体の破棄時にのみ呼び出されることを想定している.
    pub fn remove(&self, index: u32) -> Result<()> {
        let mut tgts = track!(self.tgts.write().map_err(crate::Error::from))?;
        if let Some(slot) = tgts.get_mut(index as usize) {
            if let Some(target) = slot.take() {
                if target.is_active() {
                    self.active_count.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }

    /// 指定インデックスのターゲットを返す.
    ///
    /// # Errors
    ///
    /// ターゲットが一つも登録されていない場合には`ErrorKind::NotConnected`が、
    /// 指定インデックスにターゲットが存在しない場合には
    /// `ErrorKind::NoSuchTarget`が、それぞれ返される.
    pub fn get(&self, index: u32) -> Result<Arc<Target<S>>> {
        let tgts = track!(self.tgts.read().map_err(crate::Error::from))?;
        track_assert_ne!(
            self.count.load(Ordering::SeqCst),
            0,
            ErrorKind::NotConnected
        );
        let target = tgts
            .get(index as usize)
            .and_then(|slot| slot.as_ref())
            .cloned();
        let target = track_assert_some!(target, ErrorKind::NoSuchTarget, "index:{}", index);
        Ok(target)
    }

    /// 指定された識別子を持つターゲットを返す.
    pub fn get_by_uuid(&self, uuid: &Uuid) -> Result<Arc<Target<S>>> {
        let tgts = track!(self.tgts.read().map_err(crate::Error::from))?;
        let target = tgts
            .iter()
            .filter_map(|slot| slot.as_ref())
            .find(|t| t.uuid() == uuid)
            .cloned();
        let target = track_assert_some!(target, ErrorKind::NoSuchTarget, "uuid:{}", uuid);
        Ok(target)
    }

    /// 登録済みの全ターゲットのスナップショットを、インデックス順に返す.
    pub fn targets(&self) -> Result<Vec<Arc<Target<S>>>> {
        let tgts = track!(self.tgts.read().map_err(crate::Error::from))?;
        Ok(tgts.iter().filter_map(|slot| slot.clone()).collect())
    }

    /// ターゲットの活性フラグを切り替えて、活性数の集計を調整する.
    ///
    /// 状態に変化がない場合には何も行わない.
    pub fn activate(&self, target: &Target<S>, active: bool) -> Result<()> {
        let _guard = track!(self.activate_lock.lock().map_err(crate::Error::from))?;
        if target.is_active() == active {
            return Ok(());
        }
        target.active.store(active, Ordering::SeqCst);
        if active {
            self.active_count.fetch_add(1, Ordering::SeqCst);
        } else {
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
impl<S> Default for TargetRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

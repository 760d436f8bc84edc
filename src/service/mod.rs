//! ルータを複数のワーカスレッドで駆動する非同期ファサード.
//!
//! [Router]の各メソッドは、RPCの往復中呼び出しスレッドをブロックする.
//! このモジュールは、コマンドキューとワーカスレッド群を間に挟むことで、
//! 利用側が`Future`ベースでメタデータ操作を発行できるようにする.
//!
//! 無関係な操作同士の並行性はワーカ数で決まり、一つの操作の内部の
//! 逐次性(ロック取消が本体に先行する等)はルータ側で保証される.
//!
//! [Router]: ../router/struct.Router.html
use futures::{Async, Future, Poll};
use std::sync::Arc;

pub use self::builder::ServiceBuilder;
pub use self::request::ServiceRequest;

use self::thread::{ServiceThreadHandle, ServiceThreadMonitor};
use crate::metrics::ServiceMetrics;
use crate::Error;

mod builder;
mod command;
mod request;
mod thread;

/// メタデータ操作を非同期に発行するためのサービス.
///
/// # Future実装
///
/// `Service`は[Future]を実装している.
///
/// 実際の処理は別スレッド群で実行されるため`Future::poll`を呼び出さなくても
/// 進行上は支障はないが、このメソッドによりサービス(スレッド群)の終了
/// (正常ないし異常)を検知することが可能となる.
///
/// なお`Service`インスタンスが破棄されると、裏で動いているワーカスレッド群も
/// 停止させられるので、`Future::poll`を呼び出さない場合でも、
/// インスタンス自体は保持しておく必要がある.
///
/// [Future]: https://docs.rs/futures/0.1/futures/future/trait.Future.html
#[must_use]
#[derive(Debug)]
pub struct Service {
    monitor: ServiceThreadMonitor,
    handle: ServiceHandle,
    is_stopped: bool,
}
impl Service {
    /// サービスを操作するためのハンドルを返す.
    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    /// サービスに停止リクエストを発行する.
    ///
    /// このメソッドが返った時点でサービスが停止している保証はないので、
    /// 確実に終了を検知したい場合には`Future::poll`メソッド経由で知る必要がある.
    pub fn stop(&self) {
        self.handle.0.send_stop();
    }

    pub(crate) fn new(monitor: ServiceThreadMonitor, handle: ServiceHandle) -> Self {
        Service {
            monitor,
            handle,
            is_stopped: false,
        }
    }
}
impl Future for Service {
    type Item = ();
    type Error = Error;
    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        let result = track!(self.monitor.poll());
        if let Ok(Async::NotReady) = result {
        } else {
            self.is_stopped = true;
        }
        result
    }
}
impl Drop for Service {
    fn drop(&mut self) {
        if !self.is_stopped {
            self.stop();
        }
    }
}

/// サービスを操作するためのハンドル.
#[derive(Debug, Clone)]
pub struct ServiceHandle(ServiceThreadHandle);
impl ServiceHandle {
    /// サービスに発行するリクエストのビルダを返す.
    pub fn request(&self) -> ServiceRequest {
        ServiceRequest::new(&self.0)
    }

    /// サービスのメトリクスを返す.
    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        self.0.metrics()
    }
}

#[cfg(test)]
mod tests {
    use fibers_global::execute;
    use std::sync::Arc;
    use trackable::result::TestResult;
    use uuid::Uuid;

    use super::*;
    use crate::fid::Fid;
    use crate::mds::MemoryCluster;
    use crate::op::MdRequest;
    use crate::router::RouterBuilder;

    #[test]
    fn service_works() -> TestResult {
        let cluster = MemoryCluster::new(2);
        let root = Fid::new(0x100, 1, 0);
        cluster.register_dir(0, root, root);

        let router = Arc::new(
            RouterBuilder::new().finish(cluster.connector(), cluster.locator()),
        );
        for i in 0..2 {
            track!(router.add_target(i, Uuid::new_v4()))?;
        }

        let service = ServiceBuilder::new().workers(2).spawn(Arc::clone(&router));
        let handle = service.handle();

        let reply = track!(execute(
            handle.request().create(MdRequest::with_name(root, "foo"))
        ))?;
        let fid = reply.fid.unwrap();

        let reply = track!(execute(handle.request().getattr(fid)))?;
        assert_eq!(reply.fid, Some(fid));

        let reply = track!(execute(
            handle.request().getattr_by_name(MdRequest::with_name(root, "foo"))
        ))?;
        assert_eq!(reply.fid, Some(fid));

        let statfs = track!(execute(handle.request().statfs(false)))?;
        assert_ne!(statfs.blocks, 0);

        let page = track!(execute(
            handle.request().read_page(MdRequest::with_fid(root), 0)
        ))?;
        assert!(page.entries.iter().any(|e| e.name == "foo"));

        let mut unlink = MdRequest::with_name(root, "foo");
        unlink.fid2 = fid;
        track!(execute(handle.request().unlink(unlink)))?;
        assert!(!cluster.contains_entry(root, "foo"));

        assert_eq!(handle.metrics().failed_commands(), 0);

        // 停止後はワーカスレッド群の終了をFuture経由で検知できる
        service.stop();
        track!(execute(service))?;
        Ok(())
    }

    #[test]
    fn concurrent_requests_proceed_in_parallel() -> TestResult {
        let cluster = MemoryCluster::new(2);
        let root0 = Fid::new(0x100, 1, 0);
        let root1 = Fid::new(0x200, 1, 0);
        cluster.register_dir(0, root0, root0);
        cluster.register_dir(1, root1, root1);

        let router = Arc::new(
            RouterBuilder::new().finish(cluster.connector(), cluster.locator()),
        );
        for i in 0..2 {
            track!(router.add_target(i, Uuid::new_v4()))?;
        }
        let service = ServiceBuilder::new().workers(2).spawn(router);
        let handle = service.handle();

        let create0 = handle.request().create(MdRequest::with_name(root0, "a"));
        let create1 = handle.request().create(MdRequest::with_name(root1, "b"));
        let (reply0, reply1) = track!(execute(create0.join(create1)))?;
        assert_ne!(reply0.fid, reply1.fid);
        assert_eq!(cluster.alloc_overlaps(), 0);
        Ok(())
    }
}

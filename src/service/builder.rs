use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};
use std::sync::Arc;

use super::thread::ServiceThread;
use super::{Service, ServiceHandle};
use crate::mds::{FidLocator, MdsConnector};
use crate::router::Router;

/// `Service`のビルダ.
#[derive(Debug, Clone)]
pub struct ServiceBuilder {
    pub(crate) metrics: MetricBuilder,
    pub(crate) logger: Logger,
    pub(crate) workers: usize,
}
impl ServiceBuilder {
    /// デフォルト設定で`ServiceBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        ServiceBuilder {
            metrics: MetricBuilder::new(),
            logger: Logger::root(Discard, o!()),
            workers: 4,
        }
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// ワーカスレッド用のloggerを登録する.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// ワーカスレッド数を設定する.
    ///
    /// ルータの各操作はRPCの往復中ワーカスレッドをブロックするため、
    /// この値が同時に進行可能な操作数の上限となる.
    ///
    /// デフォルト値は`4`.
    pub fn workers(&mut self, n: usize) -> &mut Self {
        self.workers = std::cmp::max(1, n);
        self
    }

    /// 指定されたルータを駆動する`Service`を起動する.
    ///
    /// 起動したサービス用に、`workers`個の専用OSスレッドが割り当てられる.
    ///
    /// # 注意
    ///
    /// 返り値の`Service`インスタンスが破棄されると、
    /// 起動したワーカスレッド群も停止させられるので注意が必要.
    pub fn spawn<C, L>(&self, router: Arc<Router<C, L>>) -> Service
    where
        C: MdsConnector,
        L: FidLocator,
    {
        let (thread_handle, thread_monitor) = ServiceThread::spawn(self, router);
        Service::new(thread_monitor, ServiceHandle(thread_handle))
    }
}
impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

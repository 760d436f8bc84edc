use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};

use crate::mds::{FidLocator, MdsConnector, NullObserver, Observer};
use crate::metrics::RouterMetrics;
use crate::router::Router;

/// `Router`のビルダ.
#[derive(Debug, Clone)]
pub struct RouterBuilder {
    pub(crate) metrics: MetricBuilder,
    pub(crate) logger: Logger,
    pub(crate) max_redirects: usize,
    pub(crate) dir_page_size: usize,
}
impl RouterBuilder {
    /// デフォルト設定で`RouterBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        RouterBuilder {
            metrics: MetricBuilder::new(),
            logger: Logger::root(Discard, o!()),
            max_redirects: 3,
            dir_page_size: 4096,
        }
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// ルータ用のloggerを登録する.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// クロスリファレンス応答による再試行回数の上限を設定する.
    ///
    /// 並行するrename等によってオブジェクトの所在が移動し続けた場合でも、
    /// この上限によって再試行ループは必ず打ち切られる
    /// (上限超過時には`ErrorKind::Io`エラーが返される).
    ///
    /// デフォルト値は`3`.
    pub fn max_redirects(&mut self, n: usize) -> &mut Self {
        self.max_redirects = n;
        self
    }

    /// ディレクトリ読み出しの一ページあたりの出力バッファサイズ(バイト単位)を設定する.
    ///
    /// ストライプ化ディレクトリのマージ読み出しの際に、
    /// 一度の呼び出しで合成されるページの容量となる.
    ///
    /// デフォルト値は`4096`.
    pub fn dir_page_size(&mut self, size: usize) -> &mut Self {
        self.dir_page_size = size;
        self
    }

    /// 指定された接続層と位置サービスを用いる`Router`を生成する.
    ///
    /// この時点では、どのターゲットへの接続も確立されない
    /// (接続は最初の操作時に遅延して確立される).
    pub fn finish<C, L>(&self, connector: C, locator: L) -> Router<C, L>
    where
        C: MdsConnector,
        L: FidLocator,
    {
        self.finish_with_observer(connector, locator, NullObserver)
    }

    /// 状態変化の監視者付きで`Router`を生成する.
    pub fn finish_with_observer<C, L, O>(&self, connector: C, locator: L, observer: O) -> Router<C, L>
    where
        C: MdsConnector,
        L: FidLocator,
        O: Observer,
    {
        Router::new(
            connector,
            locator,
            Box::new(observer),
            RouterMetrics::new(&self.metrics),
            self.logger.clone(),
            self.max_redirects,
            self.dir_page_size,
        )
    }
}
impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

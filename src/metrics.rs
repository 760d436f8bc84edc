//! [Prometheus][prometheus]用のメトリクス.
//!
//! [prometheus]: https://prometheus.io/
use prometrics::metrics::{Counter, Gauge, MetricBuilder};

/// ルータのメトリクス.
#[derive(Debug, Clone)]
pub struct RouterMetrics {
    pub(crate) creates: Counter,
    pub(crate) links: Counter,
    pub(crate) unlinks: Counter,
    pub(crate) renames: Counter,
    pub(crate) getattrs: Counter,
    pub(crate) getattrs_by_name: Counter,
    pub(crate) dir_pages: Counter,
    pub(crate) statfs_calls: Counter,
    pub(crate) redirects: Counter,
    pub(crate) stripe_retries: Counter,
    pub(crate) early_cancels: Counter,
    pub(crate) broadcast_failures: Counter,
    pub(crate) targets: Gauge,
    pub(crate) active_targets: Gauge,
}
impl RouterMetrics {
    /// クロスリファレンス応答による再試行の総数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// mdsroute_router_redirects_total <COUNTER>
    /// ```
    pub fn redirects(&self) -> u64 {
        self.redirects.value() as u64
    }

    /// 全ストライプ逐次探索での、次ストライプへの再試行の総数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// mdsroute_router_stripe_retries_total <COUNTER>
    /// ```
    pub fn stripe_retries(&self) -> u64 {
        self.stripe_retries.value() as u64
    }

    /// 操作本体に先行して発行されたロック取消RPCの総数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// mdsroute_router_early_cancels_total <COUNTER>
    /// ```
    pub fn early_cancels(&self) -> u64 {
        self.early_cancels.value() as u64
    }

    /// ブロードキャスト操作中の、ターゲット単位の失敗の総数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// mdsroute_router_broadcast_failures_total <COUNTER>
    /// ```
    pub fn broadcast_failures(&self) -> u64 {
        self.broadcast_failures.value() as u64
    }

    pub(crate) fn new(builder: &MetricBuilder) -> Self {
        let mut builder = builder.clone();
        builder.namespace("mdsroute").subsystem("router");
        let operation = |name: &str| {
            builder
                .counter("operations_total")
                .help("Number of issued metadata operations")
                .label("operation", name)
                .finish()
                .expect("Never fails")
        };
        RouterMetrics {
            creates: operation("create"),
            links: operation("link"),
            unlinks: operation("unlink"),
            renames: operation("rename"),
            getattrs: operation("getattr"),
            getattrs_by_name: operation("getattr_by_name"),
            dir_pages: operation("read_page"),
            statfs_calls: operation("statfs"),
            redirects: builder
                .counter("redirects_total")
                .help("Number of cross-reference redirects")
                .finish()
                .expect("Never fails"),
            stripe_retries: builder
                .counter("stripe_retries_total")
                .help("Number of next-stripe retries during exhaustive search")
                .finish()
                .expect("Never fails"),
            early_cancels: builder
                .counter("early_cancels_total")
                .help("Number of early lock cancellation RPCs")
                .finish()
                .expect("Never fails"),
            broadcast_failures: builder
                .counter("broadcast_failures_total")
                .help("Number of per-target failures during broadcast operations")
                .finish()
                .expect("Never fails"),
            targets: builder
                .gauge("targets")
                .help("Number of configured targets")
                .finish()
                .expect("Never fails"),
            active_targets: builder
                .gauge("active_targets")
                .help("Number of active targets")
                .finish()
                .expect("Never fails"),
        }
    }
}

/// サービス(非同期ファサード)のメトリクス.
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub(crate) enqueued_commands: Counter,
    pub(crate) dequeued_commands: Counter,
    pub(crate) failed_commands: Counter,
}
impl ServiceMetrics {
    /// キューに投入されたコマンドの総数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// mdsroute_service_enqueued_commands_total <COUNTER>
    /// ```
    pub fn enqueued_commands(&self) -> u64 {
        self.enqueued_commands.value() as u64
    }

    /// キューから取り出されて実行されたコマンドの総数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// mdsroute_service_dequeued_commands_total <COUNTER>
    /// ```
    pub fn dequeued_commands(&self) -> u64 {
        self.dequeued_commands.value() as u64
    }

    /// 実行結果がエラーとなったコマンドの総数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// mdsroute_service_failed_commands_total <COUNTER>
    /// ```
    pub fn failed_commands(&self) -> u64 {
        self.failed_commands.value() as u64
    }

    pub(crate) fn new(builder: &MetricBuilder) -> Self {
        let mut builder = builder.clone();
        builder.namespace("mdsroute").subsystem("service");
        ServiceMetrics {
            enqueued_commands: builder
                .counter("enqueued_commands_total")
                .help("Number of commands enqueued to the service")
                .finish()
                .expect("Never fails"),
            dequeued_commands: builder
                .counter("dequeued_commands_total")
                .help("Number of commands dequeued and executed")
                .finish()
                .expect("Never fails"),
            failed_commands: builder
                .counter("failed_commands_total")
                .help("Number of commands whose execution failed")
                .finish()
                .expect("Never fails"),
        }
    }
}

use fibers::sync::oneshot;
use futures::{Future, Poll};
use slog::Logger;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::mpsc::SendError;
use std::sync::Arc;
use std::thread;
use trackable::error::ErrorKindExt;

use crate::mds::{FidLocator, MdsConnector};
use crate::metrics::ServiceMetrics;
use crate::router::Router;
use crate::service::command::{Command, CommandReceiver, CommandSender, StopService};
use crate::service::ServiceBuilder;
use crate::{Error, ErrorKind, Result};

/// サービスのワーカスレッド群.
///
/// 各ワーカは専用のコマンドキューを持ち、ハンドルからのコマンドは
/// ラウンドロビンでいずれかのワーカに振り分けられる. ルータの各操作は
/// RPCの往復中スレッドをブロックするため、ワーカ数が操作の並行度の
/// 上限となる.
pub(crate) struct ServiceThread;
impl ServiceThread {
    pub(crate) fn spawn<C, L>(
        builder: &ServiceBuilder,
        router: Arc<Router<C, L>>,
    ) -> (ServiceThreadHandle, ServiceThreadMonitor)
    where
        C: MdsConnector,
        L: FidLocator,
    {
        let metrics = Arc::new(ServiceMetrics::new(&builder.metrics));
        let mut command_txs = Vec::with_capacity(builder.workers);
        let mut workers = Vec::with_capacity(builder.workers);
        for i in 0..builder.workers {
            let (command_tx, command_rx) = std_mpsc::channel();
            command_txs.push(command_tx);

            let router = Arc::clone(&router);
            let metrics = Arc::clone(&metrics);
            let logger = builder.logger.clone();
            workers.push(thread::spawn(move || {
                run_worker(i, command_rx, &router, &metrics, &logger)
            }));
        }

        let (monitored, monitor) = oneshot::monitor();
        thread::spawn(move || {
            let mut result = Ok(());
            for worker in workers {
                match worker.join() {
                    Err(_) => {
                        result = Err(ErrorKind::Other
                            .cause("service worker thread panicked")
                            .into())
                    }
                    Ok(Err(e)) => result = Err(e),
                    Ok(Ok(())) => {}
                }
            }
            monitored.exit(result);
        });

        let handle = ServiceThreadHandle {
            command_txs,
            next: Arc::new(AtomicUsize::new(0)),
            metrics,
        };
        (handle, ServiceThreadMonitor(monitor))
    }
}

fn run_worker<C, L>(
    index: usize,
    command_rx: CommandReceiver,
    router: &Router<C, L>,
    metrics: &ServiceMetrics,
    logger: &Logger,
) -> Result<()>
where
    C: MdsConnector,
    L: FidLocator,
{
    debug!(logger, "Service worker {} started", index);
    while let Ok(command) = command_rx.recv() {
        if let Command::Stop(StopService) = command {
            break;
        }
        metrics.dequeued_commands.increment();
        handle_command(router, metrics, command);
    }
    debug!(logger, "Service worker {} stopped", index);
    Ok(())
}

fn handle_command<C, L>(router: &Router<C, L>, metrics: &ServiceMetrics, command: Command)
where
    C: MdsConnector,
    L: FidLocator,
{
    let failed = &metrics.failed_commands;
    match command {
        Command::Create(c) => {
            let mut req = c.req;
            let result = track!(router.create(&mut req));
            if result.is_err() {
                failed.increment();
            }
            c.reply.send(result);
        }
        Command::Link(c) => {
            let mut req = c.req;
            let result = track!(router.link(&mut req));
            if result.is_err() {
                failed.increment();
            }
            c.reply.send(result);
        }
        Command::Unlink(c) => {
            let mut req = c.req;
            let result = track!(router.unlink(&mut req));
            if result.is_err() {
                failed.increment();
            }
            c.reply.send(result);
        }
        Command::Rename(c) => {
            let mut req = c.req;
            let result = track!(router.rename(&mut req));
            if result.is_err() {
                failed.increment();
            }
            c.reply.send(result);
        }
        Command::Getattr(c) => {
            let result = track!(router.getattr(&c.fid));
            if result.is_err() {
                failed.increment();
            }
            c.reply.send(result);
        }
        Command::GetattrByName(c) => {
            let mut req = c.req;
            let result = track!(router.getattr_by_name(&mut req));
            if result.is_err() {
                failed.increment();
            }
            c.reply.send(result);
        }
        Command::ReadPage(c) => {
            let result = track!(router.read_page(&c.req, c.resume_hash));
            if result.is_err() {
                failed.increment();
            }
            c.reply.send(result);
        }
        Command::Statfs(c) => {
            let result = track!(router.statfs(c.for_mount));
            if result.is_err() {
                failed.increment();
            }
            c.reply.send(result);
        }
        Command::Stop(_) => {}
    }
}

/// サービスのワーカスレッド群の死活監視用オブジェクト.
#[derive(Debug)]
pub(crate) struct ServiceThreadMonitor(oneshot::Monitor<(), Error>);
impl Future for ServiceThreadMonitor {
    type Item = ();
    type Error = Error;
    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        track!(self.0.poll().map_err(|e| e.unwrap_or_else(|| {
            ErrorKind::Other
                .cause("`ServiceThread` terminated unintentionally")
                .into()
        })))
    }
}

/// ワーカスレッド群を操作するためのハンドル.
#[derive(Debug, Clone)]
pub(crate) struct ServiceThreadHandle {
    command_txs: Vec<CommandSender>,
    next: Arc<AtomicUsize>,
    metrics: Arc<ServiceMetrics>,
}
impl ServiceThreadHandle {
    pub fn send_command(&self, command: Command) {
        self.metrics.enqueued_commands.increment();
        let index = self.next.fetch_add(1, Ordering::SeqCst) % self.command_txs.len();
        if let Err(SendError(command)) = self.command_txs[index].send(command) {
            self.metrics.failed_commands.increment();
            drop(command);
        }
    }

    pub fn send_stop(&self) {
        for command_tx in &self.command_txs {
            let _ = command_tx.send(Command::Stop(StopService));
        }
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }
}

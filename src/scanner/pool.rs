//! Bounded work queue and worker pool.
//!
//! One pass pushes probe tasks into a bounded channel while a fixed set of
//! workers drains it. The channel capacity is the backpressure: when workers
//! lag, the producer blocks instead of buffering the whole target×port cross
//! product, so memory and in-flight sockets stay bounded no matter how large
//! the scan is. Closing the sender is the shutdown signal; workers stop when
//! the queue reports empty-and-closed or when the run is cancelled.

use crate::scanner::ScanContext;
use crate::types::Port;
use futures::future::join_all;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

/// Queue capacity per worker.
const QUEUE_FACTOR: usize = 4;

/// One pending probe: which target (by caller index), which of its
/// addresses, which port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ProbeTask {
    pub target: usize,
    pub addr: IpAddr,
    pub port: Port,
}

/// Create the bounded task channel for a pass.
pub(crate) fn task_channel(workers: usize) -> (mpsc::Sender<ProbeTask>, mpsc::Receiver<ProbeTask>) {
    mpsc::channel(workers.saturating_mul(QUEUE_FACTOR).max(1))
}

/// Run `workers` probe workers until the queue drains or the run is
/// cancelled, then join them all.
pub(crate) async fn drive_workers(
    rx: mpsc::Receiver<ProbeTask>,
    workers: usize,
    deadline: Duration,
    collect_timeouts: bool,
    ctx: Arc<ScanContext>,
) {
    let rx = Arc::new(Mutex::new(rx));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let rx = Arc::clone(&rx);
            let ctx = Arc::clone(&ctx);
            tokio::spawn(worker_loop(rx, deadline, collect_timeouts, ctx))
        })
        .collect();
    join_all(handles).await;
    trace!(workers, "pass workers joined");
}

async fn worker_loop(
    rx: Arc<Mutex<mpsc::Receiver<ProbeTask>>>,
    deadline: Duration,
    collect_timeouts: bool,
    ctx: Arc<ScanContext>,
) {
    loop {
        let task = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = ctx.cancel.cancelled() => return,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => return,
                },
            }
        };

        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            outcome = ctx.probe.probe(task.addr, task.port, deadline) => outcome,
        };

        ctx.record(&task, outcome, collect_timeouts);
    }
}

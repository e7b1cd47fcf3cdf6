//! The worker pool (component G): one task per surviving upstream,
//! consuming from a shared bounded queue. No worker ever handles more
//! than one item concurrently; parallelism across upstreams is the
//! pool's size.
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::resolver::StubResolver;

pub enum QueryKind {
    A,
    Txt,
}

pub struct WorkResult {
    pub data: Vec<u8>,
    pub error: Option<crate::error::TunnelError>,
}

/// A single unit of work for a `Worker`: issue `query` against whatever
/// upstream happens to be free, then notify `completion` and, if present,
/// push the outcome onto `result_sink`.
pub struct WorkItem {
    pub kind: QueryKind,
    pub name: String,
    pub completion: oneshot::Sender<()>,
    pub result_sink: Option<mpsc::Sender<WorkResult>>,
}

/// Spawns one worker per resolver bound to `queue`, returning their join
/// handles. Workers exit cleanly once the queue's sender side is dropped
/// and drained.
pub fn spawn_workers(
    resolvers: Vec<Arc<dyn StubResolver>>,
    queue: async_channel::Receiver<WorkItem>,
) -> Vec<tokio::task::JoinHandle<()>> {
    resolvers
        .into_iter()
        .enumerate()
        .map(|(id, resolver)| {
            let queue = queue.clone();
            tokio::spawn(async move { worker_loop(id, resolver, queue).await })
        })
        .collect()
}

async fn worker_loop(id: usize, resolver: Arc<dyn StubResolver>, queue: async_channel::Receiver<WorkItem>) {
    log::debug!("starting worker #{}", id);
    while let Ok(item) = queue.recv().await {
        let result = match item.kind {
            QueryKind::A => resolver.query_a(&item.name).await,
            QueryKind::Txt => resolver.query_txt(&item.name).await,
        };
        let (data, error) = match result {
            Ok((data, _rtt)) => (data, None),
            Err(e) => (Vec::new(), Some(e)),
        };
        if let Some(sink) = item.result_sink {
            let _ = sink.send(WorkResult { data, error }).await;
        }
        let _ = item.completion.send(());
    }
    log::debug!("worker #{} exiting, queue closed", id);
}

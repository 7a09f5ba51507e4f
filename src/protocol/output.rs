use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use super::{join, EncodeAs, CHANNEL_DEPTH};
use crate::error::{Error, Result};
use crate::{reporter, KeyValue};

/// Sink side of a protocol: records sent here are encoded and written by a
/// background task.
///
/// Closing the sender is not enough to know the bytes reached the
/// underlying writer; call [`Encoder::finish`] for that.
pub struct Encoder<K, V> {
    tx: mpsc::Sender<KeyValue<K, V>>,
    skipped: Arc<AtomicU64>,
    task: Option<JoinHandle<Result<u64>>>,
}

fn closed() -> Error {
    Error::StreamClosed("encoder stopped accepting records".into())
}

impl<K, V> Encoder<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    pub(super) fn spawn<KF, VF, W>(output: W, group: String) -> Self
    where
        KF: EncodeAs<K>,
        VF: EncodeAs<V>,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let skipped = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(write_records::<KF, VF, K, V, W>(
            rx,
            output,
            skipped.clone(),
            group,
        ));
        Self {
            tx,
            skipped,
            task: Some(task),
        }
    }

    /// Queues one record, waiting while the channel is full.
    ///
    /// If the writer has stopped, returns the error that stopped it.
    pub async fn send(&mut self, key: K, value: V) -> Result<()> {
        if self.tx.send(KeyValue::new(key, value)).await.is_ok() {
            return Ok(());
        }
        match self.task.take() {
            Some(task) => join("encoder", task).await.and(Err(closed())),
            None => Err(closed()),
        }
    }

    /// A second handle for producers running in other tasks.
    pub fn sender(&self) -> mpsc::Sender<KeyValue<K, V>> {
        self.tx.clone()
    }

    /// Records dropped so far because they could not be encoded.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Closes the input and waits until every queued record has been
    /// written and the writer flushed and shut down. Returns the number of
    /// lines written.
    ///
    /// Any [`sender`](Self::sender) clones must be dropped first.
    pub async fn finish(self) -> Result<u64> {
        drop(self.tx);
        match self.task {
            Some(task) => join("encoder", task).await,
            None => Err(closed()),
        }
    }
}

async fn write_records<KF, VF, K, V, W>(
    mut rx: mpsc::Receiver<KeyValue<K, V>>,
    output: W,
    skipped: Arc<AtomicU64>,
    group: String,
) -> Result<u64>
where
    KF: EncodeAs<K>,
    VF: EncodeAs<V>,
    W: AsyncWrite + Unpin,
{
    let mut out = BufWriter::new(output);
    let mut line = Vec::with_capacity(256);
    let mut written = 0;

    while let Some(kv) = rx.recv().await {
        line.clear();
        if let Err(e) = KF::encode(&kv.key, &mut line) {
            skipped.fetch_add(1, Ordering::Relaxed);
            reporter::counter(&group, "unable to encode key", 1);
            warn!("{e} - failed encoding key");
            continue;
        }
        line.push(b'\t');
        if let Err(e) = VF::encode(&kv.value, &mut line) {
            skipped.fetch_add(1, Ordering::Relaxed);
            reporter::counter(&group, "unable to encode value", 1);
            warn!("{e} - failed encoding value");
            continue;
        }
        line.push(b'\n');
        out.write_all(&line).await?;
        written += 1;
    }

    out.flush().await?;
    out.shutdown().await?;
    Ok(written)
}

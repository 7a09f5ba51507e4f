use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, Notify};
use tracing::warn;

use super::{Format, KeyGroup, READ_BUFFER};
use crate::error::Result;
use crate::{reporter, KeyValue};

struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(input: R) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_BUFFER, input),
            buf: Vec::new(),
        }
    }

    /// The next line without its newline; `None` at end of input.
    async fn next_line(&mut self) -> std::io::Result<Option<&[u8]>> {
        self.buf.clear();
        if self.inner.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        }
        Ok(Some(&self.buf))
    }
}

fn drop_line(invalid: &AtomicU64, group: &str, counter: &str) {
    invalid.fetch_add(1, Ordering::Relaxed);
    reporter::counter(group, counter, 1);
}

fn split_tab(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let tab = line.iter().position(|&b| b == b'\t')?;
    Some((&line[..tab], &line[tab + 1..]))
}

pub(super) async fn records<F, R>(
    input: R,
    tx: mpsc::Sender<F::Item>,
    invalid: Arc<AtomicU64>,
    group: String,
) -> Result<()>
where
    F: Format,
    R: AsyncRead + Unpin,
{
    let mut lines = LineReader::new(input);
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        match F::parse(line) {
            Ok(record) => {
                if tx.send(record).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                drop_line(&invalid, &group, "invalid line");
                warn!("{e} - failed parsing {}", String::from_utf8_lossy(line));
            }
        }
    }
    Ok(())
}

pub(super) async fn pairs<K, V, R>(
    input: R,
    tx: mpsc::Sender<KeyValue<K::Item, V::Item>>,
    invalid: Arc<AtomicU64>,
    group: String,
) -> Result<()>
where
    K: Format,
    V: Format,
    R: AsyncRead + Unpin,
{
    let mut lines = LineReader::new(input);
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = split_tab(line) else {
            drop_line(&invalid, &group, "invalid line - no tab");
            warn!("invalid line. no tab - {}", String::from_utf8_lossy(line));
            continue;
        };
        let parsed = K::parse(key).and_then(|k| Ok(KeyValue::new(k, V::parse(value)?)));
        match parsed {
            Ok(kv) => {
                if tx.send(kv).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                drop_line(&invalid, &group, "invalid line");
                warn!("{e} - failed parsing {}", String::from_utf8_lossy(line));
            }
        }
    }
    Ok(())
}

/// Collates sorted `key\tvalue` lines into one [`KeyGroup`] per run of
/// byte-identical keys.
///
/// A new group is opened only after `demand` is notified by a consumer
/// asking for it, so nothing past the current group's run is parsed while
/// that group is held.
pub(super) async fn groups<K, V, R>(
    input: R,
    tx: mpsc::Sender<KeyGroup<K::Item, V::Item>>,
    demand: Arc<Notify>,
    invalid: Arc<AtomicU64>,
    group: String,
) -> Result<()>
where
    K: Format,
    V: Format,
    R: AsyncRead + Unpin,
{
    let mut lines = LineReader::new(input);
    let mut last_key: Vec<u8> = Vec::new();
    let mut current: Option<mpsc::Sender<V::Item>> = None;
    let mut requested = false;

    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        let Some((raw_key, raw_value)) = split_tab(line) else {
            drop_line(&invalid, &group, "invalid line - no tab");
            warn!("invalid line. no tab - {}", String::from_utf8_lossy(line));
            // The next valid line always opens a fresh group.
            last_key.clear();
            current = None;
            continue;
        };

        if current.is_none() || raw_key != last_key.as_slice() {
            // Closing the sender ends the previous group's values.
            current = None;
            if !requested {
                tokio::select! {
                    _ = demand.notified() => requested = true,
                    _ = tx.closed() => return Ok(()),
                }
            }
            let key = match K::parse(raw_key) {
                Ok(key) => key,
                Err(e) => {
                    drop_line(&invalid, &group, "invalid line");
                    warn!("{e} - failed parsing key {}", String::from_utf8_lossy(line));
                    continue;
                }
            };
            last_key.clear();
            last_key.extend_from_slice(raw_key);

            let (values_tx, values) = mpsc::channel(super::CHANNEL_DEPTH);
            if tx.send(KeyGroup { key, values }).await.is_err() {
                return Ok(());
            }
            requested = false;
            current = Some(values_tx);
        }

        match V::parse(raw_value) {
            Ok(value) => {
                if let Some(values_tx) = &current {
                    // A consumer may drop a group before draining it; the
                    // rest of its values are discarded.
                    let _ = values_tx.send(value).await;
                }
            }
            Err(e) => {
                drop_line(&invalid, &group, "invalid line");
                warn!("{e} - failed parsing {}", String::from_utf8_lossy(line));
            }
        }
    }
    Ok(())
}

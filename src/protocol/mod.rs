//! Line protocols between the streaming engine and a step.
//!
//! Mapper input is newline-delimited records. Everything a step writes, and
//! everything a reducer or combiner reads, is
//!
//! ```text
//! <key-bytes> TAB <value-bytes> NEWLINE
//! ```
//!
//! where each segment is either JSON ([`Json`]) or passed through untouched
//! ([`Raw`]). The three internal protocols combine the two:
//! [`JsonInternal`], [`RawJsonInternal`] and [`RawInternal`].
//!
//! Decoding and encoding run as background tasks connected to the caller by
//! bounded channels of [`CHANNEL_DEPTH`] items. Reduce-side input arrives
//! sorted by key, so [`Internal::decode_groups`] can hand out one
//! [`KeyGroup`] per run of equal keys. Only one group is fed at a time: a
//! consumer that stops reading a group's values without dropping it stalls
//! the decoder until it resumes.
//!
//! Malformed lines and unencodable records are counted through
//! [`reporter::counter`](crate::reporter::counter), logged and skipped. Only
//! I/O failures end a stream with an error, surfaced by `finish()`.

mod format;
mod input;
mod output;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::KeyValue;

pub use format::{EncodeAs, Format, FormatError, Json, Raw};
pub use output::Encoder;

/// Depth of every channel between a protocol task and its consumer.
pub const CHANNEL_DEPTH: usize = 100;

/// Read buffer for decoders; mapper input lines can be large.
pub const READ_BUFFER: usize = 2 * 1024 * 1024;

/// Decodes mapper input where each line is one JSON document.
pub fn json_input<R>(input: R) -> Records<serde_json::Value>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    decode_records::<Json, R>(input)
}

/// Decodes mapper input as raw lines, without the trailing newline.
pub fn raw_input<R>(input: R) -> Records<bytes::Bytes>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    decode_records::<Raw, R>(input)
}

/// Decodes one record per non-empty line using format `F`.
pub fn decode_records<F, R>(input: R) -> Records<F::Item>
where
    F: Format,
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let invalid = Arc::new(AtomicU64::new(0));
    let group = format!("{}InputProtocol", F::NAME);
    let task = tokio::spawn(input::records::<F, R>(input, tx, invalid.clone(), group));
    Records { rx, invalid, task }
}

/// A tab-separated protocol with key format `K` and value format `V`.
pub struct Internal<K, V>(PhantomData<fn() -> (K, V)>);

/// JSON keys, JSON values.
pub type JsonInternal = Internal<Json, Json>;
/// Pre-framed raw keys, JSON values.
pub type RawJsonInternal = Internal<Raw, Json>;
/// Raw keys, raw values.
pub type RawInternal = Internal<Raw, Raw>;

impl<K: Format, V: Format> Internal<K, V> {
    /// Protocol name used as the counter group, e.g. `RawJsonInternal`.
    pub fn name() -> String {
        if K::NAME == V::NAME {
            format!("{}Internal", K::NAME)
        } else {
            format!("{}{}Internal", K::NAME, V::NAME)
        }
    }

    /// Splits each line on its first tab and groups consecutive lines with
    /// byte-identical key segments.
    ///
    /// Input must be sorted by key: a key that reappears after a different
    /// key opens a second group.
    pub fn decode_groups<R>(input: R) -> KeyGroups<K::Item, V::Item>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let demand = Arc::new(Notify::new());
        let invalid = Arc::new(AtomicU64::new(0));
        let group = format!("{}InputProtocol", Self::name());
        let task = tokio::spawn(input::groups::<K, V, R>(
            input,
            tx,
            demand.clone(),
            invalid.clone(),
            group,
        ));
        KeyGroups {
            rx,
            demand,
            invalid,
            task,
        }
    }

    /// Splits each line on its first tab without collating keys.
    pub fn decode_pairs<R>(input: R) -> Records<KeyValue<K::Item, V::Item>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let invalid = Arc::new(AtomicU64::new(0));
        let group = format!("{}InputProtocol", Self::name());
        let task = tokio::spawn(input::pairs::<K, V, R>(input, tx, invalid.clone(), group));
        Records { rx, invalid, task }
    }

    /// Starts a writer task encoding `(key, value)` records onto `output`.
    pub fn encoder<KT, VT, W>(output: W) -> Encoder<KT, VT>
    where
        K: EncodeAs<KT>,
        V: EncodeAs<VT>,
        KT: Send + 'static,
        VT: Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let group = format!("{}OutputProtocol", Self::name());
        Encoder::spawn::<K, V, W>(output, group)
    }
}

/// A lazily decoded record stream.
pub struct Records<T> {
    rx: mpsc::Receiver<T>,
    invalid: Arc<AtomicU64>,
    task: JoinHandle<Result<()>>,
}

impl<T> Records<T> {
    /// Next decoded record, or `None` at end of input.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Lines dropped so far because they could not be decoded.
    pub fn invalid(&self) -> u64 {
        self.invalid.load(Ordering::Relaxed)
    }

    /// Waits for the decoder to stop and returns the number of dropped lines.
    ///
    /// Records not yet received are discarded.
    pub async fn finish(self) -> Result<u64> {
        drop(self.rx);
        join("decoder", self.task).await?;
        Ok(self.invalid.load(Ordering::Relaxed))
    }
}

/// A key and the run of values that share it.
pub struct KeyGroup<K, V> {
    pub key: K,
    values: mpsc::Receiver<V>,
}

impl<K, V> KeyGroup<K, V> {
    /// Next value for this key, or `None` once the run has ended.
    pub async fn next(&mut self) -> Option<V> {
        self.values.recv().await
    }
}

/// Reduce-side input grouped by key.
///
/// Groups are handed over one at a time: the collator opens the next group
/// only when [`next`](Self::next) asks for it.
pub struct KeyGroups<K, V> {
    rx: mpsc::Receiver<KeyGroup<K, V>>,
    demand: Arc<Notify>,
    invalid: Arc<AtomicU64>,
    task: JoinHandle<Result<()>>,
}

impl<K, V> KeyGroups<K, V> {
    /// Next group, or `None` at end of input.
    pub async fn next(&mut self) -> Option<KeyGroup<K, V>> {
        self.demand.notify_one();
        self.rx.recv().await
    }

    pub fn invalid(&self) -> u64 {
        self.invalid.load(Ordering::Relaxed)
    }

    /// Waits for the decoder to stop and returns the number of dropped lines.
    pub async fn finish(self) -> Result<u64> {
        drop(self.rx);
        join("collator", self.task).await?;
        Ok(self.invalid.load(Ordering::Relaxed))
    }
}

pub(crate) async fn join<T>(what: &str, task: JoinHandle<Result<T>>) -> Result<T> {
    match task.await {
        Ok(res) => res,
        Err(e) => Err(Error::StreamClosed(format!("{what} task: {e}"))),
    }
}

//! Runs steps in-process, without a cluster.
//!
//! The harness wires `input -> map -> sort -> reduce -> output` with
//! in-memory pipes. The sort phase stands in for the engine's shuffle, so a
//! reducer sees exactly what it would on a cluster: every line, ordered
//! byte-wise.
//!
//! ```no_run
//! # use mrstream::harness;
//! # async fn demo(step: &dyn mrstream::Step) {
//! harness::assert_step(step, &b"{\"k\":\"a\"}\n"[..], "\"a\"\t1").await;
//! # }
//! ```

use thiserror::Error;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::step::{StageInput, Step};

const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("{stage} failed: {error:#}")]
    Stage {
        stage: &'static str,
        error: anyhow::Error,
    },

    #[error("output does not match expected output\ngot output:\n{got}\nexpected output:\n{expected}")]
    Mismatch { got: String, expected: String },
}

/// Reads every line of `input`, sorts the lines byte-wise and writes them
/// back newline-terminated. A missing final newline is tolerated.
pub async fn sort_phase<R, W>(mut input: R, mut output: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut data = Vec::new();
    input.read_to_end(&mut data).await?;

    let mut lines: Vec<&[u8]> = data
        .split_inclusive(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\n").unwrap_or(line))
        .collect();
    lines.sort_unstable();

    for line in lines {
        output.write_all(line).await?;
        output.write_all(b"\n").await?;
    }
    output.flush().await?;
    output.shutdown().await
}

/// Runs one step over `input` and returns the reducer's output with
/// surrounding whitespace trimmed.
///
/// A step without a mapper has its input fed straight into the sort phase.
pub async fn run_step<R>(step: &dyn Step, input: R) -> Result<Vec<u8>, HarnessError>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let input: StageInput = Box::new(input);
    let (map_out, sort_in) = io::duplex(PIPE_CAPACITY);
    let (sort_out, reduce_in) = io::duplex(PIPE_CAPACITY);
    let (reduce_out, mut result) = io::duplex(PIPE_CAPACITY);

    let (mapper_input, sort_input): (Option<StageInput>, StageInput) = match step.as_mapper() {
        Some(_) => (Some(input), Box::new(sort_in)),
        None => (None, input),
    };

    let map = async move {
        match (step.as_mapper(), mapper_input) {
            (Some(mapper), Some(input)) => mapper.map(input, Box::new(map_out)).await,
            _ => {
                debug!("skipping mapper");
                Ok(())
            }
        }
    };
    let sort = async move { sort_phase(sort_input, sort_out).await };
    let reduce = async move { step.reduce(Box::new(reduce_in), Box::new(reduce_out)).await };
    let collect = async move {
        let mut buf = Vec::new();
        result.read_to_end(&mut buf).await.map(|_| buf)
    };

    let (mapped, sorted, reduced, collected) = tokio::join!(map, sort, reduce, collect);
    let (output, collected) = match collected {
        Ok(output) => (output, Ok(())),
        Err(e) => (Vec::new(), Err(e.into())),
    };
    first_failure(vec![
        ("mapper", mapped),
        ("sort", sorted.map_err(anyhow::Error::from)),
        ("reducer", reduced),
        ("output", collected),
    ])?;

    Ok(output.trim_ascii().to_vec())
}

/// The first stage error in pipeline order, skipping broken pipes when
/// another stage failed for a real reason: a stage that stops reading
/// breaks the pipe of the stage feeding it.
fn first_failure(results: Vec<(&'static str, anyhow::Result<()>)>) -> Result<(), HarnessError> {
    let mut failures: Vec<_> = results
        .into_iter()
        .filter_map(|(stage, result)| result.err().map(|error| (stage, error)))
        .collect();
    let root = failures
        .iter()
        .position(|(_, error)| !is_broken_pipe(error))
        .unwrap_or(0);
    if failures.is_empty() {
        return Ok(());
    }
    let (stage, error) = failures.swap_remove(root);
    Err(HarnessError::Stage { stage, error })
}

fn is_broken_pipe(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|e| e.kind() == std::io::ErrorKind::BrokenPipe)
    })
}

/// Runs `steps` in order, feeding each step's output to the next one.
pub async fn run_steps<R>(steps: &[&dyn Step], input: R) -> Result<Vec<u8>, HarnessError>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut input: StageInput = Box::new(input);
    let mut result = Vec::new();
    for step in steps {
        result = run_step(*step, input).await?;
        input = Box::new(std::io::Cursor::new(result.clone()));
    }
    Ok(result)
}

/// Runs one step and compares its trimmed output with `expected`.
pub async fn check_step<R>(
    step: &dyn Step,
    input: R,
    expected: &str,
) -> Result<Vec<u8>, HarnessError>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let got = run_step(step, input).await?;
    compare(got, expected)
}

/// Runs a pipeline of steps and compares the final trimmed output with
/// `expected`.
pub async fn check_steps<R>(
    steps: &[&dyn Step],
    input: R,
    expected: &str,
) -> Result<Vec<u8>, HarnessError>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let got = run_steps(steps, input).await?;
    compare(got, expected)
}

/// Like [`check_step`], failing the calling test on any error.
pub async fn assert_step<R>(step: &dyn Step, input: R, expected: &str) -> Vec<u8>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    match check_step(step, input, expected).await {
        Ok(got) => got,
        Err(e) => panic!("{e}"),
    }
}

/// Like [`check_steps`], failing the calling test on any error.
pub async fn assert_steps<R>(steps: &[&dyn Step], input: R, expected: &str) -> Vec<u8>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    match check_steps(steps, input, expected).await {
        Ok(got) => got,
        Err(e) => panic!("{e}"),
    }
}

fn compare(got: Vec<u8>, expected: &str) -> Result<Vec<u8>, HarnessError> {
    let expected = expected.as_bytes().trim_ascii();
    if got == expected {
        Ok(got)
    } else {
        Err(HarnessError::Mismatch {
            got: String::from_utf8_lossy(&got).into_owned(),
            expected: String::from_utf8_lossy(expected).into_owned(),
        })
    }
}

use std::fs::File;
use std::io::{Read, Write};

use anyhow::{bail, Context, Result};
use glob::glob;
use tracing::{debug, info};

use super::Job;
use crate::harness;
use crate::step::Step;

/// Reads every file matching `pattern`, in path order, into one buffer.
///
/// A file that doesn't end in a newline gets one, so its last line isn't
/// glued to the next file's first.
pub fn read_input(pattern: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut files = 0;
    for pathspec in glob(pattern)?.flatten() {
        if !pathspec.is_file() {
            continue;
        }
        // a scope so that the file is closed right after reading
        {
            let mut file = File::open(&pathspec)
                .with_context(|| format!("opening {}", pathspec.display()))?;
            file.read_to_end(&mut buf)?;
        }
        if buf.last().is_some_and(|&b| b != b'\n') {
            buf.push(b'\n');
        }
        debug!("read {}", pathspec.display());
        files += 1;
    }
    if files == 0 {
        bail!("no input files match {pattern}");
    }
    info!("read {files} input files, {} bytes", buf.len());
    Ok(buf)
}

/// Runs `steps` over the job's input and writes the final output file.
pub async fn perform_job(job: &Job, steps: &[Box<dyn Step>]) -> Result<()> {
    let input = read_input(&job.input)?;
    let steps: Vec<&dyn Step> = steps.iter().map(Box::as_ref).collect();
    let output = harness::run_steps(&steps, std::io::Cursor::new(input)).await?;

    let mut out_file =
        File::create(&job.output).with_context(|| format!("creating {}", job.output))?;
    out_file.write_all(&output)?;
    if !output.is_empty() {
        out_file.write_all(b"\n")?;
    }
    info!("wrote {}", job.output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload;
    use std::fs;

    #[test]
    fn joins_inputs_with_newlines() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), "1\n2").unwrap();
        fs::write(dir.path().join("b.json"), "3\n").unwrap();
        let pattern = format!("{}/*.json", dir.path().display());
        assert_eq!(read_input(&pattern).unwrap(), b"1\n2\n3\n");
        assert!(read_input(&format!("{}/*.txt", dir.path().display())).is_err());
    }

    #[tokio::test]
    async fn runs_histogram_locally() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("part-0.json"),
            "{\"user\":\"a\"}\n{\"user\":\"b\"}\n",
        )
        .unwrap();
        fs::write(dir.path().join("part-1.json"), "{\"user\":\"a\"}\n").unwrap();

        let job = Job {
            input: format!("{}/part-*.json", dir.path().display()),
            workload: "entry-histogram".into(),
            output: dir.path().join("out.txt").display().to_string(),
            args: vec!["--field=user".into()],
        };
        let steps = workload::named(&job.workload)
            .unwrap()
            .steps(&job.args)
            .unwrap();
        perform_job(&job, &steps).await.unwrap();

        assert_eq!(fs::read_to_string(&job.output).unwrap(), "1\t1\n2\t1\n");
    }
}

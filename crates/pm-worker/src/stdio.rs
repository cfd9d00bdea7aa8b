//! Line-oriented job loop
//!
//! One JSON job per input line, one JSON [`JobOutcome`] per output line.
//! Blank lines are skipped. A line that is not JSON still produces a failed
//! outcome so consumers can match every input to an output.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use pm_core::OperationResult;

use crate::error::Result;
use crate::worker::{JobOutcome, JobWorker};

/// Serve jobs from stdin until it closes
pub async fn run_stdio(worker: &JobWorker) -> Result<usize> {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    run_lines(worker, stdin, stdout).await
}

/// Serve jobs from `reader`, writing outcomes to `writer`. Returns the number
/// of jobs handled.
pub async fn run_lines<R, W>(worker: &JobWorker, reader: R, mut writer: W) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut handled = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let outcome = match serde_json::from_str::<Value>(line) {
            Ok(payload) => {
                let id = payload
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                worker.run(id, payload).await
            }
            Err(e) => {
                warn!("Skipping malformed job line: {}", e);
                JobOutcome {
                    id: uuid::Uuid::new_v4().to_string(),
                    result: OperationResult::failure(format!("Invalid job payload: {}", e)),
                    finished_at: chrono::Utc::now(),
                }
            }
        };

        let mut encoded = serde_json::to_vec(&outcome)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        handled += 1;
    }

    info!("Input closed after {} jobs", handled);
    Ok(handled)
}

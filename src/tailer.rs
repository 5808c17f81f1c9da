use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::parser::Session;

/// Consecutive read failures tolerated before the loud warning; transient
/// permission loss while the game rotates its log is normal.
const READ_ERROR_STRIKES: u32 = 10;

/// Tail the append-only log by byte offset, feeding each delta through the
/// session pipeline in file order. Ticks are strictly sequential (the next
/// poll starts only after the previous chunk was fully processed), which
/// is the in-flight guard the pipeline relies on.
pub async fn run(session: Arc<Mutex<Session>>, path: PathBuf, poll_interval: Duration) {
    // Start at the current end: history in the file predates this run.
    let mut offset = match tokio::fs::metadata(&path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    info!(path = %path.display(), offset, "tailing log file");

    let mut strikes: u32 = 0;
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        match read_delta(&path, &mut offset).await {
            Ok(Some(chunk)) => {
                strikes = 0;
                if !chunk.is_empty() {
                    session.lock().await.process_chunk(&chunk);
                }
            }
            Ok(None) => strikes = 0,
            Err(err) => {
                strikes += 1;
                if strikes == READ_ERROR_STRIKES {
                    warn!(path = %path.display(), error = %err, "log file unreadable for {} polls", strikes);
                }
            }
        }
    }
}

/// Read everything appended since `offset`. A shrinking file means the log
/// rotated: re-anchor to the new end and wait for fresh lines.
async fn read_delta(path: &PathBuf, offset: &mut u64) -> std::io::Result<Option<String>> {
    let len = tokio::fs::metadata(path).await?.len();
    if len < *offset {
        warn!(path = %path.display(), "log file shrank, re-anchoring to end");
        *offset = len;
        return Ok(None);
    }
    if len == *offset {
        return Ok(None);
    }

    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(*offset)).await?;
    let mut buf = Vec::with_capacity((len - *offset) as usize);
    file.take(len - *offset).read_to_end(&mut buf).await?;
    *offset = len;
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delta_reads_only_new_bytes() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("wakfulogger-tail-{}.log", std::process::id()));
        tokio::fs::write(&path, "old line\n").await.unwrap();

        let mut offset = tokio::fs::metadata(&path).await.unwrap().len();
        assert_eq!(read_delta(&path, &mut offset).await.unwrap(), None);

        let mut existing = tokio::fs::read(&path).await.unwrap();
        existing.extend_from_slice(b"new line\n");
        tokio::fs::write(&path, &existing).await.unwrap();

        let delta = read_delta(&path, &mut offset).await.unwrap().unwrap();
        assert_eq!(delta, "new line\n");
        assert_eq!(read_delta(&path, &mut offset).await.unwrap(), None);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn shrinking_file_reanchors() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("wakfulogger-shrink-{}.log", std::process::id()));
        tokio::fs::write(&path, "a long first generation\n").await.unwrap();
        let mut offset = tokio::fs::metadata(&path).await.unwrap().len();

        tokio::fs::write(&path, "short\n").await.unwrap();
        assert_eq!(read_delta(&path, &mut offset).await.unwrap(), None);
        assert_eq!(offset, 6);

        let _ = tokio::fs::remove_file(&path).await;
    }
}

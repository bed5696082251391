use std::io::{self, BufRead, Read};

use anyhow::{Context, Result};
use tracing::{debug, info};

/// Read the whole of stdin as one request payload, trimmed.
pub fn load_payload() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read request payload from stdin")?;
    info!(chars = buffer.len(), "loaded request from stdin");
    Ok(buffer.trim().to_string())
}

/// Iterate non-blank request lines from `reader`, trimmed.
pub fn request_lines<R: BufRead>(reader: R) -> impl Iterator<Item = Result<String>> {
    reader.lines().filter_map(|line| match line {
        Ok(line) => {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                debug!("skipping blank request line");
                None
            } else {
                Some(Ok(trimmed.to_string()))
            }
        }
        Err(e) => Some(Err::<String, _>(e).context("failed to read request line")),
    })
}

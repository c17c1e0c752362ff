//! Excerpts of the primitive's diagnostic log.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use super::EXECUTOR_TARGET;

/// Maximum number of trailing log bytes attached to a failure.
pub const EXCERPT_LIMIT: u64 = 8 * 1024;

/// Reads the last [`EXCERPT_LIMIT`] bytes of a log, trimmed to whole lines.
pub(super) fn read_excerpt(path: &Path) -> Option<String> {
    let tail = read_tail(path).map_err(|error| {
        debug!(
            target: EXECUTOR_TARGET,
            path = %path.display(),
            %error,
            "could not read the isolation log"
        );
    });
    tail.ok()
        .and_then(|(bytes, truncated)| excerpt_from_tail(&bytes, truncated))
}

fn read_tail(path: &Path) -> std::io::Result<(Vec<u8>, bool)> {
    let mut file = File::open(path)?;
    let length = file.metadata()?.len();
    let start = length.saturating_sub(EXCERPT_LIMIT);
    file.seek(SeekFrom::Start(start))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok((bytes, start > 0))
}

/// Decodes a log tail. When the tail was cut from a longer log, the partial
/// first line is dropped.
fn excerpt_from_tail(bytes: &[u8], truncated: bool) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let whole_lines = if truncated {
        text.split_once('\n').map_or("", |(_, rest)| rest)
    } else {
        &text
    };
    let excerpt = whole_lines.trim_end();
    if excerpt.is_empty() {
        None
    } else {
        Some(excerpt.to_owned())
    }
}

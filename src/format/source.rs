//! Chunk byte sources.
//!
//! A source answers ranged reads against one container, from a local file,
//! an HTTP endpoint (Range requests), or an in-memory buffer. A variant
//! enum avoids trait-object dispatch on the fetcher hot path.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use parking_lot::Mutex;

use crate::errors::{EngineError, Result};

/// A byte source for one splat container.
pub enum ChunkSource {
    /// Local file, read with seek + read.
    File(Mutex<File>),
    /// Remote container addressed by URL; ranges become HTTP Range requests.
    Http(String),
    /// Fully in-memory container (tests, pre-loaded data).
    Memory(Vec<u8>),
}

impl ChunkSource {
    /// Creates a source from a URI: `http(s)://` URLs become HTTP sources,
    /// everything else is opened as a local file.
    pub fn from_uri(uri: &str) -> Result<Self> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            Ok(Self::Http(uri.to_string()))
        } else {
            Self::open(Path::new(uri))
        }
    }

    /// Opens a local container file.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::File(Mutex::new(File::open(path)?)))
    }

    /// Wraps an in-memory container.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::Memory(bytes)
    }

    /// Reads up to `len` bytes starting at `offset`. A short return means
    /// the container ends inside the requested range.
    pub fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        match self {
            Self::File(file) => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0_u8; len];
                let mut filled = 0;
                while filled < len {
                    let read = file.read(&mut buf[filled..])?;
                    if read == 0 {
                        break;
                    }
                    filled += read;
                }
                buf.truncate(filled);
                Ok(buf)
            }
            Self::Http(url) => http_read_range(url, offset, len),
            Self::Memory(bytes) => {
                let start = (offset as usize).min(bytes.len());
                let end = start.saturating_add(len).min(bytes.len());
                Ok(bytes[start..end].to_vec())
            }
        }
    }
}

/// Issues a blocking HTTP Range request. Fetch workers run on their own
/// threads, so blocking here is the intended suspension point.
fn http_read_range(url: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
    let end = offset + len as u64 - 1;
    let request = ehttp::Request {
        headers: ehttp::Headers::new(&[("Range", format!("bytes={offset}-{end}").as_str())]),
        ..ehttp::Request::get(url)
    };

    let (tx, rx) = flume::bounded(1);
    ehttp::fetch(request, move |result| {
        let _ = tx.send(result);
    });

    let response = rx
        .recv()
        .map_err(|_| EngineError::Http("fetch callback dropped".to_string()))?
        .map_err(EngineError::Http)?;
    if response.status != 200 && response.status != 206 {
        return Err(EngineError::Http(format!(
            "status {} for {url}",
            response.status
        )));
    }
    Ok(response.bytes)
}

//! Lazily-read, MIME-typed binary resources.

use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use url::Url;

use crate::archive::{ArchiveError, ArchiveReader};

#[derive(Debug, thiserror::Error)]
pub enum FlobError {
    #[error("Archive Error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("I/O Error: {0}")]
    Io(#[from] io::Error),
    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),
}

#[derive(Clone)]
enum Source {
    Bytes(Arc<[u8]>),
    File {
        path: PathBuf,
        offset: u64,
        len: Option<u64>,
    },
    Url(Url),
    Archive {
        archive: Arc<dyn ArchiveReader>,
        path: String,
    },
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::File { path, offset, len } => f
                .debug_struct("File")
                .field("path", path)
                .field("offset", offset)
                .field("len", len)
                .finish(),
            Self::Url(url) => write!(f, "Url({url})"),
            Self::Archive { path, .. } => write!(f, "Archive({path})"),
        }
    }
}

/// A named handle to binary content.
///
/// The content is never loaded until asked for, and every read opens the
/// backing store again, so a flob can be read any number of times.
#[derive(Clone, Debug)]
pub struct Flob {
    name: String,
    mime: String,
    source: Source,
}

impl Flob {
    /// A flob over bytes held in memory.
    pub fn from_bytes<B: Into<Arc<[u8]>>>(name: &str, mime: &str, bytes: B) -> Self {
        Self::with_source(name, mime, Source::Bytes(bytes.into()))
    }

    /// A flob over a whole file.
    pub fn from_file<P: Into<PathBuf>>(name: &str, mime: &str, path: P) -> Self {
        Self::from_file_region(name, mime, path, 0, None)
    }

    /// A flob over `len` bytes of a file starting at `offset`, or up to the
    /// end when `len` is [`None`].
    pub fn from_file_region<P: Into<PathBuf>>(
        name: &str,
        mime: &str,
        path: P,
        offset: u64,
        len: Option<u64>,
    ) -> Self {
        let path = path.into();
        Self::with_source(name, mime, Source::File { path, offset, len })
    }

    /// A flob over a URL. Only `file:` URLs can be read here.
    pub fn from_url(name: &str, mime: &str, url: Url) -> Self {
        Self::with_source(name, mime, Source::Url(url))
    }

    /// A flob over the entry `path` of `archive`.
    pub fn from_archive(archive: Arc<dyn ArchiveReader>, path: &str, mime: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path);
        let source = Source::Archive {
            archive,
            path: path.to_string(),
        };
        Self::with_source(name, mime, source)
    }

    fn with_source(name: &str, mime: &str, source: Source) -> Self {
        Self {
            name: name.to_string(),
            mime: mime.to_string(),
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Opens a new stream over the content.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store can't be opened.
    pub fn open(&self) -> Result<Box<dyn Read + Send>, FlobError> {
        match &self.source {
            Source::Bytes(bytes) => Ok(Box::new(Cursor::new(Arc::clone(bytes)))),
            Source::File { path, offset, len } => {
                let mut file = fs::File::open(path)?;
                file.seek(SeekFrom::Start(*offset))?;
                let file = io::BufReader::new(file);
                match len {
                    Some(len) => Ok(Box::new(file.take(*len))),
                    None => Ok(Box::new(file)),
                }
            }
            Source::Url(url) => {
                let path = match url.scheme() {
                    "file" => url
                        .to_file_path()
                        .map_err(|()| FlobError::UnsupportedUrl(url.to_string()))?,
                    _ => return Err(FlobError::UnsupportedUrl(url.to_string())),
                };
                Ok(Box::new(io::BufReader::new(fs::File::open(path)?)))
            }
            Source::Archive { archive, path } => {
                let entry = archive
                    .entry_for(path)
                    .ok_or_else(|| ArchiveError::EntryNotFound(path.clone()))?;
                Ok(archive.stream_for(&entry)?)
            }
        }
    }

    /// Returns the whole content.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store can't be read.
    pub fn read_all(&self) -> Result<Vec<u8>, FlobError> {
        if let Source::Bytes(bytes) = &self.source {
            return Ok(bytes.to_vec());
        }
        let mut content = vec![];
        self.open()?.read_to_end(&mut content)?;
        Ok(content)
    }

    /// Copies the content into `sink`, returning the number of bytes
    /// written.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing fails.
    pub fn write_to<W: Write + ?Sized>(&self, sink: &mut W) -> Result<u64, FlobError> {
        let mut stream = self.open()?;
        Ok(io::copy(&mut stream, sink)?)
    }
}

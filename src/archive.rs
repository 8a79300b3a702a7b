//! Uniform access to zip- or directory-backed containers.
//!
//! Readers hand out a fresh stream every time an entry is requested, so
//! lazily-read resources can come back to the same entry as often as they
//! need. Writers are sequential: one entry is open at a time.
//!
//! A zip entry can't be streamed without holding the archive, so each zip
//! stream is a copy of the decompressed entry: entries up to
//! [`SPOOL_THRESHOLD`] bytes are copied into memory, larger ones are spooled
//! into an anonymous temporary file.

use std::fs;
use std::io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use percent_encoding::percent_decode_str;
use tracing::{debug, trace};
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

/// Zip entries bigger than this many bytes are spooled to a temporary file
/// instead of memory.
pub const SPOOL_THRESHOLD: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O Error: {0}")]
    Io(#[from] io::Error),
    #[error("Zip Error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Entry not found: {0}")]
    EntryNotFound(String),
    #[error("Archive is closed")]
    Closed,
    #[error("Entry {0} is still open for writing")]
    EntryOpen(String),
    #[error("Entry {0} is not open for writing")]
    EntryNotOpen(String),
}

/// A named entry inside an archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    path: String,
}

impl Entry {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Read side of an archive.
pub trait ArchiveReader: Send + Sync {
    /// Looks up the entry stored under `path`.
    fn entry_for(&self, path: &str) -> Option<Entry>;

    /// Opens a new stream over `entry`. Can be called any number of times.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is missing, the archive was closed or
    /// the underlying storage fails.
    fn stream_for(&self, entry: &Entry) -> Result<Box<dyn Read + Send>, ArchiveError>;

    /// Paths of every entry in the archive.
    fn entries(&self) -> Vec<String>;

    /// Releases the underlying storage. Later reads fail with
    /// [`ArchiveError::Closed`].
    fn close(&self);

    /// Returns the content of the entry at `path` as `Vec<u8>`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::EntryNotFound`] if the path doesn't exist.
    fn read_entry(&self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        let entry = self
            .entry_for(path)
            .ok_or_else(|| ArchiveError::EntryNotFound(path.to_string()))?;
        let mut content = vec![];
        self.stream_for(&entry)?.read_to_end(&mut content)?;
        Ok(content)
    }
}

/// Zip archive reader. Here it's stored the file path and the list of
/// files in the zip archive.
pub struct ZipReader<R: Read + Seek> {
    zip: Mutex<Option<zip::ZipArchive<R>>>,
    pub path: PathBuf,
    pub files: Vec<String>,
}

impl ZipReader<io::BufReader<fs::File>> {
    /// Opens the zip file in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the zip is broken or if the file doesn't
    /// exists.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref();
        let file = fs::File::open(path)?;
        let mut archive = Self::from_reader(io::BufReader::new(file))?;
        archive.path = path.to_path_buf();
        Ok(archive)
    }
}

impl ZipReader<Cursor<Arc<[u8]>>> {
    /// Opens a zip archive held in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid zip archive.
    pub fn from_bytes<B: Into<Arc<[u8]>>>(bytes: B) -> Result<Self, ArchiveError> {
        Self::from_reader(Cursor::new(bytes.into()))
    }
}

impl<R: Read + Seek> ZipReader<R> {
    /// Opens the zip archive contained in `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the zip is broken.
    pub fn from_reader(reader: R) -> Result<Self, ArchiveError> {
        let zip = zip::ZipArchive::new(reader)?;
        let files = zip.file_names().map(String::from).collect();

        Ok(Self {
            zip: Mutex::new(Some(zip)),
            path: PathBuf::new(),
            files,
        })
    }

    fn resolve(&self, path: &str) -> Option<String> {
        if self.files.iter().any(|f| f == path) {
            return Some(path.to_string());
        }
        // entries may be stored with or without percent encoding
        let decoded = percent_decode_str(path).decode_utf8().ok()?;
        self.files
            .iter()
            .find(|f| f.as_str() == decoded)
            .cloned()
    }
}

impl<R: Read + Seek + Send> ArchiveReader for ZipReader<R> {
    fn entry_for(&self, path: &str) -> Option<Entry> {
        self.resolve(path).map(|p| Entry { path: p })
    }

    fn stream_for(&self, entry: &Entry) -> Result<Box<dyn Read + Send>, ArchiveError> {
        let mut guard = self.zip.lock().unwrap_or_else(PoisonError::into_inner);
        let zip = guard.as_mut().ok_or(ArchiveError::Closed)?;
        let mut zipfile = match zip.by_name(&entry.path) {
            Ok(f) => f,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(ArchiveError::EntryNotFound(entry.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        // the zip file borrows the archive, so it can't outlive the lock
        let size = zipfile.size();
        if size > SPOOL_THRESHOLD {
            let mut spool = tempfile::tempfile()?;
            io::copy(&mut zipfile, &mut spool)?;
            spool.seek(SeekFrom::Start(0))?;
            trace!(entry = %entry.path, len = size, "zip entry spooled");
            return Ok(Box::new(io::BufReader::new(spool)));
        }
        let mut content = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
        zipfile.read_to_end(&mut content)?;
        trace!(entry = %entry.path, len = content.len(), "zip entry opened");
        Ok(Box::new(Cursor::new(content)))
    }

    fn entries(&self) -> Vec<String> {
        self.files.clone()
    }

    fn close(&self) {
        let mut guard = self.zip.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            debug!(path = %self.path.display(), "zip archive closed");
        }
    }
}

/// Directory-backed archive reader, every file below `root` is an entry.
pub struct DirReader {
    root: PathBuf,
    closed: AtomicBool,
}

impl DirReader {
    /// # Errors
    ///
    /// Returns an error if `root` is not a directory.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, ArchiveError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ArchiveError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", root.display()),
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
            closed: AtomicBool::new(false),
        })
    }

    fn collect(&self, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
        for item in fs::read_dir(dir)? {
            let path = item?.path();
            if path.is_dir() {
                self.collect(&path, out)?;
            } else if let Ok(rel) = path.strip_prefix(&self.root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }
}

impl ArchiveReader for DirReader {
    fn entry_for(&self, path: &str) -> Option<Entry> {
        let full = safe_join(&self.root, path)?;
        full.is_file().then(|| Entry::new(path))
    }

    fn stream_for(&self, entry: &Entry) -> Result<Box<dyn Read + Send>, ArchiveError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ArchiveError::Closed);
        }
        let full = safe_join(&self.root, &entry.path)
            .ok_or_else(|| ArchiveError::EntryNotFound(entry.path.clone()))?;
        match fs::File::open(full) {
            Ok(file) => Ok(Box::new(io::BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ArchiveError::EntryNotFound(entry.path.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn entries(&self) -> Vec<String> {
        let mut files = vec![];
        if let Err(e) = self.collect(&self.root, &mut files) {
            debug!(root = %self.root.display(), error = %e, "listing directory failed");
        }
        files.sort();
        files
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

// Joins an archive path onto `root`, refusing anything that escapes it.
fn safe_join(root: &Path, path: &str) -> Option<PathBuf> {
    let mut full = root.to_path_buf();
    for c in Path::new(path).components() {
        match c {
            Component::Normal(s) => full.push(s),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(full)
}

/// Opens `path` as a directory archive if it is a directory, as a zip
/// file otherwise.
///
/// # Errors
///
/// Returns an error if the path can't be opened as either.
pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<dyn ArchiveReader>, ArchiveError> {
    let path = path.as_ref();
    if path.is_dir() {
        Ok(Arc::new(DirReader::new(path)?))
    } else {
        Ok(Arc::new(ZipReader::new(path)?))
    }
}

/// Write side of an archive.
///
/// Entries must be begun and ended strictly in sequence. Writing the same
/// path twice is not detected.
pub trait ArchiveWriter {
    fn new_entry(&mut self, path: &str) -> Entry {
        Entry::new(path)
    }

    /// Starts writing `entry` and returns its stream.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::EntryOpen`] if another entry is still open.
    fn begin(&mut self, entry: &Entry) -> Result<&mut dyn Write, ArchiveError>;

    /// Appends `bytes` to the open `entry`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::EntryNotOpen`] if `entry` is not the open one.
    fn write(&mut self, entry: &Entry, bytes: &[u8]) -> Result<(), ArchiveError>;

    /// Flushes and closes `entry`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::EntryNotOpen`] if `entry` is not the open one.
    fn end(&mut self, entry: &Entry) -> Result<(), ArchiveError>;

    /// Writes a whole entry in one go.
    ///
    /// # Errors
    ///
    /// Same as [`Self::begin`], [`Self::write`] and [`Self::end`].
    fn put(&mut self, path: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        let entry = self.new_entry(path);
        self.begin(&entry)?;
        self.write(&entry, bytes)?;
        self.end(&entry)
    }
}

fn check_open(open: Option<&str>, entry: &Entry) -> Result<(), ArchiveError> {
    match open {
        Some(p) if p == entry.path => Ok(()),
        _ => Err(ArchiveError::EntryNotOpen(entry.path.clone())),
    }
}

/// Zip archive writer. The `mimetype` entry is stored uncompressed, every
/// other entry is deflated.
pub struct ZipWriter<W: Write + Seek> {
    zip: zip::ZipWriter<W>,
    open: Option<String>,
}

impl<W: Write + Seek> ZipWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            zip: zip::ZipWriter::new(writer),
            open: None,
        }
    }

    /// Writes the central directory and returns the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry is still open or writing fails.
    pub fn finish(self) -> Result<W, ArchiveError> {
        if let Some(p) = self.open {
            return Err(ArchiveError::EntryOpen(p));
        }
        Ok(self.zip.finish()?)
    }
}

impl<W: Write + Seek> ArchiveWriter for ZipWriter<W> {
    fn begin(&mut self, entry: &Entry) -> Result<&mut dyn Write, ArchiveError> {
        if let Some(p) = &self.open {
            return Err(ArchiveError::EntryOpen(p.clone()));
        }
        let method = if entry.path == "mimetype" {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        let options = SimpleFileOptions::default().compression_method(method);
        self.zip.start_file(entry.path.as_str(), options)?;
        self.open = Some(entry.path.clone());
        trace!(entry = %entry.path, "zip entry started");
        Ok(&mut self.zip)
    }

    fn write(&mut self, entry: &Entry, bytes: &[u8]) -> Result<(), ArchiveError> {
        check_open(self.open.as_deref(), entry)?;
        self.zip.write_all(bytes)?;
        Ok(())
    }

    fn end(&mut self, entry: &Entry) -> Result<(), ArchiveError> {
        check_open(self.open.as_deref(), entry)?;
        self.zip.flush()?;
        self.open = None;
        Ok(())
    }
}

/// Writes entries as plain files below a root directory.
pub struct DirWriter {
    root: PathBuf,
    open: Option<(String, BufWriter<fs::File>)>,
}

impl DirWriter {
    /// # Errors
    ///
    /// Returns an error if the directory can't be created.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, ArchiveError> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            open: None,
        })
    }
}

impl ArchiveWriter for DirWriter {
    fn begin(&mut self, entry: &Entry) -> Result<&mut dyn Write, ArchiveError> {
        if let Some((p, _)) = &self.open {
            return Err(ArchiveError::EntryOpen(p.clone()));
        }
        let full = safe_join(&self.root, &entry.path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("entry {} escapes the archive", entry.path),
            )
        })?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = BufWriter::new(fs::File::create(full)?);
        let (_, stream) = self.open.insert((entry.path.clone(), file));
        Ok(stream)
    }

    fn write(&mut self, entry: &Entry, bytes: &[u8]) -> Result<(), ArchiveError> {
        match &mut self.open {
            Some((p, stream)) if *p == entry.path => Ok(stream.write_all(bytes)?),
            _ => Err(ArchiveError::EntryNotOpen(entry.path.clone())),
        }
    }

    fn end(&mut self, entry: &Entry) -> Result<(), ArchiveError> {
        check_open(self.open.as_ref().map(|(p, _)| p.as_str()), entry)?;
        if let Some((_, mut stream)) = self.open.take() {
            stream.flush()?;
        }
        Ok(())
    }
}

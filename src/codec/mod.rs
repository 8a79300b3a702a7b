//! The PMAB container codec.
//!
//! A PMAB file is an archive holding a `mimetype` marker, a PBM entry with
//! the book attributes and extensions, a PBC entry with the chapter tree,
//! and payload entries for text and binary values. Two schema versions
//! exist; the parser follows the `version` of each document, the maker
//! writes [`Config::version`].
//!
//! # Examples
//!
//! ```
//! use pmab::book::Book;
//! use pmab::chapter::Chapter;
//! use pmab::codec::{self, Config};
//! use pmab::text::Text;
//!
//! let mut book = Book::new("T");
//! book.set("author", "A").unwrap();
//! let chapter = Chapter::new("One");
//! chapter.set_content(Some(Text::plain("Hello")));
//! book.append(&chapter).unwrap();
//!
//! let bytes = codec::make(&book, &Config::default()).unwrap();
//! let mut parsed = codec::parse(&bytes, &Config::default()).unwrap();
//!
//! assert_eq!(parsed.title(), "T");
//! let content = parsed.child_at(0).unwrap().content().unwrap();
//! assert_eq!(content.text().unwrap(), "Hello");
//!
//! parsed.cleanup();
//! book.cleanup();
//! ```

mod config;
pub mod types;
mod v2;
mod v3;
mod values;

use std::fs;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info_span};

use crate::archive::{self, ArchiveError, ArchiveReader, ArchiveWriter, ZipReader, ZipWriter};
use crate::book::Book;
use crate::chapter::TreeError;
use crate::flob::FlobError;
use crate::variant::TypeMismatch;
use crate::xmlutils::{get_attr, Token, XMLError, XMLReader};

pub use self::config::{Config, Version};
use self::values::{Decoder, Payloads};

/// Name of the MIME marker entry.
pub const MIME_ENTRY: &str = "mimetype";
/// Content of the MIME marker entry.
pub const MIME: &str = "application/pmab+zip";
/// Name of the metadata entry.
pub const PBM_ENTRY: &str = "book.pbm";
/// Name of the table of contents entry.
pub const PBC_ENTRY: &str = "book.pbc";
/// Extension names holding the `<meta>` values of a v3 PBM head.
pub const META_PREFIX: &str = "pmab.meta.";

#[derive(Debug, thiserror::Error)]
pub enum PmabError {
    #[error("Archive Error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("XML Error: {0}")]
    Xml(#[from] XMLError),
    #[error("Resource Error: {0}")]
    Flob(#[from] FlobError),
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("I/O Error: {0}")]
    Io(#[from] io::Error),
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(String),
    #[error("Malformed container: {0}")]
    Malformed(String),
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),
    #[error("Invalid date format: {0}")]
    DateFormat(String),
    #[error("Invalid value {value:?} for {name}: {reason}")]
    BadValue {
        name: String,
        value: String,
        reason: String,
    },
}

impl PmabError {
    /// True if the error is about a referenced entry that doesn't exist.
    pub fn is_entry_not_found(&self) -> bool {
        matches!(
            self,
            Self::Archive(ArchiveError::EntryNotFound(_))
                | Self::Flob(FlobError::Archive(ArchiveError::EntryNotFound(_)))
        )
    }
}

/// Parses a PMAB archive held in memory.
///
/// # Errors
///
/// Fails on the first problem found; no partial book is returned.
pub fn parse(bytes: &[u8], config: &Config) -> Result<Book, PmabError> {
    let archive = ZipReader::from_bytes(bytes)?;
    parse_archive(Arc::new(archive), config)
}

/// Opens the PMAB file or unpacked directory at `path`.
///
/// # Errors
///
/// Fails if the path can't be opened or the container is invalid.
pub fn open<P: AsRef<Path>>(path: P, config: &Config) -> Result<Book, PmabError> {
    let archive = archive::open(path)?;
    parse_archive(archive, config)
}

/// Parses the PMAB container in `archive`.
///
/// The book keeps reading payloads from `archive` lazily; its cleanup
/// closes the archive.
///
/// # Errors
///
/// Fails on the first problem found; no partial book is returned.
#[tracing::instrument(skip_all)]
pub fn parse_archive(archive: Arc<dyn ArchiveReader>, config: &Config) -> Result<Book, PmabError> {
    check_mime(archive.as_ref())?;

    let mut book = Book::default();
    if let Err(e) = read_book(&mut book, &archive, config) {
        book.cleanup();
        return Err(e);
    }

    let handle = Arc::clone(&archive);
    book.add_cleanup_hook(move || {
        handle.close();
        Ok(())
    });
    debug!(title = %book.title(), chapters = book.size(), "pmab parsed");
    Ok(book)
}

fn check_mime(archive: &dyn ArchiveReader) -> Result<(), PmabError> {
    let marker = archive
        .read_entry(MIME_ENTRY)
        .map_err(|_| PmabError::Malformed(format!("missing {MIME_ENTRY}")))?;
    let marker = String::from_utf8_lossy(&marker);
    if marker.trim() != MIME {
        return Err(PmabError::UnsupportedVersion(format!(
            "unexpected mime {:?}",
            marker.trim()
        )));
    }
    Ok(())
}

fn open_document(
    archive: &Arc<dyn ArchiveReader>,
    path: &str,
    root: &str,
) -> Result<(XMLReader<BufReader<Box<dyn Read + Send>>>, Version), PmabError> {
    let entry = archive
        .entry_for(path)
        .ok_or_else(|| PmabError::Malformed(format!("missing {path}")))?;
    let mut reader = XMLReader::new(BufReader::new(archive.stream_for(&entry)?));

    loop {
        match reader.next_token()? {
            Token::Start { name, attrs } => {
                if name != root {
                    return Err(PmabError::Malformed(format!(
                        "{path} has root <{name}>, expected <{root}>"
                    )));
                }
                let version = get_attr(&attrs, "version")
                    .ok_or_else(|| PmabError::Malformed(format!("{path} without version")))?;
                let version = Version::parse(version)
                    .ok_or_else(|| PmabError::UnsupportedVersion(version.to_string()))?;
                return Ok((reader, version));
            }
            Token::End { .. } => {}
            Token::Eof => return Err(PmabError::Malformed(format!("{path} is empty"))),
        }
    }
}

fn read_book(
    book: &mut Book,
    archive: &Arc<dyn ArchiveReader>,
    config: &Config,
) -> Result<(), PmabError> {
    let decoder = Decoder::new(archive, config);

    let (mut reader, version) = open_document(archive, PBM_ENTRY, "pbm")?;
    let span = info_span!("pbm", %version);
    span.in_scope(|| match version {
        Version::V3 => v3::read_pbm(&mut reader, book, &decoder),
        Version::V2 => v2::read_pbm(&mut reader, book, &decoder),
    })?;

    let (mut reader, version) = open_document(archive, PBC_ENTRY, "pbc")?;
    let span = info_span!("pbc", %version);
    span.in_scope(|| match version {
        Version::V3 => v3::read_pbc(&mut reader, book, &decoder),
        Version::V2 => v2::read_pbc(&mut reader, book, &decoder),
    })
}

/// Serializes `book` into a PMAB archive held in memory.
///
/// # Errors
///
/// Fails if a payload can't be read or a value can't be encoded.
pub fn make(book: &Book, config: &Config) -> Result<Vec<u8>, PmabError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    make_to(book, &mut writer, config)?;
    Ok(writer.finish()?.into_inner())
}

/// Serializes `book` into a PMAB file at `path`.
///
/// The archive is written to a temporary file next to `path` and renamed
/// into place once complete, so a failure never leaves a partial file.
///
/// # Errors
///
/// Fails if serializing or any file operation fails.
pub fn make_file<P: AsRef<Path>>(book: &Book, path: P, config: &Config) -> Result<(), PmabError> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = ZipWriter::new(tmp.as_file_mut());
        make_to(book, &mut writer, config)?;
        writer.finish()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), "pmab written");
    Ok(())
}

/// Writes the PMAB container for `book` into `writer`.
///
/// # Errors
///
/// Fails if a payload can't be read or a value can't be encoded.
#[tracing::instrument(skip_all, fields(version = %config.version))]
pub fn make_to(
    book: &Book,
    writer: &mut dyn ArchiveWriter,
    config: &Config,
) -> Result<(), PmabError> {
    writer.put(MIME_ENTRY, MIME.as_bytes())?;

    let (pbm, pbc) = {
        let mut payloads = Payloads::new(writer, config)?;
        match config.version {
            Version::V3 => (
                v3::write_pbm(book, &mut payloads)?,
                v3::write_pbc(book, &mut payloads)?,
            ),
            Version::V2 => (
                v2::write_pbm(book, &mut payloads)?,
                v2::write_pbc(book, &mut payloads)?,
            ),
        }
    };

    writer.put(PBM_ENTRY, &pbm)?;
    writer.put(PBC_ENTRY, &pbc)?;
    Ok(())
}

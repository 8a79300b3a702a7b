use std::fmt;

use encoding_rs::Encoding;

use super::PmabError;

/// Schema version of the PBM and PBC entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Version {
    V2,
    #[default]
    V3,
}

impl Version {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V2 => "2.0",
            Self::V3 => "3.0",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "2.0" => Some(Self::V2),
            "3.0" => Some(Self::V3),
            _ => None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options shared by the parser and the maker.
///
/// ```
/// use pmab::codec::{Config, Version};
///
/// let config = Config::default()
///     .with_version(Version::V2)
///     .with_text_encoding("GBK");
/// assert_eq!(config.text_dir, "text");
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Encoding label for text payloads without an explicit encoding, and
    /// for every text payload written.
    pub text_encoding: String,
    /// `time` format description for dates without an explicit format.
    pub date_format: String,
    /// Use `text_encoding` for v2 chapter content that doesn't declare an
    /// encoding. When unset, such content is an error.
    pub use_chapter_encoding_fallback: bool,
    pub text_dir: String,
    pub images_dir: String,
    pub extras_dir: String,
    /// Schema written by the maker. The parser follows the file.
    pub version: Version,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            text_encoding: "UTF-8".to_string(),
            date_format: "[year]-[month]-[day] [hour]:[minute]:[second]".to_string(),
            use_chapter_encoding_fallback: true,
            text_dir: "text".to_string(),
            images_dir: "images".to_string(),
            extras_dir: "extras".to_string(),
            version: Version::V3,
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn with_text_encoding(mut self, label: &str) -> Self {
        self.text_encoding = label.to_string();
        self
    }

    #[must_use]
    pub fn with_date_format(mut self, format: &str) -> Self {
        self.date_format = format.to_string();
        self
    }

    #[must_use]
    pub fn with_chapter_encoding_fallback(mut self, fallback: bool) -> Self {
        self.use_chapter_encoding_fallback = fallback;
        self
    }

    #[must_use]
    pub fn with_dirs(mut self, text: &str, images: &str, extras: &str) -> Self {
        self.text_dir = text.to_string();
        self.images_dir = images.to_string();
        self.extras_dir = extras.to_string();
        self
    }

    /// The configured text encoding.
    ///
    /// # Errors
    ///
    /// Returns [`PmabError::UnknownEncoding`] for an unknown label.
    pub fn encoding(&self) -> Result<&'static Encoding, PmabError> {
        encoding_for(&self.text_encoding)
    }
}

pub(crate) fn encoding_for(label: &str) -> Result<&'static Encoding, PmabError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| PmabError::UnknownEncoding(label.to_string()))
}

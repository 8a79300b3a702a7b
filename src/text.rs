//! Textual resources, either inline or decoded from a [`Flob`].

use std::io::Write;
use std::sync::Arc;

use encoding_rs::{Encoding, UTF_8};

use crate::flob::{Flob, FlobError};

/// How the text is marked up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextFormat {
    #[default]
    Plain,
    Html,
}

impl TextFormat {
    /// The MIME subtype used for this format, as in `text/<subtype>`.
    pub fn subtype(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Html => "html",
        }
    }

    pub fn from_subtype(subtype: &str) -> Self {
        if subtype.eq_ignore_ascii_case("html") || subtype.eq_ignore_ascii_case("xhtml") {
            Self::Html
        } else {
            Self::Plain
        }
    }
}

#[derive(Clone, Debug)]
enum Source {
    Inline(Arc<str>),
    Flob {
        flob: Flob,
        encoding: &'static Encoding,
    },
}

/// A format-tagged handle to textual content.
///
/// Reading is restartable: every call to [`Text::text`] decodes the
/// content again from its source.
///
/// ```
/// use pmab::text::Text;
///
/// let text = Text::plain("Hello\nWorld");
/// assert_eq!(text.text().unwrap(), "Hello\nWorld");
/// assert_eq!(text.lines().unwrap(), vec!["Hello", "World"]);
/// ```
#[derive(Clone, Debug)]
pub struct Text {
    format: TextFormat,
    source: Source,
}

impl Text {
    pub fn plain(text: &str) -> Self {
        Self::new(text, TextFormat::Plain)
    }

    pub fn html(text: &str) -> Self {
        Self::new(text, TextFormat::Html)
    }

    pub fn new(text: &str, format: TextFormat) -> Self {
        Self {
            format,
            source: Source::Inline(Arc::from(text)),
        }
    }

    /// Text decoded from `flob` with `encoding` on each read.
    pub fn from_flob(flob: Flob, encoding: &'static Encoding, format: TextFormat) -> Self {
        Self {
            format,
            source: Source::Flob { flob, encoding },
        }
    }

    pub fn format(&self) -> TextFormat {
        self.format
    }

    /// The encoding of the backing flob, UTF-8 for inline text.
    pub fn encoding(&self) -> &'static Encoding {
        match &self.source {
            Source::Inline(_) => UTF_8,
            Source::Flob { encoding, .. } => *encoding,
        }
    }

    /// Returns the backing flob, if any.
    pub fn flob(&self) -> Option<&Flob> {
        match &self.source {
            Source::Inline(_) => None,
            Source::Flob { flob, .. } => Some(flob),
        }
    }

    /// Returns the whole text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing flob can't be read.
    pub fn text(&self) -> Result<String, FlobError> {
        match &self.source {
            Source::Inline(s) => Ok(s.to_string()),
            Source::Flob { flob, encoding } => {
                let bytes = flob.read_all()?;
                let (text, _, _) = encoding.decode(&bytes);
                Ok(text.into_owned())
            }
        }
    }

    /// Returns the text split in lines, without line terminators.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing flob can't be read.
    pub fn lines(&self) -> Result<Vec<String>, FlobError> {
        Ok(self.text()?.lines().map(String::from).collect())
    }

    /// Writes the text into `sink` encoded with `encoding`, returning the
    /// encoding actually used (encoders such as UTF-16 fall back to UTF-8).
    ///
    /// If the text comes from a flob in the same encoding its bytes are
    /// copied verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the source or writing the sink fails.
    pub fn write_to<W: Write + ?Sized>(
        &self,
        sink: &mut W,
        encoding: &'static Encoding,
    ) -> Result<&'static Encoding, FlobError> {
        if let Source::Flob {
            flob,
            encoding: source,
        } = &self.source
        {
            if *source == encoding.output_encoding() {
                flob.write_to(sink)?;
                return Ok(*source);
            }
        }
        let text = self.text()?;
        let (bytes, used, _) = encoding.encode(&text);
        sink.write_all(&bytes)?;
        Ok(used)
    }
}

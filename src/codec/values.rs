//! Translation between attribute values and their on-disk form.
//!
//! [`Decoder`] turns element text plus type information back into
//! [`Variant`]s, opening payload entries lazily. [`Payloads`] goes the other
//! way, writing text and binary payloads to their own archive entries.

use std::path::Path;
use std::sync::Arc;

use encoding_rs::Encoding;
use tracing::{trace, warn};

use super::config::{encoding_for, Config};
use super::types::{date_format_for, format_date, is_mime, parse_date, BaseType, TypeToken};
use super::PmabError;
use crate::archive::{ArchiveError, ArchiveReader, ArchiveWriter};
use crate::flob::Flob;
use crate::locale::Locale;
use crate::text::{Text, TextFormat};
use crate::variant::{Kind, TypeRegistry, Variant};
use crate::xmlutils::invalid_xml_char;

pub const LANGUAGE: &str = "language";

fn bad_value(name: &str, value: &str, reason: &str) -> PmabError {
    PmabError::BadValue {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Checks that the attribute `name` and its rendered `text` can be written
/// as XML.
///
/// # Errors
///
/// Returns [`PmabError::BadValue`] naming the attribute otherwise.
pub fn check_xml(name: &str, text: &str) -> Result<(), PmabError> {
    for s in [name, text] {
        if let Some(c) = invalid_xml_char(s) {
            return Err(bad_value(
                name,
                s,
                &format!("character {c:?} is not allowed in XML"),
            ));
        }
    }
    Ok(())
}

pub struct Decoder<'a> {
    archive: &'a Arc<dyn ArchiveReader>,
    config: &'a Config,
}

impl<'a> Decoder<'a> {
    pub fn new(archive: &'a Arc<dyn ArchiveReader>, config: &'a Config) -> Self {
        Self { archive, config }
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    /// Encoding named by `label`, or the configured one.
    pub fn encoding(&self, label: Option<&str>) -> Result<&'static Encoding, PmabError> {
        match label {
            Some(l) => encoding_for(l),
            None => self.config.encoding(),
        }
    }

    /// A flob over the payload at `path`, which must exist.
    pub fn flob(&self, path: &str, mime: &str) -> Result<Flob, PmabError> {
        let path = path.trim();
        if self.archive.entry_for(path).is_none() {
            return Err(ArchiveError::EntryNotFound(path.to_string()).into());
        }
        Ok(Flob::from_archive(Arc::clone(self.archive), path, mime))
    }

    /// A text over the payload at `path`.
    pub fn text(
        &self,
        path: &str,
        mime: &str,
        encoding: &'static Encoding,
    ) -> Result<Text, PmabError> {
        let subtype = mime.split_once('/').map_or("plain", |(_, s)| s);
        let flob = self.flob(path, mime)?;
        Ok(Text::from_flob(flob, encoding, TextFormat::from_subtype(subtype)))
    }

    /// Decodes the text of a v3 `<item>` or `<content>` element.
    pub fn item(&self, name: &str, token: Option<&str>, text: &str) -> Result<Variant, PmabError> {
        let Some(token) = token else {
            return self.string(name, text);
        };
        let token = TypeToken::parse(token);
        trace!(name, token = %token, "decoding item");

        match &token.base {
            BaseType::String | BaseType::Unknown(_) => self.string(name, text),
            BaseType::Date => {
                let format = token.param("format").unwrap_or(self.config.date_format.as_str());
                Ok(Variant::Date(parse_date(name, text, format)?))
            }
            BaseType::Locale => parse_locale(name, text),
            BaseType::Text(sub) => {
                let mime = format!("text/{sub}");
                if TypeRegistry::kind_of(name) == Some(Kind::Flob) {
                    return Ok(Variant::Flob(self.flob(text, &mime)?));
                }
                let encoding = self.encoding(token.param("encoding"))?;
                Ok(Variant::Text(self.text(text, &mime, encoding)?))
            }
            BaseType::Mime(mime) => Ok(Variant::Flob(self.flob(text, mime)?)),
            BaseType::Integer => parse_integer(name, text),
            BaseType::Real => parse_real(name, text),
            BaseType::Boolean => parse_boolean(name, text),
            BaseType::Bytes => {
                warn!(name, "bytes values are not supported, keeping the raw string");
                Ok(Variant::String(text.to_string()))
            }
        }
    }

    fn string(&self, name: &str, text: &str) -> Result<Variant, PmabError> {
        // language was written as a plain string by older makers
        if name == LANGUAGE {
            return parse_locale(name, text);
        }
        Ok(Variant::String(text.to_string()))
    }

    /// Decodes a plain string according to the kind registered for `name`.
    pub fn by_kind(&self, name: &str, text: &str) -> Result<Variant, PmabError> {
        match TypeRegistry::kind_of(name) {
            Some(Kind::Date) => Ok(Variant::Date(parse_date(
                name,
                text,
                &self.config.date_format,
            )?)),
            Some(Kind::Locale) => parse_locale(name, text),
            Some(Kind::Integer) => parse_integer(name, text),
            Some(Kind::Real) => parse_real(name, text),
            Some(Kind::Boolean) => parse_boolean(name, text),
            Some(Kind::Text) => Ok(Variant::Text(Text::plain(text))),
            Some(Kind::Flob) => Err(bad_value(name, text, "missing media type")),
            Some(Kind::String) | None => Ok(Variant::String(text.to_string())),
        }
    }
}

pub fn parse_locale(name: &str, text: &str) -> Result<Variant, PmabError> {
    text.parse::<Locale>()
        .map(Variant::Locale)
        .map_err(|e| bad_value(name, text, &e.to_string()))
}

pub fn parse_integer(name: &str, text: &str) -> Result<Variant, PmabError> {
    text.trim()
        .parse::<i64>()
        .map(Variant::Integer)
        .map_err(|e| bad_value(name, text, &e.to_string()))
}

pub fn parse_real(name: &str, text: &str) -> Result<Variant, PmabError> {
    text.trim()
        .parse::<f64>()
        .map(Variant::Real)
        .map_err(|e| bad_value(name, text, &e.to_string()))
}

pub fn parse_boolean(name: &str, text: &str) -> Result<Variant, PmabError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(Variant::Boolean(true)),
        "false" => Ok(Variant::Boolean(false)),
        _ => Err(bad_value(name, text, "expected true or false")),
    }
}

/// Writes payloads to the archive, each to a fresh numbered entry.
pub struct Payloads<'w> {
    writer: &'w mut dyn ArchiveWriter,
    config: &'w Config,
    encoding: &'static Encoding,
    count: usize,
}

impl<'w> Payloads<'w> {
    pub fn new(writer: &'w mut dyn ArchiveWriter, config: &'w Config) -> Result<Self, PmabError> {
        Ok(Self {
            writer,
            encoding: config.encoding()?,
            config,
            count: 0,
        })
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    fn next_path(&mut self, dir: &str, ext: Option<&str>) -> String {
        self.count += 1;
        let file = match ext {
            Some(ext) => format!("{:05}.{ext}", self.count),
            None => format!("{:05}", self.count),
        };
        let dir = dir.trim_matches('/');
        if dir.is_empty() {
            file
        } else {
            format!("{dir}/{file}")
        }
    }

    /// Writes `text` with the configured encoding, returning its path and
    /// the encoding actually used.
    pub fn text(&mut self, text: &Text) -> Result<(String, &'static Encoding), PmabError> {
        let ext = match text.format() {
            TextFormat::Plain => "txt",
            TextFormat::Html => "html",
        };
        let config = self.config;
        let path = self.next_path(&config.text_dir, Some(ext));
        let entry = self.writer.new_entry(&path);
        let stream = self.writer.begin(&entry)?;
        let used = text.write_to(stream, self.encoding)?;
        self.writer.end(&entry)?;
        trace!(path = %path, encoding = used.name(), "text payload written");
        Ok((path, used))
    }

    /// Writes `flob` below the images or extras directory, returning its
    /// path.
    pub fn flob(&mut self, flob: &Flob) -> Result<String, PmabError> {
        let config = self.config;
        let dir = if flob.mime().starts_with("image/") {
            &config.images_dir
        } else {
            &config.extras_dir
        };
        let ext = Path::new(flob.name())
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()));
        let path = self.next_path(dir, ext);
        let entry = self.writer.new_entry(&path);
        let stream = self.writer.begin(&entry)?;
        flob.write_to(stream)?;
        self.writer.end(&entry)?;
        trace!(path = %path, mime = flob.mime(), "flob payload written");
        Ok(path)
    }

    /// Encodes `value` as element text plus an optional v3 type token.
    pub fn item(&mut self, value: &Variant) -> Result<(String, Option<TypeToken>), PmabError> {
        Ok(match value {
            Variant::String(s) => (s.clone(), None),
            Variant::Text(t) => {
                let (path, used) = self.text(t)?;
                let token = TypeToken::new(BaseType::Text(t.format().subtype().to_string()))
                    .with("encoding", used.name());
                (path, Some(token))
            }
            Variant::Date(d) => {
                let format = date_format_for(*d, &self.config.date_format);
                let token = TypeToken::new(BaseType::Date).with("format", &format);
                (format_date(*d, &format)?, Some(token))
            }
            Variant::Locale(l) => (l.to_string(), Some(TypeToken::new(BaseType::Locale))),
            Variant::Integer(i) => (i.to_string(), Some(TypeToken::new(BaseType::Integer))),
            Variant::Real(r) => (format!("{r:?}"), Some(TypeToken::new(BaseType::Real))),
            Variant::Boolean(b) => (b.to_string(), Some(TypeToken::new(BaseType::Boolean))),
            Variant::Flob(f) => {
                let path = self.flob(f)?;
                let mime = if is_mime(f.mime()) {
                    f.mime().to_string()
                } else {
                    "application/octet-stream".to_string()
                };
                (path, Some(TypeToken::parse(&mime)))
            }
        })
    }

    /// Renders a value that is stored as plain text, for schemas without
    /// type tokens.
    pub fn plain(&self, value: &Variant) -> Result<String, PmabError> {
        Ok(match value {
            Variant::String(s) => s.clone(),
            Variant::Date(d) => format_date(*d, &self.config.date_format)?,
            Variant::Locale(l) => l.to_string(),
            Variant::Integer(i) => i.to_string(),
            // keeps the decimal point, so a whole real doesn't read back as an integer
            Variant::Real(r) => format!("{r:?}"),
            Variant::Boolean(b) => b.to_string(),
            Variant::Text(t) => t.text()?,
            Variant::Flob(f) => f.name().to_string(),
        })
    }
}

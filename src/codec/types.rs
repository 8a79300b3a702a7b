//! Value type tokens of the form `base[;param=value...]`.
//!
//! The string grammar only exists on disk; everywhere else a token is a
//! [`TypeToken`].

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use time::format_description;
use time::{Date, PrimitiveDateTime};

use super::PmabError;

static MIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w.+-]+/[\w.+-]+$").unwrap_or_else(|e| unreachable!("invalid mime regex: {e}"))
});

/// Returns true for strings shaped like `type/subtype`.
pub fn is_mime(s: &str) -> bool {
    MIME_RE.is_match(s)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BaseType {
    String,
    /// `date`, `datetime` and `time`.
    Date,
    Locale,
    /// `text/<subtype>`.
    Text(String),
    /// Any other `type/subtype`.
    Mime(String),
    /// `integer` and `uint`.
    Integer,
    Real,
    Boolean,
    Bytes,
    Unknown(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeToken {
    pub base: BaseType,
    params: Vec<(String, String)>,
}

impl TypeToken {
    pub fn new(base: BaseType) -> Self {
        Self {
            base,
            params: vec![],
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn parse(token: &str) -> Self {
        let mut parts = token.split(';');
        let base = parts.next().unwrap_or_default().trim();
        let lower = base.to_ascii_lowercase();

        let base = match lower.as_str() {
            "string" => BaseType::String,
            "date" | "datetime" | "time" => BaseType::Date,
            "locale" => BaseType::Locale,
            "integer" | "uint" => BaseType::Integer,
            "real" => BaseType::Real,
            "boolean" => BaseType::Boolean,
            "bytes" => BaseType::Bytes,
            m if is_mime(m) => match m.strip_prefix("text/") {
                Some(sub) => BaseType::Text(sub.to_string()),
                None => BaseType::Mime(base.to_string()),
            },
            _ => BaseType::Unknown(base.to_string()),
        };

        let params = parts
            .filter_map(|p| {
                let (k, v) = p.split_once('=')?;
                Some((k.trim().to_string(), v.trim().to_string()))
            })
            .collect();

        Self { base, params }
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base {
            BaseType::String => f.write_str("string")?,
            BaseType::Date => f.write_str("datetime")?,
            BaseType::Locale => f.write_str("locale")?,
            BaseType::Text(sub) => write!(f, "text/{sub}")?,
            BaseType::Mime(mime) => f.write_str(mime)?,
            BaseType::Integer => f.write_str("integer")?,
            BaseType::Real => f.write_str("real")?,
            BaseType::Boolean => f.write_str("boolean")?,
            BaseType::Bytes => f.write_str("bytes")?,
            BaseType::Unknown(s) => f.write_str(s)?,
        }
        for (k, v) in &self.params {
            write!(f, ";{k}={v}")?;
        }
        Ok(())
    }
}

/// The format `date` is written with: `format`, plus a fractional second
/// when `date` has one and `format` has no `[subsecond]` of its own.
pub fn date_format_for(date: PrimitiveDateTime, format: &str) -> Cow<'_, str> {
    if date.nanosecond() != 0 && !format.contains("[subsecond") {
        Cow::Owned(format!("{format}.[subsecond]"))
    } else {
        Cow::Borrowed(format)
    }
}

/// Renders `date` with a `time` format description, see
/// [`date_format_for`].
///
/// # Errors
///
/// Fails if `format` is not a valid description or lacks a component.
pub fn format_date(date: PrimitiveDateTime, format: &str) -> Result<String, PmabError> {
    let format = date_format_for(date, format);
    let format = format.as_ref();
    let items = format_description::parse(format)
        .map_err(|e| PmabError::DateFormat(format!("{format}: {e}")))?;
    date.format(items.as_slice())
        .map_err(|e| PmabError::DateFormat(format!("{format}: {e}")))
}

/// Parses `s` with a `time` format description. Formats without a time of
/// day give midnight. A trailing fractional second written by
/// [`format_date`] is accepted too.
///
/// # Errors
///
/// Fails if `format` is invalid or `s` doesn't match it.
pub fn parse_date(name: &str, s: &str, format: &str) -> Result<PrimitiveDateTime, PmabError> {
    let s = s.trim();
    let parsed = parse_with(s, format)?;
    if parsed.is_err() && !format.contains("[subsecond") {
        if let Ok(Ok(date)) = parse_with(s, &format!("{format}.[subsecond]")) {
            return Ok(date);
        }
    }
    parsed.map_err(|e| PmabError::BadValue {
        name: name.to_string(),
        value: s.to_string(),
        reason: e.to_string(),
    })
}

fn parse_with(
    s: &str,
    format: &str,
) -> Result<Result<PrimitiveDateTime, time::error::Parse>, PmabError> {
    let items = format_description::parse(format)
        .map_err(|e| PmabError::DateFormat(format!("{format}: {e}")))?;
    Ok(PrimitiveDateTime::parse(s, items.as_slice())
        .or_else(|_| Date::parse(s, items.as_slice()).map(Date::midnight)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parse_tokens() {
        assert_eq!(TypeToken::parse("string").base, BaseType::String);
        assert_eq!(TypeToken::parse("uint").base, BaseType::Integer);
        assert_eq!(TypeToken::parse("TIME").base, BaseType::Date);
        assert_eq!(
            TypeToken::parse("text/html;encoding=GBK").base,
            BaseType::Text("html".into())
        );
        assert_eq!(
            TypeToken::parse("image/png").base,
            BaseType::Mime("image/png".into())
        );
        assert_eq!(
            TypeToken::parse("whatever").base,
            BaseType::Unknown("whatever".into())
        );
    }

    #[test]
    fn params() {
        let t = TypeToken::parse("datetime; format=[year]-[month]-[day] ; x");
        assert_eq!(t.param("format"), Some("[year]-[month]-[day]"));
        assert_eq!(t.param("x"), None);

        let t = TypeToken::new(BaseType::Text("plain".into())).with("encoding", "UTF-8");
        assert_eq!(t.to_string(), "text/plain;encoding=UTF-8");
        assert_eq!(TypeToken::parse(&t.to_string()), t);
    }

    #[test]
    fn dates() {
        let fmt = "[year]-[month]-[day] [hour]:[minute]:[second]";
        let d = datetime!(2019-03-04 05:06:07);
        let s = format_date(d, fmt).unwrap();
        assert_eq!(s, "2019-03-04 05:06:07");
        assert_eq!(parse_date("date", &s, fmt).unwrap(), d);

        let day = parse_date("date", "2019-03-04", "[year]-[month]-[day]").unwrap();
        assert_eq!(day, datetime!(2019-03-04 00:00:00));

        let precise = datetime!(2019-03-04 05:06:07.25);
        let s = format_date(precise, fmt).unwrap();
        assert_eq!(s, "2019-03-04 05:06:07.25");
        assert_eq!(parse_date("date", &s, fmt).unwrap(), precise);
        assert_eq!(date_format_for(d, fmt), fmt);

        assert!(parse_date("date", "yesterday", fmt).is_err());
        assert!(format_date(d, "[nonsense").is_err());
    }
}

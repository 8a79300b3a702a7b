//! Structured locale values such as `zh_CN` or `en-US`.

use std::fmt;
use std::str::FromStr;

/// A language tag split into its language, country and variant parts.
///
/// Parsing accepts both `-` and `_` as separators, rendering always uses `_`.
///
/// ```
/// use pmab::locale::Locale;
///
/// let locale: Locale = "zh-CN".parse().unwrap();
/// assert_eq!(locale.language(), "zh");
/// assert_eq!(locale.country(), "CN");
/// assert_eq!(locale.to_string(), "zh_CN");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Locale {
    language: String,
    country: String,
    variant: String,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid locale: {0:?}")]
pub struct LocaleError(String);

impl Locale {
    pub fn new(language: &str, country: &str, variant: &str) -> Self {
        Self {
            language: language.to_lowercase(),
            country: country.to_uppercase(),
            variant: variant.to_string(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }
}

impl FromStr for Locale {
    type Err = LocaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut parts = s.splitn(3, ['_', '-']);
        let language = parts.next().unwrap_or_default();
        let country = parts.next().unwrap_or_default();
        let variant = parts.next().unwrap_or_default();

        let valid = |p: &str| p.chars().all(|c| c.is_ascii_alphanumeric());
        if language.is_empty() && country.is_empty() {
            return Err(LocaleError(s.to_string()));
        }
        if !valid(language) || !valid(country) {
            return Err(LocaleError(s.to_string()));
        }

        Ok(Self::new(language, country, variant))
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.language)?;
        if !self.country.is_empty() || !self.variant.is_empty() {
            write!(f, "_{}", self.country)?;
        }
        if !self.variant.is_empty() {
            write!(f, "_{}", self.variant)?;
        }
        Ok(())
    }
}

//! The root of the document model.

use std::ops::Deref;

use time::PrimitiveDateTime;

use crate::chapter::Chapter;
use crate::flob::Flob;
use crate::locale::Locale;
use crate::text::Text;
use crate::variant::{Attributes, FromVariant};

/// A book is a root [`Chapter`] plus extensions, a schema-free bag of
/// non-bibliographic values such as the source URL.
///
/// `Book` dereferences to its root chapter, so every tree and attribute
/// operation of [`Chapter`] is available on it.
///
/// ```
/// use pmab::book::Book;
/// use pmab::chapter::Chapter;
///
/// let mut book = Book::new("T");
/// book.set("author", "A").unwrap();
/// book.append(&Chapter::new("One")).unwrap();
/// book.extensions_mut().set("source", "https://example.com").unwrap();
///
/// assert_eq!(book.title(), "T");
/// assert_eq!(book.author(), "A");
/// assert_eq!(book.size(), 1);
/// book.cleanup();
/// ```
#[derive(Debug, Default)]
#[must_use = "a book must be released with `cleanup`"]
pub struct Book {
    root: Chapter,
    extensions: Attributes,
}

impl Book {
    pub fn new(title: &str) -> Self {
        Self {
            root: Chapter::new(title),
            extensions: Attributes::new(),
        }
    }

    /// The root chapter handle.
    pub fn root(&self) -> &Chapter {
        &self.root
    }

    pub fn extensions(&self) -> &Attributes {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Attributes {
        &mut self.extensions
    }

    fn attr<T: FromVariant>(&self, name: &str) -> Option<T> {
        self.root.get(name).and_then(|v| T::from_variant(&v))
    }

    pub fn author(&self) -> String {
        self.attr("author").unwrap_or_default()
    }

    pub fn intro(&self) -> Option<Text> {
        self.attr("intro")
    }

    pub fn cover(&self) -> Option<Flob> {
        self.attr("cover")
    }

    pub fn date(&self) -> Option<PrimitiveDateTime> {
        self.attr("date")
    }

    pub fn language(&self) -> Option<Locale> {
        self.attr("language")
    }

    /// Releases the whole tree and clears the extensions.
    pub fn cleanup(&mut self) {
        self.root.cleanup();
        self.extensions.clear();
    }

    /// Copies the book, its extensions and its whole chapter tree.
    pub fn deep_clone(&self) -> Self {
        Self {
            root: self.root.deep_clone(),
            extensions: self.extensions.clone(),
        }
    }
}

impl Deref for Book {
    type Target = Chapter;

    fn deref(&self) -> &Chapter {
        &self.root
    }
}

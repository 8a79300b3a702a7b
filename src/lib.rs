#![warn(clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::let_underscore_drop,
    clippy::missing_const_for_fn,
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
)]

//! PMAB library
//! lib to build e-book documents and read or write them as PMAB containers
//!
//! # Examples
//!
//! ## Building a book
//!
//! A [`Book`](book::Book) is a tree of [`Chapter`](chapter::Chapter)s with
//! typed attributes. Well-known attribute names have a fixed kind.
//!
//! ```
//! use pmab::book::Book;
//! use pmab::chapter::Chapter;
//! use pmab::text::Text;
//!
//! let mut book = Book::new("Todo es mío");
//! book.set("author", "Anónimo").unwrap();
//! assert!(book.set("words", "many").is_err());
//!
//! let chapter = Chapter::new("Capítulo 1");
//! chapter.set_content(Some(Text::plain("Érase una vez")));
//! book.append(&chapter).unwrap();
//! assert_eq!(1, book.size());
//!
//! book.cleanup();
//! ```
//!
//! ## Writing and reading a container
//!
//! ```
//! # use pmab::book::Book;
//! use pmab::codec::{self, Config, Version};
//!
//! # let mut book = Book::new("Todo es mío");
//! let config = Config::default().with_version(Version::V2);
//! let bytes = codec::make(&book, &config).unwrap();
//!
//! let mut copy = codec::parse(&bytes, &config).unwrap();
//! assert_eq!(copy.title(), "Todo es mío");
//! # copy.cleanup();
//! # book.cleanup();
//! ```
//!
//! ## Reading lazily
//!
//! Text and binary values of a parsed book are read from the archive only
//! when asked for, and can be read again as often as needed:
//!
//! ```ignore
//! let book = pmab::codec::open("book.pmab", &Config::default())?;
//! let intro = book.intro().unwrap();
//! assert_eq!(intro.text()?, intro.text()?);
//! ```

mod xmlutils;

pub mod archive;
pub mod book;
pub mod chapter;
pub mod codec;
pub mod flob;
pub mod locale;
pub mod text;
pub mod variant;

pub use codec::{make, parse, Config, PmabError, Version};

//! Schema 3.0: self-describing `<item>` elements carrying type tokens.

use std::io::Read;

use tracing::{debug, warn};

use super::values::{check_xml, Decoder, Payloads};
use super::{PmabError, Version, META_PREFIX};
use crate::book::Book;
use crate::chapter::Chapter;
use crate::text::Text;
use crate::variant::{Attributes, Variant};
use crate::xmlutils::{get_attr, Token, XMLReader, XMLWriter};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Head,
    Attributes,
    Extensions,
}

// An `<item>` or `<content>` waiting for its end tag.
struct Pending {
    name: String,
    token: Option<String>,
}

fn pending_item(attrs: &[xml::attribute::OwnedAttribute]) -> Result<Pending, PmabError> {
    let name = get_attr(attrs, "name")
        .ok_or_else(|| PmabError::Malformed("item without name".into()))?;
    Ok(Pending {
        name: name.to_string(),
        token: get_attr(attrs, "type").map(String::from),
    })
}

/// Reads the rest of a v3 PBM document, the root element already consumed.
pub fn read_pbm<R: Read>(
    reader: &mut XMLReader<R>,
    book: &mut Book,
    decoder: &Decoder<'_>,
) -> Result<(), PmabError> {
    let mut section = Section::None;
    let mut item: Option<Pending> = None;

    loop {
        match reader.next_token()? {
            Token::Start { name, attrs } => match name.as_str() {
                "head" => section = Section::Head,
                "attributes" => section = Section::Attributes,
                "extensions" => section = Section::Extensions,
                "meta" if section == Section::Head => {
                    if let (Some(k), Some(v)) = (get_attr(&attrs, "name"), get_attr(&attrs, "value")) {
                        book.extensions_mut().set(&format!("{META_PREFIX}{k}"), v)?;
                    }
                }
                "item" => item = Some(pending_item(&attrs)?),
                _ => debug!(element = %name, "unknown element in PBM"),
            },
            Token::End { name, text } => match name.as_str() {
                "item" => {
                    let Some(p) = item.take() else { continue };
                    let value = decoder.item(&p.name, p.token.as_deref(), &text)?;
                    match section {
                        Section::Attributes => {
                            book.set(&p.name, value)?;
                        }
                        Section::Extensions => {
                            book.extensions_mut().set(&p.name, value)?;
                        }
                        _ => warn!(name = %p.name, "item outside attributes or extensions"),
                    }
                }
                "head" | "attributes" | "extensions" => section = Section::None,
                "pbm" => return Ok(()),
                _ => {}
            },
            Token::Eof => return Err(PmabError::Malformed("PBM ended early".into())),
        }
    }
}

/// Reads the rest of a v3 PBC document, the root element already consumed.
pub fn read_pbc<R: Read>(
    reader: &mut XMLReader<R>,
    book: &Book,
    decoder: &Decoder<'_>,
) -> Result<(), PmabError> {
    let root = book.root().clone();
    let mut current = root.clone();
    let mut item: Option<Pending> = None;

    loop {
        match reader.next_token()? {
            Token::Start { name, attrs } => match name.as_str() {
                "chapter" => {
                    let chapter = Chapter::default();
                    current.append(&chapter)?;
                    current = chapter;
                }
                "item" => item = Some(pending_item(&attrs)?),
                "content" => {
                    item = Some(Pending {
                        name: "content".into(),
                        token: get_attr(&attrs, "type").map(String::from),
                    });
                }
                _ => {}
            },
            Token::End { name, text } => match name.as_str() {
                "item" => {
                    let Some(p) = item.take() else { continue };
                    let value = decoder.item(&p.name, p.token.as_deref(), &text)?;
                    current.set(&p.name, value)?;
                }
                "content" => {
                    let Some(p) = item.take() else { continue };
                    let content = match decoder.item(&p.name, p.token.as_deref(), &text)? {
                        Variant::Text(t) => t,
                        Variant::String(s) => Text::plain(&s),
                        v => {
                            return Err(PmabError::Malformed(format!(
                                "chapter content of kind {}",
                                v.kind()
                            )))
                        }
                    };
                    current.set_content(Some(content));
                }
                "chapter" => {
                    current = current
                        .parent()
                        .ok_or_else(|| PmabError::Malformed("unbalanced chapter".into()))?;
                }
                "pbc" => {
                    if !current.ptr_eq(&root) {
                        return Err(PmabError::Malformed("unbalanced chapter".into()));
                    }
                    return Ok(());
                }
                _ => {}
            },
            Token::Eof => return Err(PmabError::Malformed("PBC ended early".into())),
        }
    }
}

// Attributes sorted by name, cloned out of the map.
pub(super) fn sorted(attrs: &Attributes) -> Vec<(String, Variant)> {
    attrs
        .names()
        .into_iter()
        .filter_map(|n| attrs.get(&n).cloned().map(|v| (n, v)))
        .collect()
}

fn write_item(
    w: &mut XMLWriter,
    payloads: &mut Payloads<'_>,
    tag: &str,
    name: Option<&str>,
    value: &Variant,
) -> Result<(), PmabError> {
    let (text, token) = payloads.item(value)?;
    check_xml(name.unwrap_or(tag), &text)?;
    let token = token.map(|t| t.to_string());
    let mut attrs = vec![];
    if let Some(name) = name {
        attrs.push(("name", name));
    }
    if let Some(token) = &token {
        attrs.push(("type", token.as_str()));
    }
    w.element(tag, &attrs, &text)?;
    Ok(())
}

pub fn write_pbm(book: &Book, payloads: &mut Payloads<'_>) -> Result<Vec<u8>, PmabError> {
    let mut w = XMLWriter::new()?;
    w.start("pbm", &[("version", Version::V3.as_str())])?;

    let extensions = sorted(book.extensions());
    let generator = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));
    w.start("head", &[])?;
    w.element("meta", &[("name", "generator"), ("value", generator)], "")?;
    for (name, value) in &extensions {
        let Some(meta) = name.strip_prefix(META_PREFIX) else { continue };
        if meta == "generator" {
            continue;
        }
        let value = payloads.plain(value)?;
        check_xml(meta, &value)?;
        w.element("meta", &[("name", meta), ("value", value.as_str())], "")?;
    }
    w.end()?;

    w.start("attributes", &[])?;
    for (name, value) in sorted(&book.attributes()) {
        write_item(&mut w, payloads, "item", Some(name.as_str()), &value)?;
    }
    w.end()?;

    w.start("extensions", &[])?;
    for (name, value) in &extensions {
        if name.starts_with(META_PREFIX) {
            continue;
        }
        write_item(&mut w, payloads, "item", Some(name.as_str()), value)?;
    }
    w.end()?;

    w.end()?;
    Ok(w.finish())
}

fn write_chapter(
    w: &mut XMLWriter,
    payloads: &mut Payloads<'_>,
    chapter: &Chapter,
) -> Result<(), PmabError> {
    w.start("chapter", &[])?;
    let attrs = sorted(&chapter.attributes());
    for (name, value) in &attrs {
        write_item(w, payloads, "item", Some(name.as_str()), value)?;
    }
    if let Some(content) = chapter.content() {
        write_item(w, payloads, "content", None, &Variant::Text(content))?;
    }
    for child in chapter.children() {
        write_chapter(w, payloads, &child)?;
    }
    w.end()?;
    Ok(())
}

pub fn write_pbc(book: &Book, payloads: &mut Payloads<'_>) -> Result<Vec<u8>, PmabError> {
    let mut w = XMLWriter::new()?;
    w.start("pbc", &[("version", Version::V3.as_str())])?;
    w.start("toc", &[])?;
    if let Some(content) = book.content() {
        write_item(&mut w, payloads, "content", None, &Variant::Text(content))?;
    }
    for child in book.children() {
        write_chapter(&mut w, payloads, &child)?;
    }
    w.end()?;
    w.end()?;
    Ok(w.finish())
}

//! Schema 2.0: a closed `<metadata>` section of `<attr>` elements, an
//! `<extension>` section of loosely typed `<item>` elements, and plain-text
//! chapter content referenced by `href`.
//!
//! Both sections declare a `count`; elements past it are ignored.

use std::io::Read;

use tracing::debug;

use super::v3::sorted;
use super::values::{check_xml, Decoder, Payloads};
use super::{PmabError, Version, META_PREFIX};
use crate::book::Book;
use crate::chapter::{Chapter, TITLE};
use crate::text::TextFormat;
use crate::variant::{Kind, TypeRegistry, Variant};
use crate::xmlutils::{get_attr, Token, XMLReader, XMLWriter};

const COVER: &str = "cover";
const INTRO: &str = "intro";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Metadata,
    Extension,
}

struct Attr {
    name: String,
    media_type: Option<String>,
}

struct Item {
    name: String,
    kind: String,
    object: Option<Object>,
}

struct Object {
    href: String,
    media_type: String,
    encoding: Option<String>,
}

fn count(attrs: &[xml::attribute::OwnedAttribute]) -> Result<usize, PmabError> {
    match get_attr(attrs, "count") {
        None => Ok(usize::MAX),
        Some(c) => c
            .trim()
            .parse()
            .map_err(|_| PmabError::Malformed(format!("invalid count {c:?}"))),
    }
}

fn required<'a>(
    attrs: &'a [xml::attribute::OwnedAttribute],
    element: &str,
    name: &str,
) -> Result<&'a str, PmabError> {
    get_attr(attrs, name)
        .ok_or_else(|| PmabError::Malformed(format!("<{element}> without {name}")))
}

fn decode_attr(decoder: &Decoder<'_>, attr: &Attr, text: &str) -> Result<Variant, PmabError> {
    match &attr.media_type {
        Some(mime) => {
            let is_text = mime.starts_with("text/")
                && TypeRegistry::kind_of(&attr.name) != Some(Kind::Flob);
            if is_text {
                let encoding = decoder.encoding(None)?;
                Ok(Variant::Text(decoder.text(text, mime, encoding)?))
            } else {
                Ok(Variant::Flob(decoder.flob(text, mime)?))
            }
        }
        None => decoder.by_kind(&attr.name, text),
    }
}

fn decode_item(decoder: &Decoder<'_>, item: &Item, text: &str) -> Result<Variant, PmabError> {
    match item.kind.as_str() {
        "number" => {
            let t = text.trim();
            if let Ok(i) = t.parse::<i64>() {
                Ok(Variant::Integer(i))
            } else {
                super::values::parse_real(&item.name, t)
            }
        }
        "file" => {
            let object = item.object.as_ref().ok_or_else(|| {
                PmabError::Malformed(format!("file item {} without object", item.name))
            })?;
            if object.media_type.starts_with("text/") {
                let encoding = decoder.encoding(object.encoding.as_deref())?;
                Ok(Variant::Text(decoder.text(
                    &object.href,
                    &object.media_type,
                    encoding,
                )?))
            } else {
                Ok(Variant::Flob(decoder.flob(&object.href, &object.media_type)?))
            }
        }
        "string" => Ok(Variant::String(text.to_string())),
        other => {
            debug!(name = %item.name, kind = other, "unknown item type, reading as string");
            Ok(Variant::String(text.to_string()))
        }
    }
}

/// Reads the rest of a v2 PBM document, the root element already consumed.
pub fn read_pbm<R: Read>(
    reader: &mut XMLReader<R>,
    book: &mut Book,
    decoder: &Decoder<'_>,
) -> Result<(), PmabError> {
    let mut section = Section::None;
    let mut remaining = 0_usize;
    let mut attr: Option<Attr> = None;
    let mut item: Option<Item> = None;

    loop {
        match reader.next_token()? {
            Token::Start { name, attrs } => match name.as_str() {
                "metadata" => {
                    section = Section::Metadata;
                    remaining = count(&attrs)?;
                }
                "extension" => {
                    section = Section::Extension;
                    remaining = count(&attrs)?;
                }
                "attr" if section == Section::Metadata => {
                    attr = Some(Attr {
                        name: required(&attrs, "attr", "name")?.to_string(),
                        media_type: get_attr(&attrs, "media-type").map(String::from),
                    });
                }
                "item" if section == Section::Extension => {
                    item = Some(Item {
                        name: required(&attrs, "item", "name")?.to_string(),
                        kind: get_attr(&attrs, "type").unwrap_or("string").to_string(),
                        object: None,
                    });
                }
                "object" => {
                    if let Some(item) = item.as_mut() {
                        item.object = Some(Object {
                            href: required(&attrs, "object", "href")?.to_string(),
                            media_type: get_attr(&attrs, "media-type")
                                .unwrap_or("application/octet-stream")
                                .to_string(),
                            encoding: get_attr(&attrs, "encoding").map(String::from),
                        });
                    }
                }
                _ => {}
            },
            Token::End { name, text } => match name.as_str() {
                "attr" => {
                    let Some(a) = attr.take() else { continue };
                    if remaining == 0 {
                        debug!(name = %a.name, "attr beyond metadata count ignored");
                        continue;
                    }
                    remaining -= 1;
                    let value = decode_attr(decoder, &a, &text)?;
                    book.set(&a.name, value)?;
                }
                "item" => {
                    let Some(i) = item.take() else { continue };
                    if remaining == 0 {
                        debug!(name = %i.name, "item beyond extension count ignored");
                        continue;
                    }
                    remaining -= 1;
                    let value = decode_item(decoder, &i, &text)?;
                    book.extensions_mut().set(&i.name, value)?;
                }
                "metadata" | "extension" => section = Section::None,
                "pbm" => return Ok(()),
                _ => {}
            },
            Token::Eof => return Err(PmabError::Malformed("PBM ended early".into())),
        }
    }
}

/// Reads the rest of a v2 PBC document, the root element already consumed.
pub fn read_pbc<R: Read>(
    reader: &mut XMLReader<R>,
    book: &Book,
    decoder: &Decoder<'_>,
) -> Result<(), PmabError> {
    let root = book.root().clone();
    let mut current = root.clone();

    loop {
        match reader.next_token()? {
            Token::Start { name, attrs } => match name.as_str() {
                "chapter" => {
                    let chapter = Chapter::default();
                    current.append(&chapter)?;
                    current = chapter;
                    if let Some(href) = get_attr(&attrs, "href") {
                        let encoding = chapter_encoding(decoder, get_attr(&attrs, "encoding"))?;
                        let text = decoder.text(href, "text/plain", encoding)?;
                        current.set_content(Some(text));
                    }
                }
                "cover" if !current.ptr_eq(&root) => {
                    let href = required(&attrs, "cover", "href")?;
                    let mime = get_attr(&attrs, "media-type").unwrap_or("image/jpeg");
                    current.set(COVER, decoder.flob(href, mime)?)?;
                }
                "intro" if !current.ptr_eq(&root) => {
                    let href = required(&attrs, "intro", "href")?;
                    let encoding = chapter_encoding(decoder, get_attr(&attrs, "encoding"))?;
                    current.set(INTRO, decoder.text(href, "text/plain", encoding)?)?;
                }
                _ => {}
            },
            Token::End { name, text } => match name.as_str() {
                "title" => current.set_title(&text),
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

fn chapter_encoding(
    decoder: &Decoder<'_>,
    label: Option<&str>,
) -> Result<&'static encoding_rs::Encoding, PmabError> {
    match label {
        Some(l) => decoder.encoding(Some(l)),
        None if decoder.config().use_chapter_encoding_fallback => decoder.encoding(None),
        None => Err(PmabError::Malformed(
            "chapter content without encoding".into(),
        )),
    }
}

pub fn write_pbm(book: &Book, payloads: &mut Payloads<'_>) -> Result<Vec<u8>, PmabError> {
    let mut w = XMLWriter::new()?;
    w.start("pbm", &[("version", Version::V2.as_str())])?;

    let attrs = sorted(&book.attributes());
    let count = attrs.len().to_string();
    w.start("metadata", &[("count", count.as_str())])?;
    for (name, value) in &attrs {
        match value {
            Variant::Text(t) => {
                let (path, _) = payloads.text(t)?;
                let mime = format!("text/{}", t.format().subtype());
                w.element("attr", &[("name", name.as_str()), ("media-type", mime.as_str())], &path)?;
            }
            Variant::Flob(f) => {
                let path = payloads.flob(f)?;
                w.element("attr", &[("name", name.as_str()), ("media-type", f.mime())], &path)?;
            }
            v => {
                let text = payloads.plain(v)?;
                check_xml(name, &text)?;
                w.element("attr", &[("name", name.as_str())], &text)?;
            }
        }
    }
    w.end()?;

    let extensions: Vec<_> = sorted(book.extensions())
        .into_iter()
        .filter(|(n, _)| !n.starts_with(META_PREFIX))
        .collect();
    let count = extensions.len().to_string();
    w.start("extension", &[("count", count.as_str())])?;
    for (name, value) in &extensions {
        match value {
            Variant::Text(t) => {
                let (path, used) = payloads.text(t)?;
                let mime = format!("text/{}", t.format().subtype());
                w.start("item", &[("name", name.as_str()), ("type", "file")])?;
                w.element(
                    "object",
                    &[("href", path.as_str()), ("media-type", mime.as_str()), ("encoding", used.name())],
                    "",
                )?;
                w.end()?;
            }
            Variant::Flob(f) => {
                let path = payloads.flob(f)?;
                w.start("item", &[("name", name.as_str()), ("type", "file")])?;
                w.element("object", &[("href", path.as_str()), ("media-type", f.mime())], "")?;
                w.end()?;
            }
            Variant::Integer(_) | Variant::Real(_) => {
                let text = payloads.plain(value)?;
                check_xml(name, &text)?;
                w.element("item", &[("name", name.as_str()), ("type", "number")], &text)?;
            }
            v => {
                let text = payloads.plain(v)?;
                check_xml(name, &text)?;
                w.element("item", &[("name", name.as_str()), ("type", "string")], &text)?;
            }
        }
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
    let count = chapter.size().to_string();
    let content = match chapter.content() {
        Some(text) => Some(payloads.text(&text)?),
        None => None,
    };
    match &content {
        Some((path, used)) => w.start(
            "chapter",
            &[("href", path.as_str()), ("encoding", used.name()), ("count", count.as_str())],
        )?,
        None => w.start("chapter", &[("count", count.as_str())])?,
    }

    // an untitled chapter must read back untitled
    if let Some(title) = chapter.get(TITLE) {
        let title = payloads.plain(&title)?;
        check_xml(TITLE, &title)?;
        w.element("title", &[], &title)?;
    }
    if let Some(Variant::Flob(cover)) = chapter.get(COVER) {
        let path = payloads.flob(&cover)?;
        w.element("cover", &[("href", path.as_str()), ("media-type", cover.mime())], "")?;
    }
    if let Some(Variant::Text(intro)) = chapter.get(INTRO) {
        if intro.format() == TextFormat::Html {
            debug!("html intro stored as plain text");
        }
        let (path, used) = payloads.text(&intro)?;
        w.element("intro", &[("href", path.as_str()), ("encoding", used.name())], "")?;
    }

    for child in chapter.children() {
        write_chapter(w, payloads, &child)?;
    }
    w.end()?;
    Ok(())
}

pub fn write_pbc(book: &Book, payloads: &mut Payloads<'_>) -> Result<Vec<u8>, PmabError> {
    let mut w = XMLWriter::new()?;
    w.start("pbc", &[("version", Version::V2.as_str())])?;
    let depth = book.depth().to_string();
    w.start("contents", &[("depth", depth.as_str())])?;
    for child in book.children() {
        write_chapter(&mut w, payloads, &child)?;
    }
    w.end()?;
    w.end()?;
    Ok(w.finish())
}

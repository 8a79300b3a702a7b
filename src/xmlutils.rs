use std::io::Read;

use xml::attribute::OwnedAttribute;
use xml::common::XmlVersion;
use xml::reader::EventReader;
use xml::reader::ParserConfig;
use xml::reader::XmlEvent as ReaderEvent;
use xml::writer::EmitterConfig;
use xml::writer::EventWriter;
use xml::writer::XmlEvent as WriterEvent;

#[derive(Debug, thiserror::Error)]
pub enum XMLError {
    #[error("XML Reader Error: {0}")]
    InvalidXML(#[from] xml::reader::Error),
    #[error("XML Writer Error: {0}")]
    Writer(#[from] xml::writer::Error),
    #[error("Unexpected end of document")]
    UnexpectedEof,
    #[error("Character {ch:?} is not allowed in XML ({at})")]
    InvalidChar { ch: char, at: String },
}

/// True for characters XML 1.0 allows in a document.
pub fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{d7ff}' | '\u{e000}'..='\u{fffd}' | '\u{10000}'..='\u{10ffff}')
}

/// Returns the first character of `s` that can't be written as XML.
pub fn invalid_xml_char(s: &str) -> Option<char> {
    s.chars().find(|c| !is_xml_char(*c))
}

fn check(s: &str, at: impl FnOnce() -> String) -> Result<(), XMLError> {
    match invalid_xml_char(s) {
        Some(ch) => Err(XMLError::InvalidChar { ch, at: at() }),
        None => Ok(()),
    }
}

/// One step of a forward-only walk over a document.
#[derive(Debug)]
pub enum Token {
    Start {
        name: String,
        attrs: Vec<OwnedAttribute>,
    },
    /// End of an element, with the text read since the last tag.
    End { name: String, text: String },
    Eof,
}

/// Streaming reader that never builds a tree: it only keeps the text
/// accumulated since the last start or end tag.
pub struct XMLReader<R: Read> {
    reader: EventReader<R>,
    text: String,
}

impl<R: Read> XMLReader<R> {
    pub fn new(content: R) -> Self {
        Self {
            reader: ParserConfig::new()
                .add_entity("nbsp", "\u{a0}")
                .add_entity("copy", "©")
                .add_entity("reg", "®")
                .trim_whitespace(false)
                .whitespace_to_characters(true)
                .cdata_to_characters(true)
                .create_reader(content),
            text: String::new(),
        }
    }

    pub fn next_token(&mut self) -> Result<Token, XMLError> {
        loop {
            match self.reader.next()? {
                ReaderEvent::StartElement {
                    name, attributes, ..
                } => {
                    self.text.clear();
                    return Ok(Token::Start {
                        name: name.local_name,
                        attrs: attributes,
                    });
                }
                ReaderEvent::EndElement { name } => {
                    return Ok(Token::End {
                        name: name.local_name,
                        text: std::mem::take(&mut self.text),
                    });
                }
                ReaderEvent::Characters(text) => self.text.push_str(&text),
                ReaderEvent::EndDocument => return Ok(Token::Eof),
                _ => continue,
            }
        }
    }
}

pub fn get_attr<'a>(attrs: &'a [OwnedAttribute], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|a| a.name.local_name == name)
        .map(|a| a.value.as_str())
}

/// Indenting writer into memory.
pub struct XMLWriter {
    writer: EventWriter<Vec<u8>>,
}

impl XMLWriter {
    pub fn new() -> Result<Self, XMLError> {
        let mut writer = EmitterConfig::new()
            .perform_indent(true)
            .create_writer(Vec::new());
        writer.write(WriterEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("UTF-8"),
            standalone: None,
        })?;
        Ok(Self { writer })
    }

    /// # Errors
    ///
    /// Fails with [`XMLError::InvalidChar`] if an attribute value can't be
    /// written as XML.
    pub fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), XMLError> {
        check(name, || format!("<{name}>"))?;
        for (k, v) in attrs {
            check(k, || format!("<{name}> attribute name"))?;
            check(v, || format!("<{name} {k}>"))?;
        }
        let mut element = WriterEvent::start_element(name);
        for (k, v) in attrs {
            element = element.attr(*k, v);
        }
        self.writer.write(element)?;
        Ok(())
    }

    pub fn text(&mut self, text: &str) -> Result<(), XMLError> {
        check(text, || "element text".to_string())?;
        if !text.is_empty() {
            self.writer.write(WriterEvent::characters(text))?;
        }
        Ok(())
    }

    pub fn end(&mut self) -> Result<(), XMLError> {
        self.writer.write(WriterEvent::end_element())?;
        Ok(())
    }

    /// Writes `<name attrs..>text</name>`.
    pub fn element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<(), XMLError> {
        self.start(name, attrs)?;
        self.text(text)?;
        self.end()
    }

    pub fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

use pmab::archive::{ArchiveWriter, DirWriter, ZipWriter};
use pmab::book::Book;
use pmab::chapter::Chapter;
use pmab::codec::{self, Config, PmabError, Version};
use pmab::flob::Flob;
use pmab::locale::Locale;
use pmab::text::{Text, TextFormat};
use pmab::variant::Variant;
use std::io::Cursor;
use time::macros::datetime;

fn sample_book() -> Book {
    let mut book = Book::new("T");
    book.set("author", "A").unwrap();
    book.set("date", datetime!(2024-01-02 03:04:05)).unwrap();
    book.set("language", Locale::new("zh", "CN", "")).unwrap();
    book.set("intro", Text::plain("An intro")).unwrap();
    book.set("cover", Flob::from_bytes("cover.png", "image/png", vec![0x89_u8, b'P', b'N', b'G']))
        .unwrap();
    book.set("words", 1200).unwrap();
    book.extensions_mut().set("source", "https://example.com/book").unwrap();
    book.extensions_mut().set("rating", 9).unwrap();

    let chapter = Chapter::new("One");
    chapter.set_content(Some(Text::plain("Hello")));
    book.append(&chapter).unwrap();

    let section = Chapter::new("Part");
    let nested = Chapter::new("Two");
    nested.set_content(Some(Text::plain("World")));
    section.append(&nested).unwrap();
    book.append(&section).unwrap();
    book
}

// Builds a container out of raw entries.
fn container(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (path, content) in entries {
        writer.put(path, content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

const EMPTY_PBC_V2: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<pbc version="2.0"><contents depth="0"></contents></pbc>"#;

fn check_common(parsed: &Book) {
    assert_eq!(parsed.title(), "T");
    assert_eq!(parsed.author(), "A");
    assert_eq!(parsed.date(), Some(datetime!(2024-01-02 03:04:05)));
    assert_eq!(parsed.language(), Some(Locale::new("zh", "CN", "")));
    assert_eq!(parsed.intro().unwrap().text().unwrap(), "An intro");

    let cover = parsed.cover().unwrap();
    assert_eq!(cover.mime(), "image/png");
    assert_eq!(cover.read_all().unwrap(), vec![0x89, b'P', b'N', b'G']);

    assert_eq!(2, parsed.size());
    let first = parsed.child_at(0).unwrap();
    assert_eq!(first.title(), "One");
    assert_eq!(first.content().unwrap().text().unwrap(), "Hello");

    let section = parsed.child_at(1).unwrap();
    assert_eq!(section.title(), "Part");
    assert!(section.content().is_none());
    let nested = section.child_at(0).unwrap();
    assert_eq!(nested.title(), "Two");
    assert_eq!(nested.content().unwrap().text().unwrap(), "World");

    assert_eq!(
        parsed.extensions().get("source").and_then(Variant::as_str),
        Some("https://example.com/book")
    );
    assert_eq!(parsed.extensions().get_as("rating", 0_i64).unwrap(), 9);
}

#[test]
fn round_trip_v3() {
    let mut book = sample_book();
    book.child_at(1)
        .unwrap()
        .set("finished", true)
        .unwrap();
    book.set_content(Some(Text::html("<p>Preface</p>")));

    let config = Config::default();
    let bytes = codec::make(&book, &config).unwrap();
    let mut parsed = codec::parse(&bytes, &config).unwrap();

    check_common(&parsed);
    assert_eq!(parsed.get_as("words", 0_i64).unwrap(), 1200);
    assert!(parsed.child_at(1).unwrap().get_as("finished", false).unwrap());

    let preface = parsed.content().unwrap();
    assert_eq!(preface.format(), TextFormat::Html);
    assert_eq!(preface.text().unwrap(), "<p>Preface</p>");

    parsed.cleanup();
    book.cleanup();
}

#[test]
fn round_trip_v2() {
    let mut book = sample_book();
    let config = Config::default().with_version(Version::V2);
    let bytes = codec::make(&book, &config).unwrap();
    let mut parsed = codec::parse(&bytes, &config).unwrap();

    check_common(&parsed);
    assert_eq!(parsed.get_as("words", 0_i64).unwrap(), 1200);

    parsed.cleanup();
    book.cleanup();
}

#[test]
fn round_trip_v2_chapter_extras() {
    let mut book = Book::new("T");
    let chapter = Chapter::new("One");
    chapter.set("intro", Text::plain("chapter intro")).unwrap();
    chapter
        .set("cover", Flob::from_bytes("c.jpg", "image/jpeg", vec![1_u8, 2]))
        .unwrap();
    chapter.set("finished", true).unwrap();
    book.append(&chapter).unwrap();

    let config = Config::default().with_version(Version::V2);
    let bytes = codec::make(&book, &config).unwrap();
    let mut parsed = codec::parse(&bytes, &config).unwrap();

    let chapter = parsed.child_at(0).unwrap();
    assert_eq!(chapter.title(), "One");
    match chapter.get("intro") {
        Some(Variant::Text(t)) => assert_eq!(t.text().unwrap(), "chapter intro"),
        other => panic!("unexpected intro {other:?}"),
    }
    match chapter.get("cover") {
        Some(Variant::Flob(f)) => assert_eq!(f.read_all().unwrap(), vec![1, 2]),
        other => panic!("unexpected cover {other:?}"),
    }
    // v2 has no place for other chapter attributes
    assert!(chapter.get("finished").is_none());

    parsed.cleanup();
    book.cleanup();
}

#[test]
fn round_trip_encoding() {
    let mut book = Book::new("中文");
    let chapter = Chapter::new("第一章");
    chapter.set_content(Some(Text::plain("中文内容")));
    book.append(&chapter).unwrap();

    for version in [Version::V3, Version::V2] {
        let config = Config::default()
            .with_text_encoding("GBK")
            .with_version(version);
        let bytes = codec::make(&book, &config).unwrap();
        let mut parsed = codec::parse(&bytes, &config).unwrap();

        assert_eq!(parsed.title(), "中文");
        let content = parsed.child_at(0).unwrap().content().unwrap();
        assert_eq!(content.encoding(), encoding_rs::GBK);
        assert_eq!(content.text().unwrap(), "中文内容");
        parsed.cleanup();
    }
    book.cleanup();
}

#[test]
fn text_is_restartable_after_parse() {
    let mut book = sample_book();
    let bytes = codec::make(&book, &Config::default()).unwrap();
    let mut parsed = codec::parse(&bytes, &Config::default()).unwrap();

    let content = parsed.child_at(0).unwrap().content().unwrap();
    let first = content.text().unwrap();
    let second = content.text().unwrap();
    assert_eq!(first, second);

    parsed.cleanup();
    book.cleanup();
}

#[test]
fn cleanup_closes_archive() {
    let mut book = sample_book();
    let bytes = codec::make(&book, &Config::default()).unwrap();
    let mut parsed = codec::parse(&bytes, &Config::default()).unwrap();

    let intro = parsed.intro().unwrap();
    assert!(intro.text().is_ok());
    parsed.cleanup();
    assert!(intro.text().is_err());
    assert_eq!(0, parsed.size());

    book.cleanup();
}

#[test]
fn v2_count_truncates() {
    let pbm = r#"<?xml version="1.0" encoding="UTF-8"?>
<pbm version="2.0">
  <metadata count="1">
    <attr name="title">T</attr>
    <attr name="author">A</attr>
    <attr name="genre">G</attr>
  </metadata>
  <extension count="1">
    <item name="source" type="string">S</item>
    <item name="rating" type="number">5</item>
  </extension>
</pbm>"#;
    let bytes = container(&[
        ("mimetype", "application/pmab+zip"),
        ("book.pbm", pbm),
        ("book.pbc", EMPTY_PBC_V2),
    ]);

    let mut book = codec::parse(&bytes, &Config::default()).unwrap();
    assert_eq!(book.title(), "T");
    assert!(book.get("author").is_none());
    assert!(book.get("genre").is_none());
    assert!(book.extensions().contains("source"));
    assert!(!book.extensions().contains("rating"));
    book.cleanup();
}

#[test]
fn v2_chapter_encoding_fallback() {
    let pbm = r#"<pbm version="2.0"><metadata count="1"><attr name="title">T</attr></metadata></pbm>"#;
    let pbc = r#"<pbc version="2.0">
  <contents depth="1">
    <chapter href="text/00001.txt" count="0"><title>One</title></chapter>
  </contents>
</pbc>"#;
    let bytes = container(&[
        ("mimetype", "application/pmab+zip"),
        ("book.pbm", pbm),
        ("book.pbc", pbc),
        ("text/00001.txt", "Hello"),
    ]);

    let config = Config::default().with_chapter_encoding_fallback(true);
    let mut book = codec::parse(&bytes, &config).unwrap();
    let chapter = book.child_at(0).unwrap();
    assert_eq!(chapter.title(), "One");
    assert_eq!(chapter.content().unwrap().text().unwrap(), "Hello");
    book.cleanup();

    let config = Config::default().with_chapter_encoding_fallback(false);
    assert!(matches!(
        codec::parse(&bytes, &config),
        Err(PmabError::Malformed(_))
    ));
}

#[test]
fn v3_head_meta_is_kept() {
    let pbm = r#"<?xml version="1.0" encoding="UTF-8"?>
<pbm version="3.0">
  <head>
    <meta name="generator" value="other 1.0"/>
    <meta name="source" value="web"/>
  </head>
  <attributes>
    <item name="title">T</item>
    <item name="language">en-US</item>
  </attributes>
  <extensions/>
</pbm>"#;
    let pbc = r#"<pbc version="3.0"><toc/></pbc>"#;
    let bytes = container(&[
        ("mimetype", "application/pmab+zip"),
        ("book.pbm", pbm),
        ("book.pbc", pbc),
    ]);

    let mut book = codec::parse(&bytes, &Config::default()).unwrap();
    assert_eq!(book.language(), Some(Locale::new("en", "US", "")));
    assert_eq!(
        book.extensions()
            .get("pmab.meta.source")
            .and_then(Variant::as_str),
        Some("web")
    );

    let bytes = codec::make(&book, &Config::default()).unwrap();
    let mut again = codec::parse(&bytes, &Config::default()).unwrap();
    assert_eq!(
        again
            .extensions()
            .get("pmab.meta.source")
            .and_then(Variant::as_str),
        Some("web")
    );
    let generator = again.extensions().get("pmab.meta.generator").cloned();
    assert!(matches!(generator, Some(Variant::String(g)) if g.starts_with("pmab ")));

    again.cleanup();
    book.cleanup();
}

#[test]
fn unsupported_version() {
    let pbm = r#"<pbm version="9.9"><metadata/></pbm>"#;
    let bytes = container(&[
        ("mimetype", "application/pmab+zip"),
        ("book.pbm", pbm),
        ("book.pbc", EMPTY_PBC_V2),
    ]);
    match codec::parse(&bytes, &Config::default()) {
        Err(PmabError::UnsupportedVersion(v)) => assert_eq!(v, "9.9"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn wrong_mime() {
    let bytes = container(&[
        ("mimetype", "application/zip"),
        ("book.pbm", r#"<pbm version="2.0"/>"#),
        ("book.pbc", EMPTY_PBC_V2),
    ]);
    assert!(matches!(
        codec::parse(&bytes, &Config::default()),
        Err(PmabError::UnsupportedVersion(_))
    ));

    let bytes = container(&[("book.pbm", r#"<pbm version="2.0"/>"#)]);
    assert!(matches!(
        codec::parse(&bytes, &Config::default()),
        Err(PmabError::Malformed(_))
    ));
}

#[test]
fn missing_entries() {
    let bytes = container(&[("mimetype", "application/pmab+zip")]);
    assert!(matches!(
        codec::parse(&bytes, &Config::default()),
        Err(PmabError::Malformed(_))
    ));

    let pbm = r#"<pbm version="3.0"><attributes>
  <item name="title">T</item>
  <item name="intro" type="text/plain;encoding=UTF-8">text/missing.txt</item>
</attributes></pbm>"#;
    let bytes = container(&[
        ("mimetype", "application/pmab+zip"),
        ("book.pbm", pbm),
        ("book.pbc", r#"<pbc version="3.0"><toc/></pbc>"#),
    ]);
    let err = codec::parse(&bytes, &Config::default()).unwrap_err();
    assert!(err.is_entry_not_found());
}

#[test]
fn bad_values() {
    let pbm = r#"<pbm version="3.0"><attributes>
  <item name="words" type="integer">many</item>
</attributes></pbm>"#;
    let bytes = container(&[
        ("mimetype", "application/pmab+zip"),
        ("book.pbm", pbm),
        ("book.pbc", r#"<pbc version="3.0"><toc/></pbc>"#),
    ]);
    assert!(matches!(
        codec::parse(&bytes, &Config::default()),
        Err(PmabError::BadValue { .. })
    ));

    let pbm = r#"<pbm version="3.0"><attributes>
  <item name="date" type="string">yesterday</item>
</attributes></pbm>"#;
    let bytes = container(&[
        ("mimetype", "application/pmab+zip"),
        ("book.pbm", pbm),
        ("book.pbc", r#"<pbc version="3.0"><toc/></pbc>"#),
    ]);
    assert!(matches!(
        codec::parse(&bytes, &Config::default()),
        Err(PmabError::TypeMismatch(_))
    ));
}

#[test]
fn unbalanced_toc() {
    let pbm = r#"<pbm version="3.0"><attributes/></pbm>"#;
    let pbc = r#"<pbc version="3.0"><toc><chapter><item name="title">A</item></toc></pbc>"#;
    let bytes = container(&[
        ("mimetype", "application/pmab+zip"),
        ("book.pbm", pbm),
        ("book.pbc", pbc),
    ]);
    assert!(codec::parse(&bytes, &Config::default()).is_err());
}

#[test]
fn make_file_and_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("book.pmab");

    let mut book = sample_book();
    codec::make_file(&book, &path, &Config::default()).unwrap();
    assert!(path.is_file());

    let mut parsed = codec::open(&path, &Config::default()).unwrap();
    check_common(&parsed);

    parsed.cleanup();
    book.cleanup();
}

#[test]
fn directory_container() {
    let dir = tempfile::tempdir().unwrap();
    let mut book = sample_book();

    let config = Config::default().with_dirs("chapters", "img", "misc");
    let mut writer = DirWriter::new(dir.path()).unwrap();
    codec::make_to(&book, &mut writer, &config).unwrap();
    assert!(dir.path().join("mimetype").is_file());
    assert!(dir.path().join("chapters").is_dir());
    assert!(dir.path().join("img").is_dir());

    let mut parsed = codec::open(dir.path(), &config).unwrap();
    check_common(&parsed);

    parsed.cleanup();
    book.cleanup();
}

#[test]
fn unknown_encoding() {
    let mut book = sample_book();
    let config = Config::default().with_text_encoding("no-such-encoding");
    assert!(matches!(
        codec::make(&book, &config),
        Err(PmabError::UnknownEncoding(_))
    ));
    book.cleanup();
}

#[test]
fn round_trip_subsecond_date() {
    let precise = datetime!(2024-01-02 03:04:05.250);
    for version in [Version::V3, Version::V2] {
        let mut book = Book::new("T");
        book.set("date", precise).unwrap();
        book.set("pubdate", datetime!(2024-01-02 03:04:05)).unwrap();

        let config = Config::default().with_version(version);
        let bytes = codec::make(&book, &config).unwrap();
        let mut parsed = codec::parse(&bytes, &config).unwrap();

        assert_eq!(parsed.date(), Some(precise));
        assert_eq!(
            parsed.get_as("pubdate", datetime!(2000-01-01 0:00)).unwrap(),
            datetime!(2024-01-02 03:04:05)
        );
        parsed.cleanup();
        book.cleanup();
    }
}

#[test]
fn make_rejects_non_xml_chars() {
    for version in [Version::V3, Version::V2] {
        let config = Config::default().with_version(version);

        let mut book = Book::new("T\u{1}");
        match codec::make(&book, &config) {
            Err(PmabError::BadValue { name, .. }) => assert_eq!(name, "title"),
            other => panic!("unexpected {other:?}"),
        }
        book.cleanup();

        let mut book = Book::new("T");
        book.extensions_mut().set("note", "bell\u{7}").unwrap();
        assert!(matches!(
            codec::make(&book, &config),
            Err(PmabError::BadValue { name, .. }) if name == "note"
        ));

        let chapter = Chapter::new("bad\u{fffe}");
        book.append(&chapter).unwrap();
        book.extensions_mut().remove("note");
        assert!(codec::make(&book, &config).is_err());
        book.cleanup();
    }
}

#[test]
fn v3_decode_rules() {
    let pbm = r#"<pbm version="3.0">
  <attributes>
    <item name="title">T</item>
    <item name="language" type="string">en_GB</item>
    <item name="pubdate" type="date;format=[day]/[month]/[year]">04/03/2019</item>
  </attributes>
  <extensions>
    <item name="raw" type="bytes">AAEC</item>
    <item name="pages" type="uint">12</item>
    <item name="mood" type="sparkly">bright</item>
    <item name="notes" type="text/html">text/00001.html</item>
    <item name="blob" type="application/x-foo">extras/00002.bin</item>
  </extensions>
</pbm>"#;
    let bytes = container(&[
        ("mimetype", "application/pmab+zip"),
        ("book.pbm", pbm),
        ("book.pbc", r#"<pbc version="3.0"><toc/></pbc>"#),
        ("text/00001.html", "<p>notes</p>"),
        ("extras/00002.bin", "foo"),
    ]);

    let mut book = codec::parse(&bytes, &Config::default()).unwrap();
    assert_eq!(book.language(), Some(Locale::new("en", "GB", "")));
    assert_eq!(
        book.get_as("pubdate", datetime!(2000-01-01 0:00)).unwrap(),
        datetime!(2019-03-04 0:00)
    );

    let ext = book.extensions();
    assert_eq!(ext.get("raw").and_then(Variant::as_str), Some("AAEC"));
    assert_eq!(ext.get_as("pages", 0_i64).unwrap(), 12);
    assert_eq!(ext.get("mood").and_then(Variant::as_str), Some("bright"));
    match ext.get("notes") {
        Some(Variant::Text(t)) => {
            assert_eq!(t.format(), TextFormat::Html);
            assert_eq!(t.text().unwrap(), "<p>notes</p>");
        }
        other => panic!("unexpected notes {other:?}"),
    }
    match ext.get("blob") {
        Some(Variant::Flob(f)) => {
            assert_eq!(f.mime(), "application/x-foo");
            assert_eq!(f.name(), "00002.bin");
            assert_eq!(f.read_all().unwrap(), b"foo");
        }
        other => panic!("unexpected blob {other:?}"),
    }
    book.cleanup();
}

#[test]
fn flob_payloads_go_to_extras() {
    let mut book = Book::new("T");
    book.extensions_mut()
        .set("blob", Flob::from_bytes("data.bin", "application/x-foo", vec![1_u8, 2]))
        .unwrap();
    let bytes = codec::make(&book, &Config::default()).unwrap();

    let archive = pmab::archive::ZipReader::from_bytes(bytes.clone()).unwrap();
    assert!(archive.files.iter().any(|f| f == "extras/00001.bin"));

    let mut parsed = codec::parse(&bytes, &Config::default()).unwrap();
    assert!(matches!(parsed.extensions().get("blob"), Some(Variant::Flob(_))));
    parsed.cleanup();
    book.cleanup();
}

#[test]
fn v2_untitled_chapter() {
    let mut book = Book::new("T");
    let chapter = Chapter::default();
    chapter.set_content(Some(Text::plain("Hello")));
    book.append(&chapter).unwrap();

    let config = Config::default().with_version(Version::V2);
    let bytes = codec::make(&book, &config).unwrap();
    let mut parsed = codec::parse(&bytes, &config).unwrap();

    let chapter = parsed.child_at(0).unwrap();
    assert!(chapter.get("title").is_none());
    assert_eq!(chapter.content().unwrap().text().unwrap(), "Hello");
    parsed.cleanup();
    book.cleanup();
}

#[test]
fn v2_whole_real_stays_real() {
    let mut book = Book::new("T");
    book.set("price", 3.0).unwrap();
    book.extensions_mut().set("score", 3.0).unwrap();
    book.extensions_mut().set("count", 3).unwrap();

    let config = Config::default().with_version(Version::V2);
    let bytes = codec::make(&book, &config).unwrap();
    let mut parsed = codec::parse(&bytes, &config).unwrap();

    assert!(matches!(parsed.get("price"), Some(Variant::Real(r)) if r == 3.0));
    assert!(matches!(parsed.extensions().get("score"), Some(Variant::Real(r)) if *r == 3.0));
    assert!(matches!(parsed.extensions().get("count"), Some(Variant::Integer(3))));
    parsed.cleanup();
    book.cleanup();
}

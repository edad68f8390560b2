use crate::filter::decode_lossy;
use crate::models::WikiPage;
use anyhow::{bail, Context, Result};
use bzip2::read::MultiBzDecoder;
use quick_xml::escape::unescape;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::BufReader;
use tracing::{error, warn};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Ns,
    Id,
    Text,
}

/// Streaming reader over a bz2-compressed MediaWiki XML export.
///
/// Yields one [`WikiPage`] per `<page>` element. A decompression or XML error, or
/// a dump that ends inside a `<page>`, is yielded once as `Err` and ends the
/// iteration.
pub struct WikiReader {
    reader: Reader<BufReader<MultiBzDecoder<File>>>,
    buf: Vec<u8>,
    failed: bool,
}

#[derive(Default)]
struct PageBuilder {
    id: Option<u32>,
    title: String,
    ns: Option<i32>,
    text: String,
}

impl PageBuilder {
    fn push(&mut self, field: Field, value: &str) {
        match field {
            Field::Title => self.title.push_str(value),
            Field::Ns => self.ns = value.trim().parse().ok(),
            Field::Id => {
                if self.id.is_none() {
                    self.id = value.trim().parse().ok();
                }
            }
            Field::Text => self.text.push_str(value),
        }
    }

    fn build(self) -> Option<WikiPage> {
        let Some(id) = self.id else {
            warn!(title = %self.title, "Page without id, skipping");
            return None;
        };

        Some(WikiPage {
            id,
            title: self.title,
            ns: self.ns,
            text: self.text,
        })
    }
}

impl WikiReader {
    /// Opens `path`. A leading `file://` is stripped; remote URLs are not supported.
    pub fn new(path: &str) -> Result<Self> {
        let path = path.strip_prefix("file://").unwrap_or(path);
        let file =
            File::open(path).with_context(|| format!("Failed to open dump file: {}", path))?;
        let decoder = MultiBzDecoder::new(file);
        let mut reader = Reader::from_reader(BufReader::with_capacity(256 * 1024, decoder));
        reader.trim_text(true);

        Ok(Self {
            reader,
            buf: Vec::with_capacity(64 * 1024),
            failed: false,
        })
    }

    fn read_page(&mut self) -> Result<Option<WikiPage>> {
        let mut page: Option<PageBuilder> = None;
        let mut field: Option<Field> = None;
        let mut in_revision = false;
        let mut in_contributor = false;

        loop {
            self.buf.clear();
            let position = self.reader.buffer_position();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .with_context(|| format!("Failed to read dump near byte {position}"))?;

            match event {
                Event::Start(e) => match e.name().as_ref() {
                    b"page" => {
                        page = Some(PageBuilder::default());
                        in_revision = false;
                        in_contributor = false;
                    }
                    b"revision" => in_revision = true,
                    b"contributor" => in_contributor = true,
                    b"title" => field = Some(Field::Title),
                    b"ns" => field = Some(Field::Ns),
                    b"id" if !in_revision && !in_contributor => field = Some(Field::Id),
                    b"text" => field = Some(Field::Text),
                    _ => {}
                },
                Event::Text(e) => {
                    if let (Some(f), Some(p)) = (field, page.as_mut()) {
                        let raw = decode_lossy(&e);
                        match unescape(&raw) {
                            Ok(value) => p.push(f, &value),
                            Err(_) => p.push(f, &raw),
                        }
                    }
                }
                Event::CData(e) => {
                    if let (Some(f), Some(p)) = (field, page.as_mut()) {
                        p.push(f, &decode_lossy(&e));
                    }
                }
                Event::End(e) => match e.name().as_ref() {
                    b"page" => {
                        if let Some(built) = page.take().and_then(PageBuilder::build) {
                            return Ok(Some(built));
                        }
                    }
                    b"revision" => in_revision = false,
                    b"contributor" => in_contributor = false,
                    _ => field = None,
                },
                Event::Eof => {
                    if let Some(p) = page {
                        bail!("Dump ended inside page '{}'", p.title);
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }
    }
}

impl Iterator for WikiReader {
    type Item = Result<WikiPage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_page() {
            Ok(page) => page.map(Ok),
            Err(e) => {
                error!(error = %format!("{e:#}"), "Failed to parse dump");
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

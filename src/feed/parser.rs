use quick_xml::events::{BytesText, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Errors that make a document unusable as an RSS feed.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The XML itself is broken (mismatched tags, bad syntax).
    #[error("XML parse error at byte {position}: {message}")]
    Xml { position: u64, message: String },

    /// Well-formed XML, but not an RSS channel.
    #[error("Document has no <channel> element")]
    MissingChannel,
}

/// A parsed RSS channel. Absent elements are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDocument {
    pub title: String,
    pub description: String,
    pub link: String,
    /// Items in document order
    pub items: Vec<ParsedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Verbatim text of `<pubDate>`, no date parsing
    pub pub_date: String,
    pub guid: String,
}

/// Parse an RSS document.
///
/// Non-strict: only broken XML or a missing `<channel>` is an error. Channel
/// fields are read from direct children of `<channel>` and item fields from
/// direct children of `<item>`; the first occurrence of each wins. `link`
/// falls back to `source_url`.
///
/// Entity handling is quick-xml's: only the five XML builtins are resolved,
/// `<!ENTITY>` declarations are never expanded. Text with an unknown entity
/// is kept raw instead of failing the document.
pub fn parse(xml: &str, source_url: &str) -> Result<FeedDocument, ParseError> {
    let mut reader = Reader::from_str(xml);
    let mut builder = DocumentBuilder::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => builder.open(e.name().as_ref()),
            Ok(Event::Empty(e)) => {
                builder.open(e.name().as_ref());
                builder.close();
            }
            Ok(Event::End(_)) => builder.close(),
            Ok(Event::Text(e)) => builder.text(&text_content(&e)),
            Ok(Event::CData(e)) => builder.text(&String::from_utf8_lossy(&e)),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::Xml {
                    position: reader.error_position() as u64,
                    message: e.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    builder.finish(source_url)
}

fn text_content(e: &BytesText<'_>) -> String {
    match e.unescape() {
        Ok(text) => text.into_owned(),
        Err(_) => String::from_utf8_lossy(e).into_owned(),
    }
}

// ============================================================================
// Document Builder
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Field {
    ChannelTitle,
    ChannelDescription,
    ChannelLink,
    ItemTitle,
    ItemLink,
    ItemDescription,
    ItemSummary,
    ItemContent,
    ItemPubDate,
    ItemPublished,
    ItemGuid,
}

fn channel_field(name: &[u8]) -> Option<Field> {
    match name {
        b"title" => Some(Field::ChannelTitle),
        b"description" => Some(Field::ChannelDescription),
        b"link" => Some(Field::ChannelLink),
        _ => None,
    }
}

fn item_field(name: &[u8]) -> Option<Field> {
    match name {
        b"title" => Some(Field::ItemTitle),
        b"link" => Some(Field::ItemLink),
        b"description" => Some(Field::ItemDescription),
        b"summary" => Some(Field::ItemSummary),
        b"content:encoded" => Some(Field::ItemContent),
        b"pubDate" => Some(Field::ItemPubDate),
        b"published" => Some(Field::ItemPublished),
        b"guid" => Some(Field::ItemGuid),
        _ => None,
    }
}

/// Text being collected for one field element.
#[derive(Debug)]
struct Capture {
    field: Field,
    /// Stack depth of the field element
    depth: usize,
    text: String,
}

#[derive(Debug, Default)]
struct ItemFields {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    pub_date: Option<String>,
    published: Option<String>,
    guid: Option<String>,
}

impl ItemFields {
    fn finish(self) -> ParsedItem {
        ParsedItem {
            title: self.title.unwrap_or_default(),
            link: self.link.unwrap_or_default(),
            description: first_non_empty([self.description, self.summary, self.content]),
            pub_date: first_non_empty([self.pub_date, self.published]),
            guid: self.guid.unwrap_or_default(),
        }
    }
}

fn first_non_empty<const N: usize>(candidates: [Option<String>; N]) -> String {
    candidates
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

#[derive(Debug)]
struct OpenItem {
    fields: ItemFields,
    depth: usize,
}

#[derive(Debug, Default)]
struct DocumentBuilder {
    stack: Vec<Vec<u8>>,
    saw_channel: bool,
    title: Option<String>,
    description: Option<String>,
    link: Option<String>,
    item: Option<OpenItem>,
    items: Vec<ParsedItem>,
    capture: Option<Capture>,
}

impl DocumentBuilder {
    fn open(&mut self, name: &[u8]) {
        let depth = self.stack.len();

        if self.capture.is_none() {
            if let Some(open) = &self.item {
                if depth == open.depth + 1 {
                    self.capture = item_field(name).map(|field| Capture {
                        field,
                        depth,
                        text: String::new(),
                    });
                }
            } else if name == b"item" {
                self.item = Some(OpenItem {
                    fields: ItemFields::default(),
                    depth,
                });
            } else if name == b"channel" {
                self.saw_channel = true;
            } else if self.stack.last().map(Vec::as_slice) == Some(b"channel".as_slice()) {
                self.capture = channel_field(name).map(|field| Capture {
                    field,
                    depth,
                    text: String::new(),
                });
            }
        }

        self.stack.push(name.to_vec());
    }

    fn close(&mut self) {
        self.stack.pop();
        let depth = self.stack.len();

        match self.capture.take() {
            Some(capture) if capture.depth == depth => self.assign(capture),
            other => self.capture = other,
        }

        if self.item.as_ref().is_some_and(|open| open.depth == depth) {
            if let Some(open) = self.item.take() {
                self.items.push(open.fields.finish());
            }
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(capture) = &mut self.capture {
            capture.text.push_str(text);
        }
    }

    fn assign(&mut self, capture: Capture) {
        let value = capture.text.trim().to_string();
        let slot = match capture.field {
            Field::ChannelTitle => &mut self.title,
            Field::ChannelDescription => &mut self.description,
            Field::ChannelLink => &mut self.link,
            other => match &mut self.item {
                Some(open) => match other {
                    Field::ItemTitle => &mut open.fields.title,
                    Field::ItemLink => &mut open.fields.link,
                    Field::ItemDescription => &mut open.fields.description,
                    Field::ItemSummary => &mut open.fields.summary,
                    Field::ItemContent => &mut open.fields.content,
                    Field::ItemPubDate => &mut open.fields.pub_date,
                    Field::ItemPublished => &mut open.fields.published,
                    _ => &mut open.fields.guid,
                },
                None => return,
            },
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    fn finish(mut self, source_url: &str) -> Result<FeedDocument, ParseError> {
        // Truncated input that still reached EOF cleanly: keep what was read
        if let Some(capture) = self.capture.take() {
            self.assign(capture);
        }
        if let Some(open) = self.item.take() {
            self.items.push(open.fields.finish());
        }

        if !self.saw_channel {
            return Err(ParseError::MissingChannel);
        }

        let link = self
            .link
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| source_url.to_string());

        Ok(FeedDocument {
            title: self.title.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            link,
            items: self.items,
        })
    }
}

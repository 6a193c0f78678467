//! XMLTV guide parser
//! Streaming quick-xml reader that collects `<programme>` entries per channel.
//! A guide is optional data: a document that is not well-formed XML yields an
//! empty guide instead of an error.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::models::{Guide, Programme};
use crate::services::entities::decode_entities;

#[derive(Debug, Error)]
pub enum GuideError {
    #[error("malformed XMLTV document at byte {position}: {reason}")]
    MalformedDocument { position: u64, reason: String },
}

impl GuideError {
    fn malformed(position: u64, reason: impl Into<String>) -> Self {
        GuideError::MalformedDocument {
            position,
            reason: reason.into(),
        }
    }
}

/// Child element of a programme we are currently collecting text for
#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Title,
    Desc,
    Category,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"desc" => Some(Field::Desc),
            b"category" => Some(Field::Category),
            _ => None,
        }
    }
}

/// Programme under construction. `channel` is `None` for orphans, which are
/// read through but never stored.
#[derive(Debug, Default)]
struct PendingProgramme {
    channel: Option<String>,
    programme: Programme,
    seen_title: bool,
    seen_desc: bool,
    seen_category: bool,
}

impl PendingProgramme {
    fn from_element(e: &BytesStart<'_>) -> Self {
        let channel = get_attribute(e, b"channel").filter(|c| !c.is_empty());
        let programme = Programme {
            channel_id: channel.clone().unwrap_or_default(),
            start: get_attribute(e, b"start").unwrap_or_default(),
            stop: get_attribute(e, b"stop").unwrap_or_default(),
            ..Programme::default()
        };

        Self {
            channel,
            programme,
            ..Self::default()
        }
    }

    /// First occurrence of each child wins
    fn claim(&mut self, field: Field) -> bool {
        let seen = match field {
            Field::Title => &mut self.seen_title,
            Field::Desc => &mut self.seen_desc,
            Field::Category => &mut self.seen_category,
        };
        !std::mem::replace(seen, true)
    }

    fn set(&mut self, field: Field, text: &str) {
        let text = text.trim().to_string();
        match field {
            Field::Title => self.programme.title = text,
            Field::Desc => self.programme.description = text,
            Field::Category => self.programme.category = text,
        }
    }
}

fn get_attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| decode_entities(&String::from_utf8_lossy(&attr.value)).into_owned())
}

/// XMLTV parser
pub struct XmltvParser;

impl XmltvParser {
    /// Parse a guide, absorbing malformed documents into an empty guide
    pub fn parse(text: &str) -> Guide {
        match Self::try_parse(text) {
            Ok(guide) => {
                tracing::info!(
                    channels = guide.len(),
                    programmes = guide.values().map(Vec::len).sum::<usize>(),
                    "Guide parsed"
                );
                guide
            }
            Err(e) => {
                tracing::warn!("Discarding guide: {}", e);
                Guide::new()
            }
        }
    }

    /// Strict parse: reports documents that are not well-formed XML
    pub fn try_parse(text: &str) -> Result<Guide, GuideError> {
        let mut reader = Reader::from_str(text);

        let mut guide = Guide::new();
        // Element depth: root element is depth 1, programmes depth 2
        let mut depth = 0usize;
        let mut seen_root = false;
        let mut current: Option<PendingProgramme> = None;
        // Field being collected and the depth of its element
        let mut field: Option<(Field, usize)> = None;
        let mut text_buf = String::new();

        loop {
            let position = reader.buffer_position();
            let event = reader
                .read_event()
                .map_err(|e| GuideError::malformed(position, e.to_string()))?;

            match event {
                Event::Start(ref e) => {
                    if depth == 0 {
                        if seen_root {
                            return Err(GuideError::malformed(position, "multiple root elements"));
                        }
                        seen_root = true;
                    }
                    depth += 1;

                    let name = e.name();
                    if depth == 2 && name.as_ref() == b"programme" {
                        current = Some(PendingProgramme::from_element(e));
                    } else if depth == 3 && field.is_none() {
                        if let (Some(pending), Some(f)) = (current.as_mut(), Field::from_name(name.as_ref())) {
                            if pending.claim(f) {
                                field = Some((f, depth));
                                text_buf.clear();
                            }
                        }
                    }
                }
                Event::Empty(ref e) => {
                    if depth == 0 {
                        if seen_root {
                            return Err(GuideError::malformed(position, "multiple root elements"));
                        }
                        seen_root = true;
                    }

                    let name = e.name();
                    if depth == 1 && name.as_ref() == b"programme" {
                        // <programme .../> without children
                        let pending = PendingProgramme::from_element(e);
                        store(&mut guide, pending);
                    } else if depth == 2 {
                        // <title/> counts as present but empty
                        if let (Some(pending), Some(f)) = (current.as_mut(), Field::from_name(name.as_ref())) {
                            pending.claim(f);
                        }
                    }
                }
                Event::Text(ref e) => {
                    let raw = String::from_utf8_lossy(e);
                    if field.is_some() {
                        text_buf.push_str(&decode_entities(&raw));
                    } else if depth == 0 && !raw.trim().is_empty() {
                        return Err(GuideError::malformed(position, "text outside root element"));
                    }
                }
                Event::CData(ref e) => {
                    if field.is_some() {
                        text_buf.push_str(&String::from_utf8_lossy(e));
                    }
                }
                Event::GeneralRef(ref e) => {
                    if depth == 0 {
                        return Err(GuideError::malformed(position, "reference outside root element"));
                    }
                    if field.is_some() {
                        if let Ok(name) = e.decode() {
                            let reference = format!("&{};", name);
                            text_buf.push_str(&decode_entities(&reference));
                        }
                    }
                }
                Event::End(_) => {
                    if let Some((f, field_depth)) = field {
                        if field_depth == depth {
                            if let Some(pending) = current.as_mut() {
                                pending.set(f, &text_buf);
                            }
                            field = None;
                            text_buf.clear();
                        }
                    }
                    if depth == 2 {
                        if let Some(pending) = current.take() {
                            store(&mut guide, pending);
                        }
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if depth != 0 {
            return Err(GuideError::malformed(
                reader.buffer_position(),
                "unexpected end of document",
            ));
        }
        if !seen_root {
            return Err(GuideError::malformed(0, "no root element"));
        }

        // Stable: same start keeps document order
        for programmes in guide.values_mut() {
            programmes.sort_by(|a, b| a.start.cmp(&b.start));
        }

        Ok(guide)
    }
}

fn store(guide: &mut Guide, pending: PendingProgramme) {
    match pending.channel {
        Some(channel) => guide.entry(channel).or_default().push(pending.programme),
        None => tracing::debug!(title = %pending.programme.title, "Skipping programme without channel"),
    }
}

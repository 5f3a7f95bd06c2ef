//! PPTX slide extraction.
//!
//! Per slide: the title placeholder becomes its own chunk, all remaining
//! shape text is combined into one body chunk, and speaker notes (when the
//! notes part exists) become a third. Slides are ordered by their file
//! number, which matches presentation order for the decks we ingest.

use quick_xml::events::Event;

use crate::error::IngestError;
use crate::models::{Locator, SlidePart};

use super::{open_archive, read_zip_entry_bounded, ChunkDraft, Parsed};

const MAX_SLIDES: usize = 500;

pub fn parse(bytes: &[u8]) -> Result<Parsed, IngestError> {
    let mut archive = open_archive(bytes)?;

    let mut slide_files: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|n| {
            let num: u32 = n
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse()
                .ok()?;
            Some((num, n.to_string()))
        })
        .collect();
    slide_files.sort_by_key(|(num, _)| *num);

    if slide_files.is_empty() {
        return Err(IngestError::Parse(
            "presentation has no slides".to_string(),
        ));
    }

    let mut parsed = Parsed::default();

    for (number, file) in slide_files.into_iter().take(MAX_SLIDES) {
        let xml = read_zip_entry_bounded(&mut archive, &file)?;
        let shapes = read_shapes(&xml)?;

        let mut body_parts = Vec::new();
        for shape in shapes {
            if shape.text.is_empty() {
                continue;
            }
            if shape.is_title {
                parsed.chunks.push(ChunkDraft {
                    content: shape.text,
                    locator: Locator::Slide {
                        number,
                        part: SlidePart::Title,
                    },
                });
            } else {
                body_parts.push(shape.text);
            }
        }
        if !body_parts.is_empty() {
            parsed.chunks.push(ChunkDraft {
                content: body_parts.join("\n"),
                locator: Locator::Slide {
                    number,
                    part: SlidePart::Body,
                },
            });
        }

        let notes_file = format!("ppt/notesSlides/notesSlide{}.xml", number);
        if archive.by_name(&notes_file).is_ok() {
            let notes_xml = read_zip_entry_bounded(&mut archive, &notes_file)?;
            let notes = read_all_text(&notes_xml)?;
            if !notes.is_empty() {
                parsed.chunks.push(ChunkDraft {
                    content: notes,
                    locator: Locator::Slide {
                        number,
                        part: SlidePart::Notes,
                    },
                });
            }
        }
    }

    Ok(parsed)
}

struct Shape {
    is_title: bool,
    text: String,
}

/// Walk the slide's shape tree, capturing per-shape text and whether the
/// shape is the title placeholder (`p:ph type="title"` or `"ctrTitle"`).
fn read_shapes(xml: &[u8]) -> Result<Vec<Shape>, IngestError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut shapes = Vec::new();
    let mut in_shape = false;
    let mut is_title = false;
    let mut text = String::new();
    let mut in_t = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sp" => {
                    in_shape = true;
                    is_title = false;
                    text.clear();
                }
                b"t" if in_shape => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if in_shape && e.local_name().as_ref() == b"ph" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"type"
                            && matches!(attr.value.as_ref(), b"title" | b"ctrTitle")
                        {
                            is_title = true;
                        }
                    }
                }
            }
            Ok(Event::Text(te)) if in_t => {
                text.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                // a:p — paragraph break within the shape's text body.
                b"p" if in_shape && !text.is_empty() && !text.ends_with('\n') => {
                    text.push('\n');
                }
                b"sp" => {
                    shapes.push(Shape {
                        is_title,
                        text: text.trim().to_string(),
                    });
                    in_shape = false;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(IngestError::Parse(format!("slide XML: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(shapes)
}

/// All text runs in a part, paragraph breaks preserved. Used for notes.
fn read_all_text(xml: &[u8]) -> Result<String, IngestError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => {
                text.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" if !text.is_empty() && !text.ends_with('\n') => text.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(IngestError::Parse(format!("notes XML: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(text.trim().to_string())
}

//! Small quick-xml helpers shared by the template engine and the SOAP code.
//!
//! Nothing here builds a DOM; everything is a single forward pass over the
//! reader's events.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Checks that `xml` is a single well-formed element, optionally preceded by
/// a declaration, comments or processing instructions.
///
/// Returns a human readable reason on failure.
pub fn check_well_formed(xml: &str) -> Result<(), String> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut roots = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("at byte {}: {}", reader.buffer_position(), e))?;

        match event {
            Event::Start(ref e) => {
                check_attributes(e)?;
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Event::Empty(ref e) => {
                check_attributes(e)?;
                if depth == 0 {
                    roots += 1;
                }
            }
            Event::End(ref e) => {
                if depth == 0 {
                    return Err(format!(
                        "closing tag </{}> has no matching opening tag",
                        String::from_utf8_lossy(e.name().as_ref())
                    ));
                }
                depth -= 1;
            }
            Event::Text(ref text) => {
                if depth == 0 && !text.iter().all(u8::is_ascii_whitespace) {
                    return Err(String::from("text content outside of the root element"));
                }
                text.unescape().map_err(|e| e.to_string())?;
            }
            Event::CData(_) if depth == 0 => {
                return Err(String::from("CDATA outside of the root element"));
            }
            Event::Eof => break,
            _ => {}
        }

        if roots > 1 {
            return Err(String::from("more than one root element"));
        }
    }

    match (roots, depth) {
        (0, _) => Err(String::from("no root element")),
        (_, 0) => Ok(()),
        (_, open) => Err(format!("{} element(s) left unclosed", open)),
    }
}

fn check_attributes(element: &BytesStart) -> Result<(), String> {
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| e.to_string())?;
        attribute.unescape_value().map_err(|e| e.to_string())?;
    }

    Ok(())
}

/// Local (prefix-free) name of an element.
pub fn local_name(element: &BytesStart) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

/// Text of the first `name` element nested anywhere below an `ancestor`
/// element, matched by local name. Leading and trailing whitespace is trimmed.
///
/// Malformed input yields `None` rather than an error; callers use this for
/// best-effort metadata extraction.
pub fn element_text(xml: &str, ancestor: &str, name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut path: Vec<String> = Vec::new();
    let mut capture: Option<(usize, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let local = local_name(e);
                if capture.is_none() && local == name && path.iter().any(|p| p == ancestor) {
                    capture = Some((path.len(), String::new()));
                }
                path.push(local);
            }
            Ok(Event::Empty(ref e)) => {
                if capture.is_none() && local_name(e) == name && path.iter().any(|p| p == ancestor)
                {
                    return Some(String::new());
                }
            }
            Ok(Event::Text(ref text)) => {
                if let Some((_, buffer)) = capture.as_mut() {
                    buffer.push_str(&text.unescape().ok()?);
                }
            }
            Ok(Event::CData(ref data)) => {
                if let Some((_, buffer)) = capture.as_mut() {
                    buffer.push_str(&String::from_utf8_lossy(data.as_ref()));
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
                if let Some((depth, buffer)) = capture.as_ref() {
                    if path.len() == *depth {
                        return Some(buffer.trim().to_string());
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Whether an element with the given local name appears below `ancestor`.
pub fn contains_element(xml: &str, ancestor: &str, name: &str) -> bool {
    let mut reader = Reader::from_str(xml);
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let local = local_name(e);
                if local == name && path.iter().any(|p| p == ancestor) {
                    return true;
                }
                path.push(local);
            }
            Ok(Event::Empty(ref e)) => {
                if local_name(e) == name && path.iter().any(|p| p == ancestor) {
                    return true;
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Eof) | Err(_) => return false,
            _ => {}
        }
    }
}

/// Escapes the five predefined XML entities.
pub fn escape(text: &str) -> String {
    quick_xml::escape::escape(text).into_owned()
}

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use crate::error::EngineError;

/// Decode common HTML entities in a string
/// Handles: &amp; &lt; &gt; &quot; &apos; &#NNN; (decimal) &#xHHH; (hex)
fn decode_html_entities(s: &str) -> String {
    let mut result = s.to_string();

    // Named entities
    result = result.replace("&amp;", "&");
    result = result.replace("&lt;", "<");
    result = result.replace("&gt;", ">");
    result = result.replace("&quot;", "\"");
    result = result.replace("&apos;", "'");
    result = result.replace("&nbsp;", " ");

    // Numeric entities (decimal): &#NNN;
    let decimal_re = Regex::new(r"&#(\d+);").unwrap();
    result = decimal_re
        .replace_all(&result, |caps: &regex::Captures| {
            if let Ok(code) = caps[1].parse::<u32>() {
                if let Some(c) = char::from_u32(code) {
                    return c.to_string();
                }
            }
            caps[0].to_string()
        })
        .to_string();

    // Numeric entities (hex): &#xHHH;
    let hex_re = Regex::new(r"&#x([0-9A-Fa-f]+);").unwrap();
    result = hex_re
        .replace_all(&result, |caps: &regex::Captures| {
            if let Ok(code) = u32::from_str_radix(&caps[1], 16) {
                if let Some(c) = char::from_u32(code) {
                    return c.to_string();
                }
            }
            caps[0].to_string()
        })
        .to_string();

    result
}

/// One node of the accessibility snapshot, flattened. Elements are derived
/// per match operation and never persisted.
#[derive(Debug, Clone, Default)]
pub struct UiElement {
    pub class: String,
    pub text: String,
    pub resource_id: String,
    pub content_desc: String,
    pub bounds: Bounds,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    /// Tap target: the rounded midpoint of each axis.
    pub fn center(&self) -> (i32, i32) {
        let x = ((self.left + self.right) as f64 / 2.0).round() as i32;
        let y = ((self.top + self.bottom) as f64 / 2.0).round() as i32;
        (x, y)
    }

    /// Parse a bounds attribute like "[0,0][1080,1920]". Any other shape is
    /// a snapshot format error.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        let parts: Vec<&str> = s.split("][").collect();
        if parts.len() != 2 {
            return Err(malformed_bounds(s));
        }

        let left_top = parts[0].trim_start_matches('[');
        let right_bottom = parts[1].trim_end_matches(']');

        let lt: Vec<i32> = left_top.split(',').filter_map(|v| v.trim().parse().ok()).collect();
        let rb: Vec<i32> = right_bottom
            .split(',')
            .filter_map(|v| v.trim().parse().ok())
            .collect();

        if lt.len() == 2 && rb.len() == 2 {
            Ok(Bounds {
                left: lt[0],
                top: lt[1],
                right: rb[0],
                bottom: rb[1],
            })
        } else {
            Err(malformed_bounds(s))
        }
    }
}

fn malformed_bounds(s: &str) -> EngineError {
    EngineError::MalformedSnapshot(format!("bad bounds attribute '{s}'"))
}

/// Parse UI hierarchy XML from a uiautomator dump into a flat element list.
///
/// Only nodes carrying a bounds rectangle become elements. The event stream
/// visits nodes in pre-order, which preserves document order; first-match
/// semantics depend on it.
pub fn parse_hierarchy(xml: &str) -> Result<Vec<UiElement>, EngineError> {
    let mut elements = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                if e.name().as_ref() == b"node" {
                    let mut element = UiElement::default();
                    let mut bounds_attr = None;

                    for attr in e.attributes().filter_map(|a| a.ok()) {
                        let key = String::from_utf8_lossy(attr.key.as_ref());
                        let value = String::from_utf8_lossy(&attr.value);

                        match key.as_ref() {
                            "class" => element.class = value.to_string(),
                            "text" => element.text = decode_html_entities(&value),
                            "resource-id" => element.resource_id = value.to_string(),
                            "content-desc" => element.content_desc = decode_html_entities(&value),
                            "bounds" => bounds_attr = Some(value.to_string()),
                            _ => {}
                        }
                    }

                    if let Some(raw) = bounds_attr {
                        element.bounds = Bounds::parse(&raw)?;
                        elements.push(element);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(EngineError::MalformedSnapshot(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(elements)
}

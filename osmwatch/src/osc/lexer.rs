//! Streaming tokenizer for the change-stream markup.
//!
//! The replication feed and the node-lookup endpoint both speak a small,
//! fixed XML dialect. This lexer walks the document once and yields flat
//! start/end events for the handful of element names the parser recognizes;
//! everything else (document roots, `bounds`, processing instructions,
//! comments, text content) is skipped. It makes no attempt to be a general
//! XML parser.

use super::types::{Element, ElementKind, OscEvent};
use super::OscError;

/// Raw markup tag: element name plus its attribute list, entity-unescaped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTag {
    name: String,
    attributes: Vec<(String, String)>,
}

impl RawTag {
    /// The element name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up an attribute value by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Looks up an attribute that must be present.
    pub fn required(&self, name: &str) -> Result<&str, OscError> {
        self.attr(name).ok_or_else(|| OscError::MissingAttribute {
            element: self.name.clone(),
            attribute: name.to_string(),
        })
    }
}

/// Iterator over the structural events of a change document.
///
/// Finite and restartable: construct a fresh reader per input. Yields
/// `Err` once on malformed markup, after which iteration ends.
pub struct EventReader<'a> {
    input: &'a str,
    pos: usize,
    /// Self-closing tags produce a deferred end event.
    pending_end: Option<ElementKind>,
    failed: bool,
}

impl<'a> EventReader<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            pending_end: None,
            failed: false,
        }
    }

    fn malformed(&self, message: &str) -> OscError {
        OscError::Malformed {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    /// Advances to the next `<` and returns the tag body between the angle
    /// brackets, or `None` at end of input.
    fn next_tag_body(&mut self) -> Result<Option<&'a str>, OscError> {
        let rest = &self.input[self.pos..];
        let open = match rest.find('<') {
            Some(i) => self.pos + i,
            None => {
                self.pos = self.input.len();
                return Ok(None);
            }
        };

        // Comments may contain '>' and must be skipped as a unit.
        if self.input[open..].starts_with("<!--") {
            match self.input[open..].find("-->") {
                Some(end) => {
                    self.pos = open + end + 3;
                    return self.next_tag_body();
                }
                None => return Err(self.malformed("unterminated comment")),
            }
        }

        // Scan for the closing '>' outside quoted attribute values.
        let bytes = self.input.as_bytes();
        let mut i = open + 1;
        let mut quote: Option<u8> = None;
        while i < bytes.len() {
            let c = bytes[i];
            match quote {
                Some(q) => {
                    if c == q {
                        quote = None;
                    }
                }
                None => match c {
                    b'"' | b'\'' => quote = Some(c),
                    b'>' => {
                        let body = &self.input[open + 1..i];
                        self.pos = i + 1;
                        return Ok(Some(body));
                    }
                    _ => {}
                },
            }
            i += 1;
        }
        self.pos = open;
        Err(self.malformed("unterminated tag"))
    }

    fn parse_tag(&self, body: &str) -> Result<ParsedTag, OscError> {
        // Processing instructions and doctypes carry no structure we need.
        if body.starts_with('?') || body.starts_with('!') {
            return Ok(ParsedTag::Skip);
        }

        if let Some(name) = body.strip_prefix('/') {
            return Ok(ParsedTag::End(name.trim().to_string()));
        }

        let (body, self_closing) = match body.strip_suffix('/') {
            Some(stripped) => (stripped, true),
            None => (body, false),
        };

        let body = body.trim();
        let name_end = body
            .find(|c: char| c.is_whitespace())
            .unwrap_or(body.len());
        let name = &body[..name_end];
        if name.is_empty() {
            return Err(self.malformed("empty tag name"));
        }

        let attributes = parse_attributes(&body[name_end..])
            .map_err(|message| self.malformed(&message))?;

        Ok(ParsedTag::Start(
            RawTag {
                name: name.to_string(),
                attributes,
            },
            self_closing,
        ))
    }
}

enum ParsedTag {
    Start(RawTag, bool),
    End(String),
    Skip,
}

impl Iterator for EventReader<'_> {
    type Item = Result<OscEvent, OscError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(kind) = self.pending_end.take() {
            return Some(Ok(OscEvent::End(kind)));
        }

        loop {
            let body = match self.next_tag_body() {
                Ok(Some(body)) => body,
                Ok(None) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            };

            match self.parse_tag(body) {
                Ok(ParsedTag::Start(tag, self_closing)) => {
                    match Element::classify(&tag) {
                        Ok(Some(element)) => {
                            if self_closing {
                                self.pending_end = Element::kind_name(tag.name());
                            }
                            return Some(Ok(OscEvent::Start(element)));
                        }
                        // Unknown element: skip it and its end tag.
                        Ok(None) => continue,
                        Err(e) => {
                            self.failed = true;
                            return Some(Err(e));
                        }
                    }
                }
                Ok(ParsedTag::End(name)) => match Element::kind_name(&name) {
                    Some(kind) => return Some(Ok(OscEvent::End(kind))),
                    None => continue,
                },
                Ok(ParsedTag::Skip) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Parses `name="value"` pairs, unescaping the five predefined entities.
fn parse_attributes(mut input: &str) -> Result<Vec<(String, String)>, String> {
    let mut attributes = Vec::new();

    loop {
        input = input.trim_start();
        if input.is_empty() {
            return Ok(attributes);
        }

        let eq = input
            .find('=')
            .ok_or_else(|| format!("attribute without '=': {input:?}"))?;
        let name = input[..eq].trim().to_string();
        if name.is_empty() {
            return Err("attribute with empty name".to_string());
        }

        let rest = input[eq + 1..].trim_start();
        let quote = rest
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(|| format!("unquoted attribute value for '{name}'"))?;
        let rest = &rest[1..];
        let close = rest
            .find(quote)
            .ok_or_else(|| format!("unterminated attribute value for '{name}'"))?;

        attributes.push((name, unescape_entities(&rest[..close])));
        input = &rest[close + 1..];
    }
}

/// Replaces the predefined XML entities with their literal characters.
fn unescape_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let replaced = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ]
        .iter()
        .find(|(entity, _)| tail.starts_with(entity));

        match replaced {
            Some((entity, ch)) => {
                out.push(*ch);
                rest = &tail[entity.len()..];
            }
            None => {
                // Unknown entity: keep the ampersand literally.
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

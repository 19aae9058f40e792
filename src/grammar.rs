//! Grammar documents and early-match detection
//!
//! A grammar is a `<grammar>` document whose `<rule id="...">` children
//! list phrase fragments. Partial transcripts are checked against the
//! fragments so recognition can complete before the caller stops talking.

use crate::error::{RecogError, RecogResult};
use lazy_static::lazy_static;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use tracing::{debug, warn};

/// Largest grammar document accepted, in bytes
pub const MAX_GRAMMAR_LEN: usize = 4096;

lazy_static! {
    static ref GRAMMAR_SPAN: Regex =
        Regex::new(r"(?s)<grammar.*</grammar>").expect("grammar span pattern is valid");
}

/// Minimal element tree produced from a grammar document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    /// Character data directly inside this element
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn element_from(start: &BytesStart<'_>) -> RecogResult<XmlElement> {
    let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| RecogError::Grammar(format!("bad attribute: {}", e)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| RecogError::Grammar(format!("bad attribute value: {}", e)))?
            .to_string();
        attrs.push((key, value));
    }
    Ok(XmlElement {
        name,
        attrs,
        ..Default::default()
    })
}

/// Parse an XML document into its root element
pub fn parse_document(xml: &str) -> RecogResult<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                stack.push(element_from(e)?);
            }
            Ok(Event::Empty(ref e)) => {
                let element = element_from(e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| RecogError::Grammar("unbalanced end tag".to_string()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Ok(Event::Text(ref t)) => {
                if let Some(current) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| RecogError::Grammar(format!("bad text: {}", e)))?;
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(ref c)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(c));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RecogError::Grammar(format!("XML parse error: {}", e)));
            }
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(RecogError::Grammar("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| RecogError::Grammar("empty document".to_string()))
}

/// One rule of a grammar with its compiled fragments
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    patterns: Vec<Regex>,
}

impl Rule {
    pub fn fragment_count(&self) -> usize {
        self.patterns.len()
    }

    fn matches(&self, transcript: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(transcript))
    }
}

/// Immutable rule set, parsed once per DEFINE-GRAMMAR
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    rules: Vec<Rule>,
}

/// Anchor a fragment at the start of the transcript, ending on a word boundary
///
/// The fragment must be a complete pattern on its own, so unbalanced
/// groups cannot escape the anchoring wrapper.
fn fragment_pattern(fragment: &str) -> Result<Regex, regex::Error> {
    Regex::new(fragment)?;
    Regex::new(&format!(r"(?i)^(?:{})(?:\s|$)", fragment))
}

impl Grammar {
    /// Parse a DEFINE-GRAMMAR body
    pub fn parse(body: &str) -> RecogResult<Self> {
        let span = GRAMMAR_SPAN
            .find(body)
            .ok_or_else(|| RecogError::Grammar("no <grammar> element in body".to_string()))?;

        if span.as_str().len() >= MAX_GRAMMAR_LEN {
            return Err(RecogError::Grammar(format!(
                "grammar of {} bytes exceeds the {} byte limit",
                span.as_str().len(),
                MAX_GRAMMAR_LEN
            )));
        }

        let root = parse_document(span.as_str())?;
        Self::from_document(&root)
    }

    /// Build the rule set from a parsed document
    pub fn from_document(root: &XmlElement) -> RecogResult<Self> {
        if !root.name.eq_ignore_ascii_case("grammar") {
            warn!("Unknown Document <{}>", root.name);
            return Err(RecogError::Grammar(format!(
                "unknown document root <{}>",
                root.name
            )));
        }
        debug!("Document <{}>", root.name);

        let mut rules = Vec::new();
        for elem in root
            .children
            .iter()
            .filter(|e| e.name.eq_ignore_ascii_case("rule"))
        {
            let Some(id) = elem.attr("id") else {
                debug!("Skipping rule without id");
                continue;
            };

            let mut patterns = Vec::new();
            for child in &elem.children {
                let fragment = child.text.trim();
                if fragment.is_empty() {
                    continue;
                }
                match fragment_pattern(fragment) {
                    Ok(p) => patterns.push(p),
                    Err(e) => warn!("Skipping fragment '{}' of rule '{}': {}", fragment, id, e),
                }
            }

            if patterns.is_empty() {
                debug!("Rule '{}' has no usable fragments", id);
            }
            rules.push(Rule {
                id: id.to_string(),
                patterns,
            });
        }

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First rule, in document order, with a fragment matching the transcript
    pub fn early_match(&self, transcript: &str) -> Option<&str> {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return None;
        }

        self.rules
            .iter()
            .find(|rule| rule.matches(transcript))
            .map(|rule| {
                debug!("Match id <{}> result <{}>", rule.id, transcript);
                rule.id.as_str()
            })
    }
}

//! HTML event stream for the card scanner.
//!
//! Markup goes through html5ever's tokenizer and comes out as a flat list of
//! open-tag, close-tag and text events. No tree is built, so unclosed or
//! misnested elements reach the scanner as written. Comments and doctype
//! declarations are skipped and `script`/`style` bodies are dropped. The
//! tokenizer lowercases names and decodes character references, legacy
//! semicolon-less ones included.

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtmlEvent {
    Open(OpenTag),
    Close(String),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenTag {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub self_closing: bool,
}

impl OpenTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs
            .push((name.into().to_ascii_lowercase(), value.into()));
        self
    }

    /// First value of the named attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// First of `names` present with a non-blank value.
    pub fn first_attr<'a, I>(&self, names: I) -> Option<&str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        names
            .into_iter()
            .filter_map(|name| self.attr(name))
            .map(str::trim)
            .find(|value| !value.is_empty())
    }

    /// Case-insensitive substring match against the `class` attribute.
    pub fn class_contains(&self, fragment: &str) -> bool {
        !fragment.is_empty()
            && self.attr("class").is_some_and(|class| {
                class
                    .to_lowercase()
                    .contains(&fragment.to_lowercase())
            })
    }

    /// Elements that never get a matching close tag.
    pub fn is_void(&self) -> bool {
        self.self_closing || VOID_ELEMENTS.contains(&self.name.as_str())
    }
}

impl From<Tag> for OpenTag {
    fn from(tag: Tag) -> Self {
        Self {
            name: tag.name.to_string(),
            attrs: tag
                .attrs
                .into_iter()
                .map(|attr| (attr.name.local.to_string(), attr.value.to_string()))
                .collect(),
            self_closing: tag.self_closing,
        }
    }
}

/// Tokenizes `html` into events.
pub fn tokenize(html: &str) -> std::vec::IntoIter<HtmlEvent> {
    let mut input = BufferQueue::new();
    input.push_back(StrTendril::from_slice(html));

    let mut tokenizer = Tokenizer::new(EventCollector::default(), TokenizerOpts::default());
    let _ = tokenizer.feed(&mut input);
    tokenizer.end();
    tokenizer.sink.events.into_iter()
}

/// Token sink that turns tokenizer output into [`HtmlEvent`]s.
#[derive(Default)]
struct EventCollector {
    events: Vec<HtmlEvent>,
    /// Character tokens not yet emitted; the tokenizer splits text runs at
    /// newlines and references.
    text: String,
    /// Inside `script`/`style`: character data is discarded.
    in_raw_text: bool,
}

impl EventCollector {
    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            let text = std::mem::take(&mut self.text);
            if !self.in_raw_text {
                self.events.push(HtmlEvent::Text(text));
            }
        }
    }
}

impl TokenSink for EventCollector {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        match token {
            Token::CharacterTokens(chars) => self.text.push_str(&chars),
            Token::TagToken(tag) => {
                self.flush_text();
                match tag.kind {
                    TagKind::StartTag => {
                        let raw = match &*tag.name {
                            "script" if !tag.self_closing => Some(RawKind::ScriptData),
                            "style" if !tag.self_closing => Some(RawKind::Rawtext),
                            _ => None,
                        };
                        self.events.push(HtmlEvent::Open(OpenTag::from(tag)));
                        if let Some(kind) = raw {
                            self.in_raw_text = true;
                            return TokenSinkResult::RawData(kind);
                        }
                    }
                    TagKind::EndTag => {
                        self.in_raw_text = false;
                        self.events.push(HtmlEvent::Close(tag.name.to_string()));
                    }
                }
            }
            Token::CommentToken(_) | Token::DoctypeToken(_) | Token::EOFToken => self.flush_text(),
            Token::NullCharacterToken | Token::ParseError(_) => {}
        }
        TokenSinkResult::Continue
    }
}

//! Header cards and keyword values.
//!
//! A FITS header is a sequence of 80-byte ASCII cards terminated by `END` and
//! padded with blanks to a multiple of 2880 bytes. [`Header`] keeps the cards
//! in order and indexes them by keyword name for lookup.

use crate::{FitsError, Result};
use std::collections::HashMap;
use std::fmt;

pub const CARD_SIZE: usize = 80;
pub const BLOCK_SIZE: usize = 2880;

#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub name: String,
    pub value: Option<KeywordValue>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeywordValue {
    Logical(bool),
    Integer(i64),
    Real(f64),
    String(String),
}

impl Keyword {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            value: None,
            comment: None,
        }
    }

    pub fn with_comment<S: Into<String>>(mut self, comment: S) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn logical<S: Into<String>>(name: S, value: bool) -> Self {
        Self {
            name: name.into(),
            value: Some(KeywordValue::Logical(value)),
            comment: None,
        }
    }

    pub fn integer<S: Into<String>>(name: S, value: i64) -> Self {
        Self {
            name: name.into(),
            value: Some(KeywordValue::Integer(value)),
            comment: None,
        }
    }

    pub fn real<S: Into<String>>(name: S, value: f64) -> Self {
        Self {
            name: name.into(),
            value: Some(KeywordValue::Real(value)),
            comment: None,
        }
    }

    pub fn string<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: Some(KeywordValue::String(value.into())),
            comment: None,
        }
    }

    /// Create a COMMENT keyword (no value, just text in comment position).
    pub fn comment<S: Into<String>>(text: S) -> Self {
        Self {
            name: "COMMENT".to_string(),
            value: None,
            comment: Some(text.into()),
        }
    }

    /// Render the keyword as a single 80-byte card.
    ///
    /// Text longer than the card is truncated. Non-string values are right
    /// justified in columns 11-30 (fixed format); strings start at column 11.
    pub fn to_card(&self) -> [u8; CARD_SIZE] {
        let mut card = [b' '; CARD_SIZE];

        let name_bytes = self.name.as_bytes();
        let name_len = name_bytes.len().min(8);
        card[0..name_len].copy_from_slice(&name_bytes[0..name_len]);

        let Some(value) = &self.value else {
            if let Some(text) = &self.comment {
                let text_bytes = text.as_bytes();
                let text_len = text_bytes.len().min(CARD_SIZE - 8);
                card[8..8 + text_len].copy_from_slice(&text_bytes[0..text_len]);
            }
            return card;
        };

        card[8] = b'=';
        card[9] = b' ';

        let mut field = format_value(value);
        if let Some(comment) = &self.comment {
            field.push_str(" / ");
            field.push_str(comment);
        }

        let field_bytes = field.as_bytes();
        let field_len = field_bytes.len().min(CARD_SIZE - 10);
        card[10..10 + field_len].copy_from_slice(&field_bytes[0..field_len]);
        card
    }

    /// Parse one 80-byte card. Returns `None` for the `END` card.
    pub fn from_card(card: &[u8]) -> Result<Option<Self>> {
        if card.len() != CARD_SIZE {
            return Err(FitsError::HeaderParse(format!(
                "Card has {} bytes, expected {}",
                card.len(),
                CARD_SIZE
            )));
        }
        if !card.is_ascii() {
            return Err(FitsError::HeaderParse(
                "Non-ASCII byte in header card".to_string(),
            ));
        }

        // ASCII only past this point.
        let text = std::str::from_utf8(card)
            .map_err(|_| FitsError::InvalidFormat("Invalid UTF-8 in header card".to_string()))?;
        let name = text[0..8].trim_end().to_string();

        if name == "END" {
            return Ok(None);
        }

        let mut keyword = Keyword::new(name);
        if &text[8..10] == "= " {
            let (value, comment) = parse_value_field(&text[10..])?;
            keyword.value = value;
            keyword.comment = comment;
        } else {
            let rest = text[8..].trim();
            if !rest.is_empty() {
                keyword.comment = Some(rest.to_string());
            }
        }

        Ok(Some(keyword))
    }
}

fn format_value(value: &KeywordValue) -> String {
    match value {
        KeywordValue::Logical(b) => format!("{:>20}", if *b { "T" } else { "F" }),
        KeywordValue::Integer(i) => format!("{:>20}", i),
        KeywordValue::Real(f) => format!("{:>20}", format_real(*f)),
        KeywordValue::String(s) => format!("'{:<8}'", s.replace('\'', "''")),
    }
}

fn format_real(value: f64) -> String {
    let plain = format!("{:?}", value);
    if plain.len() <= 20 && !plain.contains('e') {
        plain
    } else {
        format!("{:.12E}", value)
    }
}

fn parse_value_field(field: &str) -> Result<(Option<KeywordValue>, Option<String>)> {
    let trimmed = field.trim_start();

    if let Some(quoted) = trimmed.strip_prefix('\'') {
        let (content, rest) = split_quoted(quoted)?;
        let comment = rest
            .find('/')
            .map(|pos| rest[pos + 1..].trim().to_string())
            .filter(|c| !c.is_empty());
        return Ok((Some(KeywordValue::String(content)), comment));
    }

    let (value_part, comment) = match trimmed.find('/') {
        Some(pos) => (
            &trimmed[..pos],
            Some(trimmed[pos + 1..].trim().to_string()).filter(|c| !c.is_empty()),
        ),
        None => (trimmed, None),
    };

    let value_part = value_part.trim();
    if value_part.is_empty() {
        return Ok((None, comment));
    }

    Ok((Some(parse_scalar(value_part)), comment))
}

/// Split a quoted string (opening quote already removed) into its content and
/// whatever follows the closing quote. Doubled quotes are an escaped quote.
fn split_quoted(quoted: &str) -> Result<(String, &str)> {
    let bytes = quoted.as_bytes();
    let mut content = String::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                content.push('\'');
                i += 2;
                continue;
            }
            return Ok((content.trim_end().to_string(), &quoted[i + 1..]));
        }
        content.push(bytes[i] as char);
        i += 1;
    }

    Err(FitsError::HeaderParse(format!(
        "Unterminated string value: '{}",
        quoted.trim_end()
    )))
}

fn parse_scalar(token: &str) -> KeywordValue {
    match token {
        "T" => return KeywordValue::Logical(true),
        "F" => return KeywordValue::Logical(false),
        _ => {}
    }

    if let Ok(int_val) = token.parse::<i64>() {
        return KeywordValue::Integer(int_val);
    }

    // Fortran-style double exponents ("1.0D+03") are legal in FITS.
    if let Ok(float_val) = token.replace(['D', 'd'], "E").parse::<f64>() {
        return KeywordValue::Real(float_val);
    }

    KeywordValue::String(token.to_string())
}

impl KeywordValue {
    pub fn as_logical(&self) -> Option<bool> {
        match self {
            Self::Logical(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for KeywordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logical(b) => write!(f, "{}", if *b { "T" } else { "F" }),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Real(r) => write!(f, "{}", r),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for KeywordValue {
    fn from(value: bool) -> Self {
        Self::Logical(value)
    }
}

impl From<i64> for KeywordValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for KeywordValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<String> for KeywordValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for KeywordValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Ordered list of header keywords with a name index.
#[derive(Debug, Clone, Default)]
pub struct Header {
    keywords: Vec<Keyword>,
    keyword_index: HashMap<String, usize>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a keyword. Lookups by name return the last keyword added
    /// under that name.
    pub fn add_keyword(&mut self, keyword: Keyword) {
        let index = self.keywords.len();
        self.keyword_index.insert(keyword.name.clone(), index);
        self.keywords.push(keyword);
    }

    pub fn get_keyword(&self, name: &str) -> Option<&Keyword> {
        self.keyword_index
            .get(name)
            .and_then(|&index| self.keywords.get(index))
    }

    pub fn get_keyword_value(&self, name: &str) -> Option<&KeywordValue> {
        self.get_keyword(name)?.value.as_ref()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.keyword_index.contains_key(name)
    }

    pub fn keywords(&self) -> &[Keyword] {
        &self.keywords
    }

    pub fn iter(&self) -> impl Iterator<Item = &Keyword> {
        self.keywords.iter()
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Integer value of a mandatory keyword.
    pub fn required_integer(&self, name: &str) -> Result<i64> {
        self.get_keyword_value(name)
            .and_then(|v| v.as_integer())
            .ok_or_else(|| FitsError::KeywordNotFound {
                keyword: name.to_string(),
            })
    }

    /// Non-negative integer value of a mandatory keyword, as a size.
    pub fn required_count(&self, name: &str) -> Result<usize> {
        let value = self.required_integer(name)?;
        usize::try_from(value)
            .map_err(|_| FitsError::InvalidFormat(format!("{} = {} is not a valid size", name, value)))
    }

    pub fn string_value(&self, name: &str) -> Option<&str> {
        self.get_keyword_value(name).and_then(|v| v.as_string())
    }

    pub fn real_value(&self, name: &str) -> Option<f64> {
        self.get_keyword_value(name).and_then(|v| v.as_real())
    }

    pub fn is_primary(&self) -> bool {
        self.get_keyword_value("SIMPLE")
            .and_then(|v| v.as_logical())
            .unwrap_or(false)
    }

    pub fn extname(&self) -> Option<&str> {
        self.string_value("EXTNAME")
    }

    /// Serialize all cards plus `END`, padded with blanks to whole blocks.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header_bytes = Vec::with_capacity((self.keywords.len() + 1) * CARD_SIZE);

        for keyword in &self.keywords {
            header_bytes.extend_from_slice(&keyword.to_card());
        }
        header_bytes.extend_from_slice(&Keyword::new("END").to_card());

        let padding_needed = BLOCK_SIZE - (header_bytes.len() % BLOCK_SIZE);
        if padding_needed < BLOCK_SIZE {
            header_bytes.resize(header_bytes.len() + padding_needed, b' ');
        }
        header_bytes
    }

    /// Parse a header starting at the beginning of `bytes`.
    ///
    /// Returns the header and the number of bytes it occupies, which is always
    /// a whole number of blocks.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut header = Header::new();
        let mut offset = 0;

        loop {
            if offset + CARD_SIZE > bytes.len() {
                return Err(FitsError::UnexpectedEof);
            }

            match Keyword::from_card(&bytes[offset..offset + CARD_SIZE])? {
                Some(keyword) => header.add_keyword(keyword),
                None => break,
            }
            offset += CARD_SIZE;
        }

        let used = offset + CARD_SIZE;
        let consumed = used.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        Ok((header, consumed))
    }
}

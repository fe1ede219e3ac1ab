//! NDEF messages and the well-known Text record.

use winnow::{
    ModalResult, Parser,
    binary::{
        be_u32, be_u8,
        bits::{bits, bool as take_bool, take as take_bits},
    },
    error::{ContextError, ErrMode},
    token::{rest, take},
};

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;

const TEXT_UTF16: u8 = 0x80;
const TEXT_LANGUAGE_MASK: u8 = 0x3F;

/// Record type of the well-known Text RTD.
pub const TEXT_TYPE: &[u8] = b"T";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Malformed NDEF message: {0}")]
    Malformed(String),

    #[error("NDEF message contains no Text record")]
    NoTextRecord,

    #[error("Language code is too long: {0} octets")]
    LanguageTooLong(usize),

    #[error("Text is not valid {0:?}")]
    InvalidText(TextEncoding),

    #[error("Record {field} of {len} octets does not fit its length octet")]
    FieldTooLong { field: &'static str, len: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TypeNameFormat {
    Empty,
    WellKnown,
    Mime,
    AbsoluteUri,
    External,
    Unknown,
    Unchanged,
    Reserved,
}

impl TypeNameFormat {
    fn from_bits(bits: u8) -> Self {
        use TypeNameFormat::*;

        match bits & 0x07 {
            0 => Empty,
            1 => WellKnown,
            2 => Mime,
            3 => AbsoluteUri,
            4 => External,
            5 => Unknown,
            6 => Unchanged,
            _ => Reserved,
        }
    }

    fn to_bits(self) -> u8 {
        use TypeNameFormat::*;

        match self {
            Empty => 0,
            WellKnown => 1,
            Mime => 2,
            AbsoluteUri => 3,
            External => 4,
            Unknown => 5,
            Unchanged => 6,
            Reserved => 7,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Header {
    pub message_begin: bool,
    pub message_end: bool,
    pub chunked: bool,
    pub short_record: bool,
    pub has_id_length: bool,
    pub type_name_format: TypeNameFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: Header,
    pub type_: Vec<u8>,
    pub id: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl Record {
    /// A single-record message carrying a well-known Text record.
    pub fn text(text: &TextRecord) -> Result<Self> {
        let payload = text.to_payload()?;

        Ok(Self {
            header: Header {
                message_begin: true,
                message_end: true,
                chunked: false,
                short_record: payload.len() <= u8::MAX as usize,
                has_id_length: false,
                type_name_format: TypeNameFormat::WellKnown,
            },
            type_: TEXT_TYPE.to_vec(),
            id: None,
            payload,
        })
    }

    pub fn is_text(&self) -> bool {
        self.header.type_name_format == TypeNameFormat::WellKnown && self.type_ == TEXT_TYPE
    }

    /// Encodes the record. Type and ID are limited to 255 octets each.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let type_length = length_octet("type", self.type_.len())?;
        let id_length = match &self.id {
            Some(id) => Some(length_octet("id", id.len())?),
            None => None,
        };

        let Header {
            message_begin,
            message_end,
            chunked,
            short_record,
            type_name_format,
            ..
        } = self.header;
        let short_record = short_record && self.payload.len() <= u8::MAX as usize;

        let mut flags = type_name_format.to_bits();
        for (set, flag) in [
            (message_begin, FLAG_MB),
            (message_end, FLAG_ME),
            (chunked, FLAG_CF),
            (short_record, FLAG_SR),
            (self.id.is_some(), FLAG_IL),
        ] {
            if set {
                flags |= flag;
            }
        }

        let mut buf = vec![flags, type_length];
        if short_record {
            buf.push(self.payload.len() as u8);
        } else {
            buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        }

        if let Some(id_length) = id_length {
            buf.push(id_length);
        }

        buf.extend_from_slice(&self.type_);
        if let Some(id) = &self.id {
            buf.extend_from_slice(id);
        }
        buf.extend_from_slice(&self.payload);

        Ok(buf)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRecord {
    pub encoding: TextEncoding,
    pub language: String,
    pub text: String,
}

impl TextRecord {
    pub fn new(language: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            encoding: TextEncoding::Utf8,
            language: language.into(),
            text: text.into(),
        }
    }

    /// Encodes the record payload: status octet, language code, then the text.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let language = self.language.as_bytes();
        if language.len() > TEXT_LANGUAGE_MASK as usize {
            return Err(Error::LanguageTooLong(language.len()));
        }

        let mut status = language.len() as u8;
        let text = match self.encoding {
            TextEncoding::Utf8 => self.text.as_bytes().to_vec(),
            TextEncoding::Utf16 => {
                status |= TEXT_UTF16;
                self.text
                    .encode_utf16()
                    .flat_map(|unit| unit.to_be_bytes())
                    .collect()
            }
        };

        let mut payload = Vec::with_capacity(1 + language.len() + text.len());
        payload.push(status);
        payload.extend_from_slice(language);
        payload.extend_from_slice(&text);

        Ok(payload)
    }

    /// Decodes a Text record payload, stripping the status octet and the language code.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let mut input = payload;
        let (status, language, text) = parse_text_payload
            .parse_next(&mut input)
            .map_err(|e| Error::Malformed(format!("{e:?}")))?;

        let (encoding, text) = match status & TEXT_UTF16 {
            0 => (
                TextEncoding::Utf8,
                String::from_utf8(text)
                    .map_err(|_| Error::InvalidText(TextEncoding::Utf8))?,
            ),
            _ => (TextEncoding::Utf16, decode_utf16(&text)?),
        };

        Ok(Self {
            encoding,
            language: String::from_utf8_lossy(&language).to_string(),
            text,
        })
    }
}

impl TryFrom<&Record> for TextRecord {
    type Error = Error;

    fn try_from(record: &Record) -> Result<Self> {
        match record.is_text() {
            true => Self::from_payload(&record.payload),
            _ => Err(Error::NoTextRecord),
        }
    }
}

/// Encodes a message holding the Text record alone.
pub fn encode_text_message(text: &TextRecord) -> Result<Vec<u8>> {
    Record::text(text)?.to_bytes()
}

/// Parses records until the one flagged Message End.
pub fn parse_message(bytes: &[u8]) -> Result<Vec<Record>> {
    let mut input = bytes;
    let mut records = Vec::new();

    loop {
        let record = parse_record
            .parse_next(&mut input)
            .map_err(|e| Error::Malformed(format!("{e:?}")))?;
        let end = record.header.message_end;
        records.push(record);

        if end {
            break;
        }

        if input.is_empty() {
            return Err(Error::Malformed(
                "message ended before a record flagged ME".to_string(),
            ));
        }
    }

    Ok(records)
}

/// Finds the first Text record of the message.
pub fn first_text(records: &[Record]) -> Result<TextRecord> {
    records
        .iter()
        .find(|record| record.is_text() && !record.header.chunked)
        .ok_or(Error::NoTextRecord)
        .and_then(TextRecord::try_from)
}

fn length_octet(field: &'static str, len: usize) -> Result<u8> {
    u8::try_from(len).map_err(|_| Error::FieldTooLong { field, len })
}

fn decode_utf16(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::InvalidText(TextEncoding::Utf16));
    }

    let (little_endian, bytes) = match bytes {
        [0xFF, 0xFE, tail @ ..] => (true, tail),
        [0xFE, 0xFF, tail @ ..] => (false, tail),
        _ => (false, bytes),
    };

    let units = bytes
        .chunks_exact(2)
        .map(|chunk| match little_endian {
            true => u16::from_le_bytes([chunk[0], chunk[1]]),
            _ => u16::from_be_bytes([chunk[0], chunk[1]]),
        })
        .collect::<Vec<u16>>();

    String::from_utf16(&units).map_err(|_| Error::InvalidText(TextEncoding::Utf16))
}

fn parse_flags(input: &mut &[u8]) -> ModalResult<(bool, bool, bool, bool, bool, u8)> {
    bits::<_, _, ErrMode<ContextError>, _, _>((
        take_bool,
        take_bool,
        take_bool,
        take_bool,
        take_bool,
        take_bits(3_u8),
    ))
    .parse_next(input)
}

fn octet(input: &mut &[u8]) -> ModalResult<u8> {
    be_u8.parse_next(input)
}

fn long_length(input: &mut &[u8]) -> ModalResult<u32> {
    be_u32.parse_next(input)
}

fn remaining(input: &mut &[u8]) -> ModalResult<Vec<u8>> {
    rest.map(|s: &[u8]| s.to_vec()).parse_next(input)
}

fn octets(input: &mut &[u8], length: usize) -> ModalResult<Vec<u8>> {
    take(length).map(|s: &[u8]| s.to_vec()).parse_next(input)
}

fn parse_record(input: &mut &[u8]) -> ModalResult<Record> {
    let (message_begin, message_end, chunked, short_record, has_id_length, tnf) =
        parse_flags(input)?;

    let type_length = octet(input)?;
    let payload_length = if short_record {
        octet(input)? as u32
    } else {
        long_length(input)?
    };
    let id_length = if has_id_length {
        Some(octet(input)?)
    } else {
        None
    };

    let type_ = octets(input, type_length as usize)?;
    let id = match id_length {
        Some(length) => Some(octets(input, length as usize)?),
        None => None,
    };
    let payload = octets(input, payload_length as usize)?;

    Ok(Record {
        header: Header {
            message_begin,
            message_end,
            chunked,
            short_record,
            has_id_length,
            type_name_format: TypeNameFormat::from_bits(tnf),
        },
        type_,
        id,
        payload,
    })
}

fn parse_text_payload(input: &mut &[u8]) -> ModalResult<(u8, Vec<u8>, Vec<u8>)> {
    let status = octet(input)?;
    let language = octets(input, (status & TEXT_LANGUAGE_MASK) as usize)?;
    let text = remaining(input)?;

    Ok((status, language, text))
}

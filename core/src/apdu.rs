//! ISO 7816-4 command and response units exchanged with a Type 4 tag.

use std::fmt::{Display, Formatter};

pub const CLA_DEFAULT: u8 = 0x00;

pub const INS_SELECT_FILE: u8 = 0xA4;
pub const INS_READ_BINARY: u8 = 0xB0;
pub const INS_UPDATE_BINARY: u8 = 0xD6;

const SELECT_P1_BY_NAME: u8 = 0x04;
const SELECT_P1_BY_ID: u8 = 0x00;
const SELECT_P2_FIRST: u8 = 0x00;
const SELECT_P2_NO_FCI: u8 = 0x0C;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("APDU is too short: {0} octets")]
    TooShort(usize),

    #[error("APDU body does not match its Lc ({lc}) with {len} octets remaining")]
    LengthMismatch { lc: usize, len: usize },
}

/// A two-octet status word (SW1, SW2) trailing every response.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct StatusWord(pub u8, pub u8);

impl StatusWord {
    pub const OK: Self = Self(0x90, 0x00);
    pub const WRONG_LENGTH: Self = Self(0x67, 0x00);
    pub const SECURITY_NOT_SATISFIED: Self = Self(0x69, 0x82);
    pub const NO_CURRENT_EF: Self = Self(0x69, 0x86);
    pub const FILE_NOT_FOUND: Self = Self(0x6A, 0x82);
    pub const WRONG_P1P2: Self = Self(0x6B, 0x00);
    pub const INS_NOT_SUPPORTED: Self = Self(0x6D, 0x00);
    pub const CLA_NOT_SUPPORTED: Self = Self(0x6E, 0x00);

    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }

    pub fn to_bytes(self) -> [u8; 2] {
        [self.0, self.1]
    }
}

impl Display for StatusWord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X}{:02X}", self.0, self.1)
    }
}

impl From<u16> for StatusWord {
    fn from(sw: u16) -> Self {
        let [sw1, sw2] = sw.to_be_bytes();
        Self(sw1, sw2)
    }
}

/// An APDU command to be transmitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    pub le: Option<u8>,
}

impl Command {
    /// Constructs an command with CLA, INS, P1, and P2.
    /// No payloads will be transmitted or received.
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Constructs a `SELECT` command addressing an application by its AID.
    pub fn select_by_name(aid: &[u8]) -> Self {
        Self::new(CLA_DEFAULT, INS_SELECT_FILE, SELECT_P1_BY_NAME, SELECT_P2_FIRST)
            .with_data(aid.to_vec())
    }

    /// Constructs a `SELECT` command addressing an elementary file by its ID.
    pub fn select_file(id: [u8; 2]) -> Self {
        Self::new(CLA_DEFAULT, INS_SELECT_FILE, SELECT_P1_BY_ID, SELECT_P2_NO_FCI)
            .with_data(id.to_vec())
    }

    /// Constructs a `READ BINARY` command.
    pub fn read_binary(offset: u16, le: u8) -> Self {
        let [p1, p2] = offset.to_be_bytes();
        Self::new(CLA_DEFAULT, INS_READ_BINARY, p1, p2).with_le(le)
    }

    /// Offset addressed by `READ BINARY` / `UPDATE BINARY`.
    pub fn offset(&self) -> u16 {
        u16::from_be_bytes([self.p1 & 0x7F, self.p2])
    }

    /// Parses a short APDU (cases 1 to 4) received by a responder.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let (header, body) = match bytes.len() {
            0..=3 => return Err(Error::TooShort(bytes.len())),
            _ => bytes.split_at(4),
        };
        let mut command = Self::new(header[0], header[1], header[2], header[3]);

        match body {
            [] => {}
            [le] => command.le = Some(*le),
            [lc, rest @ ..] => {
                let lc = *lc as usize;
                match rest.len() {
                    len if len == lc => command.data = rest.to_vec(),
                    len if len == lc + 1 => {
                        command.data = rest[..lc].to_vec();
                        command.le = Some(rest[lc]);
                    }
                    len => return Err(Error::LengthMismatch { lc, len }),
                }
            }
        }

        Ok(command)
    }

    /// Converts the command into octets.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer: Vec<u8> = vec![self.cla, self.ins, self.p1, self.p2];
        if !self.data.is_empty() {
            buffer.push(self.data.len() as u8);
            buffer.extend_from_slice(&self.data);
        }

        if let Some(l) = self.le {
            buffer.push(l);
        }

        buffer
    }
}

impl From<Command> for Vec<u8> {
    fn from(command: Command) -> Self {
        command.to_bytes()
    }
}

/// An response that was received from the card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub data: Vec<u8>,
    pub status: StatusWord,
}

impl Response {
    pub fn new(data: Vec<u8>, status: StatusWord) -> Self {
        Self { data, status }
    }

    /// A response carrying only a status word.
    pub fn status(status: StatusWord) -> Self {
        Self::new(Vec::new(), status)
    }

    pub fn ok(data: Vec<u8>) -> Self {
        Self::new(data, StatusWord::OK)
    }

    /// Parses a response from the octets, splitting the trailer off.
    /// Responses shorter than a trailer are reported as `6700`.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Self {
        if bytes.len() < 2 {
            return Self::status(StatusWord::WRONG_LENGTH);
        }

        let sw2 = bytes.pop().unwrap_or_default();
        let sw1 = bytes.pop().unwrap_or_default();

        Self::new(bytes, StatusWord(sw1, sw2))
    }

    /// Determines whether the response indicates success or not.
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Converts the response to a result of octets.
    pub fn into_result(self) -> Result<Vec<u8>, StatusWord> {
        match self.is_ok() {
            true => Ok(self.data),
            _ => Err(self.status),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = self.data.clone();
        buffer.extend_from_slice(&self.status.to_bytes());
        buffer
    }
}

impl From<Vec<u8>> for Response {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Response> for Vec<u8> {
    fn from(response: Response) -> Self {
        response.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_the_type4_select_commands() {
        assert_eq!(
            vec![0x00, 0xA4, 0x04, 0x00, 0x07, 0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01],
            Command::select_by_name(&[0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01]).to_bytes(),
        );
        assert_eq!(
            vec![0x00, 0xA4, 0x00, 0x0C, 0x02, 0xE1, 0x03],
            Command::select_file([0xE1, 0x03]).to_bytes(),
        );
        assert_eq!(
            vec![0x00, 0xB0, 0x00, 0x02, 0xF0],
            Command::read_binary(2, 0xF0).to_bytes(),
        );
    }

    #[test]
    fn parses_every_short_case() {
        let case1 = Command::parse(&[0x00, 0xA4, 0x04, 0x00]).unwrap();
        assert!(case1.data.is_empty());
        assert_eq!(None, case1.le);

        let case2 = Command::parse(&[0x00, 0xB0, 0x01, 0x02, 0x0F]).unwrap();
        assert_eq!(Some(0x0F), case2.le);
        assert_eq!(0x0102, case2.offset());

        let case3 = Command::parse(&[0x00, 0xA4, 0x00, 0x0C, 0x02, 0xE1, 0x04]).unwrap();
        assert_eq!(vec![0xE1, 0x04], case3.data);
        assert_eq!(None, case3.le);

        let case4 = Command::parse(&[0x00, 0xA4, 0x04, 0x00, 0x01, 0xAA, 0x00]).unwrap();
        assert_eq!(vec![0xAA], case4.data);
        assert_eq!(Some(0x00), case4.le);
    }

    #[test]
    fn rejects_truncated_commands() {
        assert!(matches!(Command::parse(&[0x00, 0xA4]), Err(Error::TooShort(2))));
        assert!(matches!(
            Command::parse(&[0x00, 0xA4, 0x00, 0x0C, 0x02, 0xE1]),
            Err(Error::LengthMismatch { lc: 2, len: 1 })
        ));
    }

    #[test]
    fn strips_the_trailer_from_responses() {
        let response = Response::from_bytes(vec![0x00, 0x2A, 0x90, 0x00]);
        assert!(response.is_ok());
        assert_eq!(Ok(vec![0x00, 0x2A]), response.into_result());

        let response = Response::from_bytes(vec![0x6A, 0x82]);
        assert_eq!(Err(StatusWord::FILE_NOT_FOUND), response.into_result());

        assert_eq!(StatusWord::WRONG_LENGTH, Response::from_bytes(vec![0x90]).status);
    }
}

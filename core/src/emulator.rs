//! Host Card Emulation: answers reader APDUs as a read-only Type 4 tag.
//!
//! Any reader addressing the NDEF AID may read the identity: there is no
//! device unlock and no per-reader authorization. The payload is a public
//! handle, not a credential.

use parking_lot::Mutex;

use crate::apdu::{
    Command, Response, StatusWord, CLA_DEFAULT, INS_READ_BINARY, INS_SELECT_FILE,
    INS_UPDATE_BINARY,
};
use crate::payload::{self, IdentityPayload};
use crate::tag::{self, CapabilityContainer, CC_FILE_ID, NDEF_AID, NDEF_FILE_ID};
use crate::{debug, info};

const SELECT_BY_NAME: u8 = 0x04;
const SELECT_BY_ID: u8 = 0x00;

/// Bit 8 of P1 selects a short file identifier instead of an offset.
const READ_P1_SFI: u8 = 0x80;

/// `Le` of `00` in a short APDU asks for 256 octets.
const SHORT_LE_MAX: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Payload(#[from] payload::Error),

    #[error(transparent)]
    Tag(#[from] tag::Error),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum File {
    CapabilityContainer,
    Ndef,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
enum Selection {
    #[default]
    Idle,
    Application(Option<File>),
}

pub struct Emulator {
    payload: Option<IdentityPayload>,
    cc: CapabilityContainer,
    cc_file: Vec<u8>,
    ndef_file: Vec<u8>,
    selection: Mutex<Selection>,
}

impl Emulator {
    /// Emulates a tag whose NDEF file carries the identity as a Text record in `language`.
    pub fn new(payload: &IdentityPayload, language: &str) -> Result<Self, Error> {
        let message = payload.to_ndef(language)?;
        let mut emulator = Self::from_message(&message)?;
        emulator.payload = Some(payload.clone());

        Ok(emulator)
    }

    /// Emulates a tag carrying an arbitrary NDEF message.
    pub fn from_message(message: &[u8]) -> Result<Self, Error> {
        let ndef_file = tag::ndef_file(message)?;
        let cc = CapabilityContainer::read_only(ndef_file.len() as u16);

        Ok(Self {
            payload: None,
            cc,
            cc_file: cc.to_bytes(),
            ndef_file,
            selection: Mutex::new(Selection::Idle),
        })
    }

    pub fn payload(&self) -> Option<&IdentityPayload> {
        self.payload.as_ref()
    }

    pub fn capability_container(&self) -> &CapabilityContainer {
        &self.cc
    }

    /// Processes one command APDU and returns the response APDU.
    pub fn process(&self, apdu: &[u8]) -> Vec<u8> {
        let response = match Command::parse(apdu) {
            Ok(command) => self.handle(&command),
            Err(e) => {
                debug!("Rejecting APDU {}: {}", hex::encode(apdu), e);
                Response::status(StatusWord::WRONG_LENGTH)
            }
        };

        response.to_bytes()
    }

    /// Forgets the selection, as when the reader leaves the field.
    pub fn deactivate(&self) {
        *self.selection.lock() = Selection::Idle;
    }

    fn handle(&self, command: &Command) -> Response {
        if command.cla != CLA_DEFAULT {
            return Response::status(StatusWord::CLA_NOT_SUPPORTED);
        }

        let mut selection = self.selection.lock();
        match command.ins {
            INS_SELECT_FILE => {
                let (next, status) = self.select(*selection, command);
                *selection = next;
                Response::status(status)
            }
            INS_READ_BINARY => self.read_binary(*selection, command),
            INS_UPDATE_BINARY => Response::status(StatusWord::SECURITY_NOT_SATISFIED),
            _ => Response::status(StatusWord::INS_NOT_SUPPORTED),
        }
    }

    fn select(&self, current: Selection, command: &Command) -> (Selection, StatusWord) {
        match command.p1 {
            SELECT_BY_NAME if command.data == NDEF_AID => {
                info!("NDEF application selected");
                (Selection::Application(None), StatusWord::OK)
            }
            SELECT_BY_NAME => (Selection::Idle, StatusWord::FILE_NOT_FOUND),
            SELECT_BY_ID => match current {
                Selection::Idle => (current, StatusWord::FILE_NOT_FOUND),
                Selection::Application(_) => match command.data.as_slice() {
                    id if id == CC_FILE_ID => (
                        Selection::Application(Some(File::CapabilityContainer)),
                        StatusWord::OK,
                    ),
                    id if id == NDEF_FILE_ID => {
                        (Selection::Application(Some(File::Ndef)), StatusWord::OK)
                    }
                    _ => (current, StatusWord::FILE_NOT_FOUND),
                },
            },
            _ => (current, StatusWord::WRONG_P1P2),
        }
    }

    fn read_binary(&self, current: Selection, command: &Command) -> Response {
        let file = match current {
            Selection::Application(Some(File::CapabilityContainer)) => &self.cc_file,
            Selection::Application(Some(File::Ndef)) => &self.ndef_file,
            _ => return Response::status(StatusWord::NO_CURRENT_EF),
        };

        if command.p1 & READ_P1_SFI != 0 {
            return Response::status(StatusWord::WRONG_P1P2);
        }

        let offset = command.offset() as usize;
        if offset > file.len() {
            return Response::status(StatusWord::WRONG_P1P2);
        }

        let le = match command.le {
            Some(0) | None => SHORT_LE_MAX,
            Some(le) => le as usize,
        }
        .min(self.cc.max_le as usize);
        let end = file.len().min(offset + le);

        Response::ok(file[offset..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn alice() -> Emulator {
        Emulator::new(&IdentityPayload::new("abc-123", "Alice"), "en").unwrap()
    }

    fn status(response: &[u8]) -> StatusWord {
        StatusWord(response[response.len() - 2], response[response.len() - 1])
    }

    fn selected(emulator: &Emulator, file: [u8; 2]) {
        emulator.process(&Command::select_by_name(&NDEF_AID).to_bytes());
        emulator.process(&Command::select_file(file).to_bytes());
    }

    #[rstest]
    #[case(vec![0x00, 0xA4, 0x04, 0x00, 0x07, 0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01], StatusWord::OK)]
    #[case(vec![0x00, 0xA4, 0x04, 0x00, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10], StatusWord::FILE_NOT_FOUND)]
    #[case(vec![0x00, 0xA4, 0x00, 0x0C, 0x02, 0xE1, 0x03], StatusWord::FILE_NOT_FOUND)]
    #[case(vec![0x00, 0xB0, 0x00, 0x00, 0x0F], StatusWord::NO_CURRENT_EF)]
    #[case(vec![0x00, 0xD6, 0x00, 0x00, 0x01, 0x00], StatusWord::SECURITY_NOT_SATISFIED)]
    #[case(vec![0x00, 0xCA, 0x00, 0x00, 0x00], StatusWord::INS_NOT_SUPPORTED)]
    #[case(vec![0x80, 0xA4, 0x04, 0x00], StatusWord::CLA_NOT_SUPPORTED)]
    #[case(vec![0x00, 0xA4], StatusWord::WRONG_LENGTH)]
    fn answers_a_fresh_session(#[case] apdu: Vec<u8>, #[case] expected: StatusWord) {
        assert_eq!(expected, status(&alice().process(&apdu)));
    }

    #[test]
    fn serves_the_capability_container() {
        let emulator = alice();
        selected(&emulator, CC_FILE_ID);

        let response = emulator.process(&Command::read_binary(0, 0x0F).to_bytes());

        assert_eq!(StatusWord::OK, status(&response));
        assert_eq!(emulator.capability_container().to_bytes(), response[..15]);
    }

    #[test]
    fn serves_the_ndef_file_by_offset() {
        let emulator = alice();
        let message = IdentityPayload::new("abc-123", "Alice").to_ndef("en").unwrap();
        selected(&emulator, NDEF_FILE_ID);

        let nlen = emulator.process(&Command::read_binary(0, 2).to_bytes());
        assert_eq!((message.len() as u16).to_be_bytes(), nlen[..2]);

        let data = emulator.process(&Command::read_binary(2, message.len() as u8).to_bytes());
        assert_eq!(StatusWord::OK, status(&data));
        assert_eq!(message, data[..data.len() - 2]);
    }

    #[test]
    fn rejects_offsets_past_the_file() {
        let emulator = alice();
        selected(&emulator, NDEF_FILE_ID);

        let response = emulator.process(&Command::read_binary(0x0400, 0x10).to_bytes());

        assert_eq!(StatusWord::WRONG_P1P2, status(&response));
    }

    #[test]
    fn refuses_short_file_identifiers() {
        let emulator = alice();
        selected(&emulator, NDEF_FILE_ID);

        let response = emulator.process(&Command::read_binary(0x8000, 0x10).to_bytes());

        assert_eq!(StatusWord::WRONG_P1P2, status(&response));
    }

    #[test]
    fn refuses_identities_beyond_the_addressable_file() {
        let payload = IdentityPayload::new("abc-123", "n".repeat(40_000));

        assert!(matches!(
            Emulator::new(&payload, "en"),
            Err(Error::Tag(tag::Error::MessageTooLarge(_)))
        ));
    }

    #[test]
    fn advertises_the_largest_ndef_file() {
        let emulator = Emulator::from_message(&vec![0u8; tag::MAX_NDEF_MESSAGE]).unwrap();

        assert_eq!(0x7FFF, emulator.capability_container().ndef_max_size);
    }

    #[test]
    fn forgets_the_selection_on_deactivation() {
        let emulator = alice();
        selected(&emulator, NDEF_FILE_ID);
        emulator.deactivate();

        let response = emulator.process(&Command::read_binary(0, 2).to_bytes());

        assert_eq!(StatusWord::NO_CURRENT_EF, status(&response));
    }

    #[test]
    fn refuses_invalid_identities() {
        assert!(matches!(
            Emulator::new(&IdentityPayload::new("", "Alice"), "en"),
            Err(Error::Payload(_))
        ));
    }
}

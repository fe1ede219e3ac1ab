use crate::apdu::StatusWord;
use crate::reader::Step;
use crate::session::Mode;
use crate::{config, emulator, friends, nfc, payload, reader};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("This device has no NFC radio able to do that")]
    UnsupportedHardware,

    #[error("NFC is turned off")]
    Disabled,

    #[error("A {0:?} session is already running")]
    Busy(Mode),

    #[error("No tag was found in time")]
    Timeout,

    #[error("{step} failed with status {status}")]
    Protocol { step: Step, status: StatusWord },

    #[error("Error occurred while communicating with the tag: {0}")]
    Transport(#[from] nfc::Error),

    #[error("Tag is not a TAPP identity: {0}")]
    MalformedPayload(#[from] payload::Error),

    #[error("Cannot add yourself as a friend")]
    SelfTap,

    #[error("NFC platform refused to emulate the tag: {0}")]
    Platform(#[source] nfc::Error),

    #[error("Cannot emulate this identity: {0}")]
    Emulation(#[from] emulator::Error),

    #[error(transparent)]
    Config(#[from] config::Error),

    #[error(transparent)]
    Api(friends::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the user may simply try again.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Error::UnsupportedHardware | Error::Emulation(_) | Error::Config(_)
        )
    }
}

impl From<reader::Error> for Error {
    fn from(e: reader::Error) -> Self {
        match e {
            reader::Error::Protocol { step, status } => Error::Protocol { step, status },
            reader::Error::Transport { source, .. } => Error::Transport(source),
            reader::Error::MalformedPayload(e) => Error::MalformedPayload(e),
        }
    }
}

impl From<friends::Error> for Error {
    fn from(e: friends::Error) -> Self {
        match e {
            friends::Error::SelfRequest => Error::SelfTap,
            e => Error::Api(e),
        }
    }
}

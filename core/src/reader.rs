//! Reads the identity off a Type 4 tag, one APDU at a time.

use std::fmt::{Display, Formatter};

use crate::apdu::StatusWord;
use crate::card::{self, Card, MAX_READ_LE};
use crate::payload::{self, IdentityPayload};
use crate::tag::{
    CapabilityContainer, CC_FILE_ID, CC_LENGTH, MAX_NDEF_MESSAGE, NDEF_AID, NDEF_FILE_ID, NLEN_SIZE,
};
use crate::{debug, nfc, warn};

/// The exchanges of a read, in the order they are sent.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
    SelectApplication,
    SelectCapabilityContainer,
    ReadCapabilityContainer,
    SelectNdef,
    ReadNdefLength,
    ReadNdefData,
}

impl Display for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use Step::*;

        f.write_str(match self {
            SelectApplication => "SELECT AID",
            SelectCapabilityContainer => "SELECT CC",
            ReadCapabilityContainer => "READ CC",
            SelectNdef => "SELECT NDEF",
            ReadNdefLength => "READ NLEN",
            ReadNdefData => "READ NDEF",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{step} failed with status {status}")]
    Protocol { step: Step, status: StatusWord },

    #[error("{step} could not reach the tag: {source}")]
    Transport {
        step: Step,
        #[source]
        source: nfc::Error,
    },

    #[error("Tag is not a TAPP identity: {0}")]
    MalformedPayload(#[from] payload::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct TagReader<T, Ctx>
where
    T: nfc::HandlerInCtx<Ctx>,
    Ctx: Copy,
{
    card: Card<T, Ctx>,
}

impl<T, Ctx> TagReader<T, Ctx>
where
    T: nfc::HandlerInCtx<Ctx>,
    Ctx: Copy,
{
    pub fn new(card: Card<T, Ctx>) -> Self {
        Self { card }
    }

    /// Reads the NDEF message and decodes the identity from its Text record.
    pub fn read_identity(&self, ctx: Ctx) -> Result<IdentityPayload> {
        let message = self.read_message(ctx)?;

        Ok(IdentityPayload::from_ndef(&message)?)
    }

    /// Reads the raw NDEF message, without the NLEN prefix.
    pub fn read_message(&self, ctx: Ctx) -> Result<Vec<u8>> {
        step(Step::SelectApplication, || {
            self.card.select_application(ctx, &NDEF_AID)
        })?;
        step(Step::SelectCapabilityContainer, || {
            self.card.select_file(ctx, CC_FILE_ID)
        })?;
        let cc = step(Step::ReadCapabilityContainer, || {
            self.card.read_binary(ctx, 0, CC_LENGTH as u8)
        })?;
        let max_le = max_le(&cc);

        step(Step::SelectNdef, || self.card.select_file(ctx, NDEF_FILE_ID))?;
        let nlen = step(Step::ReadNdefLength, || {
            self.card.read_binary(ctx, 0, NLEN_SIZE as u8)
        })?;
        let nlen = match nlen.as_slice() {
            [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
            _ => {
                warn!("NLEN was {} octets long", nlen.len());
                0
            }
        };
        debug!("NDEF message is {} octets long", nlen);

        if nlen == 0 {
            return Ok(Vec::new());
        }

        // Offsets from 8000 on would be read as short file identifiers
        if nlen as usize > MAX_NDEF_MESSAGE {
            warn!("NLEN {} runs past the addressable file", nlen);
            return Err(Error::Protocol {
                step: Step::ReadNdefLength,
                status: StatusWord::WRONG_LENGTH,
            });
        }

        step(Step::ReadNdefData, || {
            self.card.read(ctx, NLEN_SIZE, nlen, max_le)
        })
    }
}

/// Largest `Le` the tag accepts, bounded by what one read requests.
fn max_le(cc: &[u8]) -> u8 {
    match CapabilityContainer::parse(cc) {
        Ok(cc) => {
            if cc.ndef_file_id != NDEF_FILE_ID {
                warn!(
                    "CC points at NDEF file {}, reading {} anyway",
                    hex::encode(cc.ndef_file_id),
                    hex::encode(NDEF_FILE_ID)
                );
            }

            match cc.max_le {
                0 => MAX_READ_LE,
                le => le.min(MAX_READ_LE as u16) as u8,
            }
        }
        Err(e) => {
            warn!("Ignoring Capability Container: {}", e);
            MAX_READ_LE
        }
    }
}

fn step<T>(step: Step, exchange: impl FnOnce() -> card::Result<T>) -> Result<T> {
    exchange().map_err(|e| match e {
        card::Error::Status(status) => {
            warn!("{} failed with status {}", step, status);
            Error::Protocol { step, status }
        }
        card::Error::Transport(source) => Error::Transport { step, source },
    })
}

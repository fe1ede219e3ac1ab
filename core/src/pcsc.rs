//! PC/SC support for tapp-nfc.
//! Can be enabled by turning `pcsc` feature on.
//!
//! ## What is PC/SC?
//! PC/SC (Personal Computer/Smart Card) is an abstraction layer for communicating with Smart Cards
//! from Windows. USB contactless readers (ACR122U and friends) expose any phone presenting a
//! Type 4 tag as a card, so a desktop can read a TAPP identity the same way a phone does.
//! Linux supports it by installing the pcsc-lite shared library.
//!
//! ## Usage
//! ```rust,no_run
//! use tapp_nfc::pcsc::Context;
//! use tapp_nfc::nfc::Radio;
//! use tapp_nfc::{Card, TagReader};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let radio = Context::try_new()?.open()?;
//! let tag = radio.discover().await?;
//!
//! let identity = TagReader::new(Card::new(Box::new(tag))).read_identity(())?;
//! # Ok(())
//! # }
//! ```

use std::ffi::{CStr, CString};
use std::time::Duration;

use async_trait::async_trait;
use pcsc::{Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};

use crate::apdu::{Command, Response};
use crate::nfc::{self, Availability, HandlerInCtx, Radio};
use crate::{debug, info};

/// How long to wait between two attempts to find a tag on the reader.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Error occurred while communicating with PC/SC: {0}")]
    PcscError(#[from] pcsc::Error),

    #[error("Reader not found on PC/SC service")]
    ReaderNotFound,
}

pub type Result<T> = std::result::Result<T, Error>;

/// PC/SC context.
pub struct Context {
    ctx: pcsc::Context,
}

impl Context {
    /// Creates a PC/SC context in user scope.
    pub fn try_new() -> Result<Self> {
        Ok(Self {
            ctx: pcsc::Context::establish(Scope::User)?,
        })
    }

    /// Finds the first PC/SC reader and turns it into a radio.
    pub fn open(self) -> Result<PcscRadio> {
        let mut buf = [0u8; 2048];
        let reader = self
            .ctx
            .list_readers(&mut buf)?
            .next()
            .ok_or(Error::ReaderNotFound)?
            .to_owned();

        Ok(PcscRadio::new(self.ctx, reader))
    }
}

/// A contactless PC/SC reader acting as the reading side of a tap.
pub struct PcscRadio {
    ctx: pcsc::Context,
    reader: CString,
}

impl PcscRadio {
    fn new(ctx: pcsc::Context, reader: CString) -> Self {
        debug!("Using device: {}", reader.to_str().unwrap_or_default());

        Self { ctx, reader }
    }

    pub fn reader(&self) -> &CStr {
        &self.reader
    }
}

#[async_trait]
impl Radio for PcscRadio {
    type Tag = PcscTag;

    fn availability(&self) -> Availability {
        match self.ctx.is_valid() {
            Ok(()) => Availability::Ready,
            Err(_) => Availability::Disabled,
        }
    }

    async fn discover(&self) -> nfc::Result<PcscTag> {
        debug!("Waiting for a tag");

        loop {
            match self
                .ctx
                .connect(&self.reader, ShareMode::Shared, Protocols::ANY)
            {
                Ok(card) => {
                    debug!("Connected to the tag");

                    return Ok(PcscTag { card });
                }
                Err(pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard) => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(pcsc::Error::ReaderUnavailable | pcsc::Error::UnknownReader) => {
                    return Err(nfc::Error::Platform("reader was unplugged".to_string()));
                }
                Err(e) => return Err(nfc::Error::Platform(e.to_string())),
            }
        }
    }

    fn release(&self) {
        info!("Released {}", self.reader.to_str().unwrap_or_default());
    }
}

/// A tag presented to the reader.
pub struct PcscTag {
    card: pcsc::Card,
}

impl PcscTag {
    /// Transmits an APDU command to the tag, then receives a response from them.
    pub fn transmit(&self, tx: &[u8]) -> nfc::Result<Vec<u8>> {
        let mut rx = [0u8; MAX_BUFFER_SIZE];
        let rx = self.card.transmit(tx, &mut rx).map_err(|e| match e {
            pcsc::Error::RemovedCard | pcsc::Error::ResetCard | pcsc::Error::NoSmartcard => {
                nfc::Error::TagLost(e.to_string())
            }
            _ => nfc::Error::Transceive(e.to_string()),
        })?;

        Ok(Vec::from(rx))
    }
}

impl HandlerInCtx<()> for PcscTag {
    fn handle_in_ctx(&self, _: (), command: Command) -> nfc::Result<Response> {
        let rx = self.transmit(&command.to_bytes())?;

        Ok(Response::from_bytes(rx))
    }
}

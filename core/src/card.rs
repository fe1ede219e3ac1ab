use std::marker::PhantomData;

use crate::apdu::{Command, StatusWord};
use crate::debug;
use crate::nfc;

/// Largest `Le` requested in one `READ BINARY`.
pub const MAX_READ_LE: u8 = 0xF0;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Error occurred while communicating with the tag: {0}")]
    Transport(#[from] nfc::Error),

    #[error("The tag returned an error status {0}")]
    Status(StatusWord),
}

pub type Result<T> = std::result::Result<T, Error>;

/// An adapter to communicate with the tag through the delegate
pub struct Card<T, Ctx>
where
    T: nfc::HandlerInCtx<Ctx>,
    Ctx: Copy,
{
    delegate: Box<T>,
    _ctx: PhantomData<Ctx>,
}

impl<T, Ctx> Card<T, Ctx>
where
    T: nfc::HandlerInCtx<Ctx>,
    Ctx: Copy,
{
    /// Initiates an adapter with the delegate.
    pub fn new(delegate: Box<T>) -> Self {
        Self {
            delegate,
            _ctx: PhantomData,
        }
    }

    /// Selects an application with its AID.
    pub fn select_application(&self, ctx: Ctx, aid: &[u8]) -> Result<()> {
        self.handle(ctx, Command::select_by_name(aid)).map(|_| ())
    }

    /// Selects an EF with its file ID.
    pub fn select_file(&self, ctx: Ctx, id: [u8; 2]) -> Result<()> {
        self.handle(ctx, Command::select_file(id)).map(|_| ())
    }

    /// Reads at most `le` octets from the selected file at `offset` in a single command.
    pub fn read_binary(&self, ctx: Ctx, offset: u16, le: u8) -> Result<Vec<u8>> {
        self.handle(ctx, Command::read_binary(offset, le))
    }

    /// Reads `len` octets from the selected file starting at `offset`,
    /// splitting the transfer into commands of `max_le` octets.
    pub fn read(&self, ctx: Ctx, offset: u16, len: u16, max_le: u8) -> Result<Vec<u8>> {
        let max_le = max_le.max(1);
        let mut pos: u16 = 0;
        let mut buf: Vec<u8> = Vec::with_capacity(len as usize);

        while pos < len {
            let le = (len - pos).min(max_le as u16) as u8;
            let mut fragment = self.read_binary(ctx, offset.saturating_add(pos), le)?;
            let length = fragment.len();

            buf.append(&mut fragment);
            pos = pos.saturating_add(length as u16);

            if length < le as usize {
                break;
            }
        }

        buf.truncate(len as usize);

        Ok(buf)
    }

    fn handle(&self, ctx: Ctx, command: Command) -> Result<Vec<u8>> {
        debug!("TX: {}", hex::encode(command.to_bytes()));

        let response = self.delegate.handle_in_ctx(ctx, command)?;

        debug!("RX: {}", hex::encode(response.to_bytes()));

        response.into_result().map_err(Error::Status)
    }
}

//! Communicating with the tag and the platform NFC stack

use std::sync::Arc;

use async_trait::async_trait;

use crate::apdu::{Command, Response};
use crate::emulator::Emulator;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Tag was lost while communicating: {0}")]
    TagLost(String),

    #[error("Transceive failed: {0}")]
    Transceive(String),

    #[error("NFC platform refused the request: {0}")]
    Platform(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// An handler to handle an APDU command and receive a response
pub trait HandlerInCtx<Ctx> {
    /// Handles the APDU command.
    /// Implementations must transmit the command to the tag through a reader,
    /// then receive the response from them.
    fn handle_in_ctx(&self, ctx: Ctx, command: Command) -> Result<Response>;
}

/// State of the contactless radio as reported by the platform.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Availability {
    Ready,

    /// The device has a radio but the user switched it off.
    Disabled,

    /// The device has no NFC radio or cannot emulate tags.
    Unsupported,
}

/// A reader-mode radio discovering one tag at a time.
#[async_trait]
pub trait Radio: Send + Sync {
    type Tag: HandlerInCtx<()> + Send;

    fn availability(&self) -> Availability;

    /// Suspends until an ISO-DEP tag enters the field.
    /// Callers bound the wait with their own timeout and cancellation.
    async fn discover(&self) -> Result<Self::Tag>;

    /// Hands the technology back to the platform.
    /// Called on every exit path of a read, including after a failed `discover`.
    fn release(&self);
}

/// The platform service routing reader APDUs to an [`Emulator`].
pub trait HostEmulation: Send + Sync {
    fn availability(&self) -> Availability;

    fn enable(&self, emulator: Arc<Emulator>) -> Result<()>;

    fn disable(&self);
}

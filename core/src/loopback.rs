//! An in-process RF field connecting a reader to an emulator, without hardware.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::apdu::{Command, Response};
use crate::emulator::Emulator;
use crate::nfc::{self, Availability, HandlerInCtx, HostEmulation, Radio};

/// A tag answered by an [`Emulator`] directly.
pub struct EmulatedTag {
    emulator: Arc<Emulator>,
}

impl EmulatedTag {
    pub fn new(emulator: Arc<Emulator>) -> Self {
        Self { emulator }
    }
}

impl<Ctx> HandlerInCtx<Ctx> for EmulatedTag {
    fn handle_in_ctx(&self, _: Ctx, command: Command) -> nfc::Result<Response> {
        Ok(Response::from_bytes(self.emulator.process(&command.to_bytes())))
    }
}

impl Drop for EmulatedTag {
    fn drop(&mut self) {
        self.emulator.deactivate();
    }
}

struct Shared {
    tag: watch::Sender<Option<Arc<Emulator>>>,
    availability: Mutex<Availability>,
    releases: AtomicUsize,
}

/// The space between two devices. Hand out its radio to one controller
/// and its emulation to another.
#[derive(Clone)]
pub struct Field {
    shared: Arc<Shared>,
}

impl Default for Field {
    fn default() -> Self {
        Self::new()
    }
}

impl Field {
    pub fn new() -> Self {
        let (tag, _) = watch::channel(None);

        Self {
            shared: Arc::new(Shared {
                tag,
                availability: Mutex::new(Availability::Ready),
                releases: AtomicUsize::new(0),
            }),
        }
    }

    pub fn radio(&self) -> LoopbackRadio {
        LoopbackRadio {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn emulation(&self) -> LoopbackEmulation {
        LoopbackEmulation {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Simulates the user switching the radio off, or a device without one.
    pub fn set_availability(&self, availability: Availability) {
        *self.shared.availability.lock() = availability;
    }

    /// How many times a reader handed the radio back.
    pub fn releases(&self) -> usize {
        self.shared.releases.load(Ordering::SeqCst)
    }

    pub fn is_emulating(&self) -> bool {
        self.shared.tag.borrow().is_some()
    }
}

pub struct LoopbackRadio {
    shared: Arc<Shared>,
}

#[async_trait]
impl Radio for LoopbackRadio {
    type Tag = EmulatedTag;

    fn availability(&self) -> Availability {
        *self.shared.availability.lock()
    }

    async fn discover(&self) -> nfc::Result<EmulatedTag> {
        let mut field = self.shared.tag.subscribe();
        let emulator = field
            .wait_for(|tag| tag.is_some())
            .await
            .map_err(|e| nfc::Error::TagLost(e.to_string()))?
            .clone();

        match emulator {
            Some(emulator) => Ok(EmulatedTag::new(emulator)),
            None => Err(nfc::Error::TagLost("field emptied".to_string())),
        }
    }

    fn release(&self) {
        self.shared.releases.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct LoopbackEmulation {
    shared: Arc<Shared>,
}

impl HostEmulation for LoopbackEmulation {
    fn availability(&self) -> Availability {
        *self.shared.availability.lock()
    }

    fn enable(&self, emulator: Arc<Emulator>) -> nfc::Result<()> {
        self.shared.tag.send_replace(Some(emulator));
        Ok(())
    }

    fn disable(&self) {
        self.shared.tag.send_replace(None);
    }
}

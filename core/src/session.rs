//! One tap at a time: the orchestrator owning the radio for emulation or reading.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::card::Card;
use crate::config::Config;
use crate::emulator::Emulator;
use crate::error::{Error, Result};
use crate::friends::{EventTap, FriendApi, FriendOutcome};
use crate::nfc::{Availability, HostEmulation, Radio};
use crate::payload::IdentityPayload;
use crate::reader::TagReader;
use crate::{debug, info, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    Emulate,
    Read,
}

/// Snapshot of the running tap, if any.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TapSession {
    pub active: bool,
    pub mode: Mode,
    pub started_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TapOutcome {
    Connected {
        friend: IdentityPayload,
        status: FriendOutcome,

        /// The tap recorded against the configured event, if it could be.
        event: Option<EventTap>,
    },

    /// The user gave up before a tag showed up. Not an error.
    Cancelled,
}

enum State {
    Idle,
    Emulating {
        started_at: Instant,
        emulator: Arc<Emulator>,
    },
    Reading {
        started_at: Instant,
        cancel: watch::Sender<bool>,
    },
}

impl State {
    fn session(&self) -> Option<TapSession> {
        let (mode, started_at) = match self {
            State::Idle => return None,
            State::Emulating { started_at, .. } => (Mode::Emulate, *started_at),
            State::Reading { started_at, .. } => (Mode::Read, *started_at),
        };

        Some(TapSession {
            active: true,
            mode,
            started_at,
        })
    }
}

/// Owns the NFC hardware of one device on behalf of its user.
///
/// Create one at startup and hand it to whatever needs to tap.
pub struct TapController<R, H, A>
where
    R: Radio,
    H: HostEmulation,
    A: FriendApi,
{
    me: String,
    config: Config,
    radio: R,
    emulation: H,
    api: A,
    state: Mutex<State>,
}

impl<R, H, A> TapController<R, H, A>
where
    R: Radio,
    H: HostEmulation,
    A: FriendApi,
{
    pub fn new(me: impl Into<String>, config: Config, radio: R, emulation: H, api: A) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            me: me.into(),
            config,
            radio,
            emulation,
            api,
            state: Mutex::new(State::Idle),
        })
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn current(&self) -> Option<TapSession> {
        self.state.lock().session()
    }

    /// Broadcasts `payload` as an emulated tag until stopped.
    pub fn start_emulation(&self, payload: &IdentityPayload) -> Result<()> {
        ensure_available(self.emulation.availability())?;

        let mut state = self.state.lock();
        if let Some(session) = state.session() {
            return Err(Error::Busy(session.mode));
        }

        let emulator = Arc::new(Emulator::new(payload, &self.config.language)?);
        self.emulation
            .enable(Arc::clone(&emulator))
            .map_err(Error::Platform)?;

        info!("Emulating identity {}", payload.uuid);
        *state = State::Emulating {
            started_at: Instant::now(),
            emulator,
        };

        Ok(())
    }

    /// Stops broadcasting. Does nothing when not emulating.
    pub fn stop_emulation(&self) {
        let mut state = self.state.lock();
        if let State::Emulating { emulator, .. } = &*state {
            self.emulation.disable();
            emulator.deactivate();
            info!("Emulation stopped");
            *state = State::Idle;
        }
    }

    /// Cancels the pending read or stops emulation.
    /// Returns whether a session was running.
    pub fn cancel(&self) -> bool {
        let mode = {
            let state = self.state.lock();
            if let State::Reading { cancel, .. } = &*state {
                debug!("Cancelling read");
                cancel.send_replace(true);
            }
            state.session().map(|session| session.mode)
        };

        match mode {
            Some(Mode::Emulate) => {
                self.stop_emulation();
                true
            }
            Some(Mode::Read) => true,
            None => false,
        }
    }

    /// Waits for a friend's tag, reads their identity and sends the friend request.
    pub async fn read_friend(&self) -> Result<TapOutcome> {
        ensure_available(self.radio.availability())?;

        let mut cancelled = self.begin_read()?;
        let guard = ReadGuard { controller: self };

        let discovered = tokio::select! {
            biased;

            _ = cancelled.wait_for(|cancelled| *cancelled) => {
                info!("Read cancelled before a tag was found");
                return Ok(TapOutcome::Cancelled);
            }
            discovered = tokio::time::timeout(self.config.read_timeout(), self.radio.discover()) => discovered,
        };

        let friend = {
            let tag = match discovered {
                Ok(tag) => tag?,
                Err(_) => {
                    info!("No tag within {:?}", self.config.read_timeout());
                    return Err(Error::Timeout);
                }
            };

            TagReader::new(Card::new(Box::new(tag))).read_identity(())?
        };
        drop(guard);

        check_self_tap(&self.me, &friend)?;
        info!("Read {} ({})", friend.name, friend.uuid);

        let status = self.api.add_friend(&self.me, &friend.uuid).await?;

        // The friendship exists from here on, so a failed event tap is only logged
        let event = match &self.config.event_id {
            Some(event_id) => match self
                .api
                .record_event_tap(event_id, &self.me, &friend.uuid)
                .await
            {
                Ok(tap) => {
                    debug!("Event tap: {}", tap.message);
                    Some(tap)
                }
                Err(e) => {
                    warn!("Could not record the tap at event {}: {}", event_id, e);
                    None
                }
            },
            None => None,
        };

        Ok(TapOutcome::Connected {
            friend,
            status,
            event,
        })
    }

    fn begin_read(&self) -> Result<watch::Receiver<bool>> {
        let mut state = self.state.lock();
        if let Some(session) = state.session() {
            return Err(Error::Busy(session.mode));
        }

        let (cancel, cancelled) = watch::channel(false);
        *state = State::Reading {
            started_at: Instant::now(),
            cancel,
        };

        Ok(cancelled)
    }
}

/// Rejects reading one's own identity before anything reaches the network.
pub fn check_self_tap(me: &str, friend: &IdentityPayload) -> Result<()> {
    match friend.uuid == me {
        true => {
            warn!("Refusing to add {} to their own friends", me);
            Err(Error::SelfTap)
        }
        _ => Ok(()),
    }
}

fn ensure_available(availability: Availability) -> Result<()> {
    match availability {
        Availability::Ready => Ok(()),
        Availability::Disabled => Err(Error::Disabled),
        Availability::Unsupported => Err(Error::UnsupportedHardware),
    }
}

/// Hands the radio back and ends the read however the future completes.
struct ReadGuard<'a, R, H, A>
where
    R: Radio,
    H: HostEmulation,
    A: FriendApi,
{
    controller: &'a TapController<R, H, A>,
}

impl<R, H, A> Drop for ReadGuard<'_, R, H, A>
where
    R: Radio,
    H: HostEmulation,
    A: FriendApi,
{
    fn drop(&mut self) {
        self.controller.radio.release();

        let mut state = self.controller.state.lock();
        if let State::Reading { .. } = &*state {
            *state = State::Idle;
        }
    }
}

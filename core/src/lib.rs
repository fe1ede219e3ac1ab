//! A crate to exchange TAPP Club identities over NFC.
//!
//! One device emulates an NFC Forum Type 4 tag carrying its user's identity
//! ([`Emulator`]), the other device reads it through an APDU delegate
//! ([`TagReader`]), and a [`TapController`] ties both to the friend-request API.

#[cfg(feature = "pcsc")]
pub mod pcsc;

pub mod apdu;
pub mod card;
pub mod config;
pub mod emulator;
pub mod error;
pub mod friends;
pub mod loopback;
pub mod ndef;
pub mod nfc;
pub mod payload;
pub mod reader;
pub mod session;
pub mod tag;

pub use card::Card;
pub use config::Config;
pub use emulator::Emulator;
pub use error::{Error, Result};
pub use payload::IdentityPayload;
pub use reader::TagReader;
pub use session::{TapController, TapOutcome, TapSession};

#[cfg(feature = "tracing")]
#[allow(unused_imports)]
pub(crate) use tracing::{debug, info, warn};

#[cfg(not(feature = "tracing"))]
mod trace {
    // Arguments stay type-checked and count as used, but are never evaluated.
    macro_rules! noop_debug {
        ($($t: tt)*) => {{
            if false {
                let _ = format_args!($($t)*);
            }
        }};
    }

    macro_rules! noop_info {
        ($($t: tt)*) => {{
            if false {
                let _ = format_args!($($t)*);
            }
        }};
    }

    macro_rules! noop_warn {
        ($($t: tt)*) => {{
            if false {
                let _ = format_args!($($t)*);
            }
        }};
    }

    #[allow(unused_imports)]
    pub(crate) use {noop_debug as debug, noop_info as info, noop_warn as warn};
}

#[cfg(not(feature = "tracing"))]
#[allow(unused_imports)]
pub(crate) use trace::{debug, info, warn};

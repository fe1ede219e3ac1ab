#![allow(clippy::missing_safety_doc)]

#[macro_use]
extern crate log;
extern crate android_log;

use jni::objects::{GlobalRef, JClass, JObject, JString, JValue};
use jni::sys::{jbyteArray, jlong, jstring};
use jni::JNIEnv;
use parking_lot::Mutex;

use tapp_nfc::apdu::{Command, Response};
use tapp_nfc::session::check_self_tap;
use tapp_nfc::{emulator, nfc, payload, reader, Card, Emulator, IdentityPayload, TagReader};

const NULL_ARRAY: jbyteArray = 0 as jbyteArray;
const NULL_STRING: jstring = 0 as jstring;

static LAST_ERROR: Mutex<Option<String>> = Mutex::new(None);

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("Tap Error: {0}")]
    Tap(#[from] tapp_nfc::Error),

    #[error("Read Error: {0}")]
    Reader(#[from] reader::Error),

    #[error("Payload Error: {0}")]
    Payload(#[from] payload::Error),

    #[error("Emulator Error: {0}")]
    Emulator(#[from] emulator::Error),

    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JNI Error: {0}")]
    Jni(#[from] jni::errors::Error),

    #[error("{0} handle is null")]
    NullHandle(&'static str),
}

/// An `android.nfc.tech.IsoDep` held by the reading side.
struct JniIsoDep {
    delegate: GlobalRef,
}

#[derive(Copy, Clone)]
struct JniContext<'a> {
    env: JNIEnv<'a>,
}

impl<'a> nfc::HandlerInCtx<JniContext<'a>> for &JniIsoDep {
    fn handle_in_ctx(&self, ctx: JniContext<'a>, command: Command) -> nfc::Result<Response> {
        let env = ctx.env;
        let tx = env
            .byte_array_from_slice(&command.to_bytes())
            .map_err(|e| nfc::Error::Platform(e.to_string()))?;

        let res = env
            .call_method(
                self.delegate.as_obj(),
                "transceive",
                "([B)[B",
                &[JValue::Object(unsafe { JObject::from_raw(tx) })],
            )
            .and_then(|value| value.l());

        // TagLostException and IOException surface as pending Java exceptions
        let rx = match res {
            Ok(obj) => obj.into_raw(),
            Err(e) => {
                if env.exception_check().unwrap_or(false) {
                    let _ = env.exception_clear();
                }

                error!("transceive Error: {:?}", e);
                return Err(nfc::Error::TagLost(e.to_string()));
            }
        };

        let rx = env
            .convert_byte_array(rx)
            .map_err(|e| nfc::Error::Transceive(e.to_string()))?;

        debug!("APDU Response Received: {:02X?}", rx);

        Ok(Response::from_bytes(rx))
    }
}

impl JniIsoDep {
    pub fn new(delegate: GlobalRef) -> Self {
        Self { delegate }
    }
}

fn unwrap_or_default<T, E>(result: Result<T, E>, default: T) -> T
where
    E: std::error::Error,
{
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!("{}", err);
            *LAST_ERROR.lock() = Some(err.to_string());
            default
        }
    }
}

macro_rules! wrap {
    ($t: ty, $default: expr, $inner: expr) => {
        unwrap_or_default((|| -> Result<$t, Error> { $inner })(), $default)
    };
}

#[no_mangle]
pub extern "C" fn Java_club_tapp_app_ffi_LibTapp_init() {
    if android_log::init("TAPP.NFC").is_err() {
        warn!("Logger was already initialized");
    }
}

#[no_mangle]
pub unsafe extern "C" fn Java_club_tapp_app_ffi_LibTapp_lastError(
    env: JNIEnv,
    _class: JClass,
) -> jstring {
    match LAST_ERROR.lock().clone() {
        Some(message) => unwrap_or_default(
            env.new_string(message).map(JString::into_raw),
            NULL_STRING,
        ),
        None => NULL_STRING,
    }
}

/// Builds the emulator answering `HostApduService.processCommandApdu`.
#[no_mangle]
pub unsafe extern "C" fn Java_club_tapp_app_ffi_LibTapp_newEmulator(
    env: JNIEnv,
    _class: JClass,
    uuid: JString,
    name: JString,
    slug: JString,
    language: JString,
) -> jlong {
    wrap!(jlong, 0, {
        let mut payload = IdentityPayload::new(get_string(env, uuid)?, get_string(env, name)?);
        if !slug.is_null() {
            payload = payload.with_slug(get_string(env, slug)?);
        }

        let emulator = Emulator::new(&payload, &get_string(env, language)?)?;
        info!("Emulating identity {}", payload.uuid);

        Ok(Box::into_raw(Box::new(emulator)) as jlong)
    })
}

#[no_mangle]
pub unsafe extern "C" fn Java_club_tapp_app_ffi_LibTapp_emulatorProcessApdu(
    env: JNIEnv,
    _class: JClass,
    emulator: jlong,
    apdu: jbyteArray,
) -> jbyteArray {
    wrap!(jbyteArray, NULL_ARRAY, {
        let emulator = handle::<Emulator>(emulator, "Emulator")?;
        let command = env.convert_byte_array(apdu)?;
        let response = emulator.process(&command);

        Ok(env.byte_array_from_slice(&response)?)
    })
}

/// Called from `HostApduService.onDeactivated`.
#[no_mangle]
pub unsafe extern "C" fn Java_club_tapp_app_ffi_LibTapp_emulatorDeactivate(
    _env: JNIEnv,
    _class: JClass,
    emulator: jlong,
) {
    if let Ok(emulator) = handle::<Emulator>(emulator, "Emulator") {
        emulator.deactivate();
    }
}

#[no_mangle]
pub unsafe extern "C" fn Java_club_tapp_app_ffi_LibTapp_emulatorClose(
    _env: JNIEnv,
    _class: JClass,
    emulator: jlong,
) {
    if emulator == 0 {
        return;
    }

    let _ = Box::from_raw(emulator as *mut Emulator);
}

/// Connects the `IsoDep` discovered in reader mode.
#[no_mangle]
pub unsafe extern "C" fn Java_club_tapp_app_ffi_LibTapp_newIsoDepTag(
    env: JNIEnv,
    _class: JClass,
    delegate: JObject,
) -> jlong {
    wrap!(jlong, 0, {
        env.call_method(delegate, "connect", "()V", &[])?;
        let global_ref = env.new_global_ref(delegate)?;
        let tag = JniIsoDep::new(global_ref);

        Ok(Box::into_raw(Box::new(tag)) as jlong)
    })
}

/// Reads the identity off the tag as JSON. Returns null with `lastError` set
/// when the read fails or the tag carries `me`.
#[no_mangle]
pub unsafe extern "C" fn Java_club_tapp_app_ffi_LibTapp_readIdentity(
    env: JNIEnv,
    _class: JClass,
    tag: jlong,
    me: JString,
) -> jstring {
    wrap!(jstring, NULL_STRING, {
        let ctx = JniContext { env };
        let tag = handle::<JniIsoDep>(tag, "IsoDep")?;
        let me = get_string(env, me)?;

        let friend = TagReader::new(Card::new(Box::new(tag))).read_identity(ctx)?;
        check_self_tap(&me, &friend)?;
        info!("Read {} ({})", friend.name, friend.uuid);

        let json = serde_json::to_string(&friend)?;

        Ok(env.new_string(json)?.into_raw())
    })
}

/// Closes the `IsoDep` and hands the radio back to the platform.
#[no_mangle]
pub unsafe extern "C" fn Java_club_tapp_app_ffi_LibTapp_closeTag(
    env: JNIEnv,
    _class: JClass,
    tag: jlong,
) {
    if tag == 0 {
        return;
    }

    let tag = Box::from_raw(tag as *mut JniIsoDep);
    if env
        .call_method(tag.delegate.as_obj(), "close", "()V", &[])
        .is_err()
    {
        let _ = env.exception_clear();
        warn!("IsoDep was already closed");
    }
}

/// Borrows the object behind a handle returned by a `new*` function.
unsafe fn handle<'a, T>(handle: jlong, name: &'static str) -> Result<&'a T, Error> {
    (handle as *const T).as_ref().ok_or(Error::NullHandle(name))
}

fn get_string(env: JNIEnv, str: JString) -> Result<String, Error> {
    Ok(env.get_string(str)?.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_null_handles() {
        let result = unsafe { handle::<Emulator>(0, "Emulator") };

        assert!(matches!(result, Err(Error::NullHandle("Emulator"))));
    }

    #[test]
    fn borrows_live_handles() {
        let payload = IdentityPayload::new("abc-123", "Alice");
        let emulator = Box::into_raw(Box::new(Emulator::new(&payload, "en").unwrap())) as jlong;

        let borrowed = unsafe { handle::<Emulator>(emulator, "Emulator") }.unwrap();
        assert_eq!(Some(&payload), borrowed.payload());

        let _ = unsafe { Box::from_raw(emulator as *mut Emulator) };
    }
}

//! The identity a device broadcasts: JSON inside a single NDEF Text record.

use serde::{Deserialize, Serialize};

use crate::ndef::{self, TextRecord};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Payload is not a TAPP identity: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Identity field `{0}` is empty")]
    EmptyField(&'static str),

    #[error(transparent)]
    Ndef(#[from] ndef::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Public identity handle of a user. Not a credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityPayload {
    pub uuid: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

impl IdentityPayload {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            slug: None,
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    /// Both `uuid` and `name` must carry a value.
    pub fn validate(&self) -> Result<()> {
        if self.uuid.trim().is_empty() {
            return Err(Error::EmptyField("uuid"));
        }

        if self.name.trim().is_empty() {
            return Err(Error::EmptyField("name"));
        }

        Ok(())
    }

    /// Serializes into the canonical JSON text.
    pub fn to_text(&self) -> Result<String> {
        self.validate()?;

        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let payload: Self = serde_json::from_str(text.trim())?;
        payload.validate()?;

        Ok(payload)
    }

    /// Encodes an NDEF message holding one Text record in `language`.
    pub fn to_ndef(&self, language: &str) -> Result<Vec<u8>> {
        let record = TextRecord::new(language, self.to_text()?);

        Ok(ndef::encode_text_message(&record)?)
    }

    /// Decodes the first Text record of an NDEF message.
    pub fn from_ndef(message: &[u8]) -> Result<Self> {
        let records = ndef::parse_message(message)?;
        let text = ndef::first_text(&records)?;

        Self::from_text(&text.text)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(IdentityPayload::new("abc-123", "Alice"))]
    #[case(IdentityPayload::new("5b1e7c0a-27b4-4f0e-9a3c-6c1d2f9e8a10", "Zoë Ødegård").with_slug("zoe"))]
    #[case(IdentityPayload::new("long-name", "n".repeat(400)))]
    fn survives_the_ndef_text_record(#[case] payload: IdentityPayload) {
        let message = payload.to_ndef("en").unwrap();

        assert_eq!(payload, IdentityPayload::from_ndef(&message).unwrap());
    }

    #[test]
    fn omits_an_absent_slug() {
        assert_eq!(
            r#"{"uuid":"abc-123","name":"Alice"}"#,
            IdentityPayload::new("abc-123", "Alice").to_text().unwrap(),
        );
    }

    #[test]
    fn requires_uuid_and_name() {
        assert!(matches!(
            IdentityPayload::from_text(r#"{"uuid":"abc-123"}"#),
            Err(Error::Json(_))
        ));
        assert!(matches!(
            IdentityPayload::from_text(r#"{"uuid":"","name":"Alice"}"#),
            Err(Error::EmptyField("uuid"))
        ));
        assert!(matches!(
            IdentityPayload::new("abc-123", " ").to_text(),
            Err(Error::EmptyField("name"))
        ));
    }

    #[test]
    fn rejects_a_bare_uuid() {
        let message =
            ndef::encode_text_message(&TextRecord::new("en", "abc-123")).unwrap();

        assert!(matches!(
            IdentityPayload::from_ndef(&message),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn rejects_messages_without_text() {
        assert!(matches!(
            IdentityPayload::from_ndef(&[0xD1, 0x01, 0x01, 0x55, 0x04]),
            Err(Error::Ndef(ndef::Error::NoTextRecord))
        ));
    }
}

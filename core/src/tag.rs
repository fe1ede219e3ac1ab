//! NFC Forum Type 4 tag layout: the NDEF application and its two files.

/// AID of the NDEF Tag Application (mapping version 2.0).
pub const NDEF_AID: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];

/// Capability Container file.
pub const CC_FILE_ID: [u8; 2] = [0xE1, 0x03];

/// NDEF file: a 2-octet NLEN followed by the NDEF message.
pub const NDEF_FILE_ID: [u8; 2] = [0xE1, 0x04];

pub const CC_LENGTH: u16 = 0x000F;
pub const NLEN_SIZE: u16 = 2;

/// Highest offset `READ BINARY` can address with a short P1-P2.
pub const MAX_FILE_OFFSET: usize = 0x7FFF;

/// Largest message whose NDEF file stays within the addressable offsets.
pub const MAX_NDEF_MESSAGE: usize = MAX_FILE_OFFSET - NLEN_SIZE as usize;

const MAPPING_VERSION: u8 = 0x20;
const NDEF_FILE_CONTROL_TLV: u8 = 0x04;
const NDEF_FILE_CONTROL_LENGTH: u8 = 0x06;

const DEFAULT_MLE: u16 = 0x00FF;
const DEFAULT_MLC: u16 = 0x00FF;

pub const ACCESS_GRANTED: u8 = 0x00;
pub const ACCESS_DENIED: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Capability Container is malformed: {0}")]
    InvalidCapabilityContainer(String),

    #[error("NDEF message of {0} octets does not fit in the NDEF file")]
    MessageTooLarge(usize),
}

/// Contents of the Capability Container file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CapabilityContainer {
    pub version: u8,

    /// Maximum data size of a `READ BINARY` response.
    pub max_le: u16,

    /// Maximum data size of an `UPDATE BINARY` command.
    pub max_lc: u16,

    pub ndef_file_id: [u8; 2],

    /// Size of the NDEF file, NLEN included.
    pub ndef_max_size: u16,

    pub read_access: u8,
    pub write_access: u8,
}

impl CapabilityContainer {
    /// A CC for a read-only tag holding `ndef_max_size` octets in its NDEF file.
    pub fn read_only(ndef_max_size: u16) -> Self {
        Self {
            version: MAPPING_VERSION,
            max_le: DEFAULT_MLE,
            max_lc: DEFAULT_MLC,
            ndef_file_id: NDEF_FILE_ID,
            ndef_max_size,
            read_access: ACCESS_GRANTED,
            write_access: ACCESS_DENIED,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CC_LENGTH as usize);
        buf.extend_from_slice(&CC_LENGTH.to_be_bytes());
        buf.push(self.version);
        buf.extend_from_slice(&self.max_le.to_be_bytes());
        buf.extend_from_slice(&self.max_lc.to_be_bytes());
        buf.push(NDEF_FILE_CONTROL_TLV);
        buf.push(NDEF_FILE_CONTROL_LENGTH);
        buf.extend_from_slice(&self.ndef_file_id);
        buf.extend_from_slice(&self.ndef_max_size.to_be_bytes());
        buf.push(self.read_access);
        buf.push(self.write_access);

        buf
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        match bytes {
            [cclen_hi, cclen_lo, version, mle_hi, mle_lo, mlc_hi, mlc_lo, NDEF_FILE_CONTROL_TLV, NDEF_FILE_CONTROL_LENGTH, id_hi, id_lo, size_hi, size_lo, read_access, write_access, ..] =>
            {
                let cclen = u16::from_be_bytes([*cclen_hi, *cclen_lo]);
                if cclen < CC_LENGTH {
                    return Err(Error::InvalidCapabilityContainer(format!(
                        "CCLEN {cclen:#06X} is shorter than the mandatory fields"
                    )));
                }

                Ok(Self {
                    version: *version,
                    max_le: u16::from_be_bytes([*mle_hi, *mle_lo]),
                    max_lc: u16::from_be_bytes([*mlc_hi, *mlc_lo]),
                    ndef_file_id: [*id_hi, *id_lo],
                    ndef_max_size: u16::from_be_bytes([*size_hi, *size_lo]),
                    read_access: *read_access,
                    write_access: *write_access,
                })
            }
            _ if bytes.len() < CC_LENGTH as usize => Err(Error::InvalidCapabilityContainer(
                format!("{} octets read", bytes.len()),
            )),
            _ => Err(Error::InvalidCapabilityContainer(
                "missing NDEF File Control TLV".to_string(),
            )),
        }
    }
}

/// Prefixes the NDEF message with its NLEN.
pub fn ndef_file(message: &[u8]) -> Result<Vec<u8>, Error> {
    if message.len() > MAX_NDEF_MESSAGE {
        return Err(Error::MessageTooLarge(message.len()));
    }

    let mut file = Vec::with_capacity(message.len() + NLEN_SIZE as usize);
    file.extend_from_slice(&(message.len() as u16).to_be_bytes());
    file.extend_from_slice(message);

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lays_out_the_capability_container() {
        assert_eq!(
            vec![
                0x00, 0x0F, 0x20, 0x00, 0xFF, 0x00, 0xFF, 0x04, 0x06, 0xE1, 0x04, 0x00, 0x42,
                0x00, 0xFF,
            ],
            CapabilityContainer::read_only(0x42).to_bytes(),
        );
    }

    #[test]
    fn parses_a_foreign_capability_container() {
        let cc = CapabilityContainer::parse(&[
            0x00, 0x0F, 0x20, 0x00, 0x3B, 0x00, 0x34, 0x04, 0x06, 0xE1, 0x04, 0x00, 0x32, 0x00,
            0x00,
        ])
        .unwrap();

        assert_eq!(0x3B, cc.max_le);
        assert_eq!(NDEF_FILE_ID, cc.ndef_file_id);
        assert_eq!(0x32, cc.ndef_max_size);
        assert_eq!(ACCESS_GRANTED, cc.write_access);
    }

    #[test]
    fn rejects_short_capability_containers() {
        assert!(matches!(
            CapabilityContainer::parse(&[0x00, 0x0F, 0x20]),
            Err(Error::InvalidCapabilityContainer(_))
        ));
    }

    #[test]
    fn prefixes_the_message_length() {
        assert_eq!(vec![0x00, 0x03, 0xAA, 0xBB, 0xCC], ndef_file(&[0xAA, 0xBB, 0xCC]).unwrap());
        assert_eq!(
            Err(Error::MessageTooLarge(0xFFFF)),
            ndef_file(&vec![0u8; 0xFFFF])
        );
    }

    #[test]
    fn keeps_the_ndef_file_within_short_offsets() {
        let file = ndef_file(&vec![0u8; MAX_NDEF_MESSAGE]).unwrap();
        assert_eq!(MAX_FILE_OFFSET, file.len());
        assert_eq!([0x7F, 0xFD], file[..2]);

        assert_eq!(
            Err(Error::MessageTooLarge(MAX_NDEF_MESSAGE + 1)),
            ndef_file(&vec![0u8; MAX_NDEF_MESSAGE + 1])
        );
    }
}

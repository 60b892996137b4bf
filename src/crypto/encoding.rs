/// Text-safe encodings and the encrypt-then-encode helpers built on them.

use crate::crypto::cipher::Cipher;
use crate::error::{KitError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Encoding applied to ciphertext for transport through text-only channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Upper-case hexadecimal.
    Base16,
    /// RFC 4648 base32 with padding.
    Base32,
    /// Standard base64 with padding.
    Base64,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Base16 => "base16",
            Encoding::Base32 => "base32",
            Encoding::Base64 => "base64",
        }
    }

    pub fn encode(&self, data: &[u8]) -> String {
        match self {
            Encoding::Base16 => hex::encode_upper(data),
            Encoding::Base32 => data_encoding::BASE32.encode(data),
            Encoding::Base64 => BASE64_STANDARD.encode(data),
        }
    }

    pub fn decode(&self, text: &[u8]) -> Result<Vec<u8>> {
        let text = trim_ascii_whitespace(text);
        match self {
            Encoding::Base16 => hex::decode(text)
                .map_err(|e| KitError::DecodeError(format!("base16: {}", e))),
            Encoding::Base32 => data_encoding::BASE32
                .decode(text)
                .map_err(|e| KitError::DecodeError(format!("base32: {}", e))),
            Encoding::Base64 => BASE64_STANDARD
                .decode(text)
                .map_err(|e| KitError::DecodeError(format!("base64: {}", e))),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = KitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "base16" | "hex" => Ok(Encoding::Base16),
            "base32" => Ok(Encoding::Base32),
            "base64" => Ok(Encoding::Base64),
            other => Err(KitError::ConfigError(format!("Unknown encoding: {}", other))),
        }
    }
}

fn trim_ascii_whitespace(data: &[u8]) -> &[u8] {
    let start = data.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(data.len());
    let end = data.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &data[start..end]
}

/// Encrypt `data` with `secret`, then apply `encoding` if given.
pub fn encode_data(data: &[u8], secret: impl AsRef<[u8]>, encoding: Option<Encoding>) -> Result<Vec<u8>> {
    let encrypted = Cipher::new(secret)?.encrypt(data)?;
    Ok(match encoding {
        Some(encoding) => encoding.encode(&encrypted).into_bytes(),
        None => encrypted,
    })
}

/// Reverse of [`encode_data`].
pub fn decode_data(encoded: &[u8], secret: impl AsRef<[u8]>, encoding: Option<Encoding>) -> Result<Vec<u8>> {
    let encrypted = match encoding {
        Some(encoding) => encoding.decode(encoded)?,
        None => encoded.to_vec(),
    };
    Cipher::new(secret)?.decrypt(&encrypted)
}

/// Serialize `value` as JSON and pass it through [`encode_data`].
pub fn encode_value<T: Serialize>(value: &T, secret: impl AsRef<[u8]>, encoding: Option<Encoding>) -> Result<Vec<u8>> {
    let serialized = serde_json::to_vec(value)?;
    encode_data(&serialized, secret, encoding)
}

/// Reverse of [`encode_value`].
pub fn decode_value<T: DeserializeOwned>(encoded: &[u8], secret: impl AsRef<[u8]>, encoding: Option<Encoding>) -> Result<T> {
    let decoded = decode_data(encoded, secret, encoding)?;
    Ok(serde_json::from_slice(&decoded)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_encoding_names() {
        for encoding in [Encoding::Base16, Encoding::Base32, Encoding::Base64] {
            assert_eq!(encoding.name().parse::<Encoding>().unwrap(), encoding);
            assert_eq!(encoding.to_string(), encoding.name());
        }
        assert_eq!("BASE64".parse::<Encoding>().unwrap(), Encoding::Base64);
        assert!("rot13".parse::<Encoding>().is_err());
    }

    #[test]
    fn test_encoders_match_rfc4648() {
        assert_eq!(Encoding::Base16.encode(b"foobar"), "666F6F626172");
        assert_eq!(Encoding::Base32.encode(b"foobar"), "MZXW6YTBOI======");
        assert_eq!(Encoding::Base64.encode(b"foobar"), "Zm9vYmFy");

        assert_eq!(Encoding::Base16.decode(b"666F6F626172").unwrap(), b"foobar");
        assert_eq!(Encoding::Base32.decode(b"MZXW6YTBOI======").unwrap(), b"foobar");
        assert_eq!(Encoding::Base64.decode(b"Zm9vYmFy\n").unwrap(), b"foobar");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(Encoding::Base64.decode(b"!!!"), Err(KitError::DecodeError(_))));
        assert!(matches!(Encoding::Base16.decode(b"XYZ"), Err(KitError::DecodeError(_))));
    }

    #[test]
    fn test_encode_data_each_encoding() {
        for encoding in [None, Some(Encoding::Base16), Some(Encoding::Base32), Some(Encoding::Base64)] {
            let encoded = encode_data(b"Attack at dawn.", "secret-key", encoding).unwrap();
            let decoded = decode_data(&encoded, "secret-key", encoding).unwrap();
            assert_eq!(decoded, b"Attack at dawn.");
        }
    }

    #[test]
    fn test_decode_known_base64() {
        let encoded = b"W+ryRfcON4HcWbwoO+25vprJF+D7GcLHDAZ1p5UCJMTm+wd4y3xL966XX/BkldyCNlHYBo1wuitT/+H9DSPU";
        let decoded = decode_data(encoded, "secret-key", Some(Encoding::Base64)).unwrap();
        assert_eq!(decoded, b"Attack at dawn.");
    }

    #[test]
    fn test_encode_value_structured() {
        let mut value = BTreeMap::new();
        value.insert("user".to_string(), vec![1u32, 2, 3]);
        value.insert("group".to_string(), vec![]);

        let encoded = encode_value(&value, "secret-key", Some(Encoding::Base64)).unwrap();
        let decoded: BTreeMap<String, Vec<u32>> =
            decode_value(&encoded, "secret-key", Some(Encoding::Base64)).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_decode_value_wrong_shape() {
        let encoded = encode_value(&"just a string", "k", None).unwrap();
        let result: Result<Vec<u32>> = decode_value(&encoded, "k", None);
        assert!(matches!(result, Err(KitError::JsonError(_))));
    }
}

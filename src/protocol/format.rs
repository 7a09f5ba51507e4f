use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// How one segment of a line (a whole record, a key or a value) is decoded.
pub trait Format: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Prefix of the protocol's counter group.
    const NAME: &'static str;

    fn parse(raw: &[u8]) -> Result<Self::Item, FormatError>;
}

/// How a `T` is written as one segment of a line.
pub trait EncodeAs<T>: Format {
    fn encode(item: &T, out: &mut Vec<u8>) -> Result<(), FormatError>;
}

/// JSON documents.
pub struct Json;

/// Bytes passed through as they are.
pub struct Raw;

impl Format for Json {
    type Item = serde_json::Value;

    const NAME: &'static str = "Json";

    fn parse(raw: &[u8]) -> Result<Self::Item, FormatError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

impl<T: Serialize> EncodeAs<T> for Json {
    fn encode(item: &T, out: &mut Vec<u8>) -> Result<(), FormatError> {
        Ok(serde_json::to_writer(out, item)?)
    }
}

impl Format for Raw {
    type Item = Bytes;

    const NAME: &'static str = "Raw";

    fn parse(raw: &[u8]) -> Result<Self::Item, FormatError> {
        Ok(Bytes::copy_from_slice(raw))
    }
}

impl<T: AsRef<[u8]>> EncodeAs<T> for Raw {
    fn encode(item: &T, out: &mut Vec<u8>) -> Result<(), FormatError> {
        out.extend_from_slice(item.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn json_rejects_non_string_map_keys() {
        let mut map = HashMap::new();
        map.insert(vec![1u8], 1);
        let mut out = Vec::new();
        assert!(<Json as EncodeAs<_>>::encode(&map, &mut out).is_err());
    }

    #[test]
    fn raw_passes_bytes_through() {
        let mut out = Vec::new();
        <Raw as EncodeAs<_>>::encode(&"a\tb", &mut out).unwrap();
        assert_eq!(out, b"a\tb");
        assert_eq!(Raw::parse(b"x").unwrap(), Bytes::from_static(b"x"));
    }
}

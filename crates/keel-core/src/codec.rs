use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};

/// Converts typed values to and from the plaintext bytes that get encrypted.
pub trait ObjectCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>, String>;

    fn decode(&self, bytes: &[u8]) -> Result<T, String>;
}

/// JSON codec for any serde type.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> ObjectCodec<T> for JsonCodec<T> {
    fn encode(&self, value: &T) -> Result<Vec<u8>, String> {
        serde_json::to_vec(value).map_err(|e| e.to_string())
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    #[test]
    fn json_codec_rejects_garbage() {
        let codec = JsonCodec::<Profile>::new();
        let bytes = codec
            .encode(&Profile {
                name: "ada".into(),
                visits: 3,
            })
            .expect("encode");
        assert_eq!(codec.decode(&bytes).expect("decode").visits, 3);
        assert!(codec.decode(b"{not json").is_err());
    }
}

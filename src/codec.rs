//! Key encoding and value (de)serialization.
//!
//! Every layer that uses a key as a map, lock or backend key goes through a
//! [`KeyEncoder`]. Encoders must be pure: the same key always encodes to the
//! same string, otherwise deduplication and locking silently stop working.

use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{CacheError, Result};

/// Turns a key into its canonical string form.
pub type KeyEncoder<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;

/// Turns a canonical string back into a key. `None` if the string is not a valid key.
pub type KeyDecoder<K> = Arc<dyn Fn(&str) -> Option<K> + Send + Sync>;

type MarshalFn<V> = Arc<dyn Fn(&V) -> Result<Vec<u8>> + Send + Sync>;
type UnmarshalFn<V> = Arc<dyn Fn(&[u8]) -> Result<V> + Send + Sync>;

/// Encoder using the key's `Display` implementation.
pub fn display_encoder<K>() -> KeyEncoder<K>
where
    K: Display + 'static,
{
    Arc::new(|key: &K| key.to_string())
}

/// Decoder using the key's `FromStr` implementation.
pub fn parse_decoder<K>() -> KeyDecoder<K>
where
    K: FromStr + 'static,
{
    Arc::new(|raw: &str| raw.parse().ok())
}

/// Build a namespaced backend key.
///
/// Format: `{prefix}:{key}`, or just `{key}` when the prefix is empty.
pub fn namespaced(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        return key.to_string();
    }
    format!("{}:{}", prefix, key)
}

/// Marshal/unmarshal pair used by stores that keep values as bytes.
pub struct ValueCodec<V> {
    marshal: MarshalFn<V>,
    unmarshal: UnmarshalFn<V>,
}

impl<V> Clone for ValueCodec<V> {
    fn clone(&self) -> Self {
        ValueCodec {
            marshal: Arc::clone(&self.marshal),
            unmarshal: Arc::clone(&self.unmarshal),
        }
    }
}

impl<V> ValueCodec<V> {
    /// Create a codec from custom functions, e.g. for a binary format.
    pub fn new<M, U>(marshal: M, unmarshal: U) -> Self
    where
        M: Fn(&V) -> Result<Vec<u8>> + Send + Sync + 'static,
        U: Fn(&[u8]) -> Result<V> + Send + Sync + 'static,
    {
        ValueCodec {
            marshal: Arc::new(marshal),
            unmarshal: Arc::new(unmarshal),
        }
    }

    pub fn marshal(&self, value: &V) -> Result<Vec<u8>> {
        (self.marshal)(value)
    }

    pub fn unmarshal(&self, data: &[u8]) -> Result<V> {
        (self.unmarshal)(data)
    }
}

impl<V> ValueCodec<V>
where
    V: Serialize + DeserializeOwned,
{
    /// JSON codec backed by `serde_json`.
    pub fn json() -> Self {
        ValueCodec::new(
            |value: &V| serde_json::to_vec(value).map_err(|e| CacheError::Marshal(e.to_string())),
            |data: &[u8]| {
                serde_json::from_slice(data).map_err(|e| CacheError::Unmarshal(e.to_string()))
            },
        )
    }
}

impl<V> Default for ValueCodec<V>
where
    V: Serialize + DeserializeOwned,
{
    fn default() -> Self {
        ValueCodec::json()
    }
}

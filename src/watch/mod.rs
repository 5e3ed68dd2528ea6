//! Reactive views over namespace nodes
//!
//! Two primitives compose into the whole entity layer:
//! - [`WatchedCell`]: a single node's typed value, kept current by re-arming
//!   one-shot watches
//! - [`WatchedDir`]: the set of children under a parent, mapped to lazily
//!   constructed façades
//!
//! Every observable is a (snapshot query, subscribe → handle) pair.

pub mod collection;
pub mod value;

pub use collection::WatchedDir;
pub use value::WatchedCell;

use crate::common::Result;

/// Handle returned by listener registration; pass back to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(pub(crate) u64);

/// Anything that holds watch registrations and can let go of them.
///
/// Collections detach their child façades when membership shrinks; a
/// detached façade stops re-arming and drops its listeners.
pub trait Detachable {
    fn detach(&self);
}

/// Codec for the small UTF-8 payloads the metadata layer persists.
pub trait NodeValue: Clone + PartialEq + Send + Sync + Sized + 'static {
    fn decode(data: &[u8]) -> Result<Self>;
    fn encode(&self) -> Vec<u8>;
}

impl NodeValue for String {
    fn decode(data: &[u8]) -> Result<Self> {
        String::from_utf8(data.to_vec()).map_err(|e| crate::Error::malformed(e.to_string()))
    }

    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl NodeValue for i32 {
    fn decode(data: &[u8]) -> Result<Self> {
        let text = String::decode(data)?;
        text.parse()
            .map_err(|_| crate::Error::malformed(format!("not a decimal int: {text:?}")))
    }

    fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl NodeValue for i64 {
    fn decode(data: &[u8]) -> Result<Self> {
        let text = String::decode(data)?;
        text.parse()
            .map_err(|_| crate::Error::malformed(format!("not a decimal long: {text:?}")))
    }

    fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl NodeValue for bool {
    fn decode(data: &[u8]) -> Result<Self> {
        match String::decode(data)?.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(crate::Error::malformed(format!("not a boolean: {other:?}"))),
        }
    }

    fn encode(&self) -> Vec<u8> {
        if *self { b"true".to_vec() } else { b"false".to_vec() }
    }
}

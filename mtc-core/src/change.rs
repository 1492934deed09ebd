use std::fmt;

use md5::{Digest, Md5};

use crate::Timestamp;

const FIELD_SEPARATOR: u8 = 0x1f;

/// Content hash of an entity with its timestamp left out.
///
/// Two updates to the same key are duplicates iff their change ids are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChangeId([u8; 16]);

impl ChangeId {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Folds a timestamp into the id, so only exact repeats of the same
    /// historical sample collide. Used as the buffer-queue key.
    pub fn with_timestamp(self, timestamp: Timestamp) -> ChangeId {
        let mut hasher = Md5::new();
        hasher.update(self.0);
        hasher.update(timestamp.as_micros().to_le_bytes());
        ChangeId(digest(hasher))
    }

    /// Concatenation hash, used for conditions (one id per fault state).
    pub fn combine<I>(ids: I) -> ChangeId
    where
        I: IntoIterator<Item = ChangeId>,
    {
        let mut hasher = Md5::new();
        for id in ids {
            hasher.update(id.0);
        }
        ChangeId(digest(hasher))
    }
}

impl fmt::Debug for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeId({self})")
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

fn digest(hasher: Md5) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hasher.finalize());
    bytes
}

/// Feeds canonical fields into an MD5 digest.
pub struct ChangeHasher(Md5);

impl ChangeHasher {
    pub fn new(kind: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(kind.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        Self(hasher)
    }

    pub fn field(&mut self, value: &str) -> &mut Self {
        self.0.update(value.as_bytes());
        self.0.update([FIELD_SEPARATOR]);
        self
    }

    pub fn optional(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(value) => {
                self.0.update([1]);
                self.field(value)
            }
            None => {
                self.0.update([0, FIELD_SEPARATOR]);
                self
            }
        }
    }

    pub fn number(&mut self, value: f64) -> &mut Self {
        self.0.update(value.to_bits().to_le_bytes());
        self.0.update([FIELD_SEPARATOR]);
        self
    }

    pub fn finish(self) -> ChangeId {
        ChangeId(digest(self.0))
    }
}

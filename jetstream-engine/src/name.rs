use std::fmt::{self, Display};
use std::ops::Deref;

use bytestring::ByteString;

/// Maximum length allowed for a stream name
///
/// Arbitrary but generous; matches the subject length ceiling used by
/// [`jetstream_proto::Subject`] so a stream name can always be embedded as
/// a subject token elsewhere (e.g. `$JS.API.STREAM.CREATE.<name>`).
const MAX_LEN: usize = 256;

/// A validated stream identity
///
/// Guaranteed [^1] to be non-empty, `≤ 256` bytes, and free of `.`, `*`,
/// `>` and whitespace.
///
/// [^1]: Because [`StreamName::from_dangerous_value`] is safe to call,
///       unsafe code must not assume the above invariant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamName(ByteString);

impl StreamName {
    /// Construct a `StreamName` from a static string
    ///
    /// # Panics
    ///
    /// Will panic if `value` isn't a valid `StreamName`
    #[must_use]
    pub fn from_static(value: &'static str) -> Self {
        Self::try_from(ByteString::from_static(value)).expect("invalid StreamName")
    }

    /// Construct a `StreamName` from a string, without checking invariants
    ///
    /// # Security
    ///
    /// See [`jetstream_proto::Subject::from_dangerous_value`] for the
    /// rationale; the same caveats apply here.
    #[must_use]
    pub fn from_dangerous_value(value: ByteString) -> Self {
        if cfg!(debug_assertions) {
            if let Err(err) = validate(&value) {
                panic!("StreamName {value:?} isn't valid: {err:?}");
            }
        }
        Self(value)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl TryFrom<ByteString> for StreamName {
    type Error = StreamNameError;

    fn try_from(value: ByteString) -> Result<Self, Self::Error> {
        validate(&value)?;
        Ok(Self::from_dangerous_value(value))
    }
}

impl TryFrom<String> for StreamName {
    type Error = StreamNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = ByteString::from(value);
        validate(&value)?;
        Ok(Self::from_dangerous_value(value))
    }
}

impl TryFrom<&str> for StreamName {
    type Error = StreamNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(ByteString::from(value))
    }
}

impl From<StreamName> for ByteString {
    fn from(value: StreamName) -> Self {
        value.0
    }
}

impl AsRef<str> for StreamName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for StreamName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl serde::Serialize for StreamName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_str().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for StreamName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = ByteString::deserialize(deserializer)?;
        s.try_into().map_err(serde::de::Error::custom)
    }
}

/// An error encountered while validating [`StreamName`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamNameError {
    #[error("stream name is empty")]
    Empty,
    #[error("stream name is too long")]
    TooLong,
    #[error("stream name contains an illegal character ('.', '*', '>' or whitespace)")]
    IllegalCharacter,
}

fn validate(name: &str) -> Result<(), StreamNameError> {
    if name.is_empty() {
        return Err(StreamNameError::Empty);
    }
    if name.len() > MAX_LEN {
        return Err(StreamNameError::TooLong);
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>'))
    {
        return Err(StreamNameError::IllegalCharacter);
    }
    Ok(())
}

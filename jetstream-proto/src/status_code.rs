use core::{
    fmt::{self, Display, Formatter},
    num::NonZeroU16,
    str::FromStr,
};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// A NATS protocol status code, as carried on the status line of a
/// headers-only control message (`NATS/1.0 100 Idle Heartbeat`)
///
/// Values are guaranteed to be in range `100..1000`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StatusCode(NonZeroU16);

impl StatusCode {
    /// An upstream consumer heartbeat or flow-control control message,
    /// carrying no payload
    pub const IDLE_HEARTBEAT: StatusCode = Self::new_internal(100);
    pub const OK: StatusCode = Self::new_internal(200);
    pub const NOT_FOUND: StatusCode = Self::new_internal(404);
    pub const TIMEOUT: StatusCode = Self::new_internal(408);
    pub const NO_RESPONDERS: StatusCode = Self::new_internal(503);

    /// Decode a status code from its 3-digit ASCII representation
    ///
    /// # Errors
    ///
    /// Returns an error if `buf` isn't exactly 3 ASCII digits.
    pub fn from_ascii_bytes(buf: &[u8]) -> Result<Self, StatusCodeError> {
        if buf.len() != 3 || !buf.iter().all(u8::is_ascii_digit) {
            return Err(StatusCodeError);
        }
        let value = buf
            .iter()
            .fold(0u16, |acc, &digit| acc * 10 + u16::from(digit - b'0'));
        value.try_into()
    }

    const fn new_internal(val: u16) -> Self {
        match NonZeroU16::new(val) {
            Some(val) => Self(val),
            None => unreachable!(),
        }
    }
}

impl FromStr for StatusCode {
    type Err = StatusCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_ascii_bytes(s.as_bytes())
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = StatusCodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        if (100..1000).contains(&value) {
            Ok(Self(NonZeroU16::new(value).unwrap()))
        } else {
            Err(StatusCodeError)
        }
    }
}

impl From<StatusCode> for u16 {
    fn from(value: StatusCode) -> Self {
        value.0.get()
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        u16::from(*self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let n = u16::deserialize(deserializer)?;
        n.try_into().map_err(de::Error::custom)
    }
}

/// An error encountered while parsing [`StatusCode`]
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
#[error("invalid status code")]
pub struct StatusCodeError;

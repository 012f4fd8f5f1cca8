#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub use self::message::MessageBase;
pub use self::status_code::StatusCode;
pub use self::subject::Subject;

pub mod headers;
mod message;
mod status_code;
mod subject;

pub mod error {
    pub use super::status_code::StatusCodeError;
    pub use super::subject::SubjectValidateError;
}

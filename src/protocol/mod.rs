//! Line-delimited JSON request/response codec.

pub mod value;
pub mod wire;

pub use value::Value;
pub use wire::{
    build_error, build_success, check_response_error, decode, encode, encode_request, Method,
    RemoteError, Request, Response, MAX_MESSAGE_SIZE, TERMINATOR,
};

use std::fmt;

use crate::error::{Error, Result};

use super::value::Value;

/// Fixed session buffer size. A message that does not fit is a local error.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Messages are newline delimited.
pub const TERMINATOR: u8 = b'\n';

/// Remote methods spoken by the gateway and its peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    // DEVICE METHODS
    /// Whether the device has an event pending
    Status,
    /// Pops the device's next pending event id
    NextEvent,

    // NAME SERVICE METHODS
    /// Checks the gateway's configuration and address
    VerifyGateway,
    /// The device roster
    Hostnames,

    // GATEWAY METHODS
    /// The gateway's wall clock, asked by the name service
    GetTimestamp,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Status => "status",
            Method::NextEvent => "next_event",
            Method::VerifyGateway => "verify_gateway",
            Method::Hostnames => "hostnames",
            Method::GetTimestamp => "get_timestamp",
        }
    }
}

impl TryFrom<&str> for Method {
    type Error = Error;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        match name {
            "status" => Ok(Method::Status),
            "next_event" => Ok(Method::NextEvent),
            "verify_gateway" => Ok(Method::VerifyGateway),
            "hostnames" => Ok(Method::Hostnames),
            "get_timestamp" => Ok(Method::GetTimestamp),
            other => Err(Error::NotFound(other.to_owned())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{"method": <name>, "args": [...]}`
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub method: String,
    pub args: Vec<Value>,
}

impl Request {
    pub fn new(method: Method, args: Vec<Value>) -> Self {
        Self {
            method: method.as_str().to_owned(),
            args,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::object([
            ("method", Value::Str(self.method.clone())),
            ("args", Value::Array(self.args.clone())),
        ])
    }

    /// Serializes the request into one terminated line.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(&self.to_value())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::from_value(&decode(bytes)?)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let method = value.get_key("method")?.as_str()?.to_owned();
        let args = match value.get_key("args")? {
            Value::Array(args) => args.clone(),
            other => {
                return Err(Error::Protocol(format!(
                    "request args must be an array, found {}",
                    other.kind()
                )))
            }
        };
        Ok(Self { method, args })
    }
}

/// An application-level failure reported by a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteError {
    pub name: String,
    pub message: String,
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        Error::Remote {
            name: e.name,
            message: e.message,
        }
    }
}

/// A decoded response: exactly one of `result` or `error` is set for a
/// well-formed peer.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub result: Option<Value>,
    pub error: Option<RemoteError>,
}

impl Response {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::from_value(decode(bytes)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let error = remote_error(&value)?;
        let result = match value {
            Value::Object(entries) => entries
                .into_iter()
                .find(|(k, _)| k == "result")
                .map(|(_, v)| v),
            other => {
                return Err(Error::Protocol(format!(
                    "response must be an object, found {}",
                    other.kind()
                )))
            }
        };
        Ok(Self { result, error })
    }

    /// The result, or the peer's error as an `Err`.
    pub fn into_result(self) -> Result<Value> {
        if let Some(e) = self.error {
            return Err(e.into());
        }
        self.result.ok_or_else(|| Error::NotFound("result".to_owned()))
    }
}

/// Frames a value as one terminated line, enforcing the session buffer size.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(&serde_json::Value::from(value))?;
    bytes.push(TERMINATOR);
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(Error::MessageTooLarge {
            len: bytes.len(),
            limit: MAX_MESSAGE_SIZE,
        });
    }
    Ok(bytes)
}

pub fn encode_request(method: Method, args: Vec<Value>) -> Result<Vec<u8>> {
    Request::new(method, args).encode()
}

/// Parses one message. Trailing whitespace, including the terminator, is
/// ignored.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let json: serde_json::Value = serde_json::from_slice(bytes)?;
    Ok(Value::from(json))
}

/// `{"result": result}`
pub fn build_success(result: Value) -> Value {
    Value::object([("result", result)])
}

/// `{"error": {"name": name, "args": [message]}}`
pub fn build_error(name: &str, message: &str) -> Value {
    Value::object([(
        "error",
        Value::object([
            ("name", Value::from(name)),
            ("args", Value::array([Value::from(message)])),
        ]),
    )])
}

/// Fails with the peer's error if `value` carries one.
pub fn check_response_error(value: &Value) -> Result<()> {
    match remote_error(value)? {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn remote_error(value: &Value) -> Result<Option<RemoteError>> {
    if !value.has_key("error") {
        return Ok(None);
    }
    let error = value.get_key("error")?;
    let name = error.get_key("name")?.as_str()?.to_owned();
    let message = error.get_key("args")?.get_at(0)?.as_str()?.to_owned();
    Ok(Some(RemoteError { name, message }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let bytes = encode_request(Method::Status, vec![Value::from("dev-1")]).unwrap();
        assert_eq!(bytes, b"{\"method\":\"status\",\"args\":[\"dev-1\"]}\n".to_vec());
    }

    #[test]
    fn test_request_decodes_back() {
        let request = Request::new(Method::NextEvent, vec![]);
        let decoded = Request::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(Method::try_from(decoded.method.as_str()).unwrap(), Method::NextEvent);
    }

    #[test]
    fn test_literals_survive_the_wire() {
        let literals = [
            Value::object([("k", Value::from("v")), ("n", Value::from(3))]),
            Value::array([Value::from(1), Value::from(false)]),
            Value::from("quote \" and newline \n"),
            Value::from(true),
            Value::from(-42),
        ];
        for literal in literals {
            assert_eq!(decode(&encode(&literal).unwrap()).unwrap(), literal);
        }
    }

    #[test]
    fn test_success_response() {
        let response = Response::decode(br#"{"result":"foo"}"#).unwrap();
        assert_eq!(response.result, Some(Value::from("foo")));
        assert_eq!(response.error, None);
        assert_eq!(response.into_result().unwrap(), Value::from("foo"));
    }

    #[test]
    fn test_error_response() {
        let response = Response::decode(br#"{"error":{"name":"Error","args":["boom"]}}"#).unwrap();
        assert_eq!(response.result, None);
        let error = response.error.clone().unwrap();
        assert_eq!(error.name, "Error");
        assert_eq!(error.message, "boom");
        assert!(matches!(
            response.into_result(),
            Err(Error::Remote { name, message }) if name == "Error" && message == "boom"
        ));
    }

    #[test]
    fn test_built_messages_match_wire_shapes() {
        assert_eq!(build_success(Value::from(1)).to_string(), r#"{"result":1}"#);
        let error = build_error("EventError", "queue is empty");
        assert_eq!(
            error.to_string(),
            r#"{"error":{"name":"EventError","args":["queue is empty"]}}"#
        );
        assert!(check_response_error(&error).is_err());
        assert!(check_response_error(&build_success(Value::Null)).is_ok());
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(decode(b"{"), Err(Error::Protocol(_))));
        assert!(matches!(Response::decode(b"[1]"), Err(Error::Protocol(_))));
        assert!(matches!(
            Response::decode(br#"{"error":{"name":"E"}}"#),
            Err(Error::NotFound(k)) if k == "args"
        ));
    }

    #[test]
    fn test_missing_result() {
        let response = Response::decode(b"{}").unwrap();
        assert!(matches!(response.into_result(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_oversized_message_is_rejected() {
        let big = Value::from("x".repeat(MAX_MESSAGE_SIZE));
        assert!(matches!(
            encode(&big),
            Err(Error::MessageTooLarge { limit: MAX_MESSAGE_SIZE, .. })
        ));
    }
}

use std::fmt;

/// Everything that can go wrong between collecting input and getting a
/// usable response back.
#[derive(Debug)]
pub enum ClientError {
    /// A required field or file was missing; no request was sent.
    Validation(String),
    /// The backend answered with a truthy `error` field.
    Server(String),
    Http(reqwest::Error),
    /// The body was not JSON or lacked the field the endpoint promises.
    Decode(String),
    Url(url::ParseError),
    Io(std::io::Error),
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        ClientError::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ClientError::Validation(_))
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Validation(message) | ClientError::Server(message) => f.write_str(message),
            ClientError::Http(err) => write!(f, "request failed: {err}"),
            ClientError::Decode(message) => write!(f, "unexpected response: {message}"),
            ClientError::Url(err) => write!(f, "invalid backend URL: {err}"),
            ClientError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Http(err) => Some(err),
            ClientError::Url(err) => Some(err),
            ClientError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        ClientError::Http(value)
    }
}

impl From<url::ParseError> for ClientError {
    fn from(value: url::ParseError) -> Self {
        ClientError::Url(value)
    }
}

impl From<std::io::Error> for ClientError {
    fn from(value: std::io::Error) -> Self {
        ClientError::Io(value)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(value: serde_json::Error) -> Self {
        ClientError::Decode(value.to_string())
    }
}

use std::io;
use thiserror::Error as ThisError;

/// Everything that can go wrong while parsing, routing, or answering a request.
///
/// Parse-phase variants are produced by [`Request::parse`](crate::Request::parse),
/// `InvalidMethod` by route registration, `UnsupportedHandlerResult` by
/// [`Router::dispatch`](crate::Router::dispatch) and `TransportWrite` by
/// [`Response::send`](crate::Response::send).
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("request line must contain exactly method, path and version")]
    MalformedRequest,
    #[error("stream ended before the request was complete")]
    TruncatedStream,

    #[error("header line without `: ` separator")]
    InvalidHeader,
    #[error("Content-Length is not a valid number")]
    InvalidContentLength,
    #[error("request line or header is not valid UTF-8")]
    InvalidEncoding,

    #[error("line exceeds the configured size limit")]
    LineTooLong,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("request body exceeds the configured size limit")]
    BodyTooLarge,
    #[error("parameter limit exceeded: limit={0}")]
    TooManyParams(usize),

    #[error("request body is not valid UTF-8")]
    InvalidBodyEncoding,
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("unknown HTTP method `{0}`")]
    InvalidMethod(String),
    #[error("handler returned an unsupported result: {0}")]
    UnsupportedHandlerResult(&'static str),
    #[error("failed to serialize response body: {0}")]
    JsonSerialize(#[source] serde_json::Error),

    #[error("admission queue is full")]
    ServiceUnavailable,
    #[error("failed to write response: {0}")]
    TransportWrite(#[source] io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:literal => $message:literal; )*) => {
        /// Static reply sent to the client for this error, in the same wire
        /// format as [`Response::send`](crate::Response::send).
        ///
        /// `None` means the connection is closed without a response.
        pub const fn as_http(&self) -> Option<&'static [u8]> {
            match self {
                $(Self::$name { .. } => Some(concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "content-type: text/plain\r\n",
                    "\r\n",
                    $message, "\r\n",
                ).as_bytes()),)*
                _ => None,
            }
        }
    };
}

impl Error {
    http_errors! {
        InvalidHeader: "400" => "Bad Request";
        InvalidContentLength: "400" => "Bad Request";
        InvalidEncoding: "400" => "Bad Request";
        TooManyParams: "400" => "Bad Request";
        InvalidBodyEncoding: "400" => "Bad Request";
        InvalidJson: "400" => "Bad Request";

        LineTooLong: "414" => "URI Too Long";
        TooManyHeaders: "431" => "Request Header Fields Too Large";
        BodyTooLarge: "413" => "Payload Too Large";

        UnsupportedHandlerResult: "500" => "Internal Server Error";
        JsonSerialize: "500" => "Internal Server Error";
        ServiceUnavailable: "503" => "Service Unavailable";
    }
}

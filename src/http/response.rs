//! Building responses.
//!
//! Everything the server sends is a complete response with a body held in
//! memory, so the one body type used throughout is `Full<Bytes>`. The
//! helpers here cover the replies the server produces itself while
//! admitting requests; handler replies are assembled by the request object.

use bytes::Bytes;
use http_body_util::Full;
use hyper::StatusCode;
use hyper::http::response::Builder;


//------------ Body ----------------------------------------------------------

/// The body type of all responses sent by the server.
pub type Body = Full<Bytes>;


//------------ Response ------------------------------------------------------

/// A response to be sent on a connection.
pub struct Response(hyper::Response<Body>);

impl Response {
    /// Returns a Forbidden response for peers the ACL rejects.
    pub fn forbidden() -> Self {
        Self::error(StatusCode::FORBIDDEN, "Forbidden")
    }

    /// Returns a Bad Request response for unknown request methods.
    pub fn bad_method() -> Self {
        Self::error(StatusCode::BAD_REQUEST, "Bad Request")
    }

    /// Returns a Not Found response.
    pub fn not_found() -> Self {
        Self::error(StatusCode::NOT_FOUND, "Not Found")
    }

    /// Returns the empty Service Unavailable response sent while the
    /// server shuts down.
    pub fn service_unavailable() -> Self {
        ResponseBuilder::new(StatusCode::SERVICE_UNAVAILABLE).empty()
    }

    /// Returns a Payload Too Large response for oversized bodies.
    pub fn payload_too_large() -> Self {
        Self::error(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
    }

    /// Returns a Bad Request response for bodies that failed to arrive.
    pub fn bad_body() -> Self {
        Self::error(StatusCode::BAD_REQUEST, "Error reading request body")
    }

    /// Returns an Internal Server Error response with the given message.
    pub fn internal_error(message: &str) -> Self {
        Self::error(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Creates a plain text error response.
    ///
    /// The status code of the response is taken from `status` and the body
    /// from `message`.
    fn error(status: StatusCode, message: &str) -> Self {
        ResponseBuilder::new(status).content_type(
            "text/plain;charset=utf-8"
        ).body(message.to_string())
    }

    /// Converts the response into a hyper response.
    pub fn into_hyper(self) -> hyper::Response<Body> {
        self.0
    }
}


//------------ ResponseBuilder ----------------------------------------------

/// A builder for a response.
#[derive(Debug)]
pub struct ResponseBuilder {
    builder: Builder,
}

impl ResponseBuilder {
    /// Creates a new builder with the given status.
    pub fn new(status: StatusCode) -> Self {
        ResponseBuilder {
            builder: Builder::new().status(status)
        }
    }

    /// Adds the content type header.
    pub fn content_type(self, content_type: &'static str) -> Self {
        ResponseBuilder {
            builder: self.builder.header("Content-Type", content_type)
        }
    }

    /// Finalizes the response by adding a body.
    pub fn body(self, body: impl Into<Bytes>) -> Response {
        Response(
            self.builder.body(
                Full::new(body.into())
            ).expect("broken HTTP response builder")
        )
    }

    /// Finalizes the response with an empty body.
    pub fn empty(self) -> Response {
        self.body(Bytes::new())
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            Response::forbidden().into_hyper().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Response::bad_method().into_hyper().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Response::not_found().into_hyper().status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn unavailable_is_empty() {
        let response = Response::service_unavailable().into_hyper();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get("Content-Type").is_none());
    }
}

//! HTTP mapping for [`CourierError`] (non-WS handlers).

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use thiserror::Error;

use courier_core::error::{ClientCode, CourierError};

/// Plain-text error response carrying the client code in `x-courier-error`.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub CourierError);

pub fn status_for(code: ClientCode) -> StatusCode {
    match code {
        ClientCode::BadRequest
        | ClientCode::Malformed
        | ClientCode::UnsupportedEncoding
        | ClientCode::InvalidRoute => StatusCode::BAD_REQUEST,
        ClientCode::TransportSend => StatusCode::BAD_GATEWAY,
        ClientCode::BindConflict | ClientCode::SessionResolution | ClientCode::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.client_code();
        (
            status_for(code),
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::HeaderName::from_static("x-courier-error"), code.as_str()),
            ],
            self.0.to_string(),
        )
            .into_response()
    }
}

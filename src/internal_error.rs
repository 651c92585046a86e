use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket_multipart_form_data::MultipartFormDataError;
use std::error::Error;
use std::io;

use std::fmt;
use std::sync::PoisonError;

#[derive(Debug)]
pub struct InternalError {
    what: String,
    status: Status,
}

impl InternalError {
    pub fn bad_request(what: impl Into<String>) -> InternalError {
        InternalError {
            what: what.into(),
            status: Status::BadRequest,
        }
    }

    pub fn not_found(what: impl Into<String>) -> InternalError {
        InternalError {
            what: what.into(),
            status: Status::NotFound,
        }
    }

    pub fn internal(what: impl Into<String>) -> InternalError {
        InternalError {
            what: what.into(),
            status: Status::InternalServerError,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }
}

impl Error for InternalError {}
impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.status == Status::InternalServerError {
            write!(f, "Generic internal error: {}", self.what)
        } else {
            write!(f, "{}", self.what)
        }
    }
}

impl<'r> Responder<'r, 'static> for InternalError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        if self.status == Status::InternalServerError {
            tracing::error!(uri = %request.uri(), error = %self, "request failed");
        } else {
            tracing::debug!(uri = %request.uri(), status = %self.status, error = %self, "request rejected");
        }
        let status = self.status;
        (status, self.to_string()).respond_to(request)
    }
}

impl<T> From<PoisonError<T>> for InternalError {
    fn from(e: PoisonError<T>) -> InternalError {
        InternalError {
            what: e.to_string(),
            status: Status::InternalServerError,
        }
    }
}

impl From<rusqlite::Error> for InternalError {
    fn from(e: rusqlite::Error) -> InternalError {
        InternalError {
            what: e.to_string(),
            status: Status::InternalServerError,
        }
    }
}

impl From<serde_json::Error> for InternalError {
    fn from(e: serde_json::Error) -> InternalError {
        InternalError {
            what: e.to_string(),
            status: Status::InternalServerError,
        }
    }
}

impl From<MultipartFormDataError> for InternalError {
    fn from(e: MultipartFormDataError) -> InternalError {
        InternalError {
            what: e.to_string(),
            status: Status::BadRequest,
        }
    }
}

impl From<io::Error> for InternalError {
    fn from(e: io::Error) -> InternalError {
        InternalError {
            what: e.to_string(),
            status: Status::InternalServerError,
        }
    }
}

pub type InternalResult<T> = Result<T, InternalError>;

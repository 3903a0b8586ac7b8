// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The error types used by this crate.
//!
//! All fallible operations return [Error]. The type offers predicates to
//! classify the failure and accessors for the most common details, such as
//! the HTTP status code or the stable integrity code. Deeper information is
//! available through [source][std::error::Error::source].

use crate::model::ObjectChecksums;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A specialized [`Result`](std::result::Result) for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error returned by all client operations.
///
/// Errors originate from multiple sources: the service may reject a request,
/// the transport may fail, a response may not parse, the input may be
/// invalid, or the received data may not match the advertised checksums.
/// Applications that need to react to specific failures can interrogate the
/// error via the `is_*()` predicates, [http_status_code()][Error::http_status_code],
/// and [code()][Error::code].
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<BoxError>,
}

#[derive(Debug)]
enum ErrorKind {
    InvalidInput,
    Authentication,
    Io,
    Serialization,
    Deserialization,
    Http { status_code: u16 },
    Integrity { code: &'static str },
}

impl Error {
    /// The input provided by the application cannot form a valid request.
    ///
    /// These errors are raised before any I/O takes place.
    pub(crate) fn invalid_input<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            source: Some(source.into()),
        }
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self.kind, ErrorKind::InvalidInput)
    }

    /// The credentials could not produce the required headers or keys.
    pub(crate) fn authentication<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Authentication,
            source: Some(source.into()),
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self.kind, ErrorKind::Authentication)
    }

    /// The transport failed before a response was received.
    pub(crate) fn io<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Io,
            source: Some(source.into()),
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(self.kind, ErrorKind::Io)
    }

    /// The request payload could not be produced or sent.
    pub(crate) fn ser<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Serialization,
            source: Some(source.into()),
        }
    }

    pub fn is_serialization(&self) -> bool {
        matches!(self.kind, ErrorKind::Serialization)
    }

    /// The response could not be interpreted.
    pub(crate) fn deser<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Deserialization,
            source: Some(source.into()),
        }
    }

    pub fn is_deserialization(&self) -> bool {
        matches!(self.kind, ErrorKind::Deserialization)
    }

    /// The service rejected the request with an HTTP error status.
    pub(crate) fn http(status_code: u16, payload: bytes::Bytes) -> Self {
        Self {
            kind: ErrorKind::Http { status_code },
            source: Some(Box::new(HttpPayload(payload))),
        }
    }

    /// The HTTP status code of a service error, if that is what this is.
    pub fn http_status_code(&self) -> Option<u16> {
        match &self.kind {
            ErrorKind::Http { status_code } => Some(*status_code),
            _ => None,
        }
    }

    /// Received data does not match the digests advertised by the service.
    ///
    /// `code` is one of the stable codes returned by [code()][Error::code].
    pub(crate) fn integrity<T: Into<BoxError>>(code: &'static str, source: T) -> Self {
        Self {
            kind: ErrorKind::Integrity { code },
            source: Some(source.into()),
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self.kind, ErrorKind::Integrity { .. })
    }

    /// The stable code identifying an integrity failure.
    ///
    /// - `CONTENT_DOWNLOAD_MISMATCH`: a download completed but the data does
    ///   not match the service-advertised digests.
    /// - `FILE_NO_UPLOAD`: an upload completed but the service-reported
    ///   digests do not match the uploaded data. The remote object was
    ///   deleted as a precaution.
    /// - `FILE_NO_UPLOAD_DELETE`: as above, and the precautionary delete
    ///   failed too. The delete error is preserved as the source.
    pub fn code(&self) -> Option<&'static str> {
        match &self.kind {
            ErrorKind::Integrity { code } => Some(code),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ErrorKind::InvalidInput => write!(f, "invalid input")?,
            ErrorKind::Authentication => write!(f, "cannot create the authentication material")?,
            ErrorKind::Io => write!(f, "the transport reported an error")?,
            ErrorKind::Serialization => write!(f, "cannot produce the request payload")?,
            ErrorKind::Deserialization => write!(f, "cannot interpret the response")?,
            ErrorKind::Http { status_code } => {
                write!(f, "the service returned HTTP status {status_code}")?
            }
            ErrorKind::Integrity { code } => write!(f, "data integrity failure [{code}]")?,
        };
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

pub(crate) const CONTENT_DOWNLOAD_MISMATCH: &str = "CONTENT_DOWNLOAD_MISMATCH";
pub(crate) const FILE_NO_UPLOAD: &str = "FILE_NO_UPLOAD";
pub(crate) const FILE_NO_UPLOAD_DELETE: &str = "FILE_NO_UPLOAD_DELETE";

/// The error payload returned by the service with an error status.
#[derive(Debug)]
struct HttpPayload(bytes::Bytes);

impl std::fmt::Display for HttpPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "{:?}", &self.0),
        }
    }
}

impl std::error::Error for HttpPayload {}

/// Details for a digest comparison that did not match.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ChecksumMismatch {
    /// The CRC32C checksums do not match.
    Crc32c { got: u32, want: u32 },

    /// The MD5 hashes do not match.
    Md5 {
        got: bytes::Bytes,
        want: bytes::Bytes,
    },

    /// Both the CRC32C checksums and the MD5 hashes do not match.
    Both {
        got: Box<ObjectChecksums>,
        want: Box<ObjectChecksums>,
    },
}

impl std::fmt::Display for ChecksumMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crc32c { got, want } => write!(
                f,
                "the CRC32C checksums do not match: got=0x{got:08x}, want=0x{want:08x}"
            ),
            Self::Md5 { got, want } => write!(
                f,
                "the MD5 hashes do not match: got={got:02x?}, want={want:02x?}"
            ),
            Self::Both { got, want } => write!(
                f,
                "both the CRC32C checksums and MD5 hashes do not match: \
                 got.crc32c=0x{:08x}, want.crc32c=0x{:08x}, got.md5={:02x?}, want.md5={:02x?}",
                got.crc32c.unwrap_or_default(),
                want.crc32c.unwrap_or_default(),
                got.md5_hash,
                want.md5_hash
            ),
        }
    }
}

/// Errors detected while reading an object.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ReadError {
    /// The downloaded data does not match the service-advertised digests.
    #[error("checksum mismatch on download: {0}")]
    ChecksumMismatch(ChecksumMismatch),

    /// Ranged reads cannot be combined with integrity checks.
    #[error("cannot use validation with file ranges")]
    ValidationWithRange,

    /// A negative start offset is not a valid range.
    #[error("the range start offset cannot be negative: {0}")]
    NegativeStart(i64),
}

/// Errors detected while writing an object.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum WriteError {
    /// The service-reported digests do not match the uploaded data. The
    /// remote object was deleted as a precaution.
    #[error("checksum mismatch on upload, the remote object was deleted: {0}")]
    UploadMismatch(ChecksumMismatch),

    /// As [UploadMismatch][WriteError::UploadMismatch], but the
    /// precautionary delete failed and the remote object may still exist.
    #[error("checksum mismatch on upload ({mismatch}) and deleting the remote object failed")]
    UploadMismatchDeleteFailed {
        mismatch: ChecksumMismatch,
        #[source]
        delete_error: Box<Error>,
    },

    /// The start of a resumable session did not include a session URI.
    #[error("missing Location header in the resumable session response")]
    MissingSessionUri,
}

/// The error type for signed URL and signed policy creation.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct SigningError(pub(crate) SigningErrorKind);

impl SigningError {
    /// The signing operation itself failed.
    pub fn is_signing(&self) -> bool {
        matches!(self.0, SigningErrorKind::Signing(_))
    }

    /// An input was rejected before any signing took place.
    pub fn is_invalid_parameter(&self) -> bool {
        matches!(self.0, SigningErrorKind::InvalidParameter(_, _))
    }

    pub(crate) fn signing<T>(source: T) -> SigningError
    where
        T: Into<BoxError>,
    {
        SigningError(SigningErrorKind::Signing(source.into()))
    }

    pub(crate) fn invalid_parameter<S: Into<String>, T>(field: S, source: T) -> SigningError
    where
        T: Into<BoxError>,
    {
        SigningError(SigningErrorKind::InvalidParameter(
            field.into(),
            source.into(),
        ))
    }
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum SigningErrorKind {
    #[error("signing failed: {0}")]
    Signing(#[source] BoxError),

    #[error("invalid `{0}` parameter: {1}")]
    InvalidParameter(String, #[source] BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn predicates() {
        let e = Error::invalid_input("name is required");
        assert!(e.is_invalid_input(), "{e:?}");
        assert!(!e.is_io(), "{e:?}");

        let e = Error::io(std::io::Error::other("broken pipe"));
        assert!(e.is_io(), "{e:?}");
        assert!(e.source().is_some(), "{e:?}");

        let e = Error::http(404, bytes::Bytes::from_static(b"NOT FOUND"));
        assert_eq!(e.http_status_code(), Some(404));
        assert!(e.to_string().contains("404"), "{e}");
        assert!(e.to_string().contains("NOT FOUND"), "{e}");
    }

    #[test]
    fn integrity_codes() {
        let mismatch = ChecksumMismatch::Crc32c {
            got: 0x01020304,
            want: 0x02030405,
        };
        let e = Error::integrity(
            CONTENT_DOWNLOAD_MISMATCH,
            ReadError::ChecksumMismatch(mismatch),
        );
        assert!(e.is_integrity(), "{e:?}");
        assert_eq!(e.code(), Some("CONTENT_DOWNLOAD_MISMATCH"));
        assert!(e.to_string().contains("CONTENT_DOWNLOAD_MISMATCH"), "{e}");

        let e = Error::http(503, bytes::Bytes::new());
        assert_eq!(e.code(), None);
    }

    #[test]
    fn mismatch_display() {
        let value = ChecksumMismatch::Crc32c {
            got: 0x01020304,
            want: 0x02030405,
        };
        let fmt = value.to_string();
        assert!(fmt.contains("got=0x01020304"), "{value:?} => {fmt}");
        assert!(fmt.contains("want=0x02030405"), "{value:?} => {fmt}");

        let value = ChecksumMismatch::Md5 {
            got: bytes::Bytes::from_static(&[1, 2]),
            want: bytes::Bytes::from_static(&[3, 4]),
        };
        let fmt = value.to_string();
        assert!(fmt.contains("MD5"), "{value:?} => {fmt}");
    }

    #[test]
    fn upload_mismatch_chain() {
        let mismatch = ChecksumMismatch::Crc32c { got: 1, want: 2 };
        let delete_error = Error::http(403, bytes::Bytes::from_static(b"forbidden"));
        let e = Error::integrity(
            FILE_NO_UPLOAD_DELETE,
            WriteError::UploadMismatchDeleteFailed {
                mismatch,
                delete_error: Box::new(delete_error),
            },
        );
        assert_eq!(e.code(), Some("FILE_NO_UPLOAD_DELETE"));
        let source = e.source().and_then(|s| s.downcast_ref::<WriteError>());
        assert!(
            matches!(
                source,
                Some(WriteError::UploadMismatchDeleteFailed { delete_error, .. })
                    if delete_error.http_status_code() == Some(403)
            ),
            "{e:?}"
        );
    }
}

use std::error::Error;
use std::io::{self, ErrorKind};

use http::StatusCode;
use xmltree::Element;

use crate::davpath::ParseError;
use crate::fs::FsError;
use crate::ls::LsError;
use crate::xmltree_ext::{self, ElementExt};

pub(crate) type DavResult<T> = Result<T, DavError>;

/// Machine-readable precondition / postcondition names (RFC4918 section 16,
/// RFC3744 section 7.1.1), sent in the body of an error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DavCondition {
    /// A locked resource was touched without submitting its token.
    LockTokenSubmitted(Vec<String>),
    /// A LOCK request conflicts with an existing lock.
    NoConflictingLock(Vec<String>),
    /// UNLOCK with a token that does not apply to the request uri.
    LockTokenMatchesRequestUri,
    /// The current principal lacks privileges on a resource.
    NeedPrivileges { href: String, privileges: Vec<String> },
    GrantOnly,
    NoInvert,
    NoAbstract,
    NotSupportedPrivilege,
    NoAceConflict,
    RecognizedPrincipal,
    CannotModifyProtectedProperty,
    SupportedReport,
}

impl DavCondition {
    /// Build the `<D:error>` element for this condition.
    pub fn to_element(&self) -> Element {
        let mut error = Element::new2("D:error").ns("D", "DAV:");
        let hrefs = |name: &str, hrefs: &[String]| {
            let mut e = Element::new2(name);
            for h in hrefs {
                e.push_elem(Element::new2("D:href").text(h.clone()));
            }
            e
        };
        let cond = match self {
            DavCondition::LockTokenSubmitted(h) => hrefs("D:lock-token-submitted", h),
            DavCondition::NoConflictingLock(h) => hrefs("D:no-conflicting-lock", h),
            DavCondition::LockTokenMatchesRequestUri => {
                Element::new2("D:lock-token-matches-request-uri")
            }
            DavCondition::NeedPrivileges { href, privileges } => {
                let mut need = Element::new2("D:need-privileges");
                for p in privileges {
                    let mut resource = Element::new2("D:resource");
                    resource.push_elem(Element::new2("D:href").text(href.clone()));
                    let mut privilege = Element::new2("D:privilege");
                    privilege.push_elem(xmltree_ext::from_clark(p));
                    resource.push_elem(privilege);
                    need.push_elem(resource);
                }
                need
            }
            DavCondition::GrantOnly => Element::new2("D:grant-only"),
            DavCondition::NoInvert => Element::new2("D:no-invert"),
            DavCondition::NoAbstract => Element::new2("D:no-abstract"),
            DavCondition::NotSupportedPrivilege => Element::new2("D:not-supported-privilege"),
            DavCondition::NoAceConflict => Element::new2("D:no-ace-conflict"),
            DavCondition::RecognizedPrincipal => Element::new2("D:recognized-principal"),
            DavCondition::CannotModifyProtectedProperty => {
                Element::new2("D:cannot-modify-protected-property")
            }
            DavCondition::SupportedReport => Element::new2("D:supported-report"),
        };
        error.push_elem(cond);
        error
    }
}

#[derive(Debug)]
pub enum DavError {
    XmlReadError,  // error reading/parsing xml
    XmlParseError, // error interpreting xml
    InvalidPath,   // error parsing path
    IllegalPath,   // path not valid here
    ForbiddenPath, // too many dotdots
    UnknownDavMethod,
    Utf8Error,
    Status(StatusCode),
    StatusClose(StatusCode),
    Condition(StatusCode, DavCondition),
    FsError(FsError),
    IoError(io::Error),
    XmlReaderError(xmltree::ParseError),
    XmlWriterError(xmltree::Error),
}

impl Error for DavError {
    fn description(&self) -> &str {
        "DAV error"
    }

    fn cause(&self) -> Option<&dyn Error> {
        match self {
            DavError::FsError(e) => Some(e),
            DavError::IoError(e) => Some(e),
            DavError::XmlReaderError(e) => Some(e),
            DavError::XmlWriterError(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DavError::XmlReaderError(_) => write!(f, "XML parse error"),
            DavError::XmlWriterError(_) => write!(f, "XML generate error"),
            DavError::IoError(_) => write!(f, "I/O error"),
            DavError::Condition(s, c) => write!(f, "{s}: {c:?}"),
            _ => write!(f, "{self:?}"),
        }
    }
}

impl From<FsError> for DavError {
    fn from(e: FsError) -> Self {
        DavError::FsError(e)
    }
}

impl From<DavError> for io::Error {
    fn from(e: DavError) -> Self {
        match e {
            DavError::IoError(e) => e,
            DavError::FsError(e) => e.into(),
            _ => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

impl From<xmltree::ParseError> for DavError {
    fn from(e: xmltree::ParseError) -> Self {
        DavError::XmlReaderError(e)
    }
}

impl From<xmltree::Error> for DavError {
    fn from(e: xmltree::Error) -> Self {
        DavError::XmlWriterError(e)
    }
}

impl From<ParseError> for DavError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidPath => DavError::InvalidPath,
            ParseError::PrefixMismatch => DavError::IllegalPath,
            ParseError::ForbiddenPath => DavError::ForbiddenPath,
            ParseError::IllegalPath => DavError::IllegalPath,
        }
    }
}

impl From<LsError> for DavError {
    fn from(e: LsError) -> Self {
        match e {
            LsError::Locked(lock) => DavError::Condition(
                StatusCode::LOCKED,
                DavCondition::LockTokenSubmitted(vec![lock.path.with_prefix()]),
            ),
            LsError::NotFound => DavError::Condition(
                StatusCode::PRECONDITION_FAILED,
                DavCondition::LockTokenMatchesRequestUri,
            ),
            LsError::Io(e) => DavError::IoError(e),
        }
    }
}

fn fserror_to_status(e: &FsError) -> StatusCode {
    match e {
        FsError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        FsError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
        FsError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::Forbidden => StatusCode::FORBIDDEN,
        FsError::Conflict => StatusCode::CONFLICT,
        FsError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
        FsError::LoopDetected => StatusCode::LOOP_DETECTED,
        FsError::PathTooLong => StatusCode::URI_TOO_LONG,
        FsError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        FsError::IsRemote => StatusCode::BAD_GATEWAY,
    }
}

fn ioerror_to_status(ioerror: &io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl DavError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::XmlReadError => StatusCode::BAD_REQUEST,
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::IllegalPath => StatusCode::BAD_GATEWAY,
            DavError::ForbiddenPath => StatusCode::FORBIDDEN,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::Utf8Error => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DavError::IoError(e) => ioerror_to_status(e),
            DavError::FsError(e) => fserror_to_status(e),
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::Condition(e, _) => *e,
            DavError::XmlReaderError(_) => StatusCode::BAD_REQUEST,
            DavError::XmlWriterError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn must_close(&self) -> bool {
        !matches!(
            self,
            &DavError::Status(_)
                | &DavError::Condition(..)
                | &DavError::FsError(FsError::NotFound)
                | &DavError::FsError(FsError::Forbidden)
                | &DavError::FsError(FsError::Exists)
        )
    }

    /// The XML error body for this error, if it has a condition.
    pub(crate) fn condition(&self) -> Option<&DavCondition> {
        match self {
            DavError::Condition(_, c) => Some(c),
            _ => None,
        }
    }
}

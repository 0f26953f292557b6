use std::{error, fmt, io, result};

pub type Result<T> = result::Result<T, Error>;

/// Major/minor status pair reported by the underlying security mechanism.
///
/// `major` follows the GSSAPI layout: the calling error in bits 24..32, the
/// routine error in bits 16..24 and supplementary information in the low
/// 16 bits. `minor` is mechanism specific; for Kerberos it is a krb5 error
/// code reinterpreted as unsigned.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct GssStatus {
    pub major: u32,
    pub minor: u32,
}

impl GssStatus {
    pub const COMPLETE: u32 = 0;

    pub const BAD_MECH: u32 = 1 << 16;
    pub const BAD_NAME: u32 = 2 << 16;
    pub const BAD_NAMETYPE: u32 = 3 << 16;
    pub const BAD_BINDINGS: u32 = 4 << 16;
    pub const BAD_STATUS: u32 = 5 << 16;
    pub const BAD_MIC: u32 = 6 << 16;
    pub const NO_CRED: u32 = 7 << 16;
    pub const NO_CONTEXT: u32 = 8 << 16;
    pub const DEFECTIVE_TOKEN: u32 = 9 << 16;
    pub const DEFECTIVE_CREDENTIAL: u32 = 10 << 16;
    pub const CREDENTIALS_EXPIRED: u32 = 11 << 16;
    pub const CONTEXT_EXPIRED: u32 = 12 << 16;
    pub const FAILURE: u32 = 13 << 16;
    pub const BAD_QOP: u32 = 14 << 16;
    pub const UNAUTHORIZED: u32 = 15 << 16;
    pub const UNAVAILABLE: u32 = 16 << 16;

    pub const DUPLICATE_TOKEN: u32 = 1 << 1;
    pub const OLD_TOKEN: u32 = 1 << 2;
    pub const UNSEQ_TOKEN: u32 = 1 << 3;
    pub const GAP_TOKEN: u32 = 1 << 4;

    const ROUTINE_ERROR_MASK: u32 = 0x00ff_0000;
    const SUPPLEMENTARY_MASK: u32 = 0x0000_ffff;

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn routine_error(&self) -> u32 {
        self.major & Self::ROUTINE_ERROR_MASK
    }

    pub fn supplementary(&self) -> u32 {
        self.major & Self::SUPPLEMENTARY_MASK
    }

    /// Text for the routine error, worded the way GSSAPI libraries display it.
    pub fn major_message(&self) -> &'static str {
        match self.routine_error() {
            Self::COMPLETE => match self.supplementary() {
                Self::DUPLICATE_TOKEN => "The token was a duplicate of an earlier token",
                Self::OLD_TOKEN => "The token's validity period has expired",
                Self::UNSEQ_TOKEN => "A later token has already been processed",
                Self::GAP_TOKEN => "An expected per-message token was not received",
                _ => "The routine completed successfully",
            },
            Self::BAD_MECH => "An unsupported mechanism was requested",
            Self::BAD_NAME => "An invalid name was supplied",
            Self::BAD_NAMETYPE => "A supplied name was of an unsupported type",
            Self::BAD_BINDINGS => "Incorrect channel bindings were supplied",
            Self::BAD_STATUS => "An invalid status code was supplied",
            Self::BAD_MIC => "A token had an invalid Message Integrity Check (MIC)",
            Self::NO_CRED => "No credentials were supplied, or the credentials were unavailable or inaccessible",
            Self::NO_CONTEXT => "No context has been established",
            Self::DEFECTIVE_TOKEN => "Invalid token was supplied",
            Self::DEFECTIVE_CREDENTIAL => "Invalid credential was supplied",
            Self::CREDENTIALS_EXPIRED => "The referenced credentials have expired",
            Self::CONTEXT_EXPIRED => "The referenced context has expired",
            Self::BAD_QOP => "The quality-of-protection requested could not be provided",
            Self::UNAUTHORIZED => "The operation is forbidden by local security policy",
            Self::UNAVAILABLE => "The operation or option is not available",
            _ => "Unspecified GSS failure.  Minor code may provide more information",
        }
    }
}

impl fmt::Display for GssStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (major 0x{:08x}, minor {})", self.major_message(), self.major, self.minor as i32)
    }
}

/// Kerberos minor status codes the crate gives a specific meaning to.
pub mod krb5 {
    const ERROR_TABLE_BASE: i32 = -1_765_328_384;

    pub const KDC_ERR_C_PRINCIPAL_UNKNOWN: u32 = (ERROR_TABLE_BASE + 6) as u32;
    pub const KDC_ERR_S_PRINCIPAL_UNKNOWN: u32 = (ERROR_TABLE_BASE + 7) as u32;
    pub const KDC_ERR_KEY_EXP: u32 = (ERROR_TABLE_BASE + 23) as u32;
    pub const KDC_ERR_PREAUTH_FAILED: u32 = (ERROR_TABLE_BASE + 24) as u32;
    pub const AP_ERR_BAD_INTEGRITY: u32 = (ERROR_TABLE_BASE + 31) as u32;
    pub const AP_ERR_NOT_US: u32 = (ERROR_TABLE_BASE + 35) as u32;
    pub const AP_ERR_MODIFIED: u32 = (ERROR_TABLE_BASE + 41) as u32;
    pub const AP_ERR_MUT_FAIL: u32 = (ERROR_TABLE_BASE + 46) as u32;
    pub const AP_ERR_SKEW: u32 = (ERROR_TABLE_BASE + 37) as u32;
    pub const AP_ERR_REPEAT: u32 = (ERROR_TABLE_BASE + 34) as u32;
    pub const KDC_UNREACH: u32 = (ERROR_TABLE_BASE + 156) as u32;
}

/// The kind of error. Enables to specify the error based on its type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Used in cases when supplied token data is missing or malformed.
    InvalidToken,
    /// A token failed its integrity check.
    MessageAltered,
    ContextExpired,
    TimeSkew,
    ReplayDetected,
    /// A per-message token arrived out of order, or the handshake ran past its round limit.
    OutOfSequence,
    AlgorithmMismatch,
    MutualAuthFailed,
    /// The realm service could not be reached.
    NoAuthenticatingAuthority,
    UnsupportedFunction,
    /// May correspond to any internal error (I/O error, poisoned lock, etc.).
    InternalError,

    LogonDenied,
    PasswordExpired,

    NoCredentials,
    TargetUnknown,
    WrongPrincipal,

    /// The operation is not valid in the current context state.
    InvalidState,
    ContextDestroyed,
    WrongRole,
    NoPendingToken,
    NoDelegatedCredential,
    InvalidParameter,
}

/// Coarse error taxonomy callers branch on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A token was malformed or rejected, or the mechanism failed while negotiating.
    Negotiation,
    /// Password or ticket acquisition was rejected by the realm.
    BasicAuth,
    /// A principal could not be resolved or key material is missing.
    Configuration,
    /// An operation was called on a context in the wrong state or role.
    Misuse,
}

impl ErrorKind {
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorKind::InvalidToken
            | ErrorKind::MessageAltered
            | ErrorKind::ContextExpired
            | ErrorKind::TimeSkew
            | ErrorKind::ReplayDetected
            | ErrorKind::OutOfSequence
            | ErrorKind::AlgorithmMismatch
            | ErrorKind::MutualAuthFailed
            | ErrorKind::NoAuthenticatingAuthority
            | ErrorKind::UnsupportedFunction
            | ErrorKind::InternalError => ErrorCategory::Negotiation,
            ErrorKind::LogonDenied | ErrorKind::PasswordExpired => ErrorCategory::BasicAuth,
            ErrorKind::NoCredentials | ErrorKind::TargetUnknown | ErrorKind::WrongPrincipal => {
                ErrorCategory::Configuration
            }
            ErrorKind::InvalidState
            | ErrorKind::ContextDestroyed
            | ErrorKind::WrongRole
            | ErrorKind::NoPendingToken
            | ErrorKind::NoDelegatedCredential
            | ErrorKind::InvalidParameter => ErrorCategory::Misuse,
        }
    }

    /// Derives the kind from a mechanism status pair.
    ///
    /// Kerberos minor codes take precedence since GSSAPI reports most of them
    /// under the generic `FAILURE` routine error.
    pub fn from_gss_status(status: GssStatus) -> Self {
        match status.minor {
            krb5::AP_ERR_SKEW => return ErrorKind::TimeSkew,
            krb5::AP_ERR_REPEAT => return ErrorKind::ReplayDetected,
            krb5::AP_ERR_MODIFIED | krb5::AP_ERR_BAD_INTEGRITY => return ErrorKind::MessageAltered,
            krb5::AP_ERR_NOT_US => return ErrorKind::WrongPrincipal,
            krb5::AP_ERR_MUT_FAIL => return ErrorKind::MutualAuthFailed,
            krb5::KDC_ERR_KEY_EXP => return ErrorKind::PasswordExpired,
            krb5::KDC_ERR_PREAUTH_FAILED | krb5::KDC_ERR_C_PRINCIPAL_UNKNOWN => return ErrorKind::LogonDenied,
            krb5::KDC_ERR_S_PRINCIPAL_UNKNOWN => return ErrorKind::TargetUnknown,
            krb5::KDC_UNREACH => return ErrorKind::NoAuthenticatingAuthority,
            _ => {}
        }

        match status.routine_error() {
            GssStatus::COMPLETE => match status.supplementary() {
                GssStatus::DUPLICATE_TOKEN => ErrorKind::ReplayDetected,
                GssStatus::OLD_TOKEN | GssStatus::UNSEQ_TOKEN | GssStatus::GAP_TOKEN => ErrorKind::OutOfSequence,
                _ => ErrorKind::InternalError,
            },
            GssStatus::BAD_MECH | GssStatus::BAD_QOP => ErrorKind::AlgorithmMismatch,
            GssStatus::BAD_NAME | GssStatus::BAD_NAMETYPE => ErrorKind::TargetUnknown,
            GssStatus::BAD_MIC | GssStatus::BAD_BINDINGS => ErrorKind::MessageAltered,
            GssStatus::NO_CRED | GssStatus::DEFECTIVE_CREDENTIAL => ErrorKind::NoCredentials,
            GssStatus::DEFECTIVE_TOKEN => ErrorKind::InvalidToken,
            GssStatus::CREDENTIALS_EXPIRED | GssStatus::CONTEXT_EXPIRED => ErrorKind::ContextExpired,
            GssStatus::NO_CONTEXT => ErrorKind::InternalError,
            GssStatus::UNAUTHORIZED => ErrorKind::LogonDenied,
            GssStatus::UNAVAILABLE => ErrorKind::UnsupportedFunction,
            _ => ErrorKind::InternalError,
        }
    }
}

/// Holds the [`ErrorKind`], the description of the error and, when the
/// failure came out of a security mechanism, its status pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub error_type: ErrorKind,
    pub description: String,
    pub status: Option<GssStatus>,
}

impl Error {
    /// Allows to fill a new error easily, supplying it with a coherent description.
    pub fn new(error_type: ErrorKind, description: impl ToString) -> Self {
        Self {
            error_type,
            description: description.to_string(),
            status: None,
        }
    }

    pub fn with_status(error_type: ErrorKind, description: impl ToString, status: GssStatus) -> Self {
        Self {
            error_type,
            description: description.to_string(),
            status: Some(status),
        }
    }

    /// Builds an error from a mechanism status pair, deriving the kind from it.
    pub fn gss(major: u32, minor: u32, description: impl ToString) -> Self {
        let status = GssStatus::new(major, minor);

        Self::with_status(ErrorKind::from_gss_status(status), description, status)
    }

    pub fn category(&self) -> ErrorCategory {
        self.error_type.category()
    }

    /// The realm or the local system could not be used; retrying later may succeed.
    pub fn is_infrastructure_failure(&self) -> bool {
        matches!(
            self.error_type,
            ErrorKind::NoAuthenticatingAuthority
                | ErrorKind::InternalError
                | ErrorKind::TimeSkew
                | ErrorKind::UnsupportedFunction
        )
    }

    /// The peer or the supplied credentials were rejected; re-prompting may succeed.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self.category(), ErrorCategory::Negotiation | ErrorCategory::BasicAuth)
            && !self.is_infrastructure_failure()
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.error_type, self.description)?;

        if let Some(status) = &self.status {
            write!(f, " ({})", status)?;
        }

        Ok(())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::new(ErrorKind::InternalError, format!("IO error: {:?}", err))
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Self::new(ErrorKind::InvalidToken, format!("token is not valid base64: {}", err))
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Self::new(ErrorKind::InvalidToken, format!("UTF-8 error: {:?}", err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        io::Error::other(format!("{:?}: {}", err.error_type, err.description))
    }
}

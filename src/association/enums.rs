use core::fmt;

use derive_try_from_primitive::TryFromPrimitive;

/// Common prefix of every DLMS application-context OID.
const CONTEXT_OID_PREFIX: [u8; 6] = [0x60, 0x85, 0x74, 0x05, 0x08, 0x01];
/// Common prefix of every DLMS mechanism-name OID.
const MECHANISM_OID_PREFIX: [u8; 6] = [0x60, 0x85, 0x74, 0x05, 0x08, 0x02];

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum AssociationResult {
    Accepted = 0,
    RejectedPermanent = 1,
    RejectedTransient = 2,
}

impl fmt::Display for AssociationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssociationResult::Accepted => "accepted",
            AssociationResult::RejectedPermanent => "rejected (permanent)",
            AssociationResult::RejectedTransient => "rejected (transient)",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum AcseServiceUserDiagnostics {
    Null = 0,
    NoReasonGiven = 1,
    ApplicationContextNameNotSupported = 2,
    CallingApTitleNotRecognized = 3,
    CallingApInvocationIdentifierNotRecognized = 4,
    CallingAeQualifierNotRecognized = 5,
    CallingAeInvocationIdentifierNotRecognized = 6,
    CalledApTitleNotRecognized = 7,
    CalledApInvocationIdentifierNotRecognized = 8,
    CalledAeQualifierNotRecognized = 9,
    CalledAeInvocationIdentifierNotRecognized = 10,
    AuthenticationMechanismNameNotRecognised = 11,
    AuthenticationMechanismNameRequired = 12,
    AuthenticationFailure = 13,
    AuthenticationRequired = 14,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum AcseServiceProviderDiagnostics {
    Null = 0,
    NoReasonGiven = 1,
    NoCommonAcseVersion = 2,
}

/// The `result-source-diagnostic` of an AARE.
///
/// Values outside the known tables are kept raw so that an unexpected
/// diagnostic still decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDiagnostic {
    ServiceUser(u8),
    ServiceProvider(u8),
}

impl SourceDiagnostic {
    pub const NULL: Self = SourceDiagnostic::ServiceUser(0);

    pub fn user(diagnostic: AcseServiceUserDiagnostics) -> Self {
        SourceDiagnostic::ServiceUser(diagnostic as u8)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SourceDiagnostic::ServiceUser(0) | SourceDiagnostic::ServiceProvider(0))
    }

    pub fn user_diagnostic(&self) -> Option<AcseServiceUserDiagnostics> {
        match self {
            SourceDiagnostic::ServiceUser(value) => AcseServiceUserDiagnostics::try_from(*value).ok(),
            SourceDiagnostic::ServiceProvider(_) => None,
        }
    }

    pub fn provider_diagnostic(&self) -> Option<AcseServiceProviderDiagnostics> {
        match self {
            SourceDiagnostic::ServiceProvider(value) => {
                AcseServiceProviderDiagnostics::try_from(*value).ok()
            }
            SourceDiagnostic::ServiceUser(_) => None,
        }
    }
}

impl Default for SourceDiagnostic {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for SourceDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.user_diagnostic(), self.provider_diagnostic(), self) {
            (Some(user), _, _) => write!(f, "service user: {user:?}"),
            (_, Some(provider), _) => write!(f, "service provider: {provider:?}"),
            (_, _, SourceDiagnostic::ServiceUser(v)) => write!(f, "service user: {v}"),
            (_, _, SourceDiagnostic::ServiceProvider(v)) => write!(f, "service provider: {v}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ApplicationContextName {
    LogicalNameReferencing = 1,
    ShortNameReferencing = 2,
    LogicalNameReferencingWithCiphering = 3,
    ShortNameReferencingWithCiphering = 4,
}

impl ApplicationContextName {
    /// Logical-name referencing, ciphered or not.
    pub const fn logical_name(ciphered: bool) -> Self {
        if ciphered {
            ApplicationContextName::LogicalNameReferencingWithCiphering
        } else {
            ApplicationContextName::LogicalNameReferencing
        }
    }

    /// The seven OID content bytes, without the `06 07` header.
    pub fn oid(&self) -> [u8; 7] {
        oid_with_prefix(&CONTEXT_OID_PREFIX, *self as u8)
    }

    pub fn from_oid(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [prefix @ .., id] if prefix == CONTEXT_OID_PREFIX => Self::try_from(*id).ok(),
            _ => None,
        }
    }

    pub const fn uses_ciphering(&self) -> bool {
        matches!(
            self,
            ApplicationContextName::LogicalNameReferencingWithCiphering
                | ApplicationContextName::ShortNameReferencingWithCiphering
        )
    }
}

/// Authentication mechanism, by mechanism id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum Authentication {
    /// Lowest level security: no mechanism name is sent.
    #[default]
    None = 0,
    /// Low level security, a plain password.
    Low = 1,
    High = 2,
    HighMd5 = 3,
    HighSha1 = 4,
    HighGmac = 5,
    HighSha256 = 6,
    HighEcdsa = 7,
}

impl Authentication {
    pub fn mechanism_id(&self) -> u8 {
        *self as u8
    }

    pub fn oid(&self) -> [u8; 7] {
        oid_with_prefix(&MECHANISM_OID_PREFIX, *self as u8)
    }

    pub fn from_oid(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [prefix @ .., id] if prefix == MECHANISM_OID_PREFIX => Self::try_from(*id).ok(),
            _ => None,
        }
    }
}

fn oid_with_prefix(prefix: &[u8; 6], id: u8) -> [u8; 7] {
    let mut oid = [0; 7];
    oid[..6].copy_from_slice(prefix);
    oid[6] = id;
    oid
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum ReleaseRequestReason {
    #[default]
    Normal = 0,
    Urgent = 1,
    UserDefined = 30,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum ReleaseResponseReason {
    #[default]
    Normal = 0,
    NotFinished = 1,
    UserDefined = 30,
}

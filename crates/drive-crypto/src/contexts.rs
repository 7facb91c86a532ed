//! Signature contexts for share membership operations
//!
//! Each invitation-related signature is tagged with a context so a signature
//! produced for one purpose cannot be replayed for another. All three
//! contexts are critical: a verifier expecting one MUST reject signatures
//! that lack it.

/// Context tag for the inviter's signature over an invitation key packet.
pub const CONTEXT_SHARE_MEMBER_INVITER: &str = "drive.share-member.inviter";

/// Context tag for the member's acceptance signature.
pub const CONTEXT_SHARE_MEMBER_MEMBER: &str = "drive.share-member.member";

/// Context tag for invitations addressed to external (non-account) users.
pub const CONTEXT_SHARE_MEMBER_EXTERNAL_INVITATION: &str =
    "drive.share-member.external-invitation";

/// A signature context tag with its criticality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    /// The context tag embedded in the signature.
    pub value: String,
    /// Whether verification must fail when the tag is absent.
    pub critical: bool,
}

impl SigningContext {
    /// A critical context. Used by all share-membership signatures.
    pub fn critical(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            critical: true,
        }
    }

    /// Context for the inviter signature.
    pub fn inviter() -> Self {
        Self::critical(CONTEXT_SHARE_MEMBER_INVITER)
    }

    /// Context for the member acceptance signature.
    pub fn member() -> Self {
        Self::critical(CONTEXT_SHARE_MEMBER_MEMBER)
    }

    /// Context for external invitations.
    pub fn external_invitation() -> Self {
        Self::critical(CONTEXT_SHARE_MEMBER_EXTERNAL_INVITATION)
    }
}

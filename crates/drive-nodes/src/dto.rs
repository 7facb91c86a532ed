//! Wire DTOs for the link, share, and revision endpoints
//!
//! Server payloads use PascalCase field names inside the standard
//! `{Code, Error?}` envelope. Everything here is the *encrypted* shape;
//! decryption happens in the node crypto service.

use serde::{Deserialize, Serialize};

/// Link type discriminant on the wire.
pub const LINK_TYPE_FOLDER: u8 = 1;
/// Link type discriminant on the wire.
pub const LINK_TYPE_FILE: u8 = 2;

/// Link state discriminant: draft, not yet committed.
pub const LINK_STATE_DRAFT: u8 = 0;
/// Link state discriminant: active.
pub const LINK_STATE_ACTIVE: u8 = 1;
/// Link state discriminant: trashed.
pub const LINK_STATE_TRASHED: u8 = 2;

/// Revision state discriminant: draft.
pub const REVISION_STATE_DRAFT: u8 = 0;
/// Revision state discriminant: active.
pub const REVISION_STATE_ACTIVE: u8 = 1;
/// Revision state discriminant: superseded.
pub const REVISION_STATE_SUPERSEDED: u8 = 2;

/// Direct membership role on the wire. Zero means inherited.
pub const ROLE_INHERITED: u8 = 0;
/// Viewer role.
pub const ROLE_VIEWER: u8 = 1;
/// Editor role.
pub const ROLE_EDITOR: u8 = 2;
/// Admin role.
pub const ROLE_ADMIN: u8 = 3;

/// One encrypted node record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LinkDto {
    #[serde(rename = "LinkID")]
    pub link_id: String,
    #[serde(rename = "ParentLinkID", default)]
    pub parent_link_id: Option<String>,
    #[serde(rename = "Type")]
    pub link_type: u8,
    /// Armored encrypted name.
    pub name: String,
    /// Email whose address signed the name.
    #[serde(default)]
    pub name_signature_email: Option<String>,
    /// Email whose address signed the key material.
    #[serde(default)]
    pub signature_email: Option<String>,
    /// Lookup hash of the name under the parent hash key.
    #[serde(default)]
    pub hash: Option<String>,
    pub state: u8,
    pub create_time: i64,
    #[serde(default)]
    pub trash_time: Option<i64>,
    #[serde(rename = "MIMEType", default)]
    pub mime_type: Option<String>,
    /// Armored locked node key.
    pub node_key: String,
    /// Armored encrypted node passphrase.
    pub node_passphrase: String,
    /// Armored detached signature over the passphrase.
    #[serde(default)]
    pub node_passphrase_signature: Option<String>,
    #[serde(default)]
    pub is_shared: bool,
    /// Direct membership role; zero when inherited.
    #[serde(default)]
    pub member_role: u8,
    #[serde(default)]
    pub folder_properties: Option<FolderPropertiesDto>,
    #[serde(default)]
    pub file_properties: Option<FilePropertiesDto>,
}

/// Folder-only encrypted fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FolderPropertiesDto {
    /// Armored encrypted hash key.
    pub node_hash_key: String,
    /// Armored encrypted extended attributes.
    #[serde(rename = "XAttr", default)]
    pub xattr: Option<String>,
}

/// File-only encrypted fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilePropertiesDto {
    /// Base64 content key packet.
    pub content_key_packet: String,
    /// Armored detached signature over the content session key.
    #[serde(default)]
    pub content_key_packet_signature: Option<String>,
    #[serde(default)]
    pub active_revision: Option<RevisionDto>,
}

/// One revision record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RevisionDto {
    #[serde(rename = "RevisionID")]
    pub revision_id: String,
    pub state: u8,
    pub create_time: i64,
    /// Email whose address signed the content.
    #[serde(default)]
    pub signature_email: Option<String>,
    /// Armored encrypted extended attributes.
    #[serde(rename = "XAttr", default)]
    pub xattr: Option<String>,
    /// Claimed total ciphertext size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    /// Block list, present on single-revision fetches.
    #[serde(default)]
    pub blocks: Vec<BlockDto>,
}

/// One content block of a revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockDto {
    pub index: u64,
    /// Absolute storage URL.
    #[serde(rename = "BareURL")]
    pub bare_url: String,
    /// Storage token authorizing the fetch.
    pub token: String,
    /// Base64 encrypted detached signature over the cleartext.
    #[serde(rename = "EncSignature", default)]
    pub enc_signature: Option<String>,
    /// Ciphertext size in bytes.
    pub size: u64,
}

/// One share record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ShareDto {
    #[serde(rename = "ShareID")]
    pub share_id: String,
    #[serde(rename = "VolumeID")]
    pub volume_id: String,
    #[serde(rename = "LinkID")]
    pub link_id: String,
    pub creator_email: String,
    #[serde(rename = "AddressID")]
    pub address_id: String,
    /// Armored locked share key, present on single-share fetches.
    #[serde(default)]
    pub key: Option<String>,
    /// Armored encrypted share passphrase.
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Armored detached signature over the passphrase.
    #[serde(default)]
    pub passphrase_signature: Option<String>,
}

/// `GET /drive/v2/shares?Type=main`
#[derive(Debug, Clone, Deserialize)]
pub struct SharesResponse {
    #[serde(rename = "Shares")]
    pub shares: Vec<ShareDto>,
}

/// `GET /drive/v2/shares/{shareId}`
#[derive(Debug, Clone, Deserialize)]
pub struct ShareResponse {
    #[serde(rename = "Share")]
    pub share: ShareDto,
}

/// `POST /drive/v2/volumes/{v}/links/fetch`
#[derive(Debug, Clone, Serialize)]
pub struct FetchLinksRequest {
    #[serde(rename = "LinkIDs")]
    pub link_ids: Vec<String>,
}

/// Response to a link fetch or listing.
#[derive(Debug, Clone, Deserialize)]
pub struct LinksResponse {
    #[serde(rename = "Links")]
    pub links: Vec<LinkDto>,
    /// Paging anchor; absent on the last page.
    #[serde(rename = "AnchorID", default)]
    pub anchor_id: Option<String>,
    #[serde(rename = "More", default)]
    pub more: bool,
}

/// `GET /drive/v2/volumes/{v}/files/{n}/revisions`
#[derive(Debug, Clone, Deserialize)]
pub struct RevisionsResponse {
    #[serde(rename = "Revisions")]
    pub revisions: Vec<RevisionDto>,
}

/// `GET /drive/v2/volumes/{v}/files/{n}/revisions/{r}`
#[derive(Debug, Clone, Deserialize)]
pub struct RevisionResponse {
    #[serde(rename = "Revision")]
    pub revision: RevisionDto,
}

/// Per-link outcome inside a bulk response.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkResponseDto {
    #[serde(rename = "LinkID")]
    pub link_id: String,
    #[serde(rename = "Response")]
    pub response: ResponseCodeDto,
}

/// `{Code, Error?}` of one bulk item.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseCodeDto {
    #[serde(rename = "Code")]
    pub code: u64,
    #[serde(rename = "Error", default)]
    pub error: Option<String>,
}

/// Response to a bulk management operation.
#[derive(Debug, Clone, Deserialize)]
pub struct MultipleResponse {
    #[serde(rename = "Responses")]
    pub responses: Vec<LinkResponseDto>,
}

/// Request body of a bulk operation on link ids.
#[derive(Debug, Clone, Serialize)]
pub struct MultipleRequest {
    #[serde(rename = "LinkIDs")]
    pub link_ids: Vec<String>,
}

/// `PUT /drive/v2/volumes/{v}/links/{n}/rename`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RenameRequest {
    /// Armored re-encrypted name.
    pub name: String,
    pub name_signature_email: String,
    /// Lookup hash of the new name.
    pub hash: String,
    /// Lookup hash the server currently holds, for conflict detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_hash: Option<String>,
}

/// One moved link inside a bulk move.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MoveLinkDto {
    #[serde(rename = "LinkID")]
    pub link_id: String,
    /// Lookup hash of the name under the new parent hash key.
    pub hash: String,
    /// Node passphrase re-encrypted to the new parent key.
    pub node_passphrase: String,
    /// Signature over the re-encrypted passphrase.
    pub node_passphrase_signature: String,
    pub signature_email: String,
}

/// `POST /drive/v2/volumes/{v}/links/move_multiple`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MoveMultipleRequest {
    #[serde(rename = "ParentLinkID")]
    pub parent_link_id: String,
    pub links: Vec<MoveLinkDto>,
}

/// `POST /drive/v2/volumes/{v}/folders`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateFolderRequest {
    #[serde(rename = "ParentLinkID")]
    pub parent_link_id: String,
    /// Armored encrypted name.
    pub name: String,
    /// Lookup hash of the name under the parent hash key.
    pub hash: String,
    pub node_key: String,
    pub node_passphrase: String,
    pub node_passphrase_signature: String,
    pub node_hash_key: String,
    pub signature_email: String,
}

/// Response to a folder creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFolderResponse {
    #[serde(rename = "Folder")]
    pub folder: CreatedFolderDto,
}

/// Identifier of a created folder.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedFolderDto {
    #[serde(rename = "ID")]
    pub id: String,
}

/// `POST /drive/v2/volumes/{v}/links/{n}/checkAvailableHashes`
#[derive(Debug, Clone, Serialize)]
pub struct CheckHashesRequest {
    #[serde(rename = "Hashes")]
    pub hashes: Vec<String>,
    #[serde(rename = "ClientUID", skip_serializing_if = "Option::is_none")]
    pub client_uid: Option<String>,
}

/// Response to a hash availability probe.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckHashesResponse {
    #[serde(rename = "AvailableHashes", default)]
    pub available_hashes: Vec<String>,
    #[serde(rename = "PendingHashes", default)]
    pub pending_hashes: Vec<PendingHashDto>,
}

/// A hash currently held by an uncommitted draft.
#[derive(Debug, Clone, Deserialize)]
pub struct PendingHashDto {
    #[serde(rename = "Hash")]
    pub hash: String,
    /// Client that created the draft.
    #[serde(rename = "ClientUID", default)]
    pub client_uid: Option<String>,
    #[serde(rename = "DraftLinkID", default)]
    pub draft_link_id: Option<String>,
    #[serde(rename = "DraftRevisionID", default)]
    pub draft_revision_id: Option<String>,
}

/// Thumbnail lookup request.
#[derive(Debug, Clone, Serialize)]
pub struct ThumbnailsRequest {
    #[serde(rename = "LinkIDs")]
    pub link_ids: Vec<String>,
    #[serde(rename = "Type")]
    pub thumbnail_type: u8,
}

/// Per-link thumbnail lookup outcome.
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailDto {
    #[serde(rename = "LinkID")]
    pub link_id: String,
    #[serde(rename = "BareURL", default)]
    pub bare_url: Option<String>,
    #[serde(rename = "Token", default)]
    pub token: Option<String>,
    #[serde(rename = "Error", default)]
    pub error: Option<String>,
}

/// Response to a thumbnail lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailsResponse {
    #[serde(rename = "Thumbnails", default)]
    pub thumbnails: Vec<ThumbnailDto>,
}

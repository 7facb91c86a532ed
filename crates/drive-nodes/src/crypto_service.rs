//! Node record decryption
//!
//! Turns one encrypted link record into the public node surface. Every
//! sub-decrypt contributes to per-field verification state; failures degrade
//! the node instead of raising, and each failure is reported to telemetry
//! once. An unverified node key hides a subsequent hash-key verification
//! error so the same root cause is not reported twice.

use crate::cache::CachedNodeKeys;
use crate::dto::{LinkDto, RevisionDto, LINK_TYPE_FILE, LINK_TYPE_FOLDER, REVISION_STATE_ACTIVE};
use drive_api::ApiClient;
use drive_core::{
    Author, AuthorError, ClaimedAuthor, ClaimedDigests, DegradedNode, DriveError,
    ExtendedAttributes, FileInfo, FolderInfo, MaybeNode, MemberRole, Node, NodeInfo, NodeType,
    NodeUid, Revision, RevisionState, RevisionUid, TelemetryEvent, VerificationField,
    VerificationStatus, VolumeId,
};
use drive_crypto::{
    AccountProvider, ArmoredKey, ArmoredMessage, ArmoredSignature, DriveCrypto, KeyPacket,
    PrivateKey, PublicKey,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::Arc;
use tracing::debug;

/// Unix timestamp of 2024-01-01T00:00:00Z. Records older than this predate
/// strict signature enforcement and are reported with a legacy flag.
const SIGNATURES_ENFORCED_SINCE: i64 = 1_704_067_200;

/// Result of decrypting one link record.
pub struct DecryptedNodeRecord {
    /// The node surface, degraded when any essential field failed.
    pub node: MaybeNode,
    /// Key material recovered along the way; present whenever the node key
    /// itself decrypted, even for otherwise degraded nodes.
    pub keys: Option<CachedNodeKeys>,
}

/// Decrypts encrypted node records given their parent key.
pub struct NodeCryptoService {
    crypto: DriveCrypto,
    account: Arc<dyn AccountProvider>,
    api: Arc<ApiClient>,
}

impl NodeCryptoService {
    /// Build the service.
    pub fn new(crypto: DriveCrypto, account: Arc<dyn AccountProvider>, api: Arc<ApiClient>) -> Self {
        Self {
            crypto,
            account,
            api,
        }
    }

    /// Decrypt one link record with its parent key (the share key for
    /// roots). Never fails: the worst outcome is a fully degraded node.
    pub async fn decrypt_node(
        &self,
        link: &LinkDto,
        volume_id: &VolumeId,
        parent_key: &PrivateKey,
        default_share_email: Option<&str>,
    ) -> DecryptedNodeRecord {
        let uid = NodeUid::new(volume_id.clone(), link.link_id.clone());
        let parent_uid = link
            .parent_link_id
            .clone()
            .map(|parent| NodeUid::new(volume_id.clone(), parent));
        let from_before_2024 = link.create_time < SIGNATURES_ENFORCED_SINCE;

        let node_type = match link.link_type {
            LINK_TYPE_FOLDER => NodeType::Folder,
            LINK_TYPE_FILE => NodeType::File,
            other => {
                let error = DriveError::validation(format!("unknown link type {other}"));
                return DecryptedNodeRecord {
                    node: Err(self.fully_degraded(&uid, parent_uid, None, link, error)),
                    keys: None,
                };
            }
        };

        let key_email = normalize_email(&link.signature_email);
        let name_email = normalize_email(&link.name_signature_email);
        let key_verification_keys = self.keys_for_email(&key_email).await;
        let address_matches_default_share = matches!(
            (&key_email, default_share_email),
            (Some(email), Some(share_email)) if email == share_email
        );

        // 1. Node key and passphrase.
        let decrypted_key = match self
            .crypto
            .decrypt_key(
                &ArmoredKey(link.node_key.clone()),
                &ArmoredMessage(link.node_passphrase.clone()),
                link.node_passphrase_signature
                    .as_ref()
                    .map(|sig| ArmoredSignature(sig.clone()))
                    .as_ref(),
                std::slice::from_ref(parent_key),
                &key_verification_keys,
            )
            .await
        {
            Ok(key) => key,
            Err(err) => {
                self.report_decryption(VerificationField::NodeKey, &err, from_before_2024);
                return DecryptedNodeRecord {
                    node: Err(self.fully_degraded(
                        &uid,
                        parent_uid,
                        Some(node_type),
                        link,
                        err,
                    )),
                    keys: None,
                };
            }
        };

        let key_author = author_for(&key_email, decrypted_key.verified);
        let key_author_failed = key_email.is_some() && !decrypted_key.verified.is_valid();
        if key_author_failed {
            self.report_verification(
                VerificationField::NodeKey,
                from_before_2024,
                address_matches_default_share,
            );
        }

        let mut errors: Vec<DriveError> = Vec::new();
        let mut keys = CachedNodeKeys {
            key: decrypted_key.key.clone(),
            passphrase: decrypted_key.passphrase.clone(),
            passphrase_session_key: decrypted_key.passphrase_session_key.clone(),
            name_session_key: None,
            hash_key: None,
            content_key: None,
        };

        // 2/3. Type-specific fields.
        let info = match node_type {
            NodeType::Folder => NodeInfo::Folder(
                self.decrypt_folder_fields(
                    link,
                    &decrypted_key.key,
                    &key_verification_keys,
                    key_author_failed,
                    from_before_2024,
                    address_matches_default_share,
                    &mut keys,
                    &mut errors,
                )
                .await,
            ),
            NodeType::File => NodeInfo::File(
                self.decrypt_file_fields(
                    link,
                    &uid,
                    &key_email,
                    &decrypted_key.key,
                    from_before_2024,
                    address_matches_default_share,
                    &mut keys,
                    &mut errors,
                )
                .await,
            ),
        };

        // 4. Name, with the same node key.
        let name_verification_keys = if name_email == key_email {
            key_verification_keys.clone()
        } else {
            self.keys_for_email(&name_email).await
        };
        let (name, name_author) = match self
            .crypto
            .decrypt_node_name(
                &ArmoredMessage(link.name.clone()),
                std::slice::from_ref(&decrypted_key.key),
                &name_verification_keys,
            )
            .await
        {
            Ok(decrypted) => {
                keys.name_session_key = Some(decrypted.session_key.clone());
                let author = author_for(&name_email, decrypted.verified);
                if name_email.is_some() && !decrypted.verified.is_valid() {
                    self.report_verification(
                        VerificationField::NodeName,
                        from_before_2024,
                        address_matches_default_share,
                    );
                }
                (Ok(decrypted.name), author)
            }
            Err(err) => {
                self.report_decryption(VerificationField::NodeName, &err, from_before_2024);
                (
                    Err(err.clone()),
                    Err(AuthorError {
                        claimed_author: name_email.clone(),
                        error: err.to_string(),
                    }),
                )
            }
        };

        let direct_member_role = role_from_wire(link.member_role);
        let node = match (name, errors.is_empty()) {
            (Ok(name), true) => Ok(Node {
                uid,
                parent_uid,
                node_type,
                name,
                key_author,
                name_author,
                direct_member_role,
                is_shared: link.is_shared,
                trash_time: link.trash_time,
                creation_time: link.create_time,
                info,
            }),
            (name, _) => {
                debug!(uid = %uid, "node degraded");
                let active_revision = match &info {
                    NodeInfo::File(file) => file.active_revision.clone(),
                    NodeInfo::Folder(_) => None,
                };
                Err(DegradedNode {
                    uid,
                    parent_uid,
                    node_type: Some(node_type),
                    name,
                    key_author,
                    name_author,
                    direct_member_role: Some(direct_member_role),
                    is_shared: link.is_shared,
                    trash_time: link.trash_time,
                    creation_time: link.create_time,
                    active_revision,
                    errors,
                })
            }
        };

        DecryptedNodeRecord {
            node,
            keys: Some(keys),
        }
    }

    /// Decrypt a revision record (state, xattrs, content author) with its
    /// node key. Used both for the active revision embedded in a link and
    /// for explicit revision listings.
    pub async fn decrypt_revision(
        &self,
        revision: &RevisionDto,
        node_uid: &NodeUid,
        node_key: &PrivateKey,
        from_before_2024: bool,
        errors: &mut Vec<DriveError>,
    ) -> Revision {
        let uid = RevisionUid::new(
            node_uid.volume_id.clone(),
            node_uid.node_id.clone(),
            revision.revision_id.clone(),
        );
        let state = if revision.state == REVISION_STATE_ACTIVE {
            RevisionState::Active
        } else {
            RevisionState::Superseded
        };
        let content_email = normalize_email(&revision.signature_email);
        let content_keys = self.keys_for_email(&content_email).await;

        let mut extended_attributes: Option<ExtendedAttributes> = None;
        let mut xattr_verified = VerificationStatus::NotSigned;
        if let Some(xattr) = &revision.xattr {
            match self
                .crypto
                .decrypt_armored_text(
                    &ArmoredMessage(xattr.clone()),
                    std::slice::from_ref(node_key),
                    &content_keys,
                )
                .await
            {
                Ok((text, verified)) => {
                    xattr_verified = verified;
                    match serde_json::from_str::<ExtendedAttributes>(&text) {
                        Ok(parsed) => extended_attributes = Some(parsed),
                        Err(err) => {
                            let error = DriveError::decryption(format!(
                                "malformed extended attributes: {err}"
                            ));
                            self.report_decryption(
                                VerificationField::NodeExtendedAttributes,
                                &error,
                                from_before_2024,
                            );
                            errors.push(error);
                        }
                    }
                }
                Err(err) => {
                    self.report_decryption(
                        VerificationField::NodeExtendedAttributes,
                        &err,
                        from_before_2024,
                    );
                    errors.push(err);
                }
            }
        }

        let content_author = author_for(&content_email, xattr_verified);

        Revision {
            uid,
            state,
            creation_time: revision.create_time,
            content_author,
            claimed_size: extended_attributes
                .as_ref()
                .and_then(ExtendedAttributes::claimed_size),
            claimed_modification_time: extended_attributes
                .as_ref()
                .and_then(ExtendedAttributes::claimed_modification_time),
            claimed_digests: extended_attributes
                .as_ref()
                .map(ExtendedAttributes::claimed_digests)
                .unwrap_or_else(ClaimedDigests::default),
            extended_attributes,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn decrypt_folder_fields(
        &self,
        link: &LinkDto,
        node_key: &PrivateKey,
        key_verification_keys: &[PublicKey],
        key_author_failed: bool,
        from_before_2024: bool,
        address_matches_default_share: bool,
        keys: &mut CachedNodeKeys,
        errors: &mut Vec<DriveError>,
    ) -> FolderInfo {
        let mut info = FolderInfo {
            hash_key_available: false,
            extended_attributes: None,
        };
        let Some(folder) = &link.folder_properties else {
            return info;
        };

        match self
            .crypto
            .decrypt_node_hash_key(
                &ArmoredMessage(folder.node_hash_key.clone()),
                node_key,
                key_verification_keys,
            )
            .await
        {
            Ok((hash_key, verified)) => {
                keys.hash_key = Some(hash_key);
                info.hash_key_available = true;
                // An unverified node key already produced a report; a hash
                // key signed by that same unverifiable author would only
                // repeat it.
                if !verified.is_valid() && !key_author_failed {
                    self.report_verification(
                        VerificationField::NodeHashKey,
                        from_before_2024,
                        address_matches_default_share,
                    );
                }
            }
            Err(err) => {
                self.report_decryption(VerificationField::NodeHashKey, &err, from_before_2024);
                errors.push(err);
            }
        }

        if let Some(xattr) = &folder.xattr {
            match self
                .crypto
                .decrypt_armored_text(
                    &ArmoredMessage(xattr.clone()),
                    std::slice::from_ref(node_key),
                    key_verification_keys,
                )
                .await
            {
                Ok((text, _verified)) => match serde_json::from_str(&text) {
                    Ok(parsed) => info.extended_attributes = Some(parsed),
                    Err(err) => {
                        let error = DriveError::decryption(format!(
                            "malformed extended attributes: {err}"
                        ));
                        self.report_decryption(
                            VerificationField::NodeExtendedAttributes,
                            &error,
                            from_before_2024,
                        );
                        errors.push(error);
                    }
                },
                Err(err) => {
                    self.report_decryption(
                        VerificationField::NodeExtendedAttributes,
                        &err,
                        from_before_2024,
                    );
                    errors.push(err);
                }
            }
        }

        info
    }

    #[allow(clippy::too_many_arguments)]
    async fn decrypt_file_fields(
        &self,
        link: &LinkDto,
        uid: &NodeUid,
        key_email: &Option<String>,
        node_key: &PrivateKey,
        from_before_2024: bool,
        address_matches_default_share: bool,
        keys: &mut CachedNodeKeys,
        errors: &mut Vec<DriveError>,
    ) -> FileInfo {
        let mut info = FileInfo {
            content_key_author: Ok(ClaimedAuthor::Anonymous),
            active_revision: None,
            media_type: link.mime_type.clone(),
        };
        let Some(file) = &link.file_properties else {
            return info;
        };

        // Content key: a session key wrapped to the node key and signed by
        // the node key itself.
        let packet = BASE64
            .decode(&file.content_key_packet)
            .map(KeyPacket)
            .map_err(|err| DriveError::decryption(format!("bad content key packet: {err}")));
        let node_public = self.crypto.provider().public_key(node_key);

        match (packet, node_public) {
            (Ok(packet), Ok(node_public)) => {
                match self
                    .crypto
                    .decrypt_and_verify_session_key(
                        &packet,
                        file.content_key_packet_signature
                            .as_ref()
                            .map(|sig| ArmoredSignature(sig.clone()))
                            .as_ref(),
                        std::slice::from_ref(node_key),
                        std::slice::from_ref(&node_public),
                    )
                    .await
                {
                    Ok((session_key, verified)) => {
                        keys.content_key = Some(session_key);
                        info.content_key_author = author_for(key_email, verified);
                        if key_email.is_some() && !verified.is_valid() {
                            self.report_verification(
                                VerificationField::NodeContentKey,
                                from_before_2024,
                                address_matches_default_share,
                            );
                        }
                    }
                    Err(err) => {
                        self.report_decryption(
                            VerificationField::NodeContentKey,
                            &err,
                            from_before_2024,
                        );
                        info.content_key_author = Err(AuthorError {
                            claimed_author: key_email.clone(),
                            error: err.to_string(),
                        });
                        errors.push(err);
                    }
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                self.report_decryption(VerificationField::NodeContentKey, &err, from_before_2024);
                info.content_key_author = Err(AuthorError {
                    claimed_author: key_email.clone(),
                    error: err.to_string(),
                });
                errors.push(err);
            }
        }

        if let Some(revision) = &file.active_revision {
            info.active_revision = Some(
                self.decrypt_revision(revision, uid, node_key, from_before_2024, errors)
                    .await,
            );
        }

        info
    }

    async fn keys_for_email(&self, email: &Option<String>) -> Vec<PublicKey> {
        match email {
            Some(email) => self
                .account
                .public_keys_for_email(email)
                .await
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    fn fully_degraded(
        &self,
        uid: &NodeUid,
        parent_uid: Option<NodeUid>,
        node_type: Option<NodeType>,
        link: &LinkDto,
        error: DriveError,
    ) -> DegradedNode {
        let key_email = normalize_email(&link.signature_email);
        let name_email = normalize_email(&link.name_signature_email);
        DegradedNode {
            uid: uid.clone(),
            parent_uid,
            node_type,
            name: Err(error.clone()),
            key_author: Err(AuthorError {
                claimed_author: key_email,
                error: error.to_string(),
            }),
            name_author: Err(AuthorError {
                claimed_author: name_email,
                error: error.to_string(),
            }),
            direct_member_role: Some(role_from_wire(link.member_role)),
            is_shared: link.is_shared,
            trash_time: link.trash_time,
            creation_time: link.create_time,
            active_revision: None,
            errors: vec![error],
        }
    }

    fn report_verification(
        &self,
        field: VerificationField,
        from_before_2024: bool,
        address_matching_default_share: bool,
    ) {
        self.api.record(TelemetryEvent::VerificationError {
            field,
            from_before_2024,
            address_matching_default_share,
        });
    }

    fn report_decryption(&self, field: VerificationField, error: &DriveError, from_before_2024: bool) {
        self.api.record(TelemetryEvent::DecryptionError {
            field,
            error: error.to_string(),
            from_before_2024,
        });
    }
}

fn normalize_email(email: &Option<String>) -> Option<String> {
    email.as_ref().filter(|email| !email.is_empty()).cloned()
}

/// Provenance from a claimed email and a verification outcome. A record
/// without a signing email is an anonymous public-link upload; no
/// verification is expected of it.
fn author_for(email: &Option<String>, verified: VerificationStatus) -> Author {
    match email {
        None => Ok(ClaimedAuthor::Anonymous),
        Some(email) => match verified {
            VerificationStatus::SignedAndValid => Ok(ClaimedAuthor::Email(email.clone())),
            VerificationStatus::NotSigned => Err(AuthorError {
                claimed_author: Some(email.clone()),
                error: "missing signature".to_string(),
            }),
            VerificationStatus::SignedAndInvalid => Err(AuthorError {
                claimed_author: Some(email.clone()),
                error: "invalid signature".to_string(),
            }),
        },
    }
}

fn role_from_wire(role: u8) -> MemberRole {
    match role {
        crate::dto::ROLE_VIEWER => MemberRole::Viewer,
        crate::dto::ROLE_EDITOR => MemberRole::Editor,
        crate::dto::ROLE_ADMIN => MemberRole::Admin,
        _ => MemberRole::Inherited,
    }
}

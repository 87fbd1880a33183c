use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// User identity as it arrives on the wire. Clients are inconsistent about
/// the shape: some send a bare id string, some send the whole user object
/// with an `id` or `_id` field. All inbound payloads are narrowed to a
/// canonical `Uuid` by [`resolve_identity`] at the hub boundary before any
/// merge or receipt logic runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentityRef {
    Id(Uuid),
    Object {
        #[serde(default)]
        id: Option<Uuid>,
        #[serde(default, rename = "_id")]
        legacy_id: Option<Uuid>,
    },
    Raw(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("payload does not carry a usable user id")]
pub struct InvalidIdentity;

/// Narrow a wire identity to a canonical user id. Objects prefer `id` over
/// `_id`; raw strings must parse as a UUID.
pub fn resolve_identity(input: &IdentityRef) -> Result<Uuid, InvalidIdentity> {
    match input {
        IdentityRef::Id(id) => Ok(*id),
        IdentityRef::Object { id, legacy_id } => (*id).or(*legacy_id).ok_or(InvalidIdentity),
        IdentityRef::Raw(s) => s.trim().parse().map_err(|_| InvalidIdentity),
    }
}

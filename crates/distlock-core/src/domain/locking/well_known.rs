//! Lock ids shared by every process of a deployment
//!
//! Negative ids are reserved for these; application-defined resources should
//! use positive ids.

use super::types::LockId;

pub const SERVERS: LockId = LockId::new(-331);
pub const CONTENT_TYPES: LockId = LockId::new(-332);
pub const CONTENT_TREE: LockId = LockId::new(-333);
pub const MEDIA_TREE: LockId = LockId::new(-334);
pub const MEMBER_TREE: LockId = LockId::new(-335);
pub const MEDIA_TYPES: LockId = LockId::new(-336);
pub const MEMBER_TYPES: LockId = LockId::new(-337);
pub const DOMAINS: LockId = LockId::new(-338);
pub const KEY_VALUES: LockId = LockId::new(-339);
pub const LANGUAGES: LockId = LockId::new(-340);
pub const SCHEDULED_PUBLISHING: LockId = LockId::new(-341);

/// Held by the process that owns the main application domain
pub const MAIN_DOM: LockId = LockId::new(-1000);

/// Every well-known id with a display name
pub const ALL: [(LockId, &str); 12] = [
    (SERVERS, "servers"),
    (CONTENT_TYPES, "content-types"),
    (CONTENT_TREE, "content-tree"),
    (MEDIA_TREE, "media-tree"),
    (MEMBER_TREE, "member-tree"),
    (MEDIA_TYPES, "media-types"),
    (MEMBER_TYPES, "member-types"),
    (DOMAINS, "domains"),
    (KEY_VALUES, "key-values"),
    (LANGUAGES, "languages"),
    (SCHEDULED_PUBLISHING, "scheduled-publishing"),
    (MAIN_DOM, "main-dom"),
];

/// Display name of a well-known id
pub fn name_of(lock_id: LockId) -> Option<&'static str> {
    ALL.iter().find(|(id, _)| *id == lock_id).map(|(_, name)| *name)
}

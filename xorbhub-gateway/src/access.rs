//! Read authorization seam
//!
//! Authentication lives outside this service. Handlers still ask the policy
//! before returning a reconstruction, and a denied file looks exactly like a
//! missing one.

use xorbhub_metadata::FileRecord;

pub trait ReadAccess: Send + Sync {
    fn can_read(&self, file: &FileRecord) -> bool;
}

/// Policy used when the caller has already been authorized upstream
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ReadAccess for AllowAll {
    fn can_read(&self, _file: &FileRecord) -> bool {
        true
    }
}

//! Read/write permission granted to a provider instance.

/// Whether a provider instance may perform mutating operations.
///
/// Read-only providers must reject `upload_file`, `mkdir`, `delete`,
/// `move_item`, and `rename` with [`crate::domain::errors::CoreError::service_unavailable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ReadWrite,
    ReadOnly,
}

impl Permission {
    #[must_use]
    pub fn allows_write(self) -> bool {
        matches!(self, Permission::ReadWrite)
    }
}

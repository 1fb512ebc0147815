//! UUID generation.

use uuid::Uuid;

/// Generates a random (v4) UUID.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

//! Store identifiers.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Primary key of a row in the dashboard's `stores` table.
///
/// Only used for logging and for tying a session back to its store; the
/// queue and gateway look stores up by [`ShopDomain`](crate::ShopDomain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(i32);

impl StoreId {
    /// Wrap a raw `stores.id`.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// The raw `stores.id`.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i32> for StoreId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

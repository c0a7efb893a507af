pub mod conversation;
pub mod order;
pub mod payment;
pub mod product;

use uuid::Uuid;

/// Hex suffix for prefixed identifiers (`ord_`, `txn_`, `session_`).
pub(crate) fn hex_suffix(len: usize) -> String {
    let mut raw = Uuid::new_v4().simple().to_string();
    raw.truncate(len);
    raw
}

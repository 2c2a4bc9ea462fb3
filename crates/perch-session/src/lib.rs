//! Session lifecycle management: one live browser context per account,
//! restored from and flushed to encrypted durable records.

pub mod crypto;
pub mod fingerprint;
pub mod manager;

pub use crypto::SessionCipher;
pub use fingerprint::random_fingerprint;
pub use manager::SessionManager;

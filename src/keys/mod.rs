//! Key custody subsystem.
//!
//! # Data Flow
//! ```text
//! adapter.generate_address()
//!     → manager.rs (generate key, derive address via adapter)
//!     → store.rs (persist, read back, verify)
//!     → address returned to caller
//!
//! caller wants to pay out:
//!     → manager.signing_key(currency, from)
//!     → adapter.build_and_send(request, &key)
//! ```
//!
//! # Security Constraints
//! - Key material is zeroized on drop and never logged
//! - `KeyManager::export_key` is the only path that encodes a key for output
//! - Adapters receive keys at sign time only and never persist them

pub mod manager;
pub mod material;
pub mod store;

pub use manager::KeyManager;
pub use material::KeyMaterial;
pub use store::{KeyStore, MemoryKeyStore};

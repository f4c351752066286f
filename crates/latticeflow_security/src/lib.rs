pub mod credentials;
pub mod hashing;

pub use credentials::{CredentialCipher, CredentialCipherError};

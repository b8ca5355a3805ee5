//! Async wrapper around the `openssl(1)` command line: key generation, CSR
//! handling, certificate introspection and ACME JWS signing.
//!
//! Every cryptographic operation here is implemented by shelling out to
//! `openssl`. This crate owns no key material in memory beyond the bytes
//! passed through it, and does no parsing beyond what's needed to drive
//! the ACME protocol or report certificate metadata to callers.

mod command;
pub mod error;
pub mod jws;
pub mod keygen;
pub mod privateca;
pub mod x509;

pub use error::{CryptoError, Result};
pub use jws::{b64url, rsa_account_jwk, sign_sha256, Jwk};
pub use keygen::{csr_to_der, generate_csr, generate_ec_secp384r1_key, generate_rsa_key};
pub use privateca::{ca_sign, CaSignRequest};
pub use x509::{der_to_pem, pem_to_der, x509_info, X509Info};

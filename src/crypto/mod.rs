//! Cryptographic Primitives
//!
//! - **field**: arithmetic modulo the prime `2^256 - 189`
//! - **shamir**: threshold splitting and Lagrange reconstruction
//! - **keys**: versioned envelope keys derived with HKDF-SHA256
//! - **envelope**: ChaCha20-Poly1305 sealing of keys and shares at rest

pub mod envelope;
pub mod field;
pub mod keys;
pub mod shamir;

//! A DNS-tunneled transport: frame codec, resolver fingerprinting, session
//! handshake, and a parallel send/receive engine sitting on top of a
//! pluggable stub resolver.
//!
//! The cryptographic primitives, the OTP generator, and the application
//! envelope schema are external collaborators; this crate only defines
//! the interfaces it consumes from them (`crypto::KeyAgreement`,
//! `crypto::CipherContext`, `crypto::OtpProvider`).
#[macro_use]
mod macros;

pub mod alphabet;
pub mod crypto;
pub mod error;
pub mod fingerprint;
pub mod frame;
pub mod packer;
pub mod receiver;
pub mod resolver;
pub mod sender;
pub mod session;
pub mod wire;
pub mod worker;

pub use error::{TunnelError, TunnelResult};
pub use session::{Session, SessionConfig};

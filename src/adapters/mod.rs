//! Adapters — concrete implementations of the port traits.
//!
//! | Adapter        | Implements         | Backed by                       |
//! |----------------|--------------------|---------------------------------|
//! | `ed25519`      | SignatureVerifier  | ed25519-dalek public key        |
//! |                | RequestSigner      | ed25519-dalek signing key       |
//! | `soft_enclave` | SecureEnclave      | seed-derived AES keys (no HW)   |

pub mod ed25519;
pub mod soft_enclave;

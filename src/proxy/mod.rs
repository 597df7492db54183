//! Two network-facing entry paths sharing one correlator pipeline: the
//! CONNECT/TLS-MITM listener for transparent interception, and the
//! backward-compat direct-mode reverse proxy for clients already configured
//! with an explicit upstream base URL.

pub mod ca;
pub mod error;
pub mod mitm;
pub mod server;
pub mod state;

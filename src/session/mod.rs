//! Session module: credential intake and validation
//!
//! The credential is produced by an external login step and treated as an
//! opaque cookie blob. Before every run it is re-read from disk and checked
//! against the remote service; the outcome is written back to storage.

mod credential;
mod validator;

pub use credential::{
    load_credential_file, parse_cookie_blob, Credential, CredentialError, CredentialSource,
    UserInfo, Validation,
};
pub use validator::{HttpSessionValidator, SessionValidator};

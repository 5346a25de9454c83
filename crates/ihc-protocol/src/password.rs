//! Password digests.
//!
//! The server never sees a plain password: logins and user records carry
//! the lowercase hex MD5 digest of it.

use md5::{Digest, Md5};

/// Lowercase hex MD5 digest of `password`.
pub fn hash_password(password: &str) -> String {
    format!("{:x}", Md5::digest(password.as_bytes()))
}

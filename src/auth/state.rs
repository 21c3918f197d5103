//! Authentication state trait.

use std::sync::Arc;

use crate::jwt::TokenCodec;

/// Trait for state types that can verify access tokens.
pub trait HasAuthBackend {
    fn codec(&self) -> &TokenCodec;
}

impl HasAuthBackend for Arc<TokenCodec> {
    fn codec(&self) -> &TokenCodec {
        self
    }
}

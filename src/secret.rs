use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Passwords and key material. The contents are wiped on drop and kept out
/// of `Debug` output, so a `Secret` can sit in instrumented arguments.
#[derive(Zeroize, ZeroizeOnDrop, Eq, PartialEq, Clone)]
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(inner: T) -> Self {
        Self(inner)
    }

    /// Borrows the protected value for the duration of one call into the
    /// mechanism or realm.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl<T: Zeroize> From<T> for Secret<T> {
    fn from(inner: T) -> Self {
        Self(inner)
    }
}

impl From<&str> for Secret<String> {
    fn from(inner: &str) -> Self {
        Self(inner.to_owned())
    }
}

//! In-memory secret holder that zeroes its buffer when done.

use std::fmt;

/// A secret held in a byte buffer that is overwritten with zeros on
/// `wipe()` and on drop. `Debug`/`Display` never reveal the value.
pub struct SecureString {
    bytes: Vec<u8>,
    wiped: bool,
}

impl SecureString {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            bytes: value.into().into_bytes(),
            wiped: false,
        }
    }

    /// Borrow the secret. Empty after a wipe.
    pub fn get(&self) -> &str {
        if self.wiped {
            return "";
        }
        std::str::from_utf8(&self.bytes).unwrap_or("")
    }

    pub fn is_wiped(&self) -> bool {
        self.wiped
    }

    /// Overwrite the buffer with zeros. Idempotent.
    pub fn wipe(&mut self) {
        for b in self.bytes.iter_mut() {
            // Volatile so the zeroing store is not optimized away.
            unsafe { std::ptr::write_volatile(b, 0) };
        }
        self.bytes.clear();
        self.wiped = true;
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        self.wipe();
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureString(***)")
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl From<String> for SecureString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_value() {
        let s = SecureString::new("sk-or-v1-secret");
        assert_eq!(s.get(), "sk-or-v1-secret");
        assert!(!s.is_wiped());
    }

    #[test]
    fn test_wipe_clears_value() {
        let mut s = SecureString::new("topsecret");
        s.wipe();
        assert_eq!(s.get(), "");
        assert!(s.is_wiped());
        // Idempotent.
        s.wipe();
        assert_eq!(s.get(), "");
    }

    #[test]
    fn test_debug_display_hide_value() {
        let s = SecureString::new("hunter2");
        assert_eq!(format!("{s:?}"), "SecureString(***)");
        assert_eq!(format!("{s}"), "***");
    }

    #[test]
    fn test_from_string() {
        let s: SecureString = String::from("abc").into();
        assert_eq!(s.get(), "abc");
    }
}

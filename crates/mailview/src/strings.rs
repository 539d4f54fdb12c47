use std::sync::Arc;

/// Holds either an owned or borrowed string, where the slice method is
/// aware of that borrowing. The recursive part walker slices its input
/// heavily, and decrypted envelope plaintext (which is owned) needs to
/// flow through the same code paths as borrowed input slices.
pub enum SharedString<'a> {
    Owned(Arc<String>),
    Borrowed(&'a str),
    Sliced {
        other: Arc<String>,
        range: std::ops::Range<usize>,
    },
}

impl std::cmp::PartialEq<Self> for SharedString<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_str().eq(other.as_str())
    }
}

impl std::cmp::PartialEq<&str> for SharedString<'_> {
    fn eq(&self, other: &&str) -> bool {
        self.as_str().eq(*other)
    }
}

impl std::fmt::Display for SharedString<'_> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl std::fmt::Debug for SharedString<'_> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{:?}", self.as_str())
    }
}

impl std::ops::Deref for SharedString<'_> {
    type Target = str;
    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl Clone for SharedString<'_> {
    fn clone(&self) -> Self {
        match self {
            Self::Owned(s) => Self::Sliced {
                other: Arc::clone(s),
                range: 0..s.len(),
            },
            Self::Borrowed(s) => Self::Borrowed(s),
            Self::Sliced { other, range } => Self::Sliced {
                other: Arc::clone(other),
                range: range.clone(),
            },
        }
    }
}

impl<'a> SharedString<'a> {
    /// View raw octets as text, borrowing when the input is valid UTF-8
    /// and falling back to an owned lossy conversion otherwise.
    pub fn from_bytes_lossy(bytes: &'a [u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(s) => Self::Borrowed(s),
            Err(_) => String::from_utf8_lossy(bytes).into_owned().into(),
        }
    }

    pub fn slice(&self, slice_range: std::ops::Range<usize>) -> Self {
        self.assert_slice(slice_range.clone());
        match self {
            Self::Owned(s) => Self::Sliced {
                other: Arc::clone(s),
                range: slice_range,
            },
            Self::Borrowed(s) => Self::Borrowed(s.get(slice_range).unwrap()),
            Self::Sliced { other, range } => {
                let len = slice_range.end - slice_range.start;
                Self::Sliced {
                    other: Arc::clone(other),
                    range: range.start + slice_range.start..range.start + slice_range.start + len,
                }
            }
        }
    }

    fn assert_slice(&self, slice_range: std::ops::Range<usize>) {
        if self.as_str().get(slice_range.clone()).is_none() {
            panic!("slice range {slice_range:?} is invalid for {self:?}");
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Owned(s) => s.as_str(),
            Self::Borrowed(s) => s,
            Self::Sliced { other, range } => other.as_str().get(range.clone()).unwrap(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.as_str().as_bytes()
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Owned(s) => s.len(),
            Self::Borrowed(s) => s.len(),
            Self::Sliced { range, .. } => range.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for SharedString<'_> {
    fn from(s: String) -> Self {
        Self::Owned(Arc::new(s))
    }
}

impl<'a> From<&'a str> for SharedString<'a> {
    fn from(s: &'a str) -> Self {
        Self::Borrowed(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slicing_owned_and_borrowed() {
        let borrowed = SharedString::from("hello there");
        assert_eq!(borrowed.slice(0..5), "hello");

        let owned: SharedString = String::from("hello there").into();
        let sliced = owned.slice(6..11);
        assert_eq!(sliced, "there");
        assert_eq!(sliced.slice(1..3), "he");
    }

    #[test]
    fn lossy_bytes() {
        assert_eq!(SharedString::from_bytes_lossy(b"plain"), "plain");
        let fixed = SharedString::from_bytes_lossy(b"bro\xffken");
        assert_eq!(fixed, "bro\u{fffd}ken");
    }
}

/// The in-memory image of one block: exactly `block_size` bytes
///
/// Integers are 32-bit big-endian. Byte arrays and strings are written as a
/// length integer followed by the bytes. The page enforces no layout of its own,
/// callers choose every offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub(crate) contents: Vec<u8>,
}

impl Page {
    pub const INT_BYTES: usize = 4;

    pub fn new(block_size: usize) -> Self {
        Self {
            contents: vec![0; block_size],
        }
    }

    /// Create a new page from the given bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { contents: bytes }
    }

    /// The number of bytes needed to store a string of `length` bytes
    pub fn max_length(length: usize) -> usize {
        Self::INT_BYTES + length
    }

    pub fn size(&self) -> usize {
        self.contents.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.contents
    }

    /// Get an integer from the page at the given offset
    pub fn get_int(&self, offset: usize) -> i32 {
        let mut bytes = [0u8; Self::INT_BYTES];
        bytes.copy_from_slice(&self.contents[offset..offset + Self::INT_BYTES]);
        i32::from_be_bytes(bytes)
    }

    /// Set an integer at the given offset
    pub fn set_int(&mut self, offset: usize, n: i32) {
        self.contents[offset..offset + Self::INT_BYTES].copy_from_slice(&n.to_be_bytes());
    }

    /// Read the length and then the bytes
    pub fn get_bytes(&self, offset: usize) -> Vec<u8> {
        let length = self.get_int(offset).max(0) as usize;
        let start = offset + Self::INT_BYTES;
        self.contents[start..start + length].to_vec()
    }

    /// Write the length and then the bytes
    pub fn set_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.set_int(offset, bytes.len() as i32);
        let start = offset + Self::INT_BYTES;
        self.contents[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Get a string from the page at the given offset
    ///
    /// Strings are stored as UTF-8. A byte sequence that is not valid UTF-8 (which
    /// only happens for pages written outside this engine) is decoded lossily.
    pub fn get_string(&self, offset: usize) -> String {
        String::from_utf8_lossy(&self.get_bytes(offset)).into_owned()
    }

    /// Set a string at the given offset
    pub fn set_string(&mut self, offset: usize, string: &str) {
        self.set_bytes(offset, string.as_bytes());
    }
}

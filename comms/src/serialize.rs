use std::io;

/// Types that can be written as the body of a frame.
pub trait Serialize<'a> {
    /// Writes the owned part of the frame into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame buffer, already containing the length prefix.
    ///
    /// # Returns
    /// An optional borrowed tail that is written right after `buf` without copying,
    /// or an io error if the value could not be encoded.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}

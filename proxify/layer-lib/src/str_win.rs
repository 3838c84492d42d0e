//! Conversions between Rust strings and the NUL terminated buffers Windows APIs speak.

/// Converts a (possibly NUL terminated) UTF-16 buffer into a [`String`], stopping at the first
/// NUL.
pub fn u16_buffer_to_string<T: AsRef<[u16]>>(buffer: T) -> String {
    let buffer = buffer.as_ref();

    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..len])
}

/// Converts a string into a NUL terminated UTF-16 buffer.
pub fn string_to_u16_buffer<T: AsRef<str>>(string: T) -> Vec<u16> {
    string.as_ref().encode_utf16().chain(Some(0)).collect()
}

/// Converts a string into a NUL terminated byte buffer, for ANSI APIs.
pub fn string_to_u8_buffer<T: AsRef<str>>(string: T) -> Vec<u8> {
    string.as_ref().bytes().chain(Some(0)).collect()
}

/// Reads a NUL terminated UTF-16 string from a raw pointer.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL terminated UTF-16 string.
pub unsafe fn u16_ptr_to_string(ptr: *const u16) -> Option<String> {
    if ptr.is_null() {
        return None;
    }

    let mut len = 0;
    while unsafe { *ptr.add(len) } != 0 {
        len += 1;
    }

    let slice = unsafe { std::slice::from_raw_parts(ptr, len) };
    Some(String::from_utf16_lossy(slice))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let buffer = string_to_u16_buffer("example.com");

        assert_eq!(buffer.last(), Some(&0));
        assert_eq!(u16_buffer_to_string(&buffer), "example.com");
        assert_eq!(unsafe { u16_ptr_to_string(buffer.as_ptr()) }.unwrap(), "example.com");
    }

    #[test]
    fn stops_at_first_nul() {
        let mut buffer = string_to_u16_buffer("abc");
        buffer.extend(string_to_u16_buffer("def"));

        assert_eq!(u16_buffer_to_string(buffer), "abc");
        assert_eq!(string_to_u8_buffer("ws2_32"), b"ws2_32\0");
        assert!(unsafe { u16_ptr_to_string(std::ptr::null()) }.is_none());
    }
}

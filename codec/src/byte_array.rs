// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, ByteOrder};

use crate::error::DecodeError;

/// Cursor over an in-memory packet body, used by every `DecodePacket` impl.
///
/// A full packet (fixed header remaining-length bytes) is read off the
/// network first; decoding then happens against this in-memory slice so
/// that a malformed field never blocks on the socket.
pub struct ByteArray<'a> {
    offset: usize,
    data: &'a [u8],
}

impl<'a> ByteArray<'a> {
    /// Create a new `ByteArray` object based on a byte slice.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        ByteArray { offset: 0, data }
    }

    /// Remaining length of bytes available to read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() - self.offset
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining length of bytes available to read. Same as [`Self::len`],
    /// kept as a separate name for call sites that read better spelled out.
    #[must_use]
    pub fn remaining_bytes(&self) -> usize {
        self.len()
    }

    /// Read one byte from the slice.
    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        self.offset += 1;
        if self.offset > self.data.len() {
            Err(DecodeError::OutOfRange)
        } else {
            Ok(self.data[self.offset - 1])
        }
    }

    /// Read a `u16` value from the slice.
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(BigEndian::read_u16(self.read_bytes(2)?))
    }

    /// Read a UTF-8 string with `len` bytes from the slice.
    ///
    /// Invalid UTF-8 falls back to a lossy conversion rather than aborting
    /// the decode, per the wire spec.
    pub fn read_string(&mut self, len: usize) -> Result<String, DecodeError> {
        let bytes = self.read_bytes(len)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    /// Read a byte array with `len` bytes from the slice.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.offset += len;
        if self.offset > self.data.len() {
            Err(DecodeError::OutOfRange)
        } else {
            Ok(&self.data[self.offset - len..self.offset])
        }
    }

    /// Read every remaining byte in the slice. Always succeeds: `len` is
    /// by construction no greater than what's left in `data`.
    pub fn read_remaining_bytes(&mut self) -> &'a [u8] {
        let len = self.remaining_bytes();
        self.read_bytes(len).expect("remaining_bytes() never exceeds data.len()")
    }
}

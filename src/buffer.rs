//! Line reassembly buffer for the AMI read path

use crate::constants::MAX_LINE_SIZE;
use crate::error::{AmiError, AmiResult};

/// Accumulates raw socket bytes and hands out complete lines.
///
/// Bytes before `pos` have already been consumed; [`compact`](Self::compact)
/// drops them once enough has piled up.
#[derive(Debug, Default)]
pub(crate) struct AmiBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl AmiBuffer {
    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data
            .extend_from_slice(bytes);
    }

    /// Unconsumed byte count.
    pub(crate) fn len(&self) -> usize {
        self.data
            .len()
            - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the next `\n`-terminated line, without its `\r\n` / `\n`.
    pub(crate) fn extract_line(&mut self) -> Option<Vec<u8>> {
        let rest = &self.data[self.pos..];
        let nl = rest
            .iter()
            .position(|&b| b == b'\n')?;
        let mut line = rest[..nl].to_vec();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        self.pos += nl + 1;
        Some(line)
    }

    /// Remove whatever is left, terminated or not.
    pub(crate) fn take_remaining(&mut self) -> Vec<u8> {
        let mut rest = self.data[self.pos..].to_vec();
        if rest.last() == Some(&b'\r') {
            rest.pop();
        }
        self.data
            .clear();
        self.pos = 0;
        rest
    }

    /// Drop consumed bytes from the front of the buffer.
    pub(crate) fn compact(&mut self) {
        if self.pos == 0 {
            return;
        }
        self.data
            .drain(..self.pos);
        self.pos = 0;
    }

    /// An unterminated line longer than [`MAX_LINE_SIZE`] means the peer is
    /// not speaking AMI.
    pub(crate) fn check_size_limits(&self) -> AmiResult<()> {
        let pending = &self.data[self.pos..];
        let unterminated = match pending
            .iter()
            .rposition(|&b| b == b'\n')
        {
            Some(last_nl) => pending.len() - last_nl - 1,
            None => pending.len(),
        };
        if unterminated > MAX_LINE_SIZE {
            return Err(AmiError::protocol_error(format!(
                "line exceeds {} bytes without a terminator",
                MAX_LINE_SIZE
            )));
        }
        Ok(())
    }
}

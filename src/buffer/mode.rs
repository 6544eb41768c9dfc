/// Which side of a [`Buffer`](super::Buffer) an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Bytes,
    Chars,
}

/// Mode of a staging buffer.
///
/// Transition table for [`BufferMode::pin`]:
///
/// | current | byte op | char op  |
/// |---------|---------|----------|
/// | `Unset` | `Bytes` | `Chars`  |
/// | `Bytes` | `Bytes` | conflict |
/// | `Chars` | conflict| `Chars`  |
///
/// Only [`BufferMode::release`] (a flush boundary or a recycle) returns to
/// `Unset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferMode {
    #[default]
    Unset,
    Bytes,
    Chars,
}

impl BufferMode {
    /// Next mode for `access`, or `Err(self)` when the mode is already
    /// pinned to the other side.
    pub fn pin(self, access: Access) -> Result<BufferMode, BufferMode> {
        match (self, access) {
            (BufferMode::Unset, Access::Bytes) | (BufferMode::Bytes, Access::Bytes) => {
                Ok(BufferMode::Bytes)
            }
            (BufferMode::Unset, Access::Chars) | (BufferMode::Chars, Access::Chars) => {
                Ok(BufferMode::Chars)
            }
            (current, _) => Err(current),
        }
    }

    pub fn release(&mut self) {
        *self = BufferMode::Unset;
    }

    pub fn is_unset(self) -> bool {
        self == BufferMode::Unset
    }
}

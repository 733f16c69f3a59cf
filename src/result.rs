use thiserror::Error;

pub type Result<A, E = Error> = std::result::Result<A, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoFailed(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    EncodingFailed(#[from] declio::Error),
    #[error("memory read failed at {addr:#x}")]
    MemoryRead { addr: u64 },
    #[error("static pattern not found: {name}")]
    PatternNotFound { name: &'static str },
    #[error("archive format error: {reason}")]
    ArchiveFormat { reason: String },
    #[error("resource not found: did={did:#010x}")]
    ResourceNotFound { did: u32 },
    #[error("decode error at {context}")]
    Decode { context: String },
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn decode(context: impl Into<String>) -> Self {
        Error::Decode {
            context: context.into(),
        }
    }

    pub(crate) fn archive(reason: impl Into<String>) -> Self {
        Error::ArchiveFormat {
            reason: reason.into(),
        }
    }

    /// Transient memory-read errors are the only ones the `Poller` swallows
    /// while no character has ever been decoded yet (§7).
    pub fn is_transient_memory_read(&self) -> bool {
        matches!(self, Error::MemoryRead { .. })
    }
}

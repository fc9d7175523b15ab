#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("engine write failed: {0}")]
    EngineWrite(String),
    #[error("engine read failed: {0}")]
    EngineRead(String),
    #[error("value corruption for key {key:?}: expected 8 bytes, found {len}")]
    Corruption { key: Vec<u8>, len: usize },
    #[error("merge operator failed to resolve key {key:?}")]
    MergeFailed { key: Vec<u8> },
    #[error("merge operator mismatch: stored {stored:?}, configured {configured:?}")]
    ConfigurationMismatch {
        stored: Option<String>,
        configured: Option<String>,
    },
    #[error("cannot open engine: {0}")]
    Open(String),
}

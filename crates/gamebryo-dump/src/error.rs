use thiserror::Error;

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Memory map has no segments")]
    EmptyMemoryMap,

    #[error("Dump truncated: segment at file offset {offset} needs {needed} bytes, file is {file_size}")]
    Truncated {
        offset: u64,
        needed: u64,
        file_size: u64,
    },
}

//! Ciphertext formats: names, file headers, chunks and streams.

pub mod chunk;
pub mod file;
pub mod name;
pub mod streaming;

pub use chunk::{ChunkCipher, ciphertext_size, number_of_chunks, plaintext_size};
pub use file::{FileContext, FileDecryptionError, FileEncryptionError, FileHeader};
pub use name::{EncryptedName, FilenameCodec, NameError};
pub use streaming::{DecryptingReader, EncryptingWriter, StreamingContext, StreamingError};

pub mod xxhash;

pub use xxhash::{copy_and_hash, hash_data, hash_file};

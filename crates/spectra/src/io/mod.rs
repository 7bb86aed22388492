//! Persistence of arrays to byte streams and files.

pub mod array_file;

pub use array_file::{
    read_array, read_from_bytes, read_from_file, write_array, write_to_bytes, write_to_file,
};

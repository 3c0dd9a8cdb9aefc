pub mod filesystem;

pub use filesystem::{
    copy_missing, ensure_directory, newest_mtime, remove_if_exists, remove_tree, write_atomic,
};

//! `fs.promises.*` (§6, §4.7): a direct re-export of [`crate::fs_promises`] under the
//! script-visible namespace the spec names it with.

#[cfg(unix)]
pub use crate::fs_promises::{chmod, chown};
pub use crate::fs_promises::{access, copy, list_dir, make_dir, move_path, read_file, read_link, remove, stat, symlink, write_file};

pub mod fs;

pub use fs::{create_dir_all_with_mode, set_file_mode};

use std::fs;
use std::io;
use std::path::Path;

/// Create a directory and any missing parents, applying `mode` to the
/// directories created on unix. Existing directories are left alone.
pub fn create_dir_all_with_mode<P: AsRef<Path>>(path: P, mode: u32) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    builder.create(path)
}

/// Set the permission bits of a file. A no-op on non-unix platforms.
pub fn set_file_mode<P: AsRef<Path>>(path: P, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
        Ok(())
    }
}

//! A [Vfs] over a game directory on disk.
use std::fs::File;
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};

use crate::*;

/// A [Vfs] which opens container files relative to a root directory.
///
/// Container names come from [RoomNaming] implementations and are plain file names such as `game.001` or
/// `disk01.lec`. It makes a best effort to disallow names which use relative paths to escape the root directory,
/// primarily as a measure to detect bugs in naming schemes.
#[derive(Debug)]
pub struct FilesystemVfs {
    root_path: PathBuf,
}

fn conv_path(path: impl AsRef<Path>) -> Result<relative_path::RelativePathBuf> {
    relative_path::RelativePathBuf::from_path(path)
        .map_err(|_| Error::new(ErrorKind::Other, "Invalid path"))
}

impl FilesystemVfs {
    pub fn new(root_path: &Path) -> FilesystemVfs {
        FilesystemVfs {
            root_path: root_path.to_path_buf(),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Resolve a container name to a path under the root, refusing names which escape it.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        // canonicalize would need the file to exist, and a missing file has to surface as NotFound from open. Go via
        // `RelativePathBuf` to normalize `..` segments lexically instead.
        let absolute = conv_path(name)?.to_logical_path(&self.root_path);
        if !absolute.starts_with(&self.root_path) {
            return Err(Error::new(
                ErrorKind::Other,
                "path is outside the vfs root directory",
            ));
        }
        Ok(absolute)
    }
}

impl Vfs for FilesystemVfs {
    type Reader = File;

    fn open(&self, key: &str) -> Result<File> {
        File::open(self.resolve(key)?)
    }
}

impl VfsReader for File {
    fn get_size(&self) -> Result<u64> {
        let meta = self.metadata()?;
        Ok(meta.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[test]
    fn test_filesystem_vfs() {
        let tmp_dir = tempfile::tempdir().unwrap();

        // Create a directory under the temporary directory so that we can test relative paths.
        let mut vfs_path = tmp_dir.path().to_path_buf();
        vfs_path.push("game");
        std::fs::create_dir(&vfs_path).unwrap();

        std::fs::write(vfs_path.join("game.000"), index_container(&[])).unwrap();
        std::fs::write(vfs_path.parent().unwrap().join("game.001"), b"outside").unwrap();

        let vfs = FilesystemVfs::new(&vfs_path);
        let f = vfs.open("game.000").unwrap();
        assert_eq!(f.get_size().unwrap(), 0);

        let missing = vfs.open("game.002").unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let escaped = vfs.open("../game.001").unwrap_err();
        assert_eq!(escaped.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_cache_over_real_files() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let root = tmp_dir.path();

        let index = index_container(&[
            standard_block(b"DROO", &columnar_listing(&[0, 1], &[0, 0])),
            standard_block(b"DSCR", &columnar_listing(&[1], &[8])),
        ]);
        std::fs::write(root.join("game.000"), xor(&index, 0x69)).unwrap();
        let room = standard_block(b"ROOM", &standard_block(b"SCRP", b"hello"));
        std::fs::write(
            root.join("game.001"),
            xor(&standard_container(&[(1, room)]), 0x69),
        )
        .unwrap();

        let mut cache = ResourceCache::new(
            FilesystemVfs::new(root),
            DiskNaming::new("game", ContainerFormat::Standard),
            CacheConfigBuilder::default().build().unwrap(),
        );
        cache.load_directory().unwrap();
        assert_eq!(
            cache.ensure_loaded(ResourceCategory::Script, 0).unwrap(),
            LoadOutcome::Loaded
        );
        let script = cache
            .get_address(ResourceCategory::Script, 0)
            .unwrap()
            .unwrap();
        assert_eq!(&script[8..], b"hello");
    }
}

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

use fetch_core::{validate_name, OriginError};

use super::{Origin, OriginObject};

/// Origin backed by a local directory
#[derive(Debug, Clone)]
pub struct DirOrigin {
    root: PathBuf,
}

impl DirOrigin {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, OriginError> {
        let root = root.as_ref().canonicalize()?;
        if !root.is_dir() {
            return Err(OriginError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("origin path is not a directory: {}", root.display()),
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Origin for DirOrigin {
    fn get(&self, name: &str) -> Result<OriginObject, OriginError> {
        if validate_name(name).is_err() {
            return Err(OriginError::NotFound(name.to_string()));
        }

        let path = self.root.join(name);
        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => OriginError::NotFound(name.to_string()),
            _ => OriginError::Io(e),
        })?;

        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(OriginError::NotFound(name.to_string()));
        }

        trace!("dir origin: {:?} is {} bytes", path, metadata.len());
        Ok(OriginObject::new(metadata.len(), file))
    }

    fn describe(&self) -> String {
        format!("dir:{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_dir_origin_get() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("hello.txt"), b"hello world").unwrap();

        let origin = DirOrigin::new(temp_dir.path()).unwrap();
        let mut object = origin.get("hello.txt").unwrap();
        assert_eq!(object.size, 11);

        let mut contents = String::new();
        object.body.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello world");
    }

    #[test]
    fn test_dir_origin_missing() {
        let temp_dir = TempDir::new().unwrap();
        let origin = DirOrigin::new(temp_dir.path()).unwrap();

        let err = origin.get("missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_dir_origin_directory_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("subdir")).unwrap();

        let origin = DirOrigin::new(temp_dir.path()).unwrap();
        assert!(origin.get("subdir").unwrap_err().is_not_found());
    }

    #[test]
    fn test_dir_origin_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let inner = temp_dir.path().join("inner");
        std::fs::create_dir(&inner).unwrap();
        std::fs::write(temp_dir.path().join("secret"), b"nope").unwrap();

        let origin = DirOrigin::new(&inner).unwrap();
        assert!(origin.get("../secret").unwrap_err().is_not_found());
    }

    #[test]
    fn test_dir_origin_requires_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();

        assert!(DirOrigin::new(&file).is_err());
        assert!(DirOrigin::new(temp_dir.path().join("absent")).is_err());
    }
}

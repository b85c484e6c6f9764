use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open file {path:?}")]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not create directories {path:?}")]
    CreateDirectories {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not resolve absolute path of {path:?}")]
    Absolute {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::OpenFile { path, .. }
            | Self::CreateDirectories { path, .. }
            | Self::Absolute { path, .. } => path,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::OpenFile { source, .. }
            | Error::CreateDirectories { source, .. }
            | Error::Absolute { source, .. } => source,
        }
    }
}

#[inline]
pub fn open_readable(path: impl AsRef<Path>) -> Result<std::io::BufReader<std::fs::File>, Error> {
    let path = path.as_ref();
    let file = std::fs::OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|source| Error::OpenFile {
            source,
            path: path.to_path_buf(),
        })?;
    Ok(std::io::BufReader::new(file))
}

/// Opens `path` for writing, truncating existing content.
///
/// Traces are frequently produced under `sudo`, hence files are made world
/// readable and writable on unix.
#[inline]
pub fn open_writable(path: impl AsRef<Path>) -> Result<std::io::BufWriter<std::fs::File>, Error> {
    let path = path.as_ref();
    let mut options = std::fs::OpenOptions::new();
    options.write(true).truncate(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o666);
    }
    let file = options.open(path).map_err(|source| Error::OpenFile {
        source,
        path: path.to_path_buf(),
    })?;
    Ok(std::io::BufWriter::new(file))
}

#[inline]
pub fn create_dirs(path: impl AsRef<Path>) -> Result<(), Error> {
    let path = path.as_ref();
    match std::fs::DirBuilder::new().recursive(true).create(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(source) => Err(Error::CreateDirectories {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Resolves `path` against the current working directory.
///
/// Unlike `std::fs::canonicalize`, the path does not need to exist yet
/// and `.`/`..` components are removed lexically.
pub fn absolute(path: impl AsRef<Path>) -> Result<PathBuf, Error> {
    let path = path.as_ref();
    if path.is_absolute() {
        return Ok(normalize_path(path));
    }
    let cwd = std::env::current_dir().map_err(|source| Error::Absolute {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(normalize_path(cwd.join(path)))
}

/// Normalize paths without touching the file system.
#[must_use]
pub fn normalize_path(path: impl AsRef<Path>) -> PathBuf {
    use std::path::Component;
    let mut normalized = PathBuf::new();
    for component in path.as_ref().components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                normalized.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
        }
    }
    normalized
}

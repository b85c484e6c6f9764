use super::Error;
use serde::Serialize;
use std::path::{Path, PathBuf};
use trace_model::{Header, TraceEntry};

fn write_pretty_json<T>(path: &Path, value: &T) -> Result<(), Error>
where
    T: Serialize + ?Sized,
{
    let writer = utils::fs::open_writable(path)?;
    let mut serializer = serde_json::Serializer::with_formatter(
        writer,
        serde_json::ser::PrettyFormatter::with_indent(b"    "),
    );
    value.serialize(&mut serializer)?;
    let mut writer = serializer.into_inner();
    std::io::Write::flush(&mut writer).map_err(|source| Error::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

pub fn write_header(path: impl AsRef<Path>, header: &Header) -> Result<(), Error> {
    write_pretty_json(path.as_ref(), header)
}

pub fn read_header(path: impl AsRef<Path>) -> Result<Header, Error> {
    let reader = utils::fs::open_readable(path.as_ref())?;
    let header = serde_json::from_reader(reader)?;
    Ok(header)
}

/// Database of traced kernel executions.
///
/// Stored as a JSON array of [`TraceEntry`] records, trace artifacts live
/// in the same directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceIndex {
    path: PathBuf,
}

impl TraceIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the index and its trace artifacts.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    /// All registered entries, none if the index does not exist yet.
    pub fn entries(&self) -> Result<Vec<TraceEntry>, Error> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = utils::fs::open_readable(&self.path)?;
        let entries = serde_json::from_reader(reader)?;
        Ok(entries)
    }

    pub fn register(&self, entry: TraceEntry) -> Result<(), Error> {
        let name = entry.name.clone();
        let mut entries = self.entries()?;
        entries.push(entry);
        utils::fs::create_dirs(self.dir())?;
        write_pretty_json(&self.path, &entries)?;
        log::debug!(
            "registered {} in {} ({} entries)",
            name,
            self.path.display(),
            entries.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{read_header, write_header, TraceIndex};
    use color_eyre::eyre;
    use similar_asserts as diff;
    use trace_model::{Format, Header, TraceEntry};

    #[test]
    fn test_register_appends() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let index = TraceIndex::new(dir.path().join("db/traces.json"));
        diff::assert_eq!(have: index.entries()?, want: Vec::<TraceEntry>::new());

        let entry = |name: &str| TraceEntry {
            name: name.to_string(),
            module: "vectoradd.ptx".to_string(),
            format: Format::Json,
            path: dir.path().join(format!("{name}.trace")),
            header: dir.path().join(format!("{name}.header")),
        };
        index.register(entry("a"))?;
        index.register(entry("b"))?;
        diff::assert_eq!(have: index.entries()?, want: vec![entry("a"), entry("b")]);

        let raw = std::fs::read_to_string(index.path())?;
        assert!(raw.starts_with("[\n    {"));
        Ok(())
    }

    #[test]
    fn test_header_is_pretty_json() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("kernel.header");
        let header = Header {
            global_accesses: 3,
            global_extent: 1024,
            ..Header::default()
        };
        write_header(&path, &header)?;
        diff::assert_eq!(have: read_header(&path)?, want: header);
        assert!(std::fs::read_to_string(&path)?.contains("\n    \"global_extent\": 1024"));
        Ok(())
    }
}

use super::Error;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use trace_model::{Event, Format};

/// Appends events to an access log.
#[derive(Debug)]
pub struct AccessLogWriter<W = std::io::BufWriter<std::fs::File>> {
    path: PathBuf,
    format: Format,
    writer: W,
    num_events: u64,
}

impl AccessLogWriter {
    pub fn create(path: impl AsRef<Path>, format: Format) -> Result<Self, Error> {
        let path = path.as_ref();
        let writer = utils::fs::open_writable(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            format,
            writer,
            num_events: 0,
        })
    }
}

impl<W> AccessLogWriter<W>
where
    W: Write,
{
    pub fn new(writer: W, format: Format) -> Self {
        Self {
            path: PathBuf::new(),
            format,
            writer,
            num_events: 0,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn num_events(&self) -> u64 {
        self.num_events
    }

    pub fn write(&mut self, event: &Event) -> Result<(), Error> {
        match self.format {
            Format::Msgpack => rmp_serde::encode::write(&mut self.writer, event)?,
            Format::Json => {
                serde_json::to_writer(&mut self.writer, event)?;
                self.writer.write_all(b"\n").map_err(|source| Error::Write {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }
        self.num_events += 1;
        Ok(())
    }

    /// Flushes the log and returns the number of events written.
    pub fn finish(mut self) -> Result<u64, Error> {
        self.writer.flush().map_err(|source| Error::Write {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.num_events)
    }
}

/// Reads events of an access log in the order they were written.
#[derive(Debug)]
pub struct AccessLogReader<R = std::io::BufReader<std::fs::File>> {
    path: PathBuf,
    format: Format,
    reader: R,
    line: String,
}

impl AccessLogReader {
    pub fn open(path: impl AsRef<Path>, format: Format) -> Result<Self, Error> {
        let path = path.as_ref();
        let reader = utils::fs::open_readable(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            format,
            reader,
            line: String::new(),
        })
    }
}

impl<R> AccessLogReader<R>
where
    R: BufRead,
{
    pub fn new(reader: R, format: Format) -> Self {
        Self {
            path: PathBuf::new(),
            format,
            reader,
            line: String::new(),
        }
    }

    fn read_error(&self, source: std::io::Error) -> Error {
        Error::Read {
            path: self.path.clone(),
            source,
        }
    }

    fn next_msgpack(&mut self) -> Option<Result<Event, Error>> {
        let at_end = match self.reader.fill_buf() {
            Ok(buf) => buf.is_empty(),
            Err(err) => return Some(Err(self.read_error(err))),
        };
        if at_end {
            return None;
        }
        Some(rmp_serde::from_read(&mut self.reader).map_err(Error::from))
    }

    fn next_json(&mut self) -> Option<Result<Event, Error>> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) if self.line.trim().is_empty() => continue,
                Ok(_) => return Some(serde_json::from_str(&self.line).map_err(Error::from)),
                Err(err) => return Some(Err(self.read_error(err))),
            }
        }
    }
}

impl<R> Iterator for AccessLogReader<R>
where
    R: BufRead,
{
    type Item = Result<Event, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.format {
            Format::Msgpack => self.next_msgpack(),
            Format::Json => self.next_json(),
        }
    }
}

use super::access_log::AccessLogWriter;
use super::coalesce::Coalescer;
use super::index::{self, TraceIndex};
use super::{Error, SessionCounter};
use crate::allocation::AllocationResolver;
use crate::ir::Kernel;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use trace_model::{
    Access, AddressSpace, Event, Format, Header, Opcode, TraceEntry, TraceEvent,
    TEXTURE_COMPONENTS,
};

/// Kernel names are cut to this many characters in artifact names.
pub const MAX_NAME_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Trace index, artifacts are written next to it.
    pub database: PathBuf,
    pub format: Format,
    /// Only collect aggregate statistics.
    pub header_only: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            database: PathBuf::from("traces/traces.json"),
            format: Format::Msgpack,
            header_only: false,
        }
    }
}

#[derive(Debug)]
struct Session {
    entry: TraceEntry,
    log: AccessLogWriter,
}

/// Traces the memory instructions of kernel executions.
///
/// Each `initialize` opens a session that collects events until `finish`.
#[derive(Debug)]
pub struct MemoryTraceGenerator {
    options: Options,
    index: TraceIndex,
    counter: SessionCounter,
    session: Option<Session>,
    header: Header,
}

impl MemoryTraceGenerator {
    pub fn new(options: Options, counter: SessionCounter) -> Self {
        let index = TraceIndex::new(options.database.clone());
        Self {
            options,
            index,
            counter,
            session: None,
            header: Header::default(),
        }
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    #[must_use]
    pub fn index(&self) -> &TraceIndex {
        &self.index
    }

    /// Header of the open session, or of the last finished one.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub fn entry(&self) -> Option<&TraceEntry> {
        self.session.as_ref().map(|session| &session.entry)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Opens a session for one execution of `kernel`.
    ///
    /// An open session is discarded without being registered.
    pub fn initialize(
        &mut self,
        kernel: &dyn Kernel,
        resolver: &dyn AllocationResolver,
    ) -> Result<(), Error> {
        if let Some(session) = self.session.take() {
            log::warn!(
                "discarding unfinished trace of {} at {}",
                session.entry.name,
                session.entry.path.display()
            );
        }

        let format = self.options.format;
        let name = utils::truncate_name(kernel.name(), MAX_NAME_CHARS);
        let stem = format!("{}_{}_{}", name, format, self.counter.next());

        let dir = self.index.dir();
        utils::fs::create_dirs(dir)?;
        let path = utils::fs::absolute(dir.join(format!("{stem}.trace")))?;
        let header = utils::fs::absolute(dir.join(format!("{stem}.header")))?;

        let access_log = AccessLogWriter::create(&path, format)?;
        self.header = Header {
            format,
            block_dim: kernel.block_dim(),
            thread_count: kernel.max_threads_per_block(),
            header_only: self.options.header_only,
            global_extent: super::extent(kernel, resolver),
            ..Header::default()
        };
        log::info!(
            "tracing {} to {} (extent {})",
            kernel.name(),
            path.display(),
            human_bytes::human_bytes(self.header.global_extent as f64)
        );
        self.session = Some(Session {
            entry: TraceEntry {
                name: kernel.name().to_string(),
                module: kernel.module_path().to_string(),
                format,
                path,
                header,
            },
            log: access_log,
        });
        Ok(())
    }

    /// Records one executed instruction.
    pub fn event(&mut self, event: &TraceEvent) -> Result<(), Error> {
        let session = self.session.as_mut().ok_or(Error::NoSession)?;
        let header = &mut self.header;

        header.dynamic_instructions += 1;
        header.dynamic_operations += event.active.count() as u64;

        let (space, components) = match event.opcode {
            Opcode::Tex => (AddressSpace::Texture, TEXTURE_COMPONENTS),
            opcode if opcode.is_load_or_store() => (event.address_space, 1),
            _ => return Ok(()),
        };

        if event.memory_addresses.len() != event.memory_sizes.len() {
            log::warn!(
                "{} at pc {:#x} has {} addresses but {} sizes",
                event.opcode,
                event.pc,
                event.memory_addresses.len(),
                event.memory_sizes.len()
            );
        }

        let mut record = if self.options.header_only {
            None
        } else {
            Some(Event {
                pc: event.pc,
                opcode: event.opcode,
                address_space: space,
                cta: event.block_id,
                accesses: Vec::with_capacity(event.memory_addresses.len() * components),
            })
        };

        let mut coalescer = Coalescer::new(header.thread_count);
        let mut bytes = 0;
        let mut lane = 0;
        for (&addr, &size) in event.memory_addresses.iter().zip(&event.memory_sizes) {
            lane = event.active.next_active(lane, header.thread_count);
            if let Some(record) = record.as_mut() {
                let access = Access {
                    address: addr,
                    size,
                    thread_id: lane,
                };
                record
                    .accesses
                    .extend(std::iter::repeat(access).take(components));
            }
            header.address(space, addr);
            bytes += u64::from(size);
            if let Some(cause) = coalescer.observe(lane, addr, size) {
                cause.record(header);
            }
            lane += 1;
        }
        header.access(space, bytes);

        if let Some(record) = record {
            log::trace!("{}", record);
            session.log.write(&record)?;
        }
        Ok(())
    }

    /// Registers and closes the open session.
    ///
    /// Returns `None` if no session is open.
    pub fn finish(&mut self) -> Result<Option<TraceEntry>, Error> {
        let Some(session) = self.session.take() else {
            return Ok(None);
        };
        let Session { entry, log: access_log } = session;
        self.index.register(entry.clone())?;
        let num_events = access_log.finish()?;
        index::write_header(&entry.header, &self.header)?;
        log::info!(
            "wrote {} events of {} to {}",
            num_events,
            entry.name,
            entry.path.display()
        );
        Ok(Some(entry))
    }
}

//! Per-process private log sinks.
//!
//! Every process writes its informational and error output to its own file,
//! `<program>_PE<rank:04>.stdout` / `.stderr`, for the whole run. At shutdown
//! the files are closed and, optionally, merged in rank order by
//! [`concatenate_stream`](crate::algs::concat::concatenate_stream).

use crate::algs::communicator::{CONCAT_TAG_BASE, CommTag};
use crate::halo_error::HaloError;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Logical output channel of a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Stdout, Channel::Stderr];

    /// Name used in file extensions and concatenation delimiters.
    pub fn label(self) -> &'static str {
        match self {
            Channel::Stdout => "stdout",
            Channel::Stderr => "stderr",
        }
    }

    /// Token tag of this channel's concatenation ring.
    pub fn tag(self) -> CommTag {
        CONCAT_TAG_BASE.offset(self as u16)
    }
}

/// File name of `rank`'s private sink for `channel`.
///
/// Without `dir` the program string is used verbatim as a path prefix.
pub fn sink_path(program: &str, rank: usize, channel: Channel, dir: Option<&Path>) -> PathBuf {
    let stem = match dir {
        Some(_) => Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.to_owned()),
        None => program.to_owned(),
    };
    let name = format!("{stem}_PE{rank:04}.{}", channel.label());
    match dir {
        Some(d) => d.join(name),
        None => PathBuf::from(name),
    }
}

/// The two open sinks of one process.
#[derive(Debug)]
pub struct ProcessSinks {
    out_path: PathBuf,
    err_path: PathBuf,
    out: Option<BufWriter<File>>,
    err: Option<BufWriter<File>>,
    discard: io::Sink,
}

impl ProcessSinks {
    /// Create (truncating) both sink files.
    pub fn open(program: &str, rank: usize, dir: Option<&Path>) -> Result<Self, HaloError> {
        let out_path = sink_path(program, rank, Channel::Stdout, dir);
        let err_path = sink_path(program, rank, Channel::Stderr, dir);
        let out = File::create(&out_path).map_err(|e| HaloError::sink(&out_path, e))?;
        let err = match File::create(&err_path) {
            Ok(f) => f,
            Err(e) => {
                drop(out);
                if let Err(rm) = std::fs::remove_file(&out_path) {
                    log::warn!("could not remove {}: {rm}", out_path.display());
                }
                return Err(HaloError::sink(&err_path, e));
            }
        };
        Ok(Self {
            out_path,
            err_path,
            out: Some(BufWriter::new(out)),
            err: Some(BufWriter::new(err)),
            discard: io::sink(),
        })
    }

    pub fn path(&self, channel: Channel) -> &Path {
        match channel {
            Channel::Stdout => &self.out_path,
            Channel::Stderr => &self.err_path,
        }
    }

    /// Writer for `channel`; after [`close`](Self::close) output is discarded.
    pub fn writer(&mut self, channel: Channel) -> &mut dyn Write {
        let slot = match channel {
            Channel::Stdout => &mut self.out,
            Channel::Stderr => &mut self.err,
        };
        match slot {
            Some(w) => w as &mut dyn Write,
            None => &mut self.discard,
        }
    }

    pub fn is_open(&self) -> bool {
        self.out.is_some() || self.err.is_some()
    }

    /// Flush and close both files. Both are closed even if the first flush
    /// fails; the first error is returned. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), HaloError> {
        let out = Self::close_one(self.out.take(), &self.out_path);
        let err = Self::close_one(self.err.take(), &self.err_path);
        out.and(err)
    }

    fn close_one(w: Option<BufWriter<File>>, path: &Path) -> Result<(), HaloError> {
        let Some(w) = w else { return Ok(()) };
        let file = w
            .into_inner()
            .map_err(|e| HaloError::sink(path, e.into_error()))?;
        file.sync_all().map_err(|e| HaloError::sink(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_names_are_deterministic() {
        assert_eq!(
            sink_path("./bin/sim", 7, Channel::Stdout, None),
            PathBuf::from("./bin/sim_PE0007.stdout")
        );
        assert_eq!(
            sink_path("./bin/sim", 12, Channel::Stderr, Some(Path::new("/tmp/logs"))),
            PathBuf::from("/tmp/logs/sim_PE0012.stderr")
        );
    }

    #[test]
    fn channels_have_distinct_tags() {
        assert_ne!(Channel::Stdout.tag(), Channel::Stderr.tag());
        assert_eq!(Channel::Stdout.tag(), CONCAT_TAG_BASE);
    }

    #[test]
    fn failed_open_leaves_no_partial_sink() {
        let dir = std::env::temp_dir().join(format!("halo-sinks-partial-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        // a directory where the stderr file should go makes its creation fail
        std::fs::create_dir_all(dir.join("unit_PE0001.stderr")).unwrap();
        let err = ProcessSinks::open("unit", 1, Some(dir.as_path())).unwrap_err();
        assert!(matches!(err, HaloError::Sink { .. }));
        assert!(!dir.join("unit_PE0001.stdout").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn write_close_and_discard() {
        let dir = std::env::temp_dir().join(format!("halo-sinks-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut sinks = ProcessSinks::open("unit", 3, Some(dir.as_path())).unwrap();
        writeln!(sinks.writer(Channel::Stdout), "hello").unwrap();
        sinks.close().unwrap();
        assert!(!sinks.is_open());
        writeln!(sinks.writer(Channel::Stdout), "dropped").unwrap();
        sinks.close().unwrap();
        let text = std::fs::read_to_string(sinks.path(Channel::Stdout)).unwrap();
        assert_eq!(text, "hello\n");
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

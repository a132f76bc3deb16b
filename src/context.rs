//! Per-process context: the one handle every topology, exchange and logging
//! call goes through.
//!
//! A [`Context`] is created once per process by [`Context::initialize`] and
//! passed by reference from then on. It owns the communicator, the immutable
//! [`ProcessGrid`] and [`NeighborTable`], and the process's private log sinks.
//! Shutdown runs exactly once, from [`Context::finalize`] or, failing that,
//! from `Drop`.
//!
//! A context dropped while its thread is unwinding from a panic only closes
//! its sinks. It does not join the concatenation ring, whose token may never
//! arrive, and its log files stay on disk.

use crate::algs::communicator::Communicator;
use crate::algs::concat::concatenate_stream;
use crate::algs::exchange::{ExchangeBuffer, ExchangeReport, HaloExchange, PendingExchange};
use crate::config::DecompositionConfig;
use crate::halo_error::{HaloError, OpFailure};
use crate::io::sinks::{Channel, ProcessSinks};
use crate::topology::grid::{Axis, Coord, Direction, ProcessGrid};
use crate::topology::neighbors::NeighborTable;
use std::io::{self, Write};
use std::path::Path;

pub struct Context<C: Communicator> {
    comm: C,
    grid: ProcessGrid,
    neighbors: NeighborTable,
    sinks: ProcessSinks,
    concatenate_on_exit: bool,
    finalized: bool,
}

impl<C: Communicator> Context<C> {
    /// Validate the decomposition, build the topology and open the sinks.
    ///
    /// # Errors
    /// - [`HaloError::Decomposition`] when `config.extent` does not multiply
    ///   to `comm.size()`. Every process prints the same diagnostic to the
    ///   real stderr before returning, so a misconfigured launch is visible
    ///   regardless of which rank's output survives.
    /// - [`HaloError::Sink`] when a private log file cannot be created.
    ///
    /// On error `comm` is dropped before returning.
    pub fn initialize(
        comm: C,
        program: &str,
        config: &DecompositionConfig,
    ) -> Result<Self, HaloError> {
        let rank = comm.rank();
        let grid = ProcessGrid::new(comm.size(), config.extent, config.periodic, rank)
            .inspect_err(|e| report_fatal(rank, e))?;
        let neighbors = NeighborTable::from_grid(&grid);
        let sinks = ProcessSinks::open(program, rank, config.log_dir.as_deref())
            .inspect_err(|e| report_fatal(rank, e))?;
        log::info!(
            "rank {rank}/{}: coord {:?}, extent {:?}, periodic {:?}",
            grid.process_count(),
            grid.coord(),
            grid.extent(),
            grid.periodic()
        );
        Ok(Self {
            comm,
            grid,
            neighbors,
            sinks,
            concatenate_on_exit: config.concatenate_on_exit,
            finalized: false,
        })
    }

    /// [`initialize`](Self::initialize), terminating the process on error
    /// with [`HaloError::exit_code`].
    pub fn initialize_or_exit(comm: C, program: &str, config: &DecompositionConfig) -> Self {
        match Self::initialize(comm, program, config) {
            Ok(ctx) => ctx,
            Err(e) => std::process::exit(e.exit_code()),
        }
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn grid(&self) -> &ProcessGrid {
        &self.grid
    }

    pub fn neighbor_table(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn rank(&self) -> usize {
        self.grid.rank()
    }

    pub fn process_count(&self) -> usize {
        self.grid.process_count()
    }

    pub fn coord(&self) -> Coord {
        self.grid.coord()
    }

    pub fn neighbors(&self) -> [[Option<usize>; 2]; 3] {
        self.neighbors.all()
    }

    pub fn wall_clock_time(&self) -> f64 {
        self.comm.wtime()
    }

    /// `"<prefix>-<c0>-<c1>-<c2>.<ext>"` with zero-padded grid coordinates,
    /// unique per process within a run.
    pub fn filename(&self, prefix: &str, ext: &str) -> String {
        let [c0, c1, c2] = self.grid.coord();
        format!("{prefix}-{c0:03}-{c1:03}-{c2:03}.{ext}")
    }

    pub fn sink_path(&self, channel: Channel) -> &Path {
        self.sinks.path(channel)
    }

    /// This process's private informational stream.
    pub fn out(&mut self) -> &mut dyn Write {
        self.sinks.writer(Channel::Stdout)
    }

    /// This process's private error stream.
    pub fn err(&mut self) -> &mut dyn Write {
        self.sinks.writer(Channel::Stderr)
    }

    /// Dump process count, rank, sink files and, per axis, the coordinates
    /// of the lower neighbour, this process and the upper neighbour
    /// (`-1,-1,-1` where there is none).
    pub fn print_topology_info<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out, " <<< INFO: process topology >>>")?;
        writeln!(out, "Number of Process   : {:4}", self.process_count())?;
        writeln!(out, "This Rank           : {:4}", self.rank())?;
        writeln!(out, "Temporary stdout    : {}", self.sink_path(Channel::Stdout).display())?;
        writeln!(out, "Temporary stderr    : {}", self.sink_path(Channel::Stderr).display())?;
        writeln!(out, "Info for domain decomposition:")?;
        let triple = |rank: Option<usize>| -> [i64; 3] {
            rank.and_then(|r| self.grid.rank_to_coord(r))
                .map(|c| c.map(|x| x as i64))
                .unwrap_or([-1; 3])
        };
        let cc = triple(Some(self.rank()));
        for axis in Axis::ALL {
            let cl = triple(self.neighbors.neighbor(axis, Direction::Lower));
            let cu = triple(self.neighbors.neighbor(axis, Direction::Upper));
            writeln!(
                out,
                " neighbor in dir {axis}: [{:2},{:2},{:2}] <= [{:2},{:2},{:2}] => [{:2},{:2},{:2}]",
                cl[0], cl[1], cl[2], cc[0], cc[1], cc[2], cu[0], cu[1], cu[2]
            )?;
        }
        writeln!(out)
    }

    pub fn exchange(&self) -> HaloExchange<'_, C> {
        HaloExchange::new(&self.comm, &self.neighbors)
    }

    pub fn begin_directional<'a>(
        &self,
        axis: Axis,
        buffer: ExchangeBuffer<'a>,
    ) -> PendingExchange<'a, C> {
        self.exchange().begin_directional(axis, buffer)
    }

    pub fn begin_all<'a>(
        &self,
        buf0: ExchangeBuffer<'a>,
        buf1: ExchangeBuffer<'a>,
        buf2: ExchangeBuffer<'a>,
    ) -> PendingExchange<'a, C> {
        self.exchange().begin_all(buf0, buf1, buf2)
    }

    /// [`PendingExchange::wait`], also recording each failed request in this
    /// process's error stream.
    pub fn wait(&mut self, pending: PendingExchange<'_, C>) -> Result<ExchangeReport, HaloError> {
        let result = pending.wait();
        if let Err(HaloError::Transport { rank, failures }) = &result {
            record_failures(self.sinks.writer(Channel::Stderr), *rank, failures);
        }
        result
    }

    /// Close the sinks and, if configured, merge them in rank order into the
    /// real stdout and stderr. Consumes the context; the communicator is
    /// released afterwards.
    pub fn finalize(self) -> Result<(), HaloError> {
        self.finalize_into(&mut io::stdout(), &mut io::stderr())
    }

    /// [`finalize`](Self::finalize) with explicit destinations.
    pub fn finalize_into<O, E>(mut self, out: &mut O, err: &mut E) -> Result<(), HaloError>
    where
        O: Write,
        E: Write,
    {
        self.shutdown(out, err)
    }

    fn shutdown<'a>(&mut self, out: &'a mut dyn Write, err: &'a mut dyn Write) -> Result<(), HaloError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        let mut first_err = self.sinks.close().err();
        if self.concatenate_on_exit {
            for (channel, dst) in [(Channel::Stdout, out), (Channel::Stderr, err)] {
                // every rank joins both rings, whatever happened before
                let source = self.sinks.path(channel);
                if let Err(e) = concatenate_stream(&self.comm, source, dst, channel) {
                    first_err.get_or_insert(e);
                }
            }
        }
        log::info!("rank {}: finalized", self.rank());
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(feature = "mpi-support")]
impl Context<crate::algs::communicator::MpiComm> {
    /// Initialize MPI and the context in one step.
    pub fn initialize_mpi(program: &str, config: &DecompositionConfig) -> Result<Self, HaloError> {
        let comm = crate::algs::communicator::MpiComm::new()?;
        Self::initialize(comm, program, config)
    }
}

impl<C: Communicator> Drop for Context<C> {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        if std::thread::panicking() {
            self.finalized = true;
            if let Err(e) = self.sinks.close() {
                log::warn!("rank {}: closing sinks while panicking failed: {e}", self.rank());
            }
            log::warn!(
                "rank {}: panicking, logs kept in {} and {}",
                self.rank(),
                self.sinks.path(Channel::Stdout).display(),
                self.sinks.path(Channel::Stderr).display()
            );
            return;
        }
        if let Err(e) = self.shutdown(&mut io::stdout(), &mut io::stderr()) {
            log::warn!("rank {}: shutdown from drop failed: {e}", self.rank());
        }
    }
}

/// One line per failed request; returns how many lines `err` rejected.
fn record_failures(err: &mut dyn Write, rank: usize, failures: &[OpFailure]) -> usize {
    let mut rejected = 0;
    for f in failures {
        let line = writeln!(
            err,
            "halo request[{:2}] from rank {rank:3} failed ! (axis {}, {:?}, peer {}): {}",
            f.index, f.axis, f.region, f.peer, f.reason
        );
        if let Err(e) = line {
            log::warn!("rank {rank}: error sink rejected failure of request {}: {e}", f.index);
            rejected += 1;
        }
    }
    rejected
}

fn report_fatal(rank: usize, e: &HaloError) {
    log::error!("rank {rank}: {e}");
    eprintln!("Error in halo-decomp: {e}");
}

//! Rank-ordered concatenation of per-process log files.
//!
//! A token travels 0 → 1 → … → n-1 on the channel's tag. Each rank waits for
//! the token, writes its delimited block, and passes the token on, so blocks
//! appear in strict rank order whatever the relative speed of the processes.
//! This serializes all ranks and is meant to run once, at orderly shutdown,
//! after every halo exchange has completed. There is no timeout: a rank whose
//! predecessor never forwards the token waits forever.

use crate::algs::communicator::{Communicator, Wait};
use crate::halo_error::HaloError;
use crate::io::sinks::Channel;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Payload of the ring token (a single 32-bit zero).
const TOKEN: [u8; 4] = [0; 4];

/// Opening delimiter of `rank`'s block.
pub fn begin_marker(channel: Channel, rank: usize) -> String {
    format!("--- begin {} from PE ={rank:4} ---", channel.label())
}

/// Closing delimiter of `rank`'s block.
pub fn end_marker(channel: Channel, rank: usize) -> String {
    format!("--- end   {} from PE ={rank:4} ---", channel.label())
}

/// Append this rank's `source` file to `dst` in rank order, then delete it.
///
/// The token is forwarded to the next rank even when receiving the token,
/// reading the file or writing `dst` failed; the first such error is returned
/// afterwards. Both delimiters are written whenever `dst` accepts them, so a
/// missing file shows up as an empty block.
pub fn concatenate_stream<C, W>(
    comm: &C,
    source: &Path,
    dst: &mut W,
    channel: Channel,
) -> Result<(), HaloError>
where
    C: Communicator + ?Sized,
    W: Write + ?Sized,
{
    let rank = comm.rank();
    let size = comm.size();
    let tag = channel.tag().as_u16();
    let mut first_err: Option<HaloError> = None;

    if rank > 0 {
        let mut token = TOKEN;
        if let Err(e) = comm.irecv(rank - 1, tag, &mut token).wait() {
            log::error!(
                "rank {rank}: {} token from rank {} failed: {e}",
                channel.label(),
                rank - 1
            );
            first_err = Some(e);
        }
    }

    if let Err(e) = write_block(source, dst, rank, channel) {
        log::error!("rank {rank}: could not concatenate {}: {e}", source.display());
        first_err.get_or_insert(e);
    }

    if rank + 1 < size {
        log::debug!("rank {rank}: passing {} token to rank {}", channel.label(), rank + 1);
        if let Err(e) = comm.isend(rank + 1, tag, &TOKEN).wait() {
            first_err.get_or_insert(e);
        }
    }

    first_err.map_or(Ok(()), Err)
}

fn write_block<W: Write + ?Sized>(
    source: &Path,
    dst: &mut W,
    rank: usize,
    channel: Channel,
) -> Result<(), HaloError> {
    writeln!(dst, "{}", begin_marker(channel, rank))?;
    let copied = File::open(source)
        .and_then(|mut f| io::copy(&mut f, dst))
        .map_err(|e| HaloError::sink(source, e));
    let ended = writeln!(dst, "{}", end_marker(channel, rank));
    let removed = match fs::remove_file(source) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(HaloError::sink(source, e)),
        _ => Ok(()),
    };
    let flushed = dst.flush();
    copied?;
    ended?;
    removed?;
    flushed?;
    Ok(())
}

//! Non-blocking halo exchange with the direct neighbours of this process.
//!
//! One [`ExchangeBuffer`] per axis holds four equal regions, in order:
//! send-to-lower, send-to-upper, receive-from-lower, receive-from-upper.
//! `begin_*` posts up to two receives and two sends per axis and returns
//! immediately; [`PendingExchange::wait`] blocks this process only, until every
//! posted operation has finished.
//!
//! Lifecycle: an `ExchangeBuffer` not yet handed to the engine is idle;
//! `begin_*` takes its mutable borrow (so it cannot be posted twice) and returns
//! a [`PendingExchange`]; `wait` consumes that and yields either a completed
//! [`ExchangeReport`] or [`HaloError::Transport`] naming every failed request.
//!
//! A sentinel neighbour (non-periodic edge) posts nothing on that side: the
//! operation is reported as [`OpStatus::Skipped`] and its receive region is
//! left exactly as the caller filled it.

use crate::algs::communicator::{Communicator, HALO_TAG_BASE, Wait};
use crate::halo_error::{HaloError, OpFailure};
use crate::topology::grid::{Axis, Direction};
use crate::topology::neighbors::NeighborTable;
use bytemuck::Pod;
use std::ops::Range;

/// Tag of the message travelling from a process toward its `direction`
/// neighbour along `axis`.
///
/// The receiving side expects it from its `direction.opposite()` neighbour, so
/// when both neighbours are the same rank (extent 2 or 1 on a periodic axis)
/// the two messages of a pair still cannot be swapped.
#[inline]
pub fn halo_tag(axis: Axis, direction: Direction) -> u16 {
    HALO_TAG_BASE
        .offset((2 * axis.index() + direction.index()) as u16)
        .as_u16()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Send,
    Recv,
}

/// One of the four regions of an [`ExchangeBuffer`], in memory order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Region {
    SendLower,
    SendUpper,
    RecvLower,
    RecvUpper,
}

impl Region {
    pub const ALL: [Region; 4] = [
        Region::SendLower,
        Region::SendUpper,
        Region::RecvLower,
        Region::RecvUpper,
    ];

    pub fn new(role: Role, direction: Direction) -> Self {
        match (role, direction) {
            (Role::Send, Direction::Lower) => Region::SendLower,
            (Role::Send, Direction::Upper) => Region::SendUpper,
            (Role::Recv, Direction::Lower) => Region::RecvLower,
            (Role::Recv, Direction::Upper) => Region::RecvUpper,
        }
    }

    /// Position in the buffer and in a request group of four.
    #[inline]
    pub fn slot(self) -> usize {
        self as usize
    }

    pub fn role(self) -> Role {
        match self {
            Region::SendLower | Region::SendUpper => Role::Send,
            Region::RecvLower | Region::RecvUpper => Role::Recv,
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Region::SendLower | Region::RecvLower => Direction::Lower,
            Region::SendUpper | Region::RecvUpper => Direction::Upper,
        }
    }
}

/// Caller-owned storage for one axis of a halo exchange.
///
/// Element count and size are agreed between peers out of band; this layer
/// only checks that the slice holds exactly four regions.
#[derive(Debug)]
pub struct ExchangeBuffer<'a> {
    bytes: &'a mut [u8],
    region_len: usize,
}

impl<'a> ExchangeBuffer<'a> {
    /// Wrap `bytes` as four regions of `count` elements of `elem_size` bytes.
    ///
    /// # Errors
    /// [`HaloError::BufferSize`] unless `bytes.len() == 4 * elem_size * count`,
    /// or if that product overflows `usize` (reported with `expected ==
    /// usize::MAX`).
    pub fn new(bytes: &'a mut [u8], elem_size: usize, count: usize) -> Result<Self, HaloError> {
        let region_len = elem_size.checked_mul(count);
        let expected = region_len.and_then(|r| r.checked_mul(4));
        match (region_len, expected) {
            (Some(region_len), Some(expected)) if bytes.len() == expected => {
                Ok(Self { bytes, region_len })
            }
            (region_len, expected) => Err(HaloError::BufferSize {
                region_len: region_len.unwrap_or(usize::MAX),
                expected: expected.unwrap_or(usize::MAX),
                actual: bytes.len(),
            }),
        }
    }

    /// Typed variant: `elems` must hold exactly `4 * count` values.
    pub fn from_elems<T: Pod>(elems: &'a mut [T], count: usize) -> Result<Self, HaloError> {
        Self::new(
            bytemuck::cast_slice_mut(elems),
            std::mem::size_of::<T>(),
            count,
        )
    }

    #[inline]
    pub fn region_len(&self) -> usize {
        self.region_len
    }

    pub fn region(&self, region: Region) -> &[u8] {
        &self.bytes[self.range(region)]
    }

    pub fn region_mut(&mut self, region: Region) -> &mut [u8] {
        let r = self.range(region);
        &mut self.bytes[r]
    }

    fn range(&self, region: Region) -> Range<usize> {
        let start = region.slot() * self.region_len;
        start..start + self.region_len
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpStatus {
    Completed,
    /// Sentinel neighbour: nothing was posted.
    Skipped,
    Failed,
}

/// Outcome of one of the four operations of an axis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpReport {
    /// `position * 4 + region.slot()`, where `position` is the axis' place
    /// in the pending exchange.
    pub index: usize,
    pub axis: Axis,
    pub region: Region,
    pub peer: Option<usize>,
    pub status: OpStatus,
}

/// Per-operation outcome of a completed exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExchangeReport {
    ops: Vec<OpReport>,
}

impl ExchangeReport {
    pub fn ops(&self) -> &[OpReport] {
        &self.ops
    }

    pub fn get(&self, axis: Axis, region: Region) -> Option<&OpReport> {
        self.ops
            .iter()
            .find(|op| op.axis == axis && op.region == region)
    }

    pub fn count(&self, status: OpStatus) -> usize {
        self.ops.iter().filter(|op| op.status == status).count()
    }
}

/// Requests of one axis, addressed by direction.
struct AxisOps<'a, C: Communicator> {
    axis: Axis,
    position: usize,
    buffer: ExchangeBuffer<'a>,
    peers: [Option<usize>; 2],
    sends: [Option<C::SendHandle>; 2],
    recvs: [Option<C::RecvHandle>; 2],
}

impl<C: Communicator> AxisOps<'_, C> {
    fn finish(&mut self, region: Region, peer: usize) -> Result<(), HaloError> {
        let d = region.direction().index();
        match region.role() {
            Role::Send => match self.sends[d].take() {
                Some(h) => h.wait().map(|_| ()),
                None => Ok(()),
            },
            Role::Recv => {
                let Some(h) = self.recvs[d].take() else {
                    return Ok(());
                };
                let data = h.wait()?.ok_or_else(|| HaloError::CommError {
                    neighbor: peer,
                    source: "receive completed without a payload".into(),
                })?;
                let dst = self.buffer.region_mut(region);
                if data.len() != dst.len() {
                    return Err(HaloError::MessageSize {
                        peer,
                        expected: dst.len(),
                        actual: data.len(),
                    });
                }
                dst.copy_from_slice(&data);
                Ok(())
            }
        }
    }

    fn posted(&self) -> usize {
        self.sends.iter().flatten().count() + self.recvs.iter().flatten().count()
    }

    fn drain(&mut self) {
        for h in self.sends.iter_mut().filter_map(Option::take) {
            let _ = h.wait();
        }
        for h in self.recvs.iter_mut().filter_map(Option::take) {
            let _ = h.wait();
        }
    }
}

/// Outstanding operations of a `begin_directional` or `begin_all` call.
///
/// Must be consumed by [`wait`](Self::wait). If it is dropped instead, every
/// outstanding request is still waited for (which blocks until the peers
/// send) and the received data is discarded.
#[must_use = "a posted halo exchange must be waited on"]
pub struct PendingExchange<'a, C: Communicator> {
    rank: usize,
    axes: Vec<AxisOps<'a, C>>,
}

impl<'a, C: Communicator> PendingExchange<'a, C> {
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of posted (not skipped) operations.
    pub fn posted(&self) -> usize {
        self.axes.iter().map(AxisOps::posted).sum()
    }

    pub fn axes(&self) -> impl Iterator<Item = Axis> + '_ {
        self.axes.iter().map(|ops| ops.axis)
    }

    /// Block until every posted operation has finished.
    ///
    /// All operations are waited for even after one fails. Completed receives
    /// are copied into their region; failed and skipped receive regions keep
    /// their previous contents. Each failure is logged and returned in
    /// [`HaloError::Transport`]; nothing is retried.
    pub fn wait(mut self) -> Result<ExchangeReport, HaloError> {
        let axes = std::mem::take(&mut self.axes);
        let rank = self.rank;
        let mut report = ExchangeReport::default();
        let mut failures = Vec::new();

        for mut ops in axes {
            for region in Region::ALL {
                let index = ops.position * 4 + region.slot();
                let peer = ops.peers[region.direction().index()];
                let status = match peer {
                    None => OpStatus::Skipped,
                    Some(p) => match ops.finish(region, p) {
                        Ok(()) => OpStatus::Completed,
                        Err(e) => {
                            log::error!(
                                "halo request[{index:2}] from rank {rank:3} failed \
                                 (axis {}, {region:?}, peer {p}): {e}",
                                ops.axis
                            );
                            failures.push(OpFailure {
                                index,
                                axis: ops.axis,
                                region,
                                peer: p,
                                reason: e.to_string(),
                            });
                            OpStatus::Failed
                        }
                    },
                };
                report.ops.push(OpReport {
                    index,
                    axis: ops.axis,
                    region,
                    peer,
                    status,
                });
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(HaloError::Transport { rank, failures })
        }
    }
}

impl<C: Communicator> Drop for PendingExchange<'_, C> {
    fn drop(&mut self) {
        if self.axes.is_empty() {
            return;
        }
        log::warn!(
            "rank {}: halo exchange dropped without wait, draining {} request(s)",
            self.rank,
            self.posted()
        );
        for ops in &mut self.axes {
            ops.drain();
        }
    }
}

/// Posts halo exchanges for one process.
pub struct HaloExchange<'c, C: Communicator> {
    comm: &'c C,
    neighbors: &'c NeighborTable,
}

impl<'c, C: Communicator> HaloExchange<'c, C> {
    pub fn new(comm: &'c C, neighbors: &'c NeighborTable) -> Self {
        Self { comm, neighbors }
    }

    /// Exchange the boundary layers of one axis.
    pub fn begin_directional<'a>(
        &self,
        axis: Axis,
        buffer: ExchangeBuffer<'a>,
    ) -> PendingExchange<'a, C> {
        PendingExchange {
            rank: self.comm.rank(),
            axes: vec![self.post(axis, 0, buffer)],
        }
    }

    /// Exchange all three axes at once (12 operations); `buf0` belongs to
    /// axis 0 and so on.
    pub fn begin_all<'a>(
        &self,
        buf0: ExchangeBuffer<'a>,
        buf1: ExchangeBuffer<'a>,
        buf2: ExchangeBuffer<'a>,
    ) -> PendingExchange<'a, C> {
        let axes = [buf0, buf1, buf2]
            .into_iter()
            .zip(Axis::ALL)
            .enumerate()
            .map(|(position, (buffer, axis))| self.post(axis, position, buffer))
            .collect();
        PendingExchange {
            rank: self.comm.rank(),
            axes,
        }
    }

    fn post<'a>(
        &self,
        axis: Axis,
        position: usize,
        mut buffer: ExchangeBuffer<'a>,
    ) -> AxisOps<'a, C> {
        let peers = [
            self.neighbors.neighbor(axis, Direction::Lower),
            self.neighbors.neighbor(axis, Direction::Upper),
        ];
        let mut recvs = [None, None];
        let mut sends = [None, None];
        for dir in Direction::ALL {
            let Some(peer) = peers[dir.index()] else { continue };
            let tag = halo_tag(axis, dir.opposite());
            let region = buffer.region_mut(Region::new(Role::Recv, dir));
            recvs[dir.index()] = Some(self.comm.irecv(peer, tag, region));
        }
        for dir in Direction::ALL {
            let Some(peer) = peers[dir.index()] else { continue };
            let tag = halo_tag(axis, dir);
            let region = buffer.region(Region::new(Role::Send, dir));
            sends[dir.index()] = Some(self.comm.isend(peer, tag, region));
        }
        log::debug!(
            "rank {}: posted halo exchange on axis {axis} ({} bytes/region, peers {peers:?})",
            self.comm.rank(),
            buffer.region_len()
        );
        AxisOps {
            axis,
            position,
            buffer,
            peers,
            sends,
            recvs,
        }
    }
}

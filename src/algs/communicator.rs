//! Thin façade over intra-process or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). Sends copy
//! their payload when posted, so the caller may reuse the source slice
//! immediately. All handles are **waitable** but non-blocking: nothing is
//! known about a transfer until `.wait()` returns.

use crate::halo_error::HaloError;
use bytes::Bytes;
use hashbrown::HashMap;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use static_assertions::const_assert;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Typed message tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    #[inline]
    pub const fn base(self) -> u16 {
        self.0
    }
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    #[inline]
    pub const fn offset(self, k: u16) -> CommTag {
        CommTag(self.0 + k)
    }
}

/// First of the six halo tags, `(axis, direction)` → `base + 2*axis + direction`.
pub const HALO_TAG_BASE: CommTag = CommTag(0x0100);
/// First of the log concatenation channel tags.
pub const CONCAT_TAG_BASE: CommTag = CommTag(0x0200);

const_assert!(HALO_TAG_BASE.0 + 6 <= CONCAT_TAG_BASE.0);

/// Non-blocking point-to-point interface (minimal by design).
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of exactly `buf.len()` bytes. The data is delivered by
    /// [`Wait::wait`]; `buf` only fixes the expected length.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Wall-clock seconds since an arbitrary, per-process fixed origin.
    fn wtime(&self) -> f64 {
        EPOCH.elapsed().as_secs_f64()
    }

    fn is_no_comm(&self) -> bool {
        false
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Block until completion; receives yield their payload.
    fn wait(self) -> Result<Option<Vec<u8>>, HaloError>;
}

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Compile-time no-op comm for pure serial unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Result<Option<Vec<u8>>, HaloError> {
        Ok(None)
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- LocalComm: ranks living in one OS process ---
type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Debug, Default)]
struct Mailbox {
    slots: Mutex<HashMap<Key, VecDeque<Bytes>>>,
    arrived: Condvar,
}

/// A group of in-process ranks sharing one mailbox.
///
/// Each [`LocalComm`] is meant to be driven from its own thread, the way each
/// MPI rank is its own process. Messages with equal `(src, dst, tag)` are
/// delivered in send order.
#[derive(Clone, Debug)]
pub struct LocalUniverse {
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalUniverse {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            mailbox: Arc::new(Mailbox::default()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Communicator for `rank`.
    pub fn comm(&self, rank: usize) -> LocalComm {
        LocalComm {
            rank,
            size: self.size,
            mailbox: Arc::clone(&self.mailbox),
        }
    }

    /// One communicator per rank, in rank order.
    pub fn comms(&self) -> Vec<LocalComm> {
        (0..self.size).map(|r| self.comm(r)).collect()
    }
}

#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

/// Send handle: the payload is already in the peer's mailbox.
#[derive(Debug)]
pub struct LocalSendHandle(Result<(), HaloError>);

impl Wait for LocalSendHandle {
    fn wait(self) -> Result<Option<Vec<u8>>, HaloError> {
        self.0.map(|()| None)
    }
}

#[derive(Debug)]
pub struct LocalRecvHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    expected: usize,
    posted: Result<(), HaloError>,
}

impl Wait for LocalRecvHandle {
    fn wait(self) -> Result<Option<Vec<u8>>, HaloError> {
        self.posted?;
        let mut slots = self.mailbox.slots.lock();
        let bytes = loop {
            if let Some(bytes) = slots.get_mut(&self.key).and_then(VecDeque::pop_front) {
                break bytes;
            }
            self.mailbox.arrived.wait(&mut slots);
        };
        drop(slots);
        if bytes.len() != self.expected {
            return Err(HaloError::MessageSize {
                peer: self.key.0,
                expected: self.expected,
                actual: bytes.len(),
            });
        }
        Ok(Some(bytes.to_vec()))
    }
}

impl LocalComm {
    fn check_peer(&self, peer: usize) -> Result<(), HaloError> {
        if peer < self.size {
            Ok(())
        } else {
            Err(HaloError::PeerOutOfRange {
                peer,
                size: self.size,
            })
        }
    }
}

impl Communicator for LocalComm {
    type SendHandle = LocalSendHandle;
    type RecvHandle = LocalRecvHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> LocalSendHandle {
        let posted = self.check_peer(peer).map(|()| {
            let key = (self.rank, peer, tag);
            self.mailbox
                .slots
                .lock()
                .entry(key)
                .or_default()
                .push_back(Bytes::copy_from_slice(buf));
            self.mailbox.arrived.notify_all();
        });
        LocalSendHandle(posted)
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> LocalRecvHandle {
        LocalRecvHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            expected: buf.len(),
            posted: self.check_peer(peer),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::datatype::Equivalence;
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// World communicator of an MPI launch.
    ///
    /// Owns the MPI environment: dropping the last `MpiComm` finalizes MPI.
    pub struct MpiComm {
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
        _universe: Universe,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, HaloError> {
            let universe = mpi::initialize().ok_or(HaloError::MpiInit)?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                rank,
                size,
                _universe: universe,
            })
        }

        fn check_peer(&self, peer: usize) -> Result<(), HaloError> {
            if peer < self.size {
                Ok(())
            } else {
                Err(HaloError::PeerOutOfRange {
                    peer,
                    size: self.size,
                })
            }
        }
    }

    /// In-flight request over a leaked owned copy; the copy is reclaimed in
    /// `wait` once MPI no longer references it.
    struct InFlight {
        req: Request<'static, [u8], StaticScope>,
        buf: *mut [u8],
        peer: usize,
    }

    impl InFlight {
        fn complete(self) -> (Vec<u8>, usize, usize) {
            let status = self.req.wait();
            let count = status.count(u8::equivalent_datatype()).max(0) as usize;
            // SAFETY: `buf` came from `Box::leak` in `post_*` and the request
            // referencing it has completed.
            let owned = unsafe { Box::from_raw(self.buf) };
            (owned.into_vec(), count, self.peer)
        }
    }

    pub struct MpiSendHandle(Result<InFlight, HaloError>);
    pub struct MpiRecvHandle(Result<InFlight, HaloError>);

    impl Wait for MpiSendHandle {
        fn wait(self) -> Result<Option<Vec<u8>>, HaloError> {
            let _ = self.0?.complete();
            Ok(None)
        }
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Result<Option<Vec<u8>>, HaloError> {
            let (mut data, count, peer) = self.0?.complete();
            if count != data.len() {
                return Err(HaloError::MessageSize {
                    peer,
                    expected: data.len(),
                    actual: count,
                });
            }
            data.truncate(count);
            Ok(Some(data))
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            MpiSendHandle(self.check_peer(peer).map(|()| {
                let owned: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
                let raw: *mut [u8] = owned;
                // SAFETY: `raw` stays valid until `InFlight::complete` reclaims it.
                let shared: &'static [u8] = unsafe { &*raw };
                let req = self
                    .world
                    .process_at_rank(peer as i32)
                    .immediate_send_with_tag(StaticScope, shared, tag as mpi::Tag);
                InFlight { req, buf: raw, peer }
            }))
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle {
            MpiRecvHandle(self.check_peer(peer).map(|()| {
                let owned: &'static mut [u8] = Box::leak(vec![0u8; buf.len()].into_boxed_slice());
                let raw: *mut [u8] = owned;
                // SAFETY: as in `isend`; MPI is the only writer until completion.
                let target: &'static mut [u8] = unsafe { &mut *raw };
                let req = self
                    .world
                    .process_at_rank(peer as i32)
                    .immediate_receive_into_with_tag(StaticScope, target, tag as mpi::Tag);
                InFlight { req, buf: raw, peer }
            }))
        }

        fn wtime(&self) -> f64 {
            mpi::time()
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

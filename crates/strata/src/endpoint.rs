//! # Chunk Endpoint
//!
//! Serves the visible voxels of any chunk over TCP, one coordinate per
//! request.
//!
//! ## Wire format
//!
//! ```text
//! client -> server   ChunkRequest        (12 bytes)
//! server -> client   ChunkReplyHeader    (20 bytes)
//!                    VisibleInstance * instance_count (16 bytes each)
//! ```
//!
//! Headers are `#[repr(C)]` structs with little-endian integers. Instance
//! floats go out as raw host-order bytes, ready to upload.
//! A connection carries any number of request/reply pairs in order.
//!
//! Chunks the streaming world already holds are answered from memory.
//! Anything else goes through a [`ChunkLoader`], so a request for a chunk
//! nobody has visited generates and persists it.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use strata_procedural::{compute_instances, ChunkCoord, Neighbors, VisibleInstance, VOXELS_PER_CHUNK};
use strata_world::{CancelToken, ChunkLoader, LoadOrigin, LoadResult, LoadedChunk, World};

/// Request magic, `SCRQ`.
pub const REQUEST_MAGIC: [u8; 4] = *b"SCRQ";

/// Reply magic, `SCRS`.
pub const REPLY_MAGIC: [u8; 4] = *b"SCRS";

/// How often idle threads look at the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A request for one chunk.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ChunkRequest {
    /// Must be [`REQUEST_MAGIC`].
    pub magic: [u8; 4],
    /// Chunk X.
    pub x: i32,
    /// Chunk Z.
    pub z: i32,
}

impl ChunkRequest {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Request for `coord`.
    #[must_use]
    pub const fn new(coord: ChunkCoord) -> Self {
        Self {
            magic: REQUEST_MAGIC,
            x: coord.x.to_le(),
            z: coord.z.to_le(),
        }
    }

    /// Requested coordinate.
    #[must_use]
    pub const fn coord(&self) -> ChunkCoord {
        ChunkCoord::new(i32::from_le(self.x), i32::from_le(self.z))
    }
}

/// Where a served chunk came from.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplyStatus {
    /// Already in the streaming world.
    Resident = 0,
    /// Read back from the store.
    Loaded = 1,
    /// Generated and persisted by this request.
    Generated = 2,
    /// Regenerated over a record with no voxels.
    Repaired = 3,
    /// The chunk could not be produced. No instances follow.
    Failed = 255,
}

impl ReplyStatus {
    /// Decodes a status byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Resident),
            1 => Some(Self::Loaded),
            2 => Some(Self::Generated),
            3 => Some(Self::Repaired),
            255 => Some(Self::Failed),
            _ => None,
        }
    }
}

impl From<LoadOrigin> for ReplyStatus {
    fn from(origin: LoadOrigin) -> Self {
        match origin {
            LoadOrigin::Generated => Self::Generated,
            LoadOrigin::Loaded => Self::Loaded,
            LoadOrigin::Repaired => Self::Repaired,
        }
    }
}

/// Header preceding the instances of one reply.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ChunkReplyHeader {
    /// Must be [`REPLY_MAGIC`].
    pub magic: [u8; 4],
    /// [`ReplyStatus`] byte.
    pub status: u8,
    /// Padding.
    pub _pad: [u8; 3],
    /// Chunk X.
    pub x: i32,
    /// Chunk Z.
    pub z: i32,
    /// Number of [`VisibleInstance`]s that follow.
    pub instance_count: u32,
}

impl ChunkReplyHeader {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Header for `count` instances of `coord`.
    #[must_use]
    pub const fn new(coord: ChunkCoord, status: ReplyStatus, count: u32) -> Self {
        Self {
            magic: REPLY_MAGIC,
            status: status as u8,
            _pad: [0; 3],
            x: coord.x.to_le(),
            z: coord.z.to_le(),
            instance_count: count.to_le(),
        }
    }

    /// Coordinate the reply is for.
    #[must_use]
    pub const fn coord(&self) -> ChunkCoord {
        ChunkCoord::new(i32::from_le(self.x), i32::from_le(self.z))
    }

    /// Number of instances that follow.
    #[must_use]
    pub const fn count(&self) -> u32 {
        u32::from_le(self.instance_count)
    }
}

/// Errors seen by an endpoint client.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The connection failed.
    #[error("endpoint I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer sent bytes that are not a valid reply.
    #[error("malformed reply: {0}")]
    Protocol(String),

    /// The server could not produce the chunk.
    #[error("server failed to produce chunk {0:?}")]
    Failed(ChunkCoord),
}

/// Result type for endpoint clients.
pub type EndpointResult<T> = Result<T, EndpointError>;

/// A chunk as served by the endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct ServedChunk {
    /// Chunk coordinate.
    pub coord: ChunkCoord,
    /// Where the server got it from.
    pub status: ReplyStatus,
    /// Exposed voxels, chunk-local.
    pub instances: Vec<VisibleInstance>,
}

/// Endpoint counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EndpointStats {
    /// Connections accepted.
    pub connections: u64,
    /// Chunks answered from the streaming world.
    pub resident: u64,
    /// Chunks that went through the loader.
    pub resolved: u64,
    /// Requests answered with [`ReplyStatus::Failed`].
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    connections: AtomicU64,
    resident: AtomicU64,
    resolved: AtomicU64,
    failed: AtomicU64,
}

/// What the endpoint serves from.
pub struct ChunkSource {
    world: Arc<World>,
    loader: ChunkLoader,
}

impl ChunkSource {
    /// Serves `world` first and falls back to `loader`.
    #[must_use]
    pub fn new(world: Arc<World>, loader: ChunkLoader) -> Self {
        Self { world, loader }
    }

    /// Produces the visible instances of `coord`.
    ///
    /// Faces towards chunks the world has not loaded count as exposed.
    ///
    /// # Errors
    ///
    /// Returns the loader's error when the chunk is not resident and
    /// cannot be loaded or generated.
    pub fn serve(&self, coord: ChunkCoord) -> LoadResult<(ReplyStatus, Vec<VisibleInstance>)> {
        if let Some(loaded) = self.world.get(coord) {
            return Ok((ReplyStatus::Resident, loaded.instances.to_vec()));
        }

        let outcome = self.loader.resolve(coord, &CancelToken::new())?;
        let around: Vec<Arc<LoadedChunk>> = coord
            .cardinal_neighbors()
            .into_iter()
            .filter_map(|c| self.world.get(c))
            .collect();
        let neighbors = Neighbors::from_lookup(&outcome.chunk, |c| {
            around.iter().find(|l| l.coord == c).map(|l| l.chunk.as_ref())
        });
        Ok((outcome.origin.into(), compute_instances(&outcome.chunk, &neighbors)))
    }
}

/// TCP server answering chunk requests, one thread per connection.
pub struct ChunkEndpoint {
    local_addr: SocketAddr,
    counters: Arc<Counters>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ChunkEndpoint {
    /// Binds `addr` and starts accepting connections.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the address cannot be bound.
    pub fn bind(addr: impl ToSocketAddrs, source: ChunkSource) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let counters = Arc::new(Counters::default());
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = {
            let source = Arc::new(source);
            let counters = Arc::clone(&counters);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("strata-endpoint".into())
                .spawn(move || accept_loop(&listener, &source, &counters, &shutdown))?
        };

        tracing::info!("Chunk endpoint listening on {}", local_addr);
        Ok(Self {
            local_addr,
            counters,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Bound address. Useful after binding port zero.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> EndpointStats {
        EndpointStats {
            connections: self.counters.connections.load(Ordering::Relaxed),
            resident: self.counters.resident.load(Ordering::Relaxed),
            resolved: self.counters.resolved.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting, closes every connection and joins the threads.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            tracing::info!("Chunk endpoint on {} stopped", self.local_addr);
        }
    }
}

impl Drop for ChunkEndpoint {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: &TcpListener,
    source: &Arc<ChunkSource>,
    counters: &Arc<Counters>,
    shutdown: &Arc<AtomicBool>,
) {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();

    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let id = counters.connections.fetch_add(1, Ordering::Relaxed);
                let source = Arc::clone(source);
                let counters = Arc::clone(counters);
                let shutdown = Arc::clone(shutdown);
                let spawned = thread::Builder::new()
                    .name(format!("strata-conn-{id}"))
                    .spawn(move || {
                        tracing::debug!("Connection from {}", peer);
                        if let Err(e) = serve_connection(stream, &source, &counters, &shutdown) {
                            tracing::warn!("Connection from {} closed: {}", peer, e);
                        }
                    });
                match spawned {
                    Ok(handle) => connections.push(handle),
                    Err(e) => tracing::error!("Cannot spawn connection thread: {}", e),
                }
                connections.retain(|h| !h.is_finished());
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    for handle in connections {
        let _ = handle.join();
    }
}

fn serve_connection(
    mut stream: TcpStream,
    source: &ChunkSource,
    counters: &Counters,
    shutdown: &AtomicBool,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(POLL_INTERVAL))?;
    stream.set_nodelay(true)?;

    let mut request = ChunkRequest::zeroed();
    while read_request(&mut stream, bytemuck::bytes_of_mut(&mut request), shutdown)? {
        if request.magic != REQUEST_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad request magic"));
        }
        let coord = request.coord();

        let (status, instances) = match source.serve(coord) {
            Ok((status, instances)) => {
                let counter = if status == ReplyStatus::Resident {
                    &counters.resident
                } else {
                    &counters.resolved
                };
                counter.fetch_add(1, Ordering::Relaxed);
                (status, instances)
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Cannot serve chunk {:?}: {}", coord, e);
                (ReplyStatus::Failed, Vec::new())
            }
        };
        tracing::debug!("Serving chunk {:?} ({:?}, {} instances)", coord, status, instances.len());

        // A chunk never has more instances than voxels.
        let count = instances.len() as u32;
        let header = ChunkReplyHeader::new(coord, status, count);
        stream.write_all(bytemuck::bytes_of(&header))?;
        stream.write_all(VisibleInstance::as_bytes(&instances))?;
        stream.flush()?;
    }
    Ok(())
}

/// Fills `buf` from `stream`, waking on read timeouts to check `shutdown`.
///
/// Returns `Ok(false)` on a clean close before the first byte or on shutdown.
fn read_request(stream: &mut TcpStream, buf: &mut [u8], shutdown: &AtomicBool) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        if shutdown.load(Ordering::Acquire) {
            return Ok(false);
        }
        match stream.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Blocking client for a [`ChunkEndpoint`].
pub struct ChunkClient {
    stream: TcpStream,
}

impl ChunkClient {
    /// Connects to an endpoint.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the connection fails.
    pub fn connect(addr: impl ToSocketAddrs) -> EndpointResult<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Requests one chunk and waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns `Failed` if the server could not produce the chunk,
    /// `Protocol` if the reply is malformed, and `Io` on connection errors.
    pub fn request(&mut self, coord: ChunkCoord) -> EndpointResult<ServedChunk> {
        self.stream.write_all(bytemuck::bytes_of(&ChunkRequest::new(coord)))?;

        let mut header = ChunkReplyHeader::zeroed();
        self.stream.read_exact(bytemuck::bytes_of_mut(&mut header))?;
        if header.magic != REPLY_MAGIC {
            return Err(EndpointError::Protocol(format!("bad reply magic {:?}", header.magic)));
        }
        if header.coord() != coord {
            return Err(EndpointError::Protocol(format!(
                "asked for {:?}, got {:?}",
                coord,
                header.coord()
            )));
        }
        let status = ReplyStatus::from_u8(header.status)
            .ok_or_else(|| EndpointError::Protocol(format!("unknown status {}", header.status)))?;
        let count = header.count() as usize;
        if count > VOXELS_PER_CHUNK {
            return Err(EndpointError::Protocol(format!("{count} instances in one chunk")));
        }
        if status == ReplyStatus::Failed {
            return Err(EndpointError::Failed(coord));
        }

        let mut instances = vec![VisibleInstance::zeroed(); count];
        self.stream.read_exact(bytemuck::cast_slice_mut(&mut instances))?;
        Ok(ServedChunk {
            coord,
            status,
            instances,
        })
    }
}

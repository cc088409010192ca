//! Blocking framed-TCP RPC server with pluggable concurrency models.
//!
//! The server is deliberately synchronous: the point of the comparison
//! is the behavior of classic thread- and process-based RPC servers,
//! not of an async runtime. It runs on plain [`std::net`] threads next
//! to the tokio-based benchmark driver.

use super::{ServerHandle, ServerMode};
use crate::transport::{
    read_frame_sync, write_frame_sync, RpcOperation, RpcReply, RpcRequest, RpcResponse,
    MAX_FRAME_LEN,
};
use anyhow::{Context, Result};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

pub struct RpcServer;

impl RpcServer {
    /// Bind and start serving in background threads. The listener is
    /// bound before this returns, so clients may connect immediately.
    /// Pass port 0 for an ephemeral port; the handle reports the real
    /// address.
    pub fn start(host: &str, port: u16, mode: ServerMode) -> Result<ServerHandle> {
        let listener = bind_reusable(host, port)
            .with_context(|| format!("failed to bind RPC server to {host}:{port}"))?;
        let addr = listener.local_addr()?;
        info!("RPC server ({mode}) listening on {addr}");

        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_shutdown = Arc::clone(&shutdown);
        let accept_thread = thread::Builder::new()
            .name(format!("rpc-accept-{mode}"))
            .spawn(move || accept_loop(listener, mode, accept_shutdown))
            .context("failed to spawn RPC accept thread")?;

        let stop = Box::new(move || {
            shutdown.store(true, Ordering::SeqCst);
            // Wake the blocking accept so the loop observes the flag.
            let _ = TcpStream::connect(addr);
            if accept_thread.join().is_err() {
                warn!("RPC accept thread panicked during shutdown");
            }
        });

        Ok(ServerHandle::new(addr, "RPC", stop))
    }
}

/// Bind with SO_REUSEADDR so consecutive sweep configurations can
/// reuse the fixed port while the previous listener's connections are
/// still in TIME_WAIT.
fn bind_reusable(host: &str, port: u16) -> Result<TcpListener> {
    use std::net::ToSocketAddrs;

    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .context("bind address did not resolve")?;
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    Ok(socket.into())
}

fn accept_loop(listener: TcpListener, mode: ServerMode, shutdown: Arc<AtomicBool>) {
    let pool = match mode {
        ServerMode::ThreadPerRequest => Some(WorkerPool::new(num_cpus::get())),
        _ => None,
    };
    #[cfg(unix)]
    let mut reaper = ChildReaper::default();

    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        match mode {
            ServerMode::ThreadPerConnection => {
                if let Err(e) = thread::Builder::new()
                    .name("rpc-conn".into())
                    .spawn(move || handle_connection(stream))
                {
                    warn!("failed to spawn connection thread: {e}");
                }
            }
            ServerMode::ThreadPerRequest => {
                // Pool is always built for this mode.
                if let Some(pool) = &pool {
                    pool.serve_connection(stream);
                }
            }
            ServerMode::ProcessPerConnection => {
                #[cfg(unix)]
                {
                    reaper.reap();
                    reaper.fork_for(stream);
                }
                #[cfg(not(unix))]
                {
                    drop(stream);
                    warn!("process-per-connection mode is unavailable on this platform");
                }
            }
        }
    }
    debug!("RPC accept loop exited ({mode})");
}

/// Read requests until the client disconnects, answering each one.
fn handle_connection(mut stream: TcpStream) {
    loop {
        let request: RpcRequest = match read_frame_sync(&mut stream) {
            Ok(request) => request,
            Err(_) => break, // disconnect or corrupt stream
        };
        let response = RpcResponse {
            id: request.id,
            reply: execute(request.op),
        };
        if let Err(e) = write_frame_sync(&mut stream, &response) {
            debug!("failed to write response: {e:#}");
            break;
        }
    }
}

fn execute(op: RpcOperation) -> RpcReply {
    match op {
        RpcOperation::Ping => RpcReply::Pong,
        RpcOperation::Echo(data) => RpcReply::Echoed(data),
        RpcOperation::Upload(data) => RpcReply::Uploaded(data.len()),
        RpcOperation::Download(len) => {
            if len > MAX_FRAME_LEN {
                RpcReply::Error(format!("requested {len} bytes exceeds the frame limit"))
            } else {
                RpcReply::Payload(vec![0x78; len])
            }
        }
    }
}

struct Job {
    request: RpcRequest,
    reply_tx: std::sync::mpsc::Sender<RpcResponse>,
}

/// Fixed pool of worker threads shared by every connection in
/// thread-per-request mode. Connections keep a dedicated reader thread
/// (the framed protocol is ordered per stream) but the work itself is
/// executed by the pool.
struct WorkerPool {
    jobs: crossbeam::channel::Sender<Job>,
}

impl WorkerPool {
    fn new(workers: usize) -> Self {
        let (tx, rx) = crossbeam::channel::unbounded::<Job>();
        for i in 0..workers.max(1) {
            let rx = rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("rpc-worker-{i}"))
                .spawn(move || {
                    for job in rx.iter() {
                        let response = RpcResponse {
                            id: job.request.id,
                            reply: execute(job.request.op),
                        };
                        // Receiver gone means the connection died mid-request.
                        let _ = job.reply_tx.send(response);
                    }
                });
            if let Err(e) = spawned {
                warn!("failed to spawn pool worker {i}: {e}");
            }
        }
        Self { jobs: tx }
    }

    fn serve_connection(&self, mut stream: TcpStream) {
        let jobs = self.jobs.clone();
        let spawned = thread::Builder::new().name("rpc-reader".into()).spawn(move || {
            loop {
                let request: RpcRequest = match read_frame_sync(&mut stream) {
                    Ok(request) => request,
                    Err(_) => break,
                };
                let (reply_tx, reply_rx) = std::sync::mpsc::channel();
                if jobs.send(Job { request, reply_tx }).is_err() {
                    break; // pool shut down
                }
                let response = match reply_rx.recv() {
                    Ok(response) => response,
                    Err(_) => break,
                };
                if write_frame_sync(&mut stream, &response).is_err() {
                    break;
                }
            }
        });
        if let Err(e) = spawned {
            warn!("failed to spawn connection reader: {e}");
        }
    }
}

#[cfg(unix)]
#[derive(Default)]
struct ChildReaper {
    children: Vec<nix::unistd::Pid>,
}

#[cfg(unix)]
impl ChildReaper {
    fn fork_for(&mut self, stream: TcpStream) {
        use nix::unistd::{fork, ForkResult};

        // Safety: the child immediately confines itself to handling one
        // connection and exits without touching shared state.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                handle_connection(stream);
                std::process::exit(0);
            }
            Ok(ForkResult::Parent { child }) => {
                drop(stream);
                self.children.push(child);
            }
            Err(e) => {
                warn!("fork failed, dropping connection: {e}");
                drop(stream);
            }
        }
    }

    /// Reap any children that have already exited, without blocking.
    fn reap(&mut self) {
        use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

        self.children.retain(|&child| {
            !matches!(
                waitpid(child, Some(WaitPidFlag::WNOHANG)),
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) | Err(_)
            )
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(stream: &mut TcpStream, id: u64, op: RpcOperation) -> RpcResponse {
        write_frame_sync(stream, &RpcRequest { id, op }).unwrap();
        read_frame_sync(stream).unwrap()
    }

    #[test]
    fn test_thread_per_connection_serves_all_operations() {
        let mut handle = RpcServer::start("127.0.0.1", 0, ServerMode::ThreadPerConnection).unwrap();
        let mut stream = TcpStream::connect(handle.addr()).unwrap();

        assert_eq!(call(&mut stream, 1, RpcOperation::Ping).reply, RpcReply::Pong);
        assert_eq!(
            call(&mut stream, 2, RpcOperation::Echo(vec![9, 8, 7])).reply,
            RpcReply::Echoed(vec![9, 8, 7])
        );
        assert_eq!(
            call(&mut stream, 3, RpcOperation::Upload(vec![0; 512])).reply,
            RpcReply::Uploaded(512)
        );
        match call(&mut stream, 4, RpcOperation::Download(256)).reply {
            RpcReply::Payload(body) => assert_eq!(body.len(), 256),
            other => panic!("unexpected reply: {other:?}"),
        }

        drop(stream);
        handle.stop();
    }

    #[test]
    fn test_thread_per_request_handles_interleaved_clients() {
        let mut handle = RpcServer::start("127.0.0.1", 0, ServerMode::ThreadPerRequest).unwrap();

        let mut a = TcpStream::connect(handle.addr()).unwrap();
        let mut b = TcpStream::connect(handle.addr()).unwrap();
        for i in 0..10 {
            assert_eq!(call(&mut a, i, RpcOperation::Ping).reply, RpcReply::Pong);
            assert_eq!(
                call(&mut b, i, RpcOperation::Echo(vec![i as u8])).reply,
                RpcReply::Echoed(vec![i as u8])
            );
        }

        drop(a);
        drop(b);
        handle.stop();
    }

    #[test]
    fn test_response_ids_match_request_ids() {
        let mut handle = RpcServer::start("127.0.0.1", 0, ServerMode::ThreadPerConnection).unwrap();
        let mut stream = TcpStream::connect(handle.addr()).unwrap();

        for id in [42u64, 7, 99] {
            let response = call(&mut stream, id, RpcOperation::Ping);
            assert_eq!(response.id, id);
        }

        drop(stream);
        handle.stop();
    }

    #[test]
    fn test_stop_closes_the_listener() {
        let mut handle = RpcServer::start("127.0.0.1", 0, ServerMode::ThreadPerConnection).unwrap();
        let addr = handle.addr();
        handle.stop();

        // The listener is gone once stop returns.
        assert!(TcpStream::connect(addr).is_err());
    }
}

//! receiver.rs
//! Receives mocap datagrams over UDP on a dedicated thread and publishes the
//! newest decoded sample to a shared [`LatestSlot`].
//! - wrong-size datagrams are dropped without comment
//! - `stop()` shuts the socket down to unblock the pending receive, then joins
//! - no reconnect: a fatal socket error leaves the receiver inert with a fault

use parking_lot::Mutex;
use socket2::{Domain, SockAddr, Socket, Type};
use std::{
    net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, ToSocketAddrs, UdpSocket},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};
use log::{debug, error, info};

use crate::error::TelemetryError;
use crate::telemetry::sample::{LatestSlot, TelemetrySample};

/// Large enough for any datagram that might turn up on the port.
const RECV_BUFFER_SIZE: usize = 1024;

/// Owns the socket and the receive loop for one session.
pub struct TelemetryReceiver {
    slot: Arc<LatestSlot>,
    stop_flag: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    fault: Arc<Mutex<Option<String>>>,
    shutdown_handle: Option<Socket>,
    local_addr: Option<SocketAddr>,
    handle: Option<JoinHandle<()>>,
}

impl Default for TelemetryReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryReceiver {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(LatestSlot::new()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            fault: Arc::new(Mutex::new(None)),
            shutdown_handle: None,
            local_addr: None,
            handle: None,
        }
    }

    /// Binds `bind_address:port` and spawns the receive loop.
    pub fn start(&mut self, bind_address: &str, port: u16) -> Result<SocketAddr, TelemetryError> {
        if let (Some(addr), Some(_)) = (self.local_addr, &self.handle) {
            return Err(TelemetryError::AlreadyRunning(addr));
        }

        let label = format!("{}:{}", bind_address, port);
        let bind_err = |source| TelemetryError::Bind {
            addr: label.clone(),
            source,
        };

        let addr = (bind_address, port)
            .to_socket_addrs()
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| {
                bind_err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "address did not resolve",
                ))
            })?;

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, None).map_err(bind_err)?;
        socket.set_reuse_address(true).ok();
        socket.bind(&SockAddr::from(addr)).map_err(bind_err)?;

        // Same underlying socket; kept here so stop() can shut it down while
        // the loop is blocked in recv.
        let shutdown_handle = socket.try_clone().map_err(bind_err)?;
        let udp: UdpSocket = socket.into();
        let local_addr = udp.local_addr().map_err(bind_err)?;

        self.stop_flag.store(false, Ordering::SeqCst);
        *self.fault.lock() = None;

        let slot = self.slot.clone();
        let stop_flag = self.stop_flag.clone();
        let dropped = self.dropped.clone();
        let fault = self.fault.clone();

        let handle = thread::Builder::new()
            .name("telemetry_rx".into())
            .spawn(move || receive_loop(udp, slot, stop_flag, dropped, fault))
            .map_err(TelemetryError::Spawn)?;

        info!("[Telemetry] listening on {}", local_addr);
        self.shutdown_handle = Some(shutdown_handle);
        self.local_addr = Some(local_addr);
        self.handle = Some(handle);
        Ok(local_addr)
    }

    /// Terminates the receive loop and releases the socket. Returns only once
    /// the thread has exited. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);

        if let Some(socket) = &self.shutdown_handle {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!("[Telemetry] shutdown: {}", e);
            }
        }
        // An unconnected UDP socket may ignore shutdown; a zero-length
        // datagram to ourselves wakes the receive either way.
        if let (Some(addr), Some(_)) = (self.local_addr, &self.handle) {
            send_wakeup(addr);
        }

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("[Telemetry] receive thread panicked");
            }
            info!(
                "[Telemetry] stopped (dropped {} malformed packets)",
                self.dropped.load(Ordering::Relaxed)
            );
        }

        self.shutdown_handle = None;
        self.local_addr = None;
    }

    #[inline]
    pub fn has_data(&self) -> bool {
        self.slot.has_data()
    }

    #[inline]
    pub fn latest(&self) -> Option<TelemetrySample> {
        self.slot.latest()
    }

    /// Shared handle to the latest-value slot, for other consumers.
    pub fn slot(&self) -> Arc<LatestSlot> {
        self.slot.clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Terminal fault of the receive loop, if it died on a socket error.
    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    /// Count of datagrams discarded for having the wrong size.
    pub fn dropped_packets(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for TelemetryReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    socket: UdpSocket,
    slot: Arc<LatestSlot>,
    stop_flag: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    fault: Arc<Mutex<Option<String>>>,
) {
    let mut buffer = [0u8; RECV_BUFFER_SIZE];

    while !stop_flag.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buffer) {
            Ok((len, sender)) => {
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = slot.publish_datagram(&buffer[..len]) {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("[Telemetry] dropped datagram from {}: {}", sender, e);
                }
            }
            Err(e) => {
                if !stop_flag.load(Ordering::SeqCst) {
                    error!("[Telemetry] socket error in receive loop: {}", e);
                    *fault.lock() = Some(e.to_string());
                }
                break;
            }
        }
    }

    debug!("[Telemetry] receive loop exiting");
}

/// Sends an empty datagram to a socket bound to `addr` from a throwaway socket.
fn send_wakeup(addr: SocketAddr) {
    let target = match addr {
        SocketAddr::V4(v4) if v4.ip().is_unspecified() => {
            SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port()))
        }
        SocketAddr::V6(v6) if v6.ip().is_unspecified() => {
            SocketAddr::from((Ipv6Addr::LOCALHOST, addr.port()))
        }
        other => other,
    };
    let local: SocketAddr = match target {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    match UdpSocket::bind(local) {
        Ok(waker) => {
            if let Err(e) = waker.send_to(&[], target) {
                debug!("[Telemetry] wake-up to {} failed: {}", target, e);
            }
        }
        Err(e) => debug!("[Telemetry] wake-up socket: {}", e),
    }
}

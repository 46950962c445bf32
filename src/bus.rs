// src/bus.rs

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::AsRawFd;

use bytes::{Buf, BufMut, BytesMut};
use nix::sys::socket::{
    bind, setsockopt, socket, sockopt::ReuseAddr, AddressFamily, SockFlag, SockType, SockaddrIn,
};
use serde::Serialize;
use tokio::net::UdpSocket;

use crate::errors::{DeputyError, ErrorKind};
use crate::log;
use crate::logger::LogLevel;

/// Every frame starts with this tag; anything else on the port is dropped.
const FRAME_MAGIC: u32 = 0x504d_4431; // "PMD1"

/// Largest UDP payload a frame may occupy.
const MAX_DATAGRAM: usize = 65_507;

/// A publish/subscribe endpoint carrying typed, channel-tagged messages over
/// UDP datagrams.
///
/// URLs use the `udpm://address:port?ttl=N` form. A multicast group address
/// joins the group with loopback enabled, so every endpoint on the segment
/// (including this host) sees every frame. A non-multicast address degrades
/// to plain loopback datagrams, which is enough for a single-host setup.
///
/// The same socket sends and receives, so the event loop gets one readable
/// object to wait on.
pub struct Bus {
    sock: UdpSocket,
    dest: SocketAddrV4,
}

impl Bus {
    /// Binds the shared port and joins the group named by `url`.
    ///
    /// # Errors
    ///
    /// Fails on an unparseable URL or any socket-level error. Callers treat
    /// this as fatal at startup.
    pub fn open(url: &str) -> Result<Self, DeputyError> {
        let (addr, port, ttl) = parse_url(url)?;

        // SO_REUSEADDR before bind, so a sheriff and a deputy on one host can
        // share the group port.
        let fd = socket(
            AddressFamily::Inet,
            SockType::Datagram,
            SockFlag::empty(),
            None,
        )?;
        setsockopt(&fd, ReuseAddr, &true)?;
        bind(fd.as_raw_fd(), &SockaddrIn::new(0, 0, 0, 0, port))?;

        let std_sock = std::net::UdpSocket::from(fd);
        std_sock.set_nonblocking(true)?;
        let sock = UdpSocket::from_std(std_sock)?;

        let dest = if addr.is_multicast() {
            sock.join_multicast_v4(addr, Ipv4Addr::UNSPECIFIED)?;
            sock.set_multicast_loop_v4(true)?;
            // ttl 0 keeps frames on this host; loopback still delivers them
            sock.set_multicast_ttl_v4(ttl)?;
            SocketAddrV4::new(addr, port)
        } else {
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
        };

        log!(LogLevel::Debug, "bus endpoint open on {}", dest);
        Ok(Self { sock, dest })
    }

    /// Serializes `msg` and sends it as one frame on `channel`.
    pub async fn publish<T: Serialize>(&self, channel: &str, msg: &T) -> Result<(), DeputyError> {
        let payload = serde_json::to_vec(msg)?;
        let mut frame = BytesMut::with_capacity(12 + channel.len() + payload.len());
        frame.put_u32(FRAME_MAGIC);
        frame.put_u32(channel.len() as u32);
        frame.put_slice(channel.as_bytes());
        frame.put_u32(payload.len() as u32);
        frame.put_slice(&payload);
        if frame.len() > MAX_DATAGRAM {
            return Err(DeputyError::new(
                ErrorKind::Protocol,
                format!("frame of {} bytes exceeds one datagram", frame.len()),
            ));
        }
        self.sock
            .send_to(&frame, SocketAddr::V4(self.dest))
            .await?;
        Ok(())
    }

    /// Waits for the next well-formed frame and returns its channel and raw
    /// payload. Malformed datagrams are dropped, not surfaced.
    pub async fn recv(&self) -> Result<(String, Vec<u8>), DeputyError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (n, _) = self.sock.recv_from(&mut buf).await?;
            match decode_frame(&buf[..n]) {
                Ok(frame) => return Ok(frame),
                Err(err) => log!(LogLevel::Debug, "dropping malformed bus frame: {}", err),
            }
        }
    }
}

pub(crate) fn decode_frame(frame: &[u8]) -> Result<(String, Vec<u8>), DeputyError> {
    let mut buf = frame;
    if buf.remaining() < 4 || buf.get_u32() != FRAME_MAGIC {
        return Err(DeputyError::new(ErrorKind::Protocol, "bad frame magic"));
    }
    if buf.remaining() < 4 {
        return Err(DeputyError::new(ErrorKind::Protocol, "truncated channel length"));
    }
    let channel_len = buf.get_u32() as usize;
    if buf.remaining() < channel_len {
        return Err(DeputyError::new(ErrorKind::Protocol, "truncated channel"));
    }
    let channel = std::str::from_utf8(&buf[..channel_len])
        .map_err(|_| DeputyError::new(ErrorKind::Protocol, "channel is not utf-8"))?
        .to_string();
    buf.advance(channel_len);
    if buf.remaining() < 4 {
        return Err(DeputyError::new(ErrorKind::Protocol, "truncated payload length"));
    }
    let payload_len = buf.get_u32() as usize;
    if buf.remaining() != payload_len {
        return Err(DeputyError::new(ErrorKind::Protocol, "payload length mismatch"));
    }
    Ok((channel, buf.to_vec()))
}

fn parse_url(url: &str) -> Result<(Ipv4Addr, u16, u32), DeputyError> {
    let rest = url.strip_prefix("udpm://").ok_or_else(|| {
        DeputyError::new(
            ErrorKind::Config,
            format!("unsupported bus url [{}]; expected udpm://address:port", url),
        )
    })?;
    let (hostport, query) = rest.split_once('?').unwrap_or((rest, ""));
    let (host, port) = hostport.split_once(':').ok_or_else(|| {
        DeputyError::new(ErrorKind::Config, format!("bus url [{}] lacks a port", url))
    })?;
    let addr: Ipv4Addr = host
        .parse()
        .map_err(|_| DeputyError::new(ErrorKind::Config, format!("bad bus address [{}]", host)))?;
    let port: u16 = port
        .parse()
        .map_err(|_| DeputyError::new(ErrorKind::Config, format!("bad bus port [{}]", port)))?;
    let mut ttl = 0u32;
    for kv in query.split('&').filter(|kv| !kv.is_empty()) {
        if let Some(value) = kv.strip_prefix("ttl=") {
            ttl = value.parse().map_err(|_| {
                DeputyError::new(ErrorKind::Config, format!("bad ttl value [{}]", value))
            })?;
        }
    }
    Ok((addr, port, ttl))
}

//! TCP transport.
//!
//! Every frame is a little-endian `u32` length, then a channel byte, then the
//! payload. The length counts the channel byte and the payload and may not
//! exceed [`MAX_FRAME_LEN`]. TCP only offers one delivery class, so unreliable
//! packets are delivered reliably too.
//!
//! A listener thread accepts clients. Each client gets a reader thread that
//! forwards frames to the transport and a writer thread that drains the
//! client's outgoing queue, so neither polling nor sending ever blocks the
//! simulation thread.

use std::{
    collections::HashMap,
    io::{self, BufWriter, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::mpsc::{self, Receiver, Sender},
    thread,
};

use log::{debug, error, info, warn};

use crate::network::protocol::Reliability;

use super::{DisconnectionType, PeerId, Transport, TransportEvent};

/// Largest accepted frame, channel byte included.
pub const MAX_FRAME_LEN: usize = 1 << 20;

enum TcpInbound {
    Connected {
        peer: PeerId,
        writer: Sender<WriterCommand>,
        stream: TcpStream,
    },
    Received {
        peer: PeerId,
        channel: u8,
        payload: Vec<u8>,
    },
    Disconnected(PeerId),
}

enum WriterCommand {
    Frame { channel: u8, payload: Vec<u8> },
    Close,
}

struct TcpPeer {
    writer: Sender<WriterCommand>,
    stream: TcpStream,
}

/// Length-framed TCP transport.
pub struct TcpTransport {
    local_addr: SocketAddr,
    inbound: Receiver<TcpInbound>,
    peers: HashMap<PeerId, TcpPeer>,
}

impl TcpTransport {
    /// Binds a listener and starts accepting clients.
    pub fn bind(address: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(address)?;
        let local_addr = listener.local_addr()?;
        let (sender, inbound) = mpsc::channel();

        thread::Builder::new()
            .name("tcp-listener".to_string())
            .spawn(move || accept_clients(listener, sender))?;

        info!("Listening on {local_addr}");
        Ok(Self {
            local_addr,
            inbound,
            peers: HashMap::new(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

impl Transport for TcpTransport {
    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.inbound.try_recv() {
            match message {
                TcpInbound::Connected {
                    peer,
                    writer,
                    stream,
                } => {
                    self.peers.insert(peer, TcpPeer { writer, stream });
                    events.push(TransportEvent::Connected(peer));
                }
                TcpInbound::Received {
                    peer,
                    channel,
                    payload,
                } => {
                    if self.peers.contains_key(&peer) {
                        events.push(TransportEvent::Received {
                            peer,
                            channel,
                            payload,
                        });
                    }
                }
                TcpInbound::Disconnected(peer) => {
                    if let Some(connection) = self.peers.remove(&peer) {
                        let _ = connection.writer.send(WriterCommand::Close);
                        events.push(TransportEvent::Disconnected(peer));
                    }
                }
            }
        }
        events
    }

    fn send(&mut self, peer: PeerId, channel: u8, _reliability: Reliability, payload: Vec<u8>) {
        if let Some(connection) = self.peers.get(&peer) {
            let _ = connection.writer.send(WriterCommand::Frame { channel, payload });
        }
    }

    fn disconnect(&mut self, peer: PeerId, kind: DisconnectionType) {
        let Some(connection) = self.peers.remove(&peer) else {
            return;
        };
        match kind {
            DisconnectionType::Later => {
                let _ = connection.writer.send(WriterCommand::Close);
            }
            DisconnectionType::Kick => {
                let _ = connection.stream.shutdown(Shutdown::Both);
            }
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for (_, connection) in self.peers.drain() {
            let _ = connection.writer.send(WriterCommand::Close);
        }
    }
}

fn accept_clients(listener: TcpListener, sender: Sender<TcpInbound>) {
    let mut next_peer: PeerId = 0;
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let peer = next_peer;
                next_peer = next_peer.wrapping_add(1);
                if let Err(error) = spawn_peer(peer, stream, sender.clone()) {
                    warn!("Failed to set up peer {peer}: {error}");
                }
            }
            Err(error) => error!("Accept failed: {error}"),
        }
    }
}

fn spawn_peer(peer: PeerId, stream: TcpStream, sender: Sender<TcpInbound>) -> io::Result<()> {
    let _ = stream.set_nodelay(true);
    let address = stream
        .peer_addr()
        .map(|address| address.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    let writer_stream = stream.try_clone()?;
    let control_stream = stream.try_clone()?;
    let (writer, commands) = mpsc::channel();

    if sender
        .send(TcpInbound::Connected {
            peer,
            writer,
            stream: control_stream,
        })
        .is_err()
    {
        return Ok(());
    }
    debug!("Peer {peer} connected from {address}");

    thread::Builder::new()
        .name(format!("tcp-writer-{peer}"))
        .spawn(move || write_frames(writer_stream, commands))?;

    thread::Builder::new()
        .name(format!("tcp-reader-{peer}"))
        .spawn(move || {
            let mut reader = stream;
            loop {
                match read_frame(&mut reader) {
                    Ok(Some((channel, payload))) => {
                        let received = TcpInbound::Received {
                            peer,
                            channel,
                            payload,
                        };
                        if sender.send(received).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        debug!("Read error for peer {peer}: {error}");
                        break;
                    }
                }
            }
            let _ = sender.send(TcpInbound::Disconnected(peer));
        })?;

    Ok(())
}

fn write_frames(stream: TcpStream, commands: Receiver<WriterCommand>) {
    let mut writer = BufWriter::new(stream);
    while let Ok(command) = commands.recv() {
        match command {
            WriterCommand::Frame { channel, payload } => {
                if let Err(error) = write_frame(&mut writer, channel, &payload) {
                    warn!("Dropping connection after failed write: {error}");
                    break;
                }
            }
            WriterCommand::Close => break,
        }
    }
    let _ = writer.flush();
    let _ = writer.get_ref().shutdown(Shutdown::Both);
}

/// Writes one frame and flushes it.
pub fn write_frame(writer: &mut impl Write, channel: u8, payload: &[u8]) -> io::Result<()> {
    let len = payload.len() + 1;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {len} bytes exceeds {MAX_FRAME_LEN}"),
        ));
    }
    writer.write_all(&(len as u32).to_le_bytes())?;
    writer.write_all(&[channel])?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Reads one frame. `Ok(None)` means the stream ended cleanly between frames.
pub fn read_frame(reader: &mut impl Read) -> io::Result<Option<(u8, Vec<u8>)>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(error),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid frame length {len}"),
        ));
    }

    let mut channel = [0u8; 1];
    reader.read_exact(&mut channel)?;
    let mut payload = vec![0u8; len - 1];
    reader.read_exact(&mut payload)?;
    Ok(Some((channel[0], payload)))
}

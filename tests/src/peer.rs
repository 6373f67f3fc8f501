#![cfg(test)]
//! A fake network: every frame the transmitter emits is answered the way a
//! host with the configured behavior would answer it.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uwalker_core::transport::{PacketSender, TransportError};
use uwalker_protocols::tcp::Packet;

pub const PEER_ISN: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Completes the handshake and accepts "no authentication".
    Socks5,
    /// Completes the handshake and greets with an SSH banner.
    Ssh,
    /// Completes the handshake, then never says anything.
    Mute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire {
    Syn(Ipv4Addr, u16),
    Data { addr: Ipv4Addr, port: u16, seq: u32, ack: u32, data: Vec<u8> },
    Reset(Ipv4Addr, u16, u32),
}

/// Hosts not listed in `hosts` drop every frame.
pub struct FakeNetwork {
    hosts: HashMap<Ipv4Addr, Behavior>,
    replies: mpsc::Sender<Packet>,
    wire: Arc<Mutex<Vec<Wire>>>,
}

impl FakeNetwork {
    pub fn new(hosts: &[(Ipv4Addr, Behavior)]) -> (Self, mpsc::Receiver<Packet>, Arc<Mutex<Vec<Wire>>>) {
        let (tx, rx) = mpsc::channel(256);
        let wire = Arc::new(Mutex::new(Vec::new()));
        let net = Self {
            hosts: hosts.iter().copied().collect(),
            replies: tx,
            wire: Arc::clone(&wire),
        };
        (net, rx, wire)
    }

    fn reply(&self, addr: Ipv4Addr, port: u16, start: bool, ack: u32, payload: &[u8]) {
        let seq = if start { PEER_ISN } else { PEER_ISN + 1 };
        let _ = self.replies.try_send(Packet {
            addr,
            port,
            done: false,
            start,
            seq,
            ack,
            payload: payload.to_vec(),
        });
    }
}

impl PacketSender for FakeNetwork {
    fn probe(&mut self, dst: Ipv4Addr, port: u16) -> Result<(), TransportError> {
        self.wire.lock().unwrap().push(Wire::Syn(dst, port));
        if self.hosts.contains_key(&dst) {
            self.reply(dst, port, true, 1, &[]);
        }
        Ok(())
    }

    fn probe_data(
        &mut self,
        dst: Ipv4Addr,
        port: u16,
        seq: u32,
        ack: u32,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.wire.lock().unwrap().push(Wire::Data {
            addr: dst,
            port,
            seq,
            ack,
            data: data.to_vec(),
        });
        let acked = seq.wrapping_add(data.len() as u32);
        match self.hosts.get(&dst) {
            Some(Behavior::Socks5) => self.reply(dst, port, false, acked, &[5, 0]),
            Some(Behavior::Ssh) => self.reply(dst, port, false, acked, b"SSH-2.0-OpenSSH_9.6\r\n"),
            Some(Behavior::Mute) | None => {}
        }
        Ok(())
    }

    fn terminate(&mut self, dst: Ipv4Addr, port: u16, seq: u32) -> Result<(), TransportError> {
        self.wire.lock().unwrap().push(Wire::Reset(dst, port, seq));
        Ok(())
    }
}

//! The stub resolver interface (component D) plus a real UDP
//! implementation and an in-process fake for tests.
//!
//! Everything above this trait (framing, fingerprinting, the session
//! handshake, the worker pool) treats a resolver purely through these
//! three methods; retries, backoff and per-query timeout are the
//! resolver's own business and any final failure surfaces as an opaque
//! `TunnelError`.

use std::time::{Duration, Instant};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::error::{TunnelError, TunnelResult};

const QTYPE_A: u16 = 1;
const QTYPE_TXT: u16 = 16;
const QCLASS_IN: u16 = 1;

#[async_trait::async_trait]
pub trait StubResolver: Send + Sync {
    fn address(&self) -> String;
    async fn query_a(&self, name: &str) -> TunnelResult<(Vec<u8>, Duration)>;
    async fn query_txt(&self, name: &str) -> TunnelResult<(Vec<u8>, Duration)>;
}

/// A real upstream resolver, spoken to with plain UDP DNS.
pub struct UdpStubResolver {
    upstream: String,
    query_timeout: Duration,
    retry_wait: Duration,
    retry_count: u32,
}

impl UdpStubResolver {
    pub fn new(upstream: String, query_timeout: Duration, retry_wait: Duration, retry_count: u32) -> Self {
        UdpStubResolver { upstream, query_timeout, retry_wait, retry_count }
    }

    async fn query(&self, name: &str, qtype: u16) -> TunnelResult<(Vec<u8>, Duration)> {
        let mut last_err = TunnelError::Timeout;
        for attempt in 0..=self.retry_count {
            if attempt > 0 {
                tokio::time::sleep(self.retry_wait).await;
            }
            let started = Instant::now();
            match timeout(self.query_timeout, self.send_once(name, qtype)).await {
                Ok(Ok(data)) => return Ok((data, started.elapsed())),
                Ok(Err(e)) => last_err = e,
                Err(_) => last_err = TunnelError::Timeout,
            }
        }
        Err(last_err)
    }

    async fn send_once(&self, name: &str, qtype: u16) -> TunnelResult<Vec<u8>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&self.upstream).await?;

        let query_id: u16 = rand::thread_rng().gen();
        let packet = build_query(query_id, name, qtype)?;
        socket.send(&packet).await?;

        let mut buf = [0u8; 4096];
        let received = socket.recv(&mut buf).await?;
        parse_answer(&buf[..received], query_id, qtype)
    }
}

#[async_trait::async_trait]
impl StubResolver for UdpStubResolver {
    fn address(&self) -> String {
        self.upstream.clone()
    }

    async fn query_a(&self, name: &str) -> TunnelResult<(Vec<u8>, Duration)> {
        self.query(name, QTYPE_A).await
    }

    async fn query_txt(&self, name: &str) -> TunnelResult<(Vec<u8>, Duration)> {
        self.query(name, QTYPE_TXT).await
    }
}

fn encode_name(name: &str, out: &mut Vec<u8>) -> TunnelResult<()> {
    let trimmed = name.trim_end_matches('.');
    if trimmed.is_empty() {
        out.push(0);
        return Ok(());
    }
    for label in trimmed.split('.') {
        if label.len() > 63 {
            return Err(TunnelError::MsgTooLong { subdata_len: label.len(), subdata_space: 63 });
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    Ok(())
}

fn build_query(id: u16, name: &str, qtype: u16) -> TunnelResult<Vec<u8>> {
    let mut packet = Vec::new();
    packet.write_u16::<BigEndian>(id)?;
    packet.write_u16::<BigEndian>(0x0100)?; // standard query, recursion desired
    packet.write_u16::<BigEndian>(1)?; // qdcount
    packet.write_u16::<BigEndian>(0)?; // ancount
    packet.write_u16::<BigEndian>(0)?; // nscount
    packet.write_u16::<BigEndian>(0)?; // arcount
    encode_name(name, &mut packet)?;
    packet.write_u16::<BigEndian>(qtype)?;
    packet.write_u16::<BigEndian>(QCLASS_IN)?;
    Ok(packet)
}

/// Skips a (possibly compressed) DNS name starting at `pos`, returning the
/// offset just past it.
fn skip_name(buf: &[u8], mut pos: usize) -> TunnelResult<usize> {
    loop {
        let len = *buf.get(pos).ok_or_else(too_short)? as usize;
        if len == 0 {
            return Ok(pos + 1);
        }
        if len & 0xc0 == 0xc0 {
            buf.get(pos + 1).ok_or_else(too_short)?;
            return Ok(pos + 2);
        }
        pos += 1 + len;
        if pos > buf.len() {
            return Err(too_short());
        }
    }
}

fn too_short() -> TunnelError {
    TunnelError::InvalidResponse("truncated dns message".into())
}

/// Parses a DNS response, returning the A address's 4 octets or the
/// concatenation of all TXT rdata blobs, matching the id and qtype of the
/// original query.
fn parse_answer(buf: &[u8], expected_id: u16, qtype: u16) -> TunnelResult<Vec<u8>> {
    let mut cur = std::io::Cursor::new(buf);
    let id = cur.read_u16::<BigEndian>().map_err(|_| too_short())?;
    if id != expected_id {
        return Err(TunnelError::InvalidResponse("dns response id mismatch".into()));
    }
    let flags = cur.read_u16::<BigEndian>().map_err(|_| too_short())?;
    let rcode = flags & 0x000f;
    if rcode != 0 {
        return Err(TunnelError::InvalidResponse(format!("dns rcode {}", rcode)));
    }
    let qdcount = cur.read_u16::<BigEndian>().map_err(|_| too_short())?;
    let ancount = cur.read_u16::<BigEndian>().map_err(|_| too_short())?;
    cur.read_u16::<BigEndian>().map_err(|_| too_short())?; // nscount
    cur.read_u16::<BigEndian>().map_err(|_| too_short())?; // arcount

    let mut pos = cur.position() as usize;
    for _ in 0..qdcount {
        pos = skip_name(buf, pos)?;
        pos += 4; // qtype + qclass
    }

    let mut out = Vec::new();
    for _ in 0..ancount {
        pos = skip_name(buf, pos)?;
        let rtype = u16::from_be_bytes(buf.get(pos..pos + 2).ok_or_else(too_short)?.try_into().unwrap());
        pos += 2;
        pos += 2; // rclass
        pos += 4; // ttl
        let rdlength = u16::from_be_bytes(buf.get(pos..pos + 2).ok_or_else(too_short)?.try_into().unwrap()) as usize;
        pos += 2;
        let rdata = buf.get(pos..pos + rdlength).ok_or_else(too_short)?;
        pos += rdlength;

        if rtype == qtype && qtype == QTYPE_A && rdata.len() == 4 {
            return Ok(rdata.to_vec());
        }
        if rtype == qtype && qtype == QTYPE_TXT {
            // TXT rdata is one or more length-prefixed character-strings.
            let mut i = 0;
            while i < rdata.len() {
                let len = rdata[i] as usize;
                i += 1;
                let end = (i + len).min(rdata.len());
                out.extend_from_slice(&rdata[i..end]);
                i = end;
            }
        }
    }

    if qtype == QTYPE_TXT {
        return Ok(out);
    }
    Err(TunnelError::InvalidResponse("no matching answer record".into()))
}

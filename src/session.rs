//! Session manager (component F): the handshake state machine and the
//! public `start_session` / `write_envelope` / `read_envelope` / `close`
//! API that ties every other module together.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;

use crate::alphabet::Alphabet;
use crate::crypto::{CipherContext, KeyAgreement, OtpProvider};
use crate::error::{TunnelError, TunnelResult};
use crate::fingerprint::{self, ResolverMetadata};
use crate::frame::{Frame, FrameType};
use crate::packer::ParentZone;
use crate::receiver;
use crate::resolver::StubResolver;
use crate::sender;
use crate::worker::{self, WorkItem};

const SESSION_ID_MASK: u32 = 0x00ff_ffff;
const WORK_QUEUE_CAPACITY: usize = 512;

/// Everything `start_session` needs besides the collaborators it's handed
/// directly: the parent zone to tunnel under, and the resolver layer's
/// retry knobs.
pub struct SessionConfig {
    pub parent_zone: String,
    pub query_timeout: Duration,
    pub retry_wait: Duration,
    pub retry_count: u32,
    /// Skip the dense-alphabet probe entirely and stay on `Safe`.
    pub force_safe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    SessionIdAcquired,
    Fingerprinted,
    KeyAgreed,
    Open,
    Closed,
}

/// An established tunnel. Cloning shares the same underlying session --
/// every clone observes the same state and work queue.
#[derive(Clone)]
pub struct Session {
    dns_session_id: u32,
    alphabet: Alphabet,
    zone: ParentZone,
    state: Arc<AtomicU8>,
    counter: Arc<AtomicU8>,
    cipher: Arc<Mutex<Box<dyn CipherContext>>>,
    queue: async_channel::Sender<WorkItem>,
    _workers: Arc<Vec<tokio::task::JoinHandle<()>>>,
}

impl Session {
    /// `NEW -> SESSION_ID_ACQUIRED -> FINGERPRINTED -> KEY_AGREED -> OPEN`.
    pub async fn start_session(
        config: SessionConfig,
        resolvers: Vec<Arc<dyn StubResolver>>,
        otp: &dyn OtpProvider,
        key_agreement: &dyn KeyAgreement,
        cipher_factory: impl FnOnce([u8; 32]) -> Box<dyn CipherContext>,
    ) -> TunnelResult<Session> {
        let zone = ParentZone::new(&config.parent_zone)?;
        let state = Arc::new(AtomicU8::new(State::New as u8));

        // NEW -> SESSION_ID_ACQUIRED
        let dns_session_id = acquire_session_id(&resolvers, &zone, otp).await?;
        state.store(State::SessionIdAcquired as u8, Ordering::SeqCst);
        log::debug!("acquired dns session id {:06x}", dns_session_id);

        // SESSION_ID_ACQUIRED -> FINGERPRINTED
        let (metadata, dense_ok) = fingerprint::fingerprint_all(&resolvers, &zone, config.force_safe).await?;
        let alphabet = if dense_ok { Alphabet::Dense } else { Alphabet::Safe };
        state.store(State::Fingerprinted as u8, Ordering::SeqCst);
        log::debug!("fingerprinted {} resolver(s), alphabet={:?}", metadata.len(), alphabet);

        // FINGERPRINTED -> KEY_AGREED
        let (chosen, chosen_alphabet) = pick_upstream(&resolvers, &metadata, alphabet);
        let symmetric_key = key_agreement.random_key();
        let encrypted_key = key_agreement.encrypt_to_server(&symmetric_key)?;

        let mut cipher = cipher_factory(symmetric_key);

        let init = Frame {
            frame_type: FrameType::Init,
            id: dns_session_id,
            size: encrypted_key.len() as u32,
            data: encrypted_key,
            ..Default::default()
        };
        let names = sender::split_ciphertext(&init.encode(), dns_session_id, FrameType::Init, chosen_alphabet, &zone)?;

        let mut plaintext_reply = Vec::new();
        for name in names {
            let (answer, _rtt) = chosen.query_txt(&name).await?;
            plaintext_reply.extend_from_slice(&cipher.decrypt(&answer)?);
        }
        if plaintext_reply.len() < 4 {
            return Err(TunnelError::InvalidSessionId);
        }
        let echoed = u32::from_le_bytes(plaintext_reply[0..4].try_into().unwrap()) & SESSION_ID_MASK;
        if echoed != dns_session_id {
            return Err(TunnelError::InvalidSessionId);
        }
        state.store(State::KeyAgreed as u8, Ordering::SeqCst);
        log::debug!("key agreement complete, session open");

        // KEY_AGREED -> OPEN
        let (tx, rx) = async_channel::bounded(WORK_QUEUE_CAPACITY);
        let workers = worker::spawn_workers(resolvers, rx);
        state.store(State::Open as u8, Ordering::SeqCst);

        Ok(Session {
            dns_session_id,
            alphabet,
            zone,
            state,
            counter: Arc::new(AtomicU8::new(0)),
            cipher: Arc::new(Mutex::new(cipher)),
            queue: tx,
            _workers: Arc::new(workers),
        })
    }

    /// Packs `msg_id = (counter << 24) | dns_session_id`, wrapping the
    /// counter at 255 -- the top byte distinguishes messages sharing one
    /// DNS-session-ID, the bottom 24 bits are the session-ID itself.
    fn next_msg_id(&self) -> u32 {
        let counter = self.counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some((c + 1) % 255)).unwrap();
        ((counter as u32) << 24) | (self.dns_session_id & SESSION_ID_MASK)
    }

    /// Encrypts and fragments `envelope_bytes`, dispatching one `A` query
    /// per fragment and returning once every fragment has completed. Not
    /// safe to call concurrently with itself: the message counter is the
    /// sole producer and callers must serialize.
    pub async fn write_envelope(&self, envelope_bytes: &[u8]) -> TunnelResult<()> {
        self.require_open()?;
        let id = self.next_msg_id();
        let ciphertext = self.cipher.lock().await.encrypt(envelope_bytes)?;
        sender::parallel_send(&self.queue, &ciphertext, id, self.alphabet, &self.zone).await
    }

    /// Polls for a pending manifest; if one exists, fetches every range and
    /// decrypts the reassembled ciphertext. Returns `Ok(None)` if nothing
    /// was pending (not an error).
    pub async fn read_envelope(&self) -> TunnelResult<Option<Vec<u8>>> {
        self.require_open()?;
        let manifest = match receiver::poll_manifest(&self.queue, self.alphabet, &self.zone).await? {
            Some(m) => m,
            None => return Ok(None),
        };
        let ciphertext = receiver::parallel_recv(&self.queue, &self.zone, &manifest).await?;
        let plaintext = self.cipher.lock().await.decrypt(&ciphertext)?;
        Ok(Some(plaintext))
    }

    /// `OPEN -> CLOSED`. Closes the work queue so in-flight workers drain
    /// their current item and exit; does not wait for worker tasks to
    /// finish.
    pub fn close(&self) {
        self.state.store(State::Closed as u8, Ordering::SeqCst);
        self.queue.close();
    }

    fn require_open(&self) -> TunnelResult<()> {
        if self.state.load(Ordering::SeqCst) != State::Open as u8 {
            return Err(TunnelError::SessionClosed);
        }
        Ok(())
    }
}

async fn acquire_session_id(
    resolvers: &[Arc<dyn StubResolver>],
    zone: &ParentZone,
    otp: &dyn OtpProvider,
) -> TunnelResult<u32> {
    if resolvers.is_empty() {
        return Err(TunnelError::NoResolvers);
    }
    let code: u32 = otp.code().parse().map_err(|_| TunnelError::Crypto("otp code not numeric".into()))?;
    let totp = Frame { frame_type: FrameType::Totp, id: code, ..Default::default() };
    let encoded = Alphabet::Safe.encode(&totp.encode());
    let name = zone.pack(&encoded)?;

    let mut last_err = TunnelError::NoResolvers;
    for resolver in resolvers {
        match resolver.query_a(&name).await {
            Ok((answer, _rtt)) if answer.len() == 4 => {
                let raw = u32::from_le_bytes(answer.try_into().unwrap());
                let session_id = raw & SESSION_ID_MASK;
                if session_id == 0 {
                    return Err(TunnelError::InvalidSessionId);
                }
                return Ok(session_id);
            }
            Ok(_) => last_err = TunnelError::InvalidResponse("A answer not 4 bytes".into()),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

/// Picks a random surviving upstream and the alphabet it may use
/// individually (which can be `Safe` even if the session-wide choice is
/// `Dense`, if this one upstream folds case but others don't -- though in
/// that case it was already dropped by fingerprinting, so this just
/// mirrors the session-wide choice per-upstream for symmetry with the
/// per-resolver metadata).
fn pick_upstream(
    resolvers: &[Arc<dyn StubResolver>],
    metadata: &[ResolverMetadata],
    session_alphabet: Alphabet,
) -> (Arc<dyn StubResolver>, Alphabet) {
    let index = rand::thread_rng().gen_range(0..metadata.len());
    let address = &metadata[index].address;
    let resolver = resolvers.iter().find(|r| r.address() == *address).cloned().unwrap_or_else(|| resolvers[0].clone());
    (resolver, session_alphabet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_id_packs_counter_into_high_byte() {
        let session = Session {
            dns_session_id: 0x00abcdef,
            alphabet: Alphabet::Safe,
            zone: ParentZone::new("c2.example.com").unwrap(),
            state: Arc::new(AtomicU8::new(State::Open as u8)),
            counter: Arc::new(AtomicU8::new(0)),
            cipher: Arc::new(Mutex::new(Box::new(crate::crypto::ChaChaCipherContext::new([1u8; 32])))),
            queue: async_channel::bounded(1).0,
            _workers: Arc::new(Vec::new()),
        };
        let first = session.next_msg_id();
        let second = session.next_msg_id();
        assert_eq!(first & SESSION_ID_MASK, 0x00abcdef);
        assert_eq!(first >> 24, 0);
        assert_eq!(second >> 24, 1);
    }

    #[tokio::test]
    async fn write_envelope_after_close_is_session_closed() {
        let session = Session {
            dns_session_id: 1,
            alphabet: Alphabet::Safe,
            zone: ParentZone::new("c2.example.com").unwrap(),
            state: Arc::new(AtomicU8::new(State::Open as u8)),
            counter: Arc::new(AtomicU8::new(0)),
            cipher: Arc::new(Mutex::new(Box::new(crate::crypto::ChaChaCipherContext::new([1u8; 32])))),
            queue: async_channel::bounded(1).0,
            _workers: Arc::new(Vec::new()),
        };
        session.close();
        assert!(matches!(session.write_envelope(b"hi").await, Err(TunnelError::SessionClosed)));
        assert!(matches!(session.read_envelope().await, Err(TunnelError::SessionClosed)));
    }
}

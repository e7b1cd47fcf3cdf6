//! Resolver fingerprinting (component E): benchmark each configured
//! upstream to decide whether it preserves case (so the dense alphabet
//! survives) and to score its health.
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;

use crate::alphabet::Alphabet;
use crate::error::TunnelResult;
use crate::frame::Frame;
use crate::packer::ParentZone;
use crate::resolver::StubResolver;

const PROBES_PER_BATCH: usize = 4;
const RTT_RING_SIZE: usize = 8;

/// Per-upstream health and alphabet-viability metadata. Mutated only by
/// the owning fingerprint task, before any worker pool exists; read-only
/// thereafter (see `session.rs`).
#[derive(Debug, Clone)]
pub struct ResolverMetadata {
    pub address: String,
    pub dense_ok: bool,
    pub errors: u32,
    rtts: VecDeque<Duration>,
}

impl ResolverMetadata {
    fn new(address: String) -> Self {
        ResolverMetadata { address, dense_ok: false, errors: 0, rtts: VecDeque::with_capacity(RTT_RING_SIZE) }
    }

    fn record_rtt(&mut self, rtt: Duration) {
        if self.rtts.len() == RTT_RING_SIZE {
            self.rtts.pop_back();
        }
        self.rtts.push_front(rtt);
    }

    /// Diagnostic only; dispatch never biases on this.
    pub fn average_rtt(&self) -> Duration {
        if self.rtts.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.rtts.iter().sum();
        sum / self.rtts.len() as u32
    }
}

/// Runs both benchmark batches against one upstream and returns its
/// metadata. `upstream_index` is embedded in the high byte of the probe
/// frame's id, mirroring `session.rs`'s message-id packing.
pub async fn fingerprint_resolver(
    upstream_index: u32,
    resolver: &dyn StubResolver,
    zone: &ParentZone,
    force_safe: bool,
) -> ResolverMetadata {
    let mut meta = ResolverMetadata::new(resolver.address());

    benchmark(upstream_index, Alphabet::Safe, resolver, zone, &mut meta).await;
    if meta.errors == 0 && !force_safe {
        benchmark(upstream_index, Alphabet::Dense, resolver, zone, &mut meta).await;
        if meta.errors == 0 {
            meta.dense_ok = true;
        } else {
            meta.dense_ok = false;
            meta.errors = 0; // a dense failure is expected, not fatal
        }
    }
    meta
}

async fn benchmark(
    upstream_index: u32,
    alphabet: Alphabet,
    resolver: &dyn StubResolver,
    zone: &ParentZone,
    meta: &mut ResolverMetadata,
) {
    for _ in 0..PROBES_PER_BATCH {
        match probe_once(upstream_index, alphabet, resolver, zone).await {
            Ok(rtt) => meta.record_rtt(rtt),
            Err(_) => meta.errors += 1,
        }
    }
}

async fn probe_once(
    upstream_index: u32,
    alphabet: Alphabet,
    resolver: &dyn StubResolver,
    zone: &ParentZone,
) -> TunnelResult<Duration> {
    let mut payload = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut payload);

    let frame = Frame::nop(upstream_index << 24, payload.to_vec());
    let serialized = frame.encode();
    let expected_crc = crc32fast::hash(&serialized);

    let encoded = alphabet.encode(&serialized);
    let name = zone.pack(&encoded)?;

    let (answer, rtt) = resolver.query_a(&name).await?;
    if answer.len() != 4 {
        return Err(crate::error::TunnelError::InvalidResponse("A answer not 4 bytes".into()));
    }
    let got_crc = u32::from_le_bytes(answer.try_into().unwrap());
    if got_crc != expected_crc {
        return Err(crate::error::TunnelError::InvalidResponse("fingerprint crc mismatch".into()));
    }
    Ok(rtt)
}

/// Fingerprints every upstream concurrently, drops any with `errors > 0`,
/// and decides the session-wide alphabet. Returns `NO_RESOLVERS` if
/// nothing survives.
pub async fn fingerprint_all(
    resolvers: &[Arc<dyn StubResolver>],
    zone: &ParentZone,
    force_safe: bool,
) -> TunnelResult<(Vec<ResolverMetadata>, bool)> {
    if resolvers.is_empty() {
        return Err(crate::error::TunnelError::NoResolvers);
    }

    let mut handles = Vec::with_capacity(resolvers.len());
    for (index, resolver) in resolvers.iter().cloned().enumerate() {
        let zone = zone.clone();
        handles.push(tokio::spawn(async move {
            fingerprint_resolver(index as u32, resolver.as_ref(), &zone, force_safe).await
        }));
    }

    let mut survivors = Vec::with_capacity(handles.len());
    for handle in handles {
        let meta = handle.await.expect("fingerprint task panicked");
        if meta.errors == 0 {
            survivors.push(meta);
        } else {
            log::warn!("removing resolver {} (too many errors)", meta.address);
        }
    }

    if survivors.is_empty() {
        return Err(crate::error::TunnelError::NoResolvers);
    }

    let enable_dense = !force_safe && survivors.iter().all(|m| m.dense_ok);
    Ok((survivors, enable_dense))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StubResolver;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A resolver that echoes the CRC of every frame it's asked to
    /// fingerprint, optionally uppercasing the encoded name first to
    /// simulate a case-folding recursive resolver.
    struct EchoResolver {
        address: String,
        fold_case: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl StubResolver for EchoResolver {
        fn address(&self) -> String {
            self.address.clone()
        }

        async fn query_a(&self, name: &str) -> TunnelResult<(Vec<u8>, Duration)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Simulate a (possibly case-folding) recursive resolver: the
            // label text is all this "wire" carries, so reconstruct the
            // encoded subdata by stripping the parent zone and the dots
            // back out, then decode with whichever alphabet accepts it.
            let queried = if self.fold_case { name.to_uppercase() } else { name.to_string() };
            let without_parent = queried.trim_end_matches(".example.com.");
            let encoded: String = without_parent.split('.').collect();

            let frame_bytes = Alphabet::Dense
                .decode(&encoded)
                .or_else(|_| Alphabet::Safe.decode(&encoded))
                .map_err(|_| crate::error::TunnelError::InvalidResponse("bad encoding".into()))?;

            let crc = crc32fast::hash(&frame_bytes);
            Ok((crc.to_le_bytes().to_vec(), Duration::from_millis(1)))
        }

        async fn query_txt(&self, _name: &str) -> TunnelResult<(Vec<u8>, Duration)> {
            unimplemented!("fingerprinting only issues A queries")
        }
    }

    #[tokio::test]
    async fn clean_resolver_reports_dense_ok() {
        let zone = ParentZone::new("c2.example.com").unwrap();
        let resolver = EchoResolver { address: "10.0.0.1:53".into(), fold_case: false, calls: AtomicU32::new(0) };
        let meta = fingerprint_resolver(0, &resolver, &zone, false).await;
        assert_eq!(meta.errors, 0);
        assert!(meta.dense_ok);
    }

    #[tokio::test]
    async fn force_safe_skips_dense_batch() {
        let zone = ParentZone::new("c2.example.com").unwrap();
        let resolver = EchoResolver { address: "10.0.0.1:53".into(), fold_case: false, calls: AtomicU32::new(0) };
        let meta = fingerprint_resolver(0, &resolver, &zone, true).await;
        assert_eq!(meta.errors, 0);
        assert!(!meta.dense_ok);
        // Only the safe batch (4 probes) ran.
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn case_folding_resolver_never_reports_dense_ok() {
        let zone = ParentZone::new("c2.example.com").unwrap();
        let resolver = EchoResolver { address: "10.0.0.2:53".into(), fold_case: true, calls: AtomicU32::new(0) };
        let meta = fingerprint_resolver(0, &resolver, &zone, false).await;
        // Safe batch is unaffected by folding; dense batch corrupts the
        // checksum, so dense_ok must stay false and errors reset to 0.
        assert_eq!(meta.errors, 0);
        assert!(!meta.dense_ok);
    }

    #[tokio::test]
    async fn no_resolvers_is_an_error() {
        let zone = ParentZone::new("c2.example.com").unwrap();
        let resolvers: Vec<Arc<dyn StubResolver>> = Vec::new();
        assert!(fingerprint_all(&resolvers, &zone, false).await.is_err());
    }
}

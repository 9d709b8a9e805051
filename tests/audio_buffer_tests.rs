// Integration tests for the audio chunk buffer

use std::collections::HashSet;
use std::sync::Arc;
use tab_recorder::recorder::AudioChunkBuffer;

#[test]
fn test_drain_batch_concatenates_in_order() {
    let buffer = AudioChunkBuffer::new();
    buffer.push(b"one-".to_vec());
    buffer.push(Vec::new());
    buffer.push(b"two".to_vec());

    assert!(!buffer.is_empty());
    assert_eq!(buffer.drain_batch(), Some(b"one-two".to_vec()));
    assert!(buffer.is_empty());
}

#[test]
fn test_drain_empty_buffer() {
    let buffer = AudioChunkBuffer::new();
    assert!(buffer.drain().is_empty());
    assert_eq!(buffer.drain_batch(), None);
}

#[test]
fn test_concurrent_push_and_drain_loses_nothing() {
    const WRITERS: usize = 4;
    const PER_WRITER: usize = 500;

    let buffer = Arc::new(AudioChunkBuffer::new());
    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for i in 0..PER_WRITER {
                    buffer.push(format!("{}:{}", w, i).into_bytes());
                }
            })
        })
        .collect();

    let mut batches = Vec::new();
    while writers.iter().any(|w| !w.is_finished()) {
        batches.push(buffer.drain());
    }
    for writer in writers {
        writer.join().unwrap();
    }
    batches.push(buffer.drain());

    let mut seen = HashSet::new();
    for chunk in batches.into_iter().flatten() {
        assert!(seen.insert(chunk), "chunk delivered twice");
    }
    assert_eq!(seen.len(), WRITERS * PER_WRITER);
}

#[test]
fn test_each_writer_order_is_preserved() {
    let buffer = Arc::new(AudioChunkBuffer::new());
    let writer = {
        let buffer = Arc::clone(&buffer);
        std::thread::spawn(move || {
            for i in 0..1000u32 {
                buffer.push(i.to_be_bytes().to_vec());
            }
        })
    };

    let mut all = Vec::new();
    while !writer.is_finished() {
        all.extend(buffer.drain());
    }
    writer.join().unwrap();
    all.extend(buffer.drain());

    let values: Vec<u32> = all
        .iter()
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    assert_eq!(values, (0..1000).collect::<Vec<_>>());
}

//! Stress tests for pathological cases
//!
//! These tests verify we don't have accidentally quadratic behavior.

use schemebus::hub::SubscriberRegistry;
use schemebus::protocol::{encode, Envelope, FrameDecoder};
use serde_json::json;
use std::time::Instant;

/// Test that broadcast cost grows linearly with the number of subscribers
#[test]
fn test_dispatch_not_quadratic() {
    let subscriber_counts = [100, 1_000, 10_000];
    let mut times = vec![];

    for &count in &subscriber_counts {
        let registry = SubscriberRegistry::new();
        let _streams: Vec<_> = (0..count)
            .map(|i| registry.add(Some(format!("client-{}", i))))
            .collect();

        let iterations = 50;
        let envelope = Envelope::new("metrics", vec![json!({"cpu": 0.25})]);
        let start = Instant::now();

        for _ in 0..iterations {
            assert_eq!(registry.dispatch(&envelope).unwrap(), count);
        }

        let elapsed = start.elapsed();
        let per_subscriber_ns = elapsed.as_nanos() / (iterations as u128 * count as u128);
        times.push((count, elapsed.as_nanos().max(1)));

        println!(
            "Subscribers: {:>6}, Dispatches: {}, Time: {:?}, Per delivery: {}ns",
            count, iterations, elapsed, per_subscriber_ns
        );
    }

    let (small_count, small_time) = times[0];
    let (large_count, large_time) = times[times.len() - 1];

    let count_ratio = large_count as f64 / small_count as f64;
    let time_ratio = large_time as f64 / small_time as f64;

    println!(
        "\nSubscriber count ratio: {:.0}x, Time ratio: {:.1}x",
        count_ratio, time_ratio
    );

    // If quadratic, time_ratio would be ~count_ratio²
    assert!(
        time_ratio < count_ratio * 10.0,
        "Dispatch appears to be quadratic! Time grew {:.1}x for {:.0}x more subscribers",
        time_ratio,
        count_ratio
    );
}

/// Test that addressed sends do not get slower with unrelated subscribers attached
#[test]
fn test_addressed_dispatch_delivers_once() {
    let registry = SubscriberRegistry::new();
    let _streams: Vec<_> = (0..5_000)
        .map(|i| registry.add(Some(format!("client-{}", i))))
        .collect();

    let envelope = Envelope::new("direct", vec![]).to_destination("client-4242");
    let start = Instant::now();
    for _ in 0..100 {
        assert_eq!(registry.dispatch(&envelope).unwrap(), 1);
    }
    println!("100 addressed dispatches over 5000 subscribers: {:?}", start.elapsed());
}

/// Test that a huge frame arriving in tiny chunks is not rescanned on every push
#[test]
fn test_decoder_large_frame_small_chunks() {
    let sizes = [10_000usize, 100_000, 1_000_000];
    let mut times = vec![];

    for &size in &sizes {
        let envelope = Envelope::new("blob", vec![json!("x".repeat(size))]);
        let frame = encode(&envelope).unwrap();

        let mut decoder = FrameDecoder::new();
        let start = Instant::now();
        let mut decoded = None;

        for chunk in frame.chunks(64) {
            decoder.push(chunk);
            if let Some(envelope) = decoder.next_frame().unwrap() {
                decoded = Some(envelope);
            }
        }

        let elapsed = start.elapsed();
        times.push((size, elapsed.as_nanos().max(1)));
        println!("Frame size: {:>8}, Chunks: {:>6}, Time: {:?}", size, frame.len() / 64, elapsed);

        let decoded = decoded.expect("frame never completed");
        assert_eq!(decoded.values[0].as_str().map(str::len), Some(size));
        assert_eq!(decoder.buffered(), 0);
    }

    let (small_size, small_time) = times[0];
    let (large_size, large_time) = times[times.len() - 1];
    let size_ratio = large_size as f64 / small_size as f64;
    let time_ratio = large_time as f64 / small_time as f64;

    assert!(
        time_ratio < size_ratio * 10.0,
        "Frame decoding appears to be quadratic! Time grew {:.1}x for {:.0}x larger frames",
        time_ratio,
        size_ratio
    );
}

/// Test many small frames delivered in one chunk
#[test]
fn test_decoder_many_frames_one_chunk() {
    let mut wire = Vec::new();
    for i in 0..50_000 {
        wire.extend_from_slice(&encode(&Envelope::new("tick", vec![json!(i)])).unwrap());
    }

    let mut decoder = FrameDecoder::new();
    let start = Instant::now();
    decoder.push(&wire);

    let mut count = 0;
    while let Some(envelope) = decoder.next_frame().unwrap() {
        assert_eq!(envelope.values[0], json!(count));
        count += 1;
    }

    println!("Decoded {} frames in {:?}", count, start.elapsed());
    assert_eq!(count, 50_000);
    assert!(decoder.finish().unwrap().is_none());
}

//! Frame synchronization and decode throughput

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use fftlink_core::device::memory::SliceDevice;
use fftlink_core::protocol::sample::{decode_frame, encode_frame};
use fftlink_core::protocol::sync::FrameSynchronizer;
use fftlink_core::{FRAME_BYTES, MAX_SAMPLE, SAMPLES_PER_FRAME};

const FRAMES: usize = 1000;

fn ramp_frame(offset: u16) -> [u8; FRAME_BYTES] {
    let mut samples = [0u16; SAMPLES_PER_FRAME];
    for (i, s) in samples.iter_mut().enumerate() {
        *s = (i as u16 * 16 + offset) % (MAX_SAMPLE + 1);
    }
    encode_frame(&samples)
}

fn stream(frames: usize, corrupt_every: Option<usize>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frames * FRAME_BYTES + 7);
    // Leading noise so the first scan has work to do
    bytes.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
    for n in 0..frames {
        let mut frame = ramp_frame(n as u16);
        if corrupt_every.is_some_and(|k| n > 0 && n % k == 0) {
            frame[0] &= 0x3F;
        }
        bytes.extend_from_slice(&frame);
    }
    bytes
}

fn bench_decode(c: &mut Criterion) {
    let frame = ramp_frame(3);
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(FRAME_BYTES as u64));
    group.bench_function("decode_frame", |b| b.iter(|| decode_frame(black_box(&frame))));
    group.finish();
}

fn bench_sync(c: &mut Criterion) {
    let clean = stream(FRAMES, None);
    let faulty = stream(FRAMES, Some(50));

    let mut group = c.benchmark_group("sync");
    group.throughput(Throughput::Bytes(clean.len() as u64));

    for (name, data) in [("clean", &clean), ("fault_every_50", &faulty)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut sync = FrameSynchronizer::new(SliceDevice::new(data.clone()));
                let mut frame = [0u8; FRAME_BYTES];
                for _ in 0..FRAMES / 2 {
                    black_box(sync.next_frame(&mut frame).ok());
                }
                sync.sync_errors()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode, bench_sync);
criterion_main!(benches);

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ftx_core::{DecodeProfile, Mode, SpectrumProfile, LDPC_N};
use ftx_fec::{crc_append, ldpc_decode, ldpc_encode, llrs_from_codeword};
use ftx_hash::CallsignHashTable;
use ftx_phy::{build_spectrogram, decode_ft8, modulate, SpectrumAnalyzer};
use std::time::Instant;

fn bench_fec(c: &mut Criterion) {
    let store = CallsignHashTable::new();
    let payload = ftx_msg::pack(&ftx_msg::parse("CQ K1ABC FN42"), &store).expect("pack");
    let message = crc_append(&payload);
    let codeword = ldpc_encode(&message);
    let llr = llrs_from_codeword(&codeword);

    let mut group = c.benchmark_group("fec_ldpc");
    group.throughput(Throughput::Elements(LDPC_N as u64));

    group.bench_function("encode", |b| {
        b.iter(|| {
            let _ = ldpc_encode(&message);
        })
    });

    group.bench_function("decode_clean", |b| {
        b.iter(|| {
            let (_, errors) = ldpc_decode(&llr, 20).expect("decode");
            assert_eq!(errors, 0);
        })
    });

    let mut noisy = llr.clone();
    for i in [3, 40, 77, 111, 170] {
        noisy[i] = -noisy[i];
    }
    group.bench_function("decode_corrupted", |b| {
        b.iter(|| {
            let (_, errors) = ldpc_decode(&noisy, 20).expect("decode");
            assert_eq!(errors, 0);
        })
    });

    group.finish();
}

fn bench_modem(c: &mut Criterion) {
    let store = CallsignHashTable::new();
    let payload = ftx_msg::pack(&ftx_msg::parse("CQ K1ABC FN42"), &store).expect("pack");
    let mut samples = modulate(Mode::Ft8, &payload, 1500.0, 12_000.0).expect("modulate");
    samples.extend(std::iter::repeat(0.0).take(6_000));
    let audio_secs = samples.len() as f64 / 12_000.0;

    let mut group = c.benchmark_group("modem_ft8");
    group.sample_size(10);
    group.throughput(Throughput::Elements(samples.len() as u64));

    group.bench_function("modulate", |b| {
        b.iter(|| {
            let _ = modulate(Mode::Ft8, &payload, 1500.0, 12_000.0).expect("modulate");
        })
    });

    group.bench_function("spectrogram", |b| {
        let mut analyzer = SpectrumAnalyzer::new();
        b.iter(|| {
            let _ = analyzer
                .build(&samples, 12_000.0, &SpectrumProfile::default())
                .expect("build");
        })
    });

    group.bench_with_input(
        BenchmarkId::new("decode_slot", "clean"),
        &samples,
        |b, samples| {
            b.iter_custom(|iters| {
                let start = Instant::now();
                for _ in 0..iters {
                    let wf = build_spectrogram(samples, 12_000.0, &SpectrumProfile::default())
                        .expect("build");
                    let decodes = decode_ft8(&wf, &DecodeProfile::default(), &store);
                    assert_eq!(decodes.len(), 1, "decode changed under benchmark");
                }
                let elapsed = start.elapsed();
                let realtime_x = (audio_secs * iters as f64) / elapsed.as_secs_f64();
                assert!(
                    realtime_x >= 1.0,
                    "slot decode below realtime: {realtime_x:.2}x"
                );
                elapsed
            })
        },
    );

    group.finish();
}

criterion_group!(benches, bench_fec, bench_modem);
criterion_main!(benches);

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use dlc_bench::{make_options, make_tile, TILE_SIZES};
use dlc_infer::codec::{
    decode_request, decode_response, encode_inference_request, encode_inference_request_into,
    encode_inference_response,
};

fn bench_codec(c: &mut Criterion) {
    let options = make_options();
    let mut group = c.benchmark_group("dlc_infer_codec");
    for size in TILE_SIZES {
        let tile = make_tile(size, 4);
        let inputs = std::slice::from_ref(&tile);
        group.throughput(Throughput::Bytes((tile.pixels().len() * 4) as u64));

        group.bench_with_input(BenchmarkId::new("encode_request", size), &size, |b, _| {
            let mut out = Vec::new();
            b.iter(|| {
                encode_inference_request_into(&mut out, "blend", black_box(&options), black_box(inputs));
                black_box(&out);
            })
        });

        let req = encode_inference_request("blend", &options, inputs);
        group.bench_with_input(BenchmarkId::new("decode_request", size), &req, |b, bytes| {
            b.iter(|| black_box(decode_request(black_box(bytes)).unwrap()))
        });

        let resp = encode_inference_response(inputs);
        group.bench_with_input(BenchmarkId::new("decode_response", size), &resp, |b, bytes| {
            b.iter(|| black_box(decode_response(black_box(bytes)).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);

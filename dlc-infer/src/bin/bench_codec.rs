//! Microbench for the dlc-infer codec (no criterion).
//!
//! Usage:
//!   cargo run -p dlc-infer --bin bench_codec --release -- --n 20000 --size 64
use std::time::Instant;

use dlc_core::{ImageTile, OptionSnapshot, TileShape};
use dlc_infer::codec::{decode_response, encode_inference_request_into, encode_inference_response};

fn main() {
    let mut n: u64 = 20_000;
    let mut size: u32 = 64;
    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        match a.as_str() {
            "--n" => {
                if let Some(v) = args.next() {
                    n = v.parse().unwrap_or(n);
                }
            }
            "--size" => {
                if let Some(v) = args.next() {
                    size = v.parse().unwrap_or(size);
                }
            }
            _ => {}
        }
    }

    let shape = TileShape::new(size, size, 4);
    let Ok(tile) = ImageTile::filled(shape, 0.5) else {
        eprintln!("tile {shape} is too large");
        std::process::exit(1);
    };
    let options = OptionSnapshot {
        bools: vec![("clamp".to_string(), true)],
        floats: vec![("mix".to_string(), 0.5)],
        ..OptionSnapshot::default()
    };

    println!("n={n} tile={shape}");

    let mut out = Vec::new();
    let t0 = Instant::now();
    for _ in 0..n {
        encode_inference_request_into(&mut out, "blend", &options, std::slice::from_ref(&tile));
        std::hint::black_box(&out);
    }
    report("encode_inference_request", n, t0);

    let payload = encode_inference_response(std::slice::from_ref(&tile));
    let t0 = Instant::now();
    for _ in 0..n {
        let r = decode_response(&payload);
        std::hint::black_box(r.is_ok());
    }
    report("decode_inference_response", n, t0);
}

fn report(name: &str, n: u64, t0: Instant) {
    let dt = t0.elapsed().as_secs_f64();
    println!(
        "{name}: {:>10.0} it/s  {:>10.3} us/it",
        (n as f64) / dt,
        (dt * 1e6) / (n as f64)
    );
}

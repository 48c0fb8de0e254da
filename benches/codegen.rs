//! Benchmark: front end (parse + resolve) vs generation vs the whole pipeline for the
//! Ethernet/IPv4/IPv6/TCP/UDP demo parser.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fppc::{compile, parse, resolve, Options, Program};

const TUNNEL: &str = include_str!("../demos/tunnel.fpp");

fn bench_codegen(c: &mut Criterion) {
    c.bench_function("parse_resolve_tunnel", |b| {
        b.iter(|| {
            let description = parse(black_box(TUNNEL)).expect("parse");
            resolve(&description).expect("resolve")
        })
    });

    let program = resolve(&parse(TUNNEL).expect("parse")).expect("resolve");
    c.bench_function("build_generate_tunnel", |b| {
        b.iter(|| {
            Program::build(black_box(&program), Options::default())
                .expect("build")
                .generate()
        })
    });

    c.bench_function("compile_tunnel", |b| {
        b.iter(|| compile(black_box(TUNNEL), &Options::default()).expect("compile"))
    });
}

criterion_group!(benches, bench_codegen);
criterion_main!(benches);

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use kcp2k_codec::{Channel, Header, Opcode};

fn criterion_benchmark(c: &mut Criterion) {
    let mut datagram = Vec::new();
    Header::new(Channel::Reliable, [1, 2, 3, 4]).encode(&mut datagram);
    datagram.extend_from_slice(&Opcode::Data.frame(b"hello world"));

    let mut framing = c.benchmark_group("framing");
    framing.throughput(Throughput::Elements(1));
    framing.bench_function("decode_header_and_opcode", |bencher| {
        bencher.iter(|| {
            let (header, body) = Header::decode(&datagram).unwrap();
            if header.channel == Channel::Reliable {
                Opcode::parse(body).unwrap();
            }
        })
    });

    framing.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

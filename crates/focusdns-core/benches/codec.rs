//! Benchmarks for the per-packet hot path.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use focusdns_core::filter::{DomainBlockRegistry, MatchKind, RuleSpec};
use focusdns_core::packet::{build_block_response, build_dns_query, inspect_dns_query, ResponseOptions};

fn bench_inspect(c: &mut Criterion) {
    let query = build_dns_query("www.video.example", 0x4242).unwrap_or_default();
    let tcp = {
        let mut packet = query.clone();
        packet[9] = 6;
        packet
    };

    let mut group = c.benchmark_group("inspect");
    group.throughput(Throughput::Elements(1));
    group.bench_function("dns_query", |b| b.iter(|| inspect_dns_query(black_box(&query))));
    group.bench_function("non_udp", |b| b.iter(|| inspect_dns_query(black_box(&tcp))));
    group.finish();
}

fn bench_response(c: &mut Criterion) {
    let query = build_dns_query("www.video.example", 0x4242).unwrap_or_default();
    let options = ResponseOptions::default();
    let Some(dns) = inspect_dns_query(&query) else {
        return;
    };

    c.bench_function("build_block_response", |b| {
        b.iter(|| {
            build_block_response(
                black_box(&query),
                dns.ip.header_len(),
                dns.dns_offset(),
                &dns.query,
                &options,
            )
        })
    });
}

fn bench_classify(c: &mut Criterion) {
    let registry = DomainBlockRegistry::default();
    let mut rules: Vec<RuleSpec> = (0..1_000)
        .map(|i| RuleSpec::new(format!("site{i}.example"), MatchKind::Subdomain))
        .collect();
    rules.push(RuleSpec::new("casino", MatchKind::Keyword));
    rules.push(RuleSpec::pattern("shorts", r"^shorts\."));
    registry.replace_rules(&rules);

    let mut group = c.benchmark_group("classify");
    for name in [
        "site500.example",
        "a.b.c.site999.example",
        "onlinecasino.test",
        "www.unlisted.example",
        "connectivitycheck.gstatic.com",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), name, |b, name| {
            b.iter(|| registry.classify(black_box(name)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_inspect, bench_response, bench_classify);
criterion_main!(benches);

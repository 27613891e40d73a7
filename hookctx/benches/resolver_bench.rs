//! Benchmarks for action ordering, header encoding and node nesting.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hookctx::codec::PropagationCodec;
use hookctx::context::{ContextNode, ContextValue, DataMap, KeyPolicy, PropagationPolicy};
use hookctx::resolver::{resolve, ActionCallDescriptor};
use std::sync::Arc;

fn chain(len: usize) -> Vec<ActionCallDescriptor> {
    (0..len)
        .rev()
        .map(|i| {
            let d = ActionCallDescriptor::new(format!("step{i:05}")).with_writes([format!("k{i}")]);
            if i == 0 {
                d
            } else {
                d.with_reads([format!("k{}", i - 1)])
            }
        })
        .collect()
}

fn fan_in(len: usize) -> Vec<ActionCallDescriptor> {
    let mut descriptors: Vec<ActionCallDescriptor> = (0..len)
        .map(|i| {
            ActionCallDescriptor::new(format!("transform{i:03}"))
                .with_reads(["shared"])
                .with_writes(["shared"])
        })
        .collect();
    descriptors.push(ActionCallDescriptor::new("producer").with_writes(["shared"]));
    descriptors.push(ActionCallDescriptor::new("consumer").with_reads(["shared"]));
    descriptors
}

fn resolver_benchmark(c: &mut Criterion) {
    let long_chain = chain(1_000);
    c.bench_function("resolve_chain_1000", |b| {
        b.iter(|| resolve(black_box(long_chain.clone())))
    });

    let wide = fan_in(100);
    c.bench_function("resolve_fan_in_100", |b| {
        b.iter(|| resolve(black_box(wide.clone())))
    });
}

fn codec_benchmark(c: &mut Criterion) {
    let codec = PropagationCodec::default();
    let mut data = DataMap::new();
    data.insert("service".to_string(), ContextValue::from("checkout"));
    data.insert("user".to_string(), ContextValue::from("alice smith"));
    data.insert("sampled".to_string(), ContextValue::Bool(true));
    data.insert("pi".to_string(), ContextValue::Double(3.14));
    data.insert("retries".to_string(), ContextValue::Int(3));

    let header = codec.encode(&data).unwrap_or_default();
    c.bench_function("codec_encode", |b| b.iter(|| codec.encode(black_box(&data))));
    c.bench_function("codec_decode", |b| b.iter(|| codec.decode(black_box(&header))));
}

fn node_benchmark(c: &mut Criterion) {
    let policy = Arc::new(
        PropagationPolicy::new()
            .with_key("service", KeyPolicy::new().down())
            .with_key("calls", KeyPolicy::new().up()),
    );
    let root = ContextNode::root(policy);
    root.set_data("service", "checkout");
    root.activate().ok();

    c.bench_function("open_activate_close_child", |b| {
        b.iter(|| {
            let child = ContextNode::child_of(&root);
            child.activate().ok();
            black_box(child.get_data("service"));
            child.set_data("calls", 1);
            child.close().ok();
        })
    });

    root.close().ok();
}

criterion_group!(benches, resolver_benchmark, codec_benchmark, node_benchmark);
criterion_main!(benches);

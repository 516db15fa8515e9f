#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use varexport::types::{ClassDef, FieldDecl};
use varexport::{GraphPreparer, Restorer, TypeCatalog, TypeRegistry, Value, VarExporter};

fn bench_registry() -> Arc<TypeRegistry> {
    let node = ClassDef::builder("Node")
        .field(FieldDecl::new("id").default_value(0i64))
        .field(FieldDecl::new("label"))
        .field(FieldDecl::new("next"))
        .field(FieldDecl::new("peer"))
        .build();
    Arc::new(TypeRegistry::new(TypeCatalog::new().with(&node)))
}

/// `count` nodes held by one list, linked in rings of 16. Every node also points at a node
/// of the first ring, and each ring shares one label cell.
fn generate_graph(registry: &TypeRegistry, count: usize) -> Value {
    let key = |name| registry.field_key("Node", name).expect("Node declares the field");
    let (id, label, next, peer) = (key("id"), key("label"), key("next"), key("peer"));

    let nodes: Vec<_> = (0..count)
        .map(|_| registry.instantiate("Node").expect("Node is instantiable"))
        .collect();
    let mut shared = Value::Null;
    for (i, node) in nodes.iter().enumerate() {
        let ring = i - i % 16;
        if i == ring {
            shared = Value::cell(Value::str(format!("ring-{}", i / 16)));
        }
        let next_in_ring = (ring + (i + 1) % 16).min(count - 1);
        node.write_slot(id.clone(), Value::Int(i as i64));
        node.write_slot(label.clone(), shared.clone());
        node.write_slot(next.clone(), Value::from(nodes[next_in_ring].clone()));
        node.write_slot(peer.clone(), Value::from(nodes[i % 16].clone()));
    }
    Value::list(nodes.into_iter().map(Value::from))
}

// --- BENCHMARKS ---

fn bench_prepare(c: &mut Criterion) {
    let registry = bench_registry();
    let mut group = c.benchmark_group("Prepare");

    for count in [1_000usize, 10_000] {
        let root = generate_graph(&registry, count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &root, |b, root| {
            let preparer = GraphPreparer::new(&registry);
            b.iter(|| preparer.prepare(black_box(root)).expect("prepare failed"));
        });
    }
    group.finish();
}

fn bench_export_import(c: &mut Criterion) {
    let count = 10_000;
    let registry = bench_registry();
    let root = generate_graph(&registry, count);

    println!("Export/import node count: {}", count);

    let mut group = c.benchmark_group("Artifact");
    group.throughput(Throughput::Elements(count as u64));

    for (name, compress) in [("uncompressed", false), ("lz4", true)] {
        let exporter = VarExporter::builder()
            .compression(compress)
            .build(registry.clone());
        let bytes = exporter.export(&root).expect("export failed");
        println!("{name} artifact size: {} bytes", bytes.len());

        group.bench_function(format!("export_{name}"), |b| {
            b.iter(|| exporter.export(black_box(&root)).expect("export failed"));
        });
        group.bench_function(format!("import_{name}"), |b| {
            b.iter(|| exporter.import(black_box(&bytes)).expect("import failed"));
        });
    }

    let program = GraphPreparer::new(&registry)
        .prepare(&root)
        .expect("prepare failed");
    group.bench_function("restore_in_memory", |b| {
        let restorer = Restorer::new(&registry);
        b.iter(|| restorer.restore(black_box(&program)).expect("restore failed"));
    });

    group.finish();
}

criterion_group!(benches, bench_prepare, bench_export_import);
criterion_main!(benches);

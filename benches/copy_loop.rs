use std::collections::BTreeMap;
use std::sync::Arc;

use colcopy::config::CopyConfig;
use colcopy::engine::{CancellationToken, CopyEngine, RunOptions, prepare};
use colcopy::memory::{
    CellValue, ColumnDocument, MemoryDestination, MemorySource, MemoryTypeSystem, SchemaDocument,
    TableDocument,
};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

const SCHEMA_YAML: &str = r#"
types:
  - { name: any }
  - { name: text, parent: any, text: true }
  - { name: "INSDC:dna:text", parent: text }
  - { name: "INSDC:quality:phred", parent: any }
  - { name: U8, parent: any }
columns:
  - { name: READ, types: ["INSDC:dna:text"] }
  - { name: QUALITY, types: ["INSDC:quality:phred"] }
"#;

fn column(name: &str, type_name: &str, cells: Vec<CellValue>) -> ColumnDocument {
    ColumnDocument {
        name: name.to_string(),
        types: vec![type_name.to_string()],
        default_type: None,
        elem_bits: 8,
        cells,
    }
}

fn generate_table(rows: usize) -> TableDocument {
    let bases = ["A", "C", "G", "T"];
    let reads = (0..rows)
        .map(|i| CellValue::Text((0..150).map(|j| bases[(i + j) % 4]).collect()))
        .collect();
    let qualities = (0..rows)
        .map(|i| CellValue::Values((0..150).map(|j| ((i + j) % 41) as u64).collect()))
        .collect();
    let filters = (0..rows)
        .map(|i| CellValue::Values(vec![[0, 0, 1, 3][i % 4]]))
        .collect();
    TableDocument {
        first_row: 1,
        columns: vec![
            column("READ", "INSDC:dna:text", reads),
            column("QUALITY", "INSDC:quality:phred", qualities),
            column("READ_FILTER", "U8", filters),
        ],
        checksums: BTreeMap::new(),
        index: None,
    }
}

fn bench_copy_loop(c: &mut Criterion) {
    let schema: SchemaDocument = serde_yaml::from_str(SCHEMA_YAML).expect("schema");
    let types = Arc::new(MemoryTypeSystem::from_schema(&schema).expect("type system"));
    let source = MemorySource::new(generate_table(20_000)).expect("source");
    let config = CopyConfig {
        redactable_columns: vec!["QUALITY".to_string()],
        ..CopyConfig::default()
    };

    let mut group = c.benchmark_group("copy_loop");

    group.bench_function("filtered_with_redaction", |b| {
        b.iter_batched(
            || MemoryDestination::new(&schema, Arc::clone(&types)),
            |dest| {
                let ctx = prepare(
                    &source,
                    &dest,
                    types.as_ref(),
                    &config,
                    RunOptions::default(),
                )
                .expect("prepare");
                let mut engine = CopyEngine::bind(ctx, &source, &dest).expect("bind");
                engine
                    .run(&CancellationToken::new(), None)
                    .expect("copy rows");
                dest.finish().expect("committed table")
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_copy_loop);
criterion_main!(benches);

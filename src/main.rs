use std::collections::BTreeMap;
use std::sync::Arc;

use stratadb::clustering::DisjointClustersAlgo;
use stratadb::config::EngineConfig;
use stratadb::engine::Engine;
use stratadb::storage::chunk::Chunk;
use stratadb::storage::table::{ColumnDefinition, Table};
use stratadb::types::{DataType, Value};

// Small smoke-test entry point: load a demo table, cluster it, print the
// runtime statistics document.
fn main() {
    tracing_subscriber::fmt::init();

    let mut config = EngineConfig::new();
    // The demo clusters are tiny, keep them from collapsing into one merge
    // chunk.
    config.small_chunk_threshold = 100;
    let engine = Engine::with_config(config);
    let table = Arc::new(Table::new(
        vec![
            ColumnDefinition::new("region", DataType::Int, false),
            ColumnDefinition::new("amount", DataType::Int, false),
        ],
        1024,
    ));

    for chunk_index in 0..8i64 {
        let chunk = Chunk::new_mutable(&table.column_types());
        for row in 0..1000i64 {
            let region = (chunk_index * 1000 + row) % 97;
            let amount = (row * 37 + chunk_index) % 10_000;
            chunk.append_row(&[Some(Value::Int(region)), Some(Value::Int(amount))], 0);
        }
        chunk.finalize();
        table.append_chunk(Arc::new(chunk));
    }
    engine.storage.add_table("sales", table);

    let config = BTreeMap::from([(
        "sales".to_string(),
        vec![("region".to_string(), 8), ("amount".to_string(), 1)],
    )]);
    let mut algo = DisjointClustersAlgo::new(&engine, config);
    let statistics = algo.run().expect("clustering failed");
    println!("{}", serde_json::to_string_pretty(&statistics.to_json()).unwrap());
}

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub mod chunk;
pub mod dictionary;
pub mod mvcc;
pub mod segment;
pub mod table;

use table::Table;

/// Process-wide table registry. Tables are shared by reference; dropping a
/// name does not invalidate handles that operators still hold.
pub struct Storage {
    tables: RwLock<BTreeMap<String, Arc<Table>>>,
}

impl Storage {
    pub fn new() -> Storage {
        Storage { tables: RwLock::new(BTreeMap::new()) }
    }

    pub fn add_table(&self, name: &str, table: Arc<Table>) {
        let mut tables = self.tables.write();
        assert!(!tables.contains_key(name), "table {} already exists", name);
        tables.insert(name.to_string(), table);
    }

    pub fn get_table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.read().get(name).cloned()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }
}

impl Default for Storage {
    fn default() -> Self {
        Storage::new()
    }
}

//! Nutrition record store.
//!
//! Thin repository behind `NutritionStore`: create records, search food
//! names, and look up a record for a classifier label. Two implementations,
//! sqlite for the daemon and in-memory for tests.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// One nutrition record. `id` is assigned by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NutritionRecord {
    pub id: i64,
    pub food: String,
    pub amount_g: f64,
    pub calories: f64,
    pub total_fat_g: f64,
    pub cholesterol_mg: f64,
    pub sodium_mg: f64,
    pub carbohydrates_g: f64,
    pub protein_g: f64,
    pub sugar_g: f64,
}

/// Fields for a record to be created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewNutritionRecord {
    pub food: String,
    pub amount_g: f64,
    pub calories: f64,
    pub total_fat_g: f64,
    pub cholesterol_mg: f64,
    pub sodium_mg: f64,
    pub carbohydrates_g: f64,
    pub protein_g: f64,
    pub sugar_g: f64,
}

impl NewNutritionRecord {
    fn into_record(self, id: i64) -> NutritionRecord {
        NutritionRecord {
            id,
            food: self.food,
            amount_g: self.amount_g,
            calories: self.calories,
            total_fat_g: self.total_fat_g,
            cholesterol_mg: self.cholesterol_mg,
            sodium_mg: self.sodium_mg,
            carbohydrates_g: self.carbohydrates_g,
            protein_g: self.protein_g,
            sugar_g: self.sugar_g,
        }
    }
}

pub trait NutritionStore: Send {
    /// Insert a record and return it with its assigned id.
    fn create(&mut self, record: NewNutritionRecord) -> Result<NutritionRecord>;

    /// Food names whose name contains `query`, case-insensitive, in
    /// storage order.
    fn search_names(&mut self, query: &str) -> Result<Vec<String>>;

    /// First record whose food name contains `label`, case-insensitive.
    /// No match is a normal outcome, not an error.
    fn find_by_label(&mut self, label: &str) -> Result<Option<NutritionRecord>>;
}

// ----------------------------------------------------------------------------
// Sqlite store
// ----------------------------------------------------------------------------

pub struct SqliteNutritionStore {
    conn: Connection,
}

impl SqliteNutritionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS nutrition (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              food TEXT NOT NULL,
              amount_g REAL NOT NULL,
              calories REAL NOT NULL,
              total_fat_g REAL NOT NULL,
              cholesterol_mg REAL NOT NULL,
              sodium_mg REAL NOT NULL,
              carbohydrates_g REAL NOT NULL,
              protein_g REAL NOT NULL,
              sugar_g REAL NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<NutritionRecord> {
        Ok(NutritionRecord {
            id: row.get(0)?,
            food: row.get(1)?,
            amount_g: row.get(2)?,
            calories: row.get(3)?,
            total_fat_g: row.get(4)?,
            cholesterol_mg: row.get(5)?,
            sodium_mg: row.get(6)?,
            carbohydrates_g: row.get(7)?,
            protein_g: row.get(8)?,
            sugar_g: row.get(9)?,
        })
    }
}

impl NutritionStore for SqliteNutritionStore {
    fn create(&mut self, record: NewNutritionRecord) -> Result<NutritionRecord> {
        if record.food.trim().is_empty() {
            return Err(anyhow!("food name must not be empty"));
        }
        self.conn.execute(
            r#"
            INSERT INTO nutrition(food, amount_g, calories, total_fat_g, cholesterol_mg,
                                  sodium_mg, carbohydrates_g, protein_g, sugar_g)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.food,
                record.amount_g,
                record.calories,
                record.total_fat_g,
                record.cholesterol_mg,
                record.sodium_mg,
                record.carbohydrates_g,
                record.protein_g,
                record.sugar_g
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(record.into_record(id))
    }

    fn search_names(&mut self, query: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT food FROM nutrition WHERE instr(lower(food), lower(?1)) > 0 ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![query])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.get(0)?);
        }
        Ok(out)
    }

    fn find_by_label(&mut self, label: &str) -> Result<Option<NutritionRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, food, amount_g, calories, total_fat_g, cholesterol_mg,
                   sodium_mg, carbohydrates_g, protein_g, sugar_g
            FROM nutrition
            WHERE instr(lower(food), lower(?1)) > 0
            ORDER BY id ASC LIMIT 1
            "#,
        )?;
        let mut rows = stmt.query(params![label])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_record(row)?)),
            None => Ok(None),
        }
    }
}

// ----------------------------------------------------------------------------
// In-memory store
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryNutritionStore {
    records: Vec<NutritionRecord>,
    next_id: i64,
}

impl InMemoryNutritionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NutritionStore for InMemoryNutritionStore {
    fn create(&mut self, record: NewNutritionRecord) -> Result<NutritionRecord> {
        if record.food.trim().is_empty() {
            return Err(anyhow!("food name must not be empty"));
        }
        self.next_id += 1;
        let record = record.into_record(self.next_id);
        self.records.push(record.clone());
        Ok(record)
    }

    fn search_names(&mut self, query: &str) -> Result<Vec<String>> {
        let query = query.to_lowercase();
        Ok(self
            .records
            .iter()
            .filter(|r| r.food.to_lowercase().contains(&query))
            .map(|r| r.food.clone())
            .collect())
    }

    fn find_by_label(&mut self, label: &str) -> Result<Option<NutritionRecord>> {
        let label = label.to_lowercase();
        Ok(self
            .records
            .iter()
            .find(|r| r.food.to_lowercase().contains(&label))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(food: &str) -> NewNutritionRecord {
        NewNutritionRecord {
            food: food.to_string(),
            amount_g: 100.0,
            calories: 52.0,
            total_fat_g: 0.2,
            cholesterol_mg: 0.0,
            sodium_mg: 1.0,
            carbohydrates_g: 14.0,
            protein_g: 0.3,
            sugar_g: 10.0,
        }
    }

    fn seed(store: &mut dyn NutritionStore) -> Result<()> {
        store.create(sample("Apple"))?;
        store.create(sample("Pineapple"))?;
        store.create(sample("Banana"))?;
        Ok(())
    }

    fn check_search(store: &mut dyn NutritionStore) -> Result<()> {
        seed(store)?;
        assert_eq!(store.search_names("app")?, vec!["Apple", "Pineapple"]);
        assert_eq!(store.search_names("APP")?, vec!["Apple", "Pineapple"]);
        assert!(store.search_names("kiwi")?.is_empty());
        Ok(())
    }

    fn check_find_by_label(store: &mut dyn NutritionStore) -> Result<()> {
        store.create(sample("Tomato, raw"))?;
        let hit = store.find_by_label("tomato")?.expect("match");
        assert_eq!(hit.food, "Tomato, raw");
        assert!(store.find_by_label("durian")?.is_none());
        Ok(())
    }

    #[test]
    fn in_memory_assigns_ids() -> Result<()> {
        let mut store = InMemoryNutritionStore::new();
        let a = store.create(sample("Apple"))?;
        let b = store.create(sample("Banana"))?;
        assert_ne!(a.id, b.id);
        Ok(())
    }

    #[test]
    fn in_memory_search() -> Result<()> {
        check_search(&mut InMemoryNutritionStore::new())
    }

    #[test]
    fn in_memory_find_by_label() -> Result<()> {
        check_find_by_label(&mut InMemoryNutritionStore::new())
    }

    #[test]
    fn sqlite_search() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nutricam.db");
        let mut store = SqliteNutritionStore::open(&path.to_string_lossy())?;
        check_search(&mut store)
    }

    #[test]
    fn sqlite_find_by_label() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nutricam.db");
        let mut store = SqliteNutritionStore::open(&path.to_string_lossy())?;
        check_find_by_label(&mut store)
    }

    #[test]
    fn create_rejects_empty_food_name() {
        let mut store = InMemoryNutritionStore::new();
        assert!(store.create(sample("  ")).is_err());
    }
}

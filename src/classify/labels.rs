use anyhow::{anyhow, Result};

/// Label table mapping model output indices to food names.
///
/// The label set is deployment configuration, not a source constant: it
/// comes from the config file alongside the model path.
#[derive(Clone, Debug, Default)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Resolve a class index to its label.
    pub fn label(&self, class: usize) -> Result<&str> {
        self.labels
            .get(class)
            .map(String::as_str)
            .ok_or_else(|| {
                anyhow!(
                    "class index {} out of range for {} labels",
                    class,
                    self.labels.len()
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_in_range_indices() -> Result<()> {
        let table = LabelTable::new(vec!["apple".into(), "tomato".into()]);
        assert_eq!(table.label(1)?, "tomato");
        Ok(())
    }

    #[test]
    fn rejects_out_of_range_indices() {
        let table = LabelTable::new(vec!["apple".into()]);
        assert!(table.label(3).is_err());
    }
}

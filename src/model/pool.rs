use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub usage: u64,
    #[serde(default, rename = "included-in")]
    pub included_in: Option<String>,
}

impl Pool {
    /// Pools without a size, or nested inside another pool, are not counted in totals.
    pub fn is_accounted(&self) -> bool {
        self.size > 0 && self.included_in.is_none()
    }

    pub fn ratio(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.usage as f64 / self.size as f64
    }
}

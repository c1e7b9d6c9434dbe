//! Product master record (商品主数据)
//!
//! Written by the external ETL; this service only reads it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub code_product: i64,
    pub barcode: String,
    pub name_product: Option<String>,
    pub name_brand: Option<String>,
}

impl Product {
    /// Display name for change logs: product name, then brand name.
    pub fn display_name(&self) -> Option<&str> {
        self.name_product
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.name_brand.as_deref().filter(|n| !n.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(name: Option<&str>, brand: Option<&str>) -> Product {
        Product {
            code_product: 1,
            barcode: "885".into(),
            name_product: name.map(Into::into),
            name_brand: brand.map(Into::into),
        }
    }

    #[test]
    fn test_display_name_falls_back_to_brand() {
        assert_eq!(product(Some("Milk"), Some("Dutchie")).display_name(), Some("Milk"));
        assert_eq!(product(None, Some("Dutchie")).display_name(), Some("Dutchie"));
        assert_eq!(product(Some("  "), Some("Dutchie")).display_name(), Some("Dutchie"));
        assert_eq!(product(None, None).display_name(), None);
    }
}

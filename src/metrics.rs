use crate::model::{ImageRecord, ScanReport};

/// Derived numbers shown on the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogMetrics {
    pub images: usize,
    pub total_bytes: u64,
    pub untagged: usize,
    pub eligible: usize,
    pub eligible_bytes: u64,
}

impl CatalogMetrics {
    pub fn from_report(report: &ScanReport) -> Self {
        let mut m = Self::from_images(report.entries.iter().map(|e| &e.record));
        for e in report.eligible() {
            m.eligible += 1;
            m.eligible_bytes += e.record.size_bytes;
        }
        m
    }

    pub fn from_images<'a>(images: impl IntoIterator<Item = &'a ImageRecord>) -> Self {
        let mut m = Self::default();
        for img in images {
            m.images += 1;
            m.total_bytes += img.size_bytes;
            if img.tags.is_empty() {
                m.untagged += 1;
            }
        }
        m
    }
}

/// Binary-prefixed size, e.g. `1.5 GiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

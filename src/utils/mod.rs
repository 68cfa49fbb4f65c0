pub mod image_ops;
pub mod metrics;
pub mod natural_sort;

// Re-export commonly used items
pub use image_ops::{
    crop_region, crop_regions_async, decode_image_async, encode_png, load_image_async, to_data_url,
};
pub use metrics::{Metrics, MetricsSnapshot, Stage};
pub use natural_sort::natural_cmp;

pub mod aggregate;
pub mod etl;
pub mod extraction;
pub mod geo;
pub mod margin;
pub mod model;
pub mod prices;
pub mod raster;
pub mod scaffold;

pub use crate::domain::model::{Dataset, TransformResult};
pub use crate::domain::ports::{ConfigProvider, Pipeline, Storage};
pub use crate::utils::error::Result;

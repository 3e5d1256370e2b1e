pub mod margin_pipeline;

pub use margin_pipeline::MarginPipeline;

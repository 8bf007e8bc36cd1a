mod query_parser;
pub(crate) mod record_renderer;
mod soa_builder;

pub use query_parser::{ParsedQuestion, QueryParser};
pub use record_renderer::{RecordRenderer, RenderRequest, RenderedRecords, TtlPolicy, SRV_PRIORITY};
pub use soa_builder::{SoaBuilder, SoaTimers};

mod catalog_data_fetcher;

pub use catalog_data_fetcher::{CatalogDataFetcher, FetchContext};

mod dashmap_catalog;

pub use dashmap_catalog::{
    CatalogNode, CatalogSeed, CatalogService, DashMapCatalog, PreparedQuery, ServiceKind,
    DEFAULT_TENANCY,
};

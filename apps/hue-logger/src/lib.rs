pub mod bridge;
pub mod config;
pub mod mapper;
pub mod metric;
pub mod sampler;
pub mod writer;

#[cfg(test)]
pub mod test_support;

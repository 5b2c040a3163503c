use serde::Deserialize;

use crate::holder::BuildOptions;

/// Caller-facing configuration. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CodecOptions {
    pub allow_complex_headers: bool,
    pub include_properties: bool,
    /// Base table name for the aggregation repository.
    pub repository_name: String,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            allow_complex_headers: false,
            include_properties: true,
            repository_name: "aggregation".to_string(),
        }
    }
}

impl From<&CodecOptions> for BuildOptions {
    fn from(options: &CodecOptions) -> Self {
        BuildOptions {
            allow_complex_headers: options.allow_complex_headers,
            include_properties: options.include_properties,
        }
    }
}

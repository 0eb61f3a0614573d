//! Pipeline-name inference for records written before classification fields
//! existed.

const UNKNOWN: &str = "unknown";

/// Derive a pipeline name from a record's file paths.
///
/// `/apps/data/pipeline/sales_etl/output-20250808.data` yields `sales_etl`;
/// `/apps/data/pipeline/logs/sales_etl-20250808.log` yields `sales_etl`.
/// Anything else yields `"unknown"`.
pub fn infer_pipeline_name(output_file: &str, log_file: &str) -> String {
    if output_file.contains("/pipeline/") {
        let parts: Vec<&str> = output_file.split('/').collect();
        let from_output = parts.windows(2).find_map(|pair| {
            let (part, next) = (pair[0], pair[1]);
            (part == "pipeline" && !next.is_empty() && !next.starts_with("output-")).then_some(next)
        });
        if let Some(name) = from_output {
            return name.to_string();
        }
    }

    if log_file.contains("/logs/") {
        let file_name = log_file.rsplit('/').next().unwrap_or_default();
        if let Some((prefix, _)) = file_name.split_once('-') {
            return prefix.to_string();
        }
    }

    UNKNOWN.to_string()
}

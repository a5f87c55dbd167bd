//! Version information for modalstack

/// The version of modalstack, set at build time
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of the application
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// The description of the application
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get the full version string
pub fn full_version() -> String {
    format!("{} v{}", APP_NAME, VERSION)
}

/// Get build information string
pub fn build_info() -> String {
    format!(
        "{} v{}\n{}\nBuilt with Rust {}",
        APP_NAME,
        VERSION,
        APP_DESCRIPTION,
        rustc_version()
    )
}

fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "modalstack");
    }

    #[test]
    fn test_build_info() {
        let info = build_info();
        assert!(info.starts_with(&full_version()));
        assert!(info.contains("Rust"));
    }
}

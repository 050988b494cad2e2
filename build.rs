/// Expose the compilation target triple as an environment variable at build time.
///
/// `revcache version` reports it via `constants::TARGET`.
fn main() {
    println!(
        "cargo:rustc-env=TARGET={}",
        std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string())
    );
}

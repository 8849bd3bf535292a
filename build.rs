fn main() {
    // Stamped into `laserstream::BUILD_DATE`; the CLI logs it at debug level
    // next to the version so bug reports name the exact build.
    let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    println!("cargo:rustc-env=BUILD_DATE={}", stamp);
}
